//! Controller configuration for xyctl
//!
//! Provides configuration file handling and validation.
//! Supports JSON and TOML file formats stored in platform-specific directories.
//!
//! Configuration is organized into logical sections:
//! - Connection settings (port, baud rate)
//! - Motion settings (jog step, default feed, envelope, junction deviation)
//! - Streaming settings (in-flight window, drain bounds, save cadence)
//! - Liveness settings (ping debounce, status poll rate)
//! - Timing settings (command and handshake timeouts, pulse delay)
//! - Real-time override code table

use crate::error::{ConfigError, SettingsError, SettingsResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application directory name under the platform config/data dirs
pub const APP_DIR_NAME: &str = "xyctl";

/// Connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Fixed port; `None` means auto-discover
    pub port: Option<String>,
    /// Baud rate for serial connections
    pub baud_rate: u32,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115200,
        }
    }
}

/// Motion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionSettings {
    /// Distance of one jog step
    pub step_size: f64,
    /// Feed rate established before streaming
    pub default_feed_rate: f64,
    /// Half-extent of the standard envelope around the origin
    pub envelope_half_extent: f64,
    /// `$11` value applied on connect when none is persisted
    pub default_junction_deviation: f64,
}

impl Default for MotionSettings {
    fn default() -> Self {
        Self {
            step_size: 1.0,
            default_feed_rate: 1000.0,
            envelope_half_extent: 20.0,
            default_junction_deviation: 0.01,
        }
    }
}

/// Streaming settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingSettings {
    /// Maximum unacknowledged fast-path lines
    pub window_capacity: usize,
    /// Non-blocking ack drain slice when the window is full
    pub ack_drain_ms: u64,
    /// Backlog drain bound before a synchronous line
    pub backlog_drain_ms: u64,
    /// Drain bound at the end of a session
    pub final_drain_ms: u64,
    /// Override re-synchronization cadence, in lines
    pub resync_every_lines: usize,
    /// Position save cadence, in lines
    pub position_save_every_lines: usize,
    /// Minimum time between two position saves
    pub position_save_min_interval_ms: u64,
    /// Give up when a full window stays unacknowledged this long
    pub window_stall_timeout_ms: u64,
    /// Sleep granularity of hold and wait loops
    pub hold_poll_ms: u64,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            window_capacity: 12,
            ack_drain_ms: 80,
            backlog_drain_ms: 1000,
            final_drain_ms: 2000,
            resync_every_lines: 5,
            position_save_every_lines: 10,
            position_save_min_interval_ms: 1000,
            window_stall_timeout_ms: 30_000,
            hold_poll_ms: 10,
        }
    }
}

/// Liveness settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LivenessSettings {
    /// A previous alive result is trusted for this long
    pub ping_interval_ms: u64,
    /// How long one ping waits for a reply
    pub ping_timeout_ms: u64,
    /// Consecutive failed pings before the link is declared dead
    pub fail_threshold: u32,
    /// Minimum time between two status queries
    pub status_poll_interval_ms: u64,
}

impl Default for LivenessSettings {
    fn default() -> Self {
        Self {
            ping_interval_ms: 2000,
            ping_timeout_ms: 400,
            fail_threshold: 10,
            status_poll_interval_ms: 150,
        }
    }
}

/// Timing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// Line command reply timeout
    pub command_timeout_ms: u64,
    /// Identity reply window per firmware family
    pub handshake_window_ms: u64,
    /// Delay between two override pulses
    pub override_pulse_delay_ms: u64,
    /// Quiet period used to flush leftover handshake output
    pub settle_ms: u64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            command_timeout_ms: 1500,
            handshake_window_ms: 1000,
            override_pulse_delay_ms: 15,
            settle_ms: 50,
        }
    }
}

/// Real-time feed override byte table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideCodeTable {
    /// Reset 0x93, +10 0x91, -10 0x92, +1 0x94, -1 0x95
    #[default]
    Legacy,
    /// Stock GRBL 1.1: reset 0x90, +10 0x91, -10 0x92, +1 0x93, -1 0x94
    Grbl11,
}

impl std::fmt::Display for OverrideCodeTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Legacy => write!(f, "legacy"),
            Self::Grbl11 => write!(f, "grbl11"),
        }
    }
}

/// Complete controller configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ControllerConfig {
    /// Connection settings
    pub connection: ConnectionSettings,
    /// Motion settings
    pub motion: MotionSettings,
    /// Streaming settings
    pub streaming: StreamingSettings,
    /// Liveness settings
    pub liveness: LivenessSettings,
    /// Timing settings
    pub timing: TimingSettings,
    /// Override byte table
    pub override_codes: OverrideCodeTable,
    /// Directory for sidecar files; platform data dir when unset
    pub data_dir: Option<PathBuf>,
}

impl ControllerConfig {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Default config file location (`<config_dir>/xyctl/config.toml`)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join("config.toml"))
    }

    /// Load from the default location, falling back to defaults when absent
    pub fn load_or_default() -> SettingsResult<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SettingsError::LoadError(format!("{}: {}", path.display(), e)))?;

        let config: Self = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content)?
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            toml::from_str(&content)?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.display().to_string()).into());
        };

        config.validate()?;
        Ok(config)
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::to_string_pretty(self)?
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            toml::to_string_pretty(self)?
        } else {
            return Err(ConfigError::UnsupportedFormat(path.display().to_string()).into());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)
            .map_err(|e| SettingsError::SaveError(format!("{}: {}", path.display(), e)))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> SettingsResult<()> {
        fn out_of_range(key: &str, value: impl ToString) -> SettingsError {
            ConfigError::ValueOutOfRange {
                key: key.to_string(),
                value: value.to_string(),
            }
            .into()
        }

        if self.connection.baud_rate == 0 {
            return Err(out_of_range("connection.baud_rate", self.connection.baud_rate));
        }
        if self.motion.step_size <= 0.0 {
            return Err(out_of_range("motion.step_size", self.motion.step_size));
        }
        if self.motion.default_feed_rate <= 0.0 {
            return Err(out_of_range(
                "motion.default_feed_rate",
                self.motion.default_feed_rate,
            ));
        }
        if self.motion.envelope_half_extent <= 0.0 {
            return Err(out_of_range(
                "motion.envelope_half_extent",
                self.motion.envelope_half_extent,
            ));
        }
        if !(0.005..=1.0).contains(&self.motion.default_junction_deviation) {
            return Err(out_of_range(
                "motion.default_junction_deviation",
                self.motion.default_junction_deviation,
            ));
        }
        if self.streaming.window_capacity == 0 {
            return Err(out_of_range(
                "streaming.window_capacity",
                self.streaming.window_capacity,
            ));
        }
        if self.streaming.resync_every_lines == 0 {
            return Err(out_of_range(
                "streaming.resync_every_lines",
                self.streaming.resync_every_lines,
            ));
        }
        if self.streaming.position_save_every_lines == 0 {
            return Err(out_of_range(
                "streaming.position_save_every_lines",
                self.streaming.position_save_every_lines,
            ));
        }
        if self.streaming.hold_poll_ms == 0 {
            return Err(out_of_range("streaming.hold_poll_ms", self.streaming.hold_poll_ms));
        }
        if self.liveness.fail_threshold == 0 {
            return Err(out_of_range(
                "liveness.fail_threshold",
                self.liveness.fail_threshold,
            ));
        }
        if self.timing.command_timeout_ms == 0 {
            return Err(out_of_range(
                "timing.command_timeout_ms",
                self.timing.command_timeout_ms,
            ));
        }
        if self.timing.handshake_window_ms == 0 {
            return Err(out_of_range(
                "timing.handshake_window_ms",
                self.timing.handshake_window_ms,
            ));
        }

        Ok(())
    }

    /// Directory holding sidecar files
    pub fn resolve_data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR_NAME)
        })
    }

    /// Line command reply timeout
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.timing.command_timeout_ms)
    }

    /// Identity reply window per firmware family
    pub fn handshake_window(&self) -> Duration {
        Duration::from_millis(self.timing.handshake_window_ms)
    }

    /// Delay between override pulses
    pub fn pulse_delay(&self) -> Duration {
        Duration::from_millis(self.timing.override_pulse_delay_ms)
    }

    /// Quiet period for flushing leftover output
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.timing.settle_ms)
    }

    /// Ping reply timeout
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness.ping_timeout_ms)
    }

    /// Trust window of a previous alive result
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.liveness.ping_interval_ms)
    }

    /// Status poll rate limit
    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.liveness.status_poll_interval_ms)
    }

    /// Hold/wait loop granularity
    pub fn hold_poll(&self) -> Duration {
        Duration::from_millis(self.streaming.hold_poll_ms)
    }

    /// Ack drain slice when the window is full
    pub fn ack_drain(&self) -> Duration {
        Duration::from_millis(self.streaming.ack_drain_ms)
    }

    /// Backlog drain bound before a synchronous line
    pub fn backlog_drain(&self) -> Duration {
        Duration::from_millis(self.streaming.backlog_drain_ms)
    }

    /// End-of-session drain bound
    pub fn final_drain(&self) -> Duration {
        Duration::from_millis(self.streaming.final_drain_ms)
    }

    /// Window stall timeout
    pub fn window_stall_timeout(&self) -> Duration {
        Duration::from_millis(self.streaming.window_stall_timeout_ms)
    }

    /// Minimum spacing of position saves
    pub fn position_save_interval(&self) -> Duration {
        Duration::from_millis(self.streaming.position_save_min_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = ControllerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.streaming.window_capacity, 12);
        assert_eq!(config.liveness.fail_threshold, 10);
        assert_eq!(config.timing.command_timeout_ms, 1500);
        assert_eq!(config.override_codes, OverrideCodeTable::Legacy);
    }

    #[test]
    fn test_toml_round_trip_keeps_overrides() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");

        let mut config = ControllerConfig::default();
        config.connection.port = Some("/dev/ttyACM0".to_string());
        config.streaming.window_capacity = 8;
        config.override_codes = OverrideCodeTable::Grbl11;
        config.save_to_file(&path).expect("save");

        let loaded = ControllerConfig::load_from_file(&path).expect("load");
        assert_eq!(loaded.connection.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(loaded.streaming.window_capacity, 8);
        assert_eq!(loaded.override_codes, OverrideCodeTable::Grbl11);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "motion": { "step_size": 0.5 } }"#).expect("write");

        let loaded = ControllerConfig::load_from_file(&path).expect("load");
        assert_eq!(loaded.motion.step_size, 0.5);
        assert_eq!(loaded.motion.envelope_half_extent, 20.0);
        assert_eq!(loaded.connection.baud_rate, 115200);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = ControllerConfig::default();
        config.streaming.window_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = ControllerConfig::default();
        config.motion.default_junction_deviation = 2.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unsupported_extension() {
        let config = ControllerConfig::default();
        let result = config.save_to_file(Path::new("config.yaml"));
        assert!(matches!(
            result,
            Err(SettingsError::Config(ConfigError::UnsupportedFormat(_)))
        ));
    }
}
