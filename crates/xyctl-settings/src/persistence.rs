//! Sidecar Persistence
//!
//! Small files kept next to the controller configuration:
//! - `speed.json`: last applied target speed, `{ "velocidad": <10..200> }`
//! - `machine.json`: direction invert mask and junction deviation
//! - `last_position.txt`: last known position as `"<x>,<y>"`
//! - `backups/`: firmware parameter snapshots plus a `latest` copy
//!
//! File formats are kept stable so existing sidecar files stay readable.

use crate::error::{PersistenceError, SettingsError, SettingsResult};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const SPEED_FILE: &str = "speed.json";
const MACHINE_FILE: &str = "machine.json";
const POSITION_FILE: &str = "last_position.txt";
const BACKUP_DIR: &str = "backups";
const BACKUP_PREFIX: &str = "grbl_backup_";
const LATEST_BACKUP: &str = "grbl_backup_latest.json";

/// Persisted target speed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeedRecord {
    /// Target speed percent (10-200)
    pub velocidad: u16,
}

/// Persisted machine preferences re-applied on connect
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MachinePreferences {
    /// `$3` direction invert mask (0-7)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir_invert_mask: Option<u8>,
    /// `$11` junction deviation (0.005-1.0)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub junction_deviation: Option<f64>,
}

/// Firmware parameter snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    /// Capture time
    pub timestamp: String,
    /// Source port
    pub port: String,
    /// Firmware identity line
    pub firmware: String,
    /// Raw dump lines as received
    pub raw: Vec<String>,
    /// Parsed `$n` -> value map
    pub params: BTreeMap<String, String>,
}

impl ConfigSnapshot {
    /// Create a snapshot stamped with the current local time
    pub fn new(
        port: impl Into<String>,
        firmware: impl Into<String>,
        raw: Vec<String>,
        params: BTreeMap<String, String>,
    ) -> Self {
        Self {
            timestamp: Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
            port: port.into(),
            firmware: firmware.into(),
            raw,
            params,
        }
    }

    /// Parameters ordered by their numeric id (`$0`, `$1`, ..., `$132`)
    pub fn ordered_params(&self) -> Vec<(&str, &str)> {
        let mut params: Vec<(&str, &str)> = self
            .params
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        params.sort_by_key(|(key, _)| {
            key.trim_start_matches('$')
                .parse::<u32>()
                .unwrap_or(u32::MAX)
        });
        params
    }
}

/// Sidecar file store rooted at one directory
#[derive(Debug, Clone)]
pub struct SidecarStore {
    dir: PathBuf,
}

impl SidecarStore {
    /// Create a store rooted at `dir` (created lazily on first write)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Directory holding parameter backups
    pub fn backup_dir(&self) -> PathBuf {
        self.dir.join(BACKUP_DIR)
    }

    fn ensure_dir(path: &Path) -> SettingsResult<()> {
        std::fs::create_dir_all(path)?;
        Ok(())
    }

    fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> SettingsResult<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map(Some).map_err(|e| {
            PersistenceError::Corrupted {
                path: path.display().to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn write_json<T: Serialize>(path: &Path, value: &T) -> SettingsResult<()> {
        if let Some(parent) = path.parent() {
            Self::ensure_dir(parent)?;
        }
        let content = serde_json::to_string_pretty(value)?;
        std::fs::write(path, content)
            .map_err(|e| SettingsError::SaveError(format!("{}: {}", path.display(), e)))
    }

    /// Load the persisted target speed
    pub fn load_speed(&self) -> SettingsResult<Option<u16>> {
        let record: Option<SpeedRecord> = Self::read_json(&self.dir.join(SPEED_FILE))?;
        Ok(record.map(|r| r.velocidad.clamp(10, 200)))
    }

    /// Persist the target speed
    pub fn save_speed(&self, percent: u16) -> SettingsResult<()> {
        if !(10..=200).contains(&percent) {
            return Err(SettingsError::InvalidSetting {
                key: "velocidad".to_string(),
                reason: format!("{} is outside 10..=200", percent),
            });
        }
        Self::write_json(
            &self.dir.join(SPEED_FILE),
            &SpeedRecord {
                velocidad: percent,
            },
        )
    }

    /// Load machine preferences (defaults when the file is absent)
    pub fn load_machine_preferences(&self) -> SettingsResult<MachinePreferences> {
        Ok(Self::read_json(&self.dir.join(MACHINE_FILE))?.unwrap_or_default())
    }

    /// Persist machine preferences
    pub fn save_machine_preferences(&self, prefs: &MachinePreferences) -> SettingsResult<()> {
        if let Some(mask) = prefs.dir_invert_mask {
            if mask > 7 {
                return Err(SettingsError::InvalidSetting {
                    key: "dir_invert_mask".to_string(),
                    reason: format!("{} is outside 0..=7", mask),
                });
            }
        }
        if let Some(jd) = prefs.junction_deviation {
            if !(0.005..=1.0).contains(&jd) {
                return Err(SettingsError::InvalidSetting {
                    key: "junction_deviation".to_string(),
                    reason: format!("{} is outside 0.005..=1.0", jd),
                });
            }
        }
        Self::write_json(&self.dir.join(MACHINE_FILE), prefs)
    }

    /// Load the last known position
    pub fn load_position(&self) -> SettingsResult<Option<(f64, f64)>> {
        let path = self.dir.join(POSITION_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        parse_position(&content).map(Some).ok_or_else(|| {
            PersistenceError::Corrupted {
                path: path.display().to_string(),
                reason: format!("expected \"<x>,<y>\", got {:?}", content.trim()),
            }
            .into()
        })
    }

    /// Persist the last known position
    pub fn save_position(&self, x: f64, y: f64) -> SettingsResult<()> {
        Self::ensure_dir(&self.dir)?;
        let path = self.dir.join(POSITION_FILE);
        std::fs::write(&path, format!("{},{}", x, y))
            .map_err(|e| SettingsError::SaveError(format!("{}: {}", path.display(), e)))
    }

    /// Write a parameter snapshot as a timestamped file and as the latest copy
    pub fn save_backup(&self, snapshot: &ConfigSnapshot) -> SettingsResult<PathBuf> {
        let dir = self.backup_dir();
        Self::ensure_dir(&dir)?;

        let stamp = Local::now().format("%Y%m%d_%H%M%S_%3f");
        let path = dir.join(format!("{}{}.json", BACKUP_PREFIX, stamp));
        Self::write_json(&path, snapshot)?;
        Self::write_json(&dir.join(LATEST_BACKUP), snapshot)?;

        tracing::info!("Saved {} parameters to {}", snapshot.params.len(), path.display());
        Ok(path)
    }

    /// Load a parameter snapshot
    ///
    /// Without a path, the latest copy is used, else the most recent
    /// timestamped file.
    pub fn load_backup(&self, path: Option<&Path>) -> SettingsResult<(PathBuf, ConfigSnapshot)> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => self.find_latest_backup()?,
        };
        let snapshot: ConfigSnapshot = Self::read_json(&path)?
            .ok_or_else(|| PersistenceError::BackupNotFound(path.display().to_string()))?;
        Ok((path, snapshot))
    }

    fn find_latest_backup(&self) -> SettingsResult<PathBuf> {
        let dir = self.backup_dir();
        let latest = dir.join(LATEST_BACKUP);
        if latest.exists() {
            return Ok(latest);
        }

        let not_found = || PersistenceError::BackupNotFound(dir.display().to_string());
        if !dir.exists() {
            return Err(not_found().into());
        }

        // Timestamps in the names sort chronologically
        let mut candidates: Vec<PathBuf> = std::fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(BACKUP_PREFIX) && n.ends_with(".json"))
            })
            .collect();
        candidates.sort();
        candidates.pop().ok_or_else(|| not_found().into())
    }
}

fn parse_position(content: &str) -> Option<(f64, f64)> {
    let mut fields = content.trim().split(',');
    let x = fields.next()?.trim().parse::<f64>().ok()?;
    let y = fields.next()?.trim().parse::<f64>().ok()?;
    if fields.next().is_some() {
        return None;
    }
    Some((x, y))
}
