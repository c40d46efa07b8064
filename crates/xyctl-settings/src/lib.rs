//! xyctl Settings Crate
//!
//! Handles controller configuration and the sidecar files the controller
//! reads at connect time (target speed, machine preferences, last position,
//! firmware parameter backups).

pub mod config;
pub mod error;
pub mod persistence;

pub use config::{
    ConnectionSettings, ControllerConfig, LivenessSettings, MotionSettings, OverrideCodeTable,
    StreamingSettings, TimingSettings,
};
pub use error::{ConfigError, PersistenceError, SettingsError, SettingsResult};
pub use persistence::{ConfigSnapshot, MachinePreferences, SidecarStore, SpeedRecord};
