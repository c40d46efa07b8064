//! Error types for the settings crate.
//!
//! This module provides structured error types for configuration management
//! and sidecar file persistence.

use std::io;
use thiserror::Error;

/// Errors that can occur during settings operations.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// The configuration file could not be loaded.
    #[error("Failed to load settings: {0}")]
    LoadError(String),

    /// The configuration file could not be saved.
    #[error("Failed to save settings: {0}")]
    SaveError(String),

    /// A setting value is invalid.
    #[error("Invalid setting '{key}': {reason}")]
    InvalidSetting { key: String, reason: String },

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// TOML deserialization error.
    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("TOML error: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),

    /// A configuration validation error occurred.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// A persistence error occurred.
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Errors related to configuration validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file format is not supported.
    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    /// A configuration value is out of valid range.
    #[error("Value out of range for '{key}': {value}")]
    ValueOutOfRange { key: String, value: String },
}

/// Errors related to sidecar persistence operations.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// No parameter backup exists to restore from.
    #[error("No parameter backup found in {0}")]
    BackupNotFound(String),

    /// A sidecar file exists but cannot be understood.
    #[error("Corrupted file {path}: {reason}")]
    Corrupted { path: String, reason: String },
}

/// Result type alias for settings operations.
pub type SettingsResult<T> = Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_error_display() {
        let err = SettingsError::LoadError("file not found".to_string());
        assert_eq!(err.to_string(), "Failed to load settings: file not found");

        let err = SettingsError::InvalidSetting {
            key: "velocidad".to_string(),
            reason: "must be between 10 and 200".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid setting 'velocidad': must be between 10 and 200"
        );
    }

    #[test]
    fn test_persistence_error_display() {
        let err = PersistenceError::BackupNotFound("/tmp/xyctl".to_string());
        assert_eq!(err.to_string(), "No parameter backup found in /tmp/xyctl");

        let err = PersistenceError::Corrupted {
            path: "last_position.txt".to_string(),
            reason: "expected two fields".to_string(),
        };
        assert!(err.to_string().contains("expected two fields"));
    }

    #[test]
    fn test_error_conversion() {
        let config_err = ConfigError::UnsupportedFormat("yaml".to_string());
        let settings_err: SettingsError = config_err.into();
        assert!(matches!(settings_err, SettingsError::Config(_)));

        let persist_err = PersistenceError::BackupNotFound("x".to_string());
        let settings_err: SettingsError = persist_err.into();
        assert!(matches!(settings_err, SettingsError::Persistence(_)));

        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let settings_err: SettingsError = io_err.into();
        assert!(matches!(settings_err, SettingsError::IoError(_)));
    }
}
