//! Data models for the connection, machine position, safety envelope and overrides
//!
//! This module provides:
//! - Connection state and firmware identification
//! - Two-axis logical position with distance mode and last-direction memory
//! - The rectangular soft-limit envelope
//! - User and firmware-reported override percentages

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lowest override percentage the controller will request
pub const OVERRIDE_MIN_PERCENT: u16 = 10;
/// Highest override percentage the controller will request
pub const OVERRIDE_MAX_PERCENT: u16 = 200;

/// Clamp an override percentage into [10, 200]
pub fn clamp_override(percent: i32) -> u16 {
    percent.clamp(OVERRIDE_MIN_PERCENT as i32, OVERRIDE_MAX_PERCENT as i32) as u16
}

/// Firmware family attached to the serial link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FirmwareKind {
    /// Not identified (no handshake yet)
    #[default]
    Unknown,
    /// GRBL and compatibles
    Grbl,
    /// Marlin
    Marlin,
}

impl fmt::Display for FirmwareKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Grbl => write!(f, "GRBL"),
            Self::Marlin => write!(f, "Marlin"),
        }
    }
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No transport open
    #[default]
    Disconnected,
    /// Transport open, firmware not identified yet
    Handshaking,
    /// Firmware identified, commands accepted
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Handshaking => write!(f, "Handshaking"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

/// Description of an established connection
///
/// The firmware kind is fixed for the lifetime of a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    /// Port identifier (e.g. "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Identified firmware
    pub firmware: FirmwareKind,
    /// Banner or identity line reported by the firmware
    pub firmware_info: String,
}

/// G90/G91 distance mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MotionMode {
    /// G90
    #[default]
    Absolute,
    /// G91
    Relative,
}

/// Logical machine axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// X axis
    X,
    /// Y axis
    Y,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::X => write!(f, "X"),
            Axis::Y => write!(f, "Y"),
        }
    }
}

/// Logical two-axis position relative to the established origin
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MachinePosition {
    /// X coordinate
    pub x: f64,
    /// Y coordinate
    pub y: f64,
    /// Current distance mode
    pub mode: MotionMode,
    /// Sign of the last nonzero X movement (display only)
    pub last_dir_x: i8,
    /// Sign of the last nonzero Y movement (display only)
    pub last_dir_y: i8,
}

impl Default for MachinePosition {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            mode: MotionMode::Absolute,
            last_dir_x: 1,
            last_dir_y: 1,
        }
    }
}

impl MachinePosition {
    /// Coordinate of a single axis
    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
        }
    }
}

/// Rectangular soft-limit envelope around the origin
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafetyEnvelope {
    /// Set only by an explicit origin operation
    pub origin_established: bool,
    /// Enforcement switch
    pub limits_active: bool,
    /// Minimum X
    pub x_min: f64,
    /// Maximum X
    pub x_max: f64,
    /// Minimum Y
    pub y_min: f64,
    /// Maximum Y
    pub y_max: f64,
}

impl SafetyEnvelope {
    /// Default half-extent of the standard envelope
    pub const STANDARD_HALF_EXTENT: f64 = 20.0;

    /// Whether moves are currently checked against the envelope
    pub fn is_enforced(&self) -> bool {
        self.origin_established && self.limits_active
    }

    /// Bounds for one axis
    pub fn bounds(&self, axis: Axis) -> (f64, f64) {
        match axis {
            Axis::X => (self.x_min, self.x_max),
            Axis::Y => (self.y_min, self.y_max),
        }
    }
}

impl Default for SafetyEnvelope {
    fn default() -> Self {
        let h = Self::STANDARD_HALF_EXTENT;
        Self {
            origin_established: false,
            limits_active: false,
            x_min: -h,
            x_max: h,
            y_min: -h,
            y_max: h,
        }
    }
}

/// User intent and firmware-reported override state
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverrideState {
    /// Speed the user asked for (10-200)
    pub target_speed_percent: u16,
    /// Override the controller believes is active on the firmware
    pub current_percent: u16,
    /// Feed override from the last status frame
    pub feed_override_percent: u16,
    /// Rapid override from the last status frame
    pub rapid_override_percent: u16,
    /// Spindle override from the last status frame
    pub spindle_override_percent: u16,
    /// Feed rate from the last status frame
    pub reported_feed_rate: f64,
}

impl Default for OverrideState {
    fn default() -> Self {
        Self {
            target_speed_percent: 100,
            current_percent: 100,
            feed_override_percent: 100,
            rapid_override_percent: 100,
            spindle_override_percent: 100,
            reported_feed_rate: 0.0,
        }
    }
}
