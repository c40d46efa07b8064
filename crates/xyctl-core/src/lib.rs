//! # xyctl Core
//!
//! Core types and utilities for xyctl.
//! Provides the connection/position/envelope/override data model, the error
//! taxonomy shared by every layer, and the controller event queue.

pub mod data;
pub mod error;
pub mod event_bus;

pub use data::{
    clamp_override, Axis, ConnectionInfo, ConnectionState, FirmwareKind, MachinePosition,
    MotionMode, OverrideState, SafetyEnvelope, OVERRIDE_MAX_PERCENT, OVERRIDE_MIN_PERCENT,
};

pub use error::{CommandError, ConnectError, Error, ParameterError, Result, StreamError};

pub use event_bus::{Event, EventKind, EventQueue, EventQueueConfig};
