//! # xyctl Communication
//!
//! Serial transport, GRBL/Marlin protocol handling and the motion controller
//! for two-axis machines.
//!
//! [`MotionController`] is the entry point: it connects and identifies the
//! firmware, tracks the logical position, enforces the software envelope,
//! jogs, streams G-code with a bounded acknowledgment window, drives feed
//! overrides and backs up firmware parameters. A [`SimulatedMachine`] stands
//! in for real hardware in tests and in the `--simulate` mode of the CLI.

pub mod communication;
pub mod controller;
pub mod firmware;

pub use communication::{
    list_ports, select_port, CommandChannel, PortOpener, SerialOpener, SerialPortInfo,
    SimulatedFirmware, SimulatedMachine, SimulatedOpener, Transport,
};
pub use controller::{
    spawn_stream, MotionController, PositionTracker, RestoreReport, SoftLimitGuard, StreamReport,
    Violation,
};
pub use firmware::{detect_firmware, FirmwareIdentity, StatusReply};
