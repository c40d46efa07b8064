//! # xyctl
//!
//! Serial motion-controller client for two-axis machines running GRBL or
//! Marlin firmware:
//! - firmware auto-detection and connection supervision
//! - jogging, homing and origin management with a software travel envelope
//! - flow-controlled G-code streaming with a bounded acknowledgment window
//! - real-time feed override encoding and emergency stop
//! - alarm recovery and firmware parameter backup/restore
//!
//! ## Architecture
//!
//! xyctl is organized as a workspace with multiple crates:
//!
//! 1. **xyctl-core** - Data model, error taxonomy, controller events
//! 2. **xyctl-settings** - Configuration and sidecar persistence
//! 3. **xyctl-communication** - Transport, firmware protocols, motion controller
//! 4. **xyctl** - Logging setup and the command-line front end

pub use xyctl_communication::{
    communication, controller, firmware, list_ports, spawn_stream, MotionController,
    RestoreReport, SerialPortInfo, SimulatedFirmware, SimulatedMachine, SimulatedOpener,
    StreamReport,
};

pub use xyctl_core::{
    CommandError, ConnectError, ConnectionInfo, ConnectionState, Error, Event, EventKind,
    FirmwareKind, MachinePosition, MotionMode, OverrideState, ParameterError, Result,
    SafetyEnvelope, StreamError,
};

pub use xyctl_settings::{ControllerConfig, SidecarStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date (set at compile time)
pub const BUILD_DATE: &str = env!("BUILD_DATE");

fn env_filter() -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
}

/// Initialize logging with the default configuration
///
/// Human-readable output on stderr, filtered by `RUST_LOG` (default `info`).
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_names(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}

/// Initialize logging as one JSON object per line on stderr
pub fn init_json_logging() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let fmt_layer = fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_current_span(false);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}
