//! Error handling for xyctl
//!
//! Provides the error taxonomy for every layer of the motion controller:
//! - Connection errors (port discovery, open, firmware handshake)
//! - Command errors (line protocol, local limit rejection)
//! - Stream errors (G-code streaming sessions)
//! - Parameter errors (firmware parameter backup/restore)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Connection establishment error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectError {
    /// No port was given and discovery found no candidate
    #[error("No serial port found")]
    NoPortFound,

    /// The system port list could not be read
    #[error("Failed to enumerate ports: {reason}")]
    PortEnumeration {
        /// The reason enumeration failed.
        reason: String,
    },

    /// Failed to open port
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// The name of the port that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// Neither GRBL nor Marlin answered the identity queries
    #[error("No firmware answered on {port}")]
    HandshakeTimeout {
        /// The port that stayed silent.
        port: String,
    },

    /// I/O error while handshaking
    #[error("I/O error: {reason}")]
    Io {
        /// The reason for the I/O error.
        reason: String,
    },
}

/// Line and real-time command error type
///
/// A `CommandError` never terminates the process. `Io` additionally means the
/// connection has been demoted to disconnected and must be re-established.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    /// Controller is not connected
    #[error("Controller not connected")]
    NotConnected,

    /// Transport failure; the handle has been closed
    #[error("I/O error: {reason}")]
    Io {
        /// The reason for the I/O error.
        reason: String,
    },

    /// No terminal reply arrived in time
    #[error("Command timed out after {timeout_ms}ms: {command}")]
    Timeout {
        /// The command that got no reply.
        command: String,
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// Firmware answered with an error line
    #[error("Command rejected: {command} ({message})")]
    Rejected {
        /// The rejected command.
        command: String,
        /// The decoded firmware message.
        message: String,
    },

    /// Target lies outside the active safety envelope; nothing was transmitted
    #[error("Soft limit violation: {detail}")]
    LimitViolation {
        /// Human-readable description of the violation.
        detail: String,
    },

    /// Motion is held or a limit abort is pending
    #[error("Motion is held")]
    MotionHeld,

    /// Jog request with no usable direction
    #[error("Invalid jog direction ({dir_x}, {dir_y})")]
    InvalidJog {
        /// Requested X direction.
        dir_x: i8,
        /// Requested Y direction.
        dir_y: i8,
    },

    /// Operation not allowed while a stream session is running
    #[error("Controller busy: {reason}")]
    Busy {
        /// What the controller is busy with.
        reason: String,
    },
}

impl CommandError {
    /// Check whether the transport was lost
    pub fn is_io(&self) -> bool {
        matches!(self, CommandError::Io { .. })
    }

    /// Check whether this was a local soft-limit rejection
    pub fn is_limit_violation(&self) -> bool {
        matches!(self, CommandError::LimitViolation { .. })
    }
}

/// G-code streaming error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    /// Controller is not connected
    #[error("Controller not connected")]
    NotConnected,

    /// Streaming requires an established origin
    #[error("Origin has not been established")]
    OriginNotSet,

    /// Another session is already running
    #[error("A stream session is already running")]
    AlreadyStreaming,

    /// Session stopped early because a line would leave the envelope
    #[error("Stream aborted by soft limit: {detail}")]
    AbortedByLimit {
        /// Description of the offending move.
        detail: String,
    },

    /// Connection dropped mid-session
    #[error("Connection lost during stream: {reason}")]
    Disconnected {
        /// The reason the connection was lost.
        reason: String,
    },

    /// The firmware stopped acknowledging pipelined lines
    #[error("No acknowledgment for {inflight} in-flight lines after {timeout_ms}ms")]
    WindowStalled {
        /// Unacknowledged line count.
        inflight: usize,
        /// The stall timeout in milliseconds.
        timeout_ms: u64,
    },

    /// G-code file could not be read
    #[error("Failed to read {path}: {reason}")]
    File {
        /// The file path.
        path: String,
        /// The reason the read failed.
        reason: String,
    },

    /// A command in the session failed fatally
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Firmware parameter backup/restore error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    /// Controller is not connected
    #[error("Controller not connected")]
    NotConnected,

    /// Operation needs a specific firmware
    #[error("Parameter backup not supported by {firmware}")]
    UnsupportedFirmware {
        /// The attached firmware.
        firmware: String,
    },

    /// The `$$` dump produced no parameters
    #[error("Firmware returned no parameters")]
    NoParameters,

    /// A persisted preference is out of range
    #[error("Invalid value for {setting}: {reason}")]
    InvalidValue {
        /// The setting name.
        setting: String,
        /// The reason the value is invalid.
        reason: String,
    },

    /// Sidecar storage failed
    #[error("Persistence error: {reason}")]
    Persistence {
        /// The reason storage failed.
        reason: String,
    },

    /// A command failed fatally
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Main error type for xyctl
///
/// A unified error type that can represent any error from all layers.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// Command error
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Stream error
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Parameter error
    #[error(transparent)]
    Parameter(#[from] ParameterError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::Command(CommandError::Timeout { .. })
                | Error::Connect(ConnectError::HandshakeTimeout { .. })
        )
    }

    /// Check if the connection was lost or never established
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::Connect(_)
                | Error::Command(CommandError::Io { .. })
                | Error::Command(CommandError::NotConnected)
                | Error::Stream(StreamError::Disconnected { .. })
        )
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CommandError::Timeout {
            command: "G0 X1".to_string(),
            timeout_ms: 1500,
        };
        assert_eq!(err.to_string(), "Command timed out after 1500ms: G0 X1");

        let err = StreamError::AbortedByLimit {
            detail: "X=21.000 outside [-20.000, 20.000]".to_string(),
        };
        assert!(err.to_string().contains("X=21.000"));
    }

    #[test]
    fn test_error_conversion() {
        let err: Error = CommandError::Timeout {
            command: "$X".to_string(),
            timeout_ms: 10,
        }
        .into();
        assert!(err.is_timeout());

        let err: Error = ConnectError::NoPortFound.into();
        assert!(err.is_connection_error());

        let stream: StreamError = CommandError::NotConnected.into();
        assert!(matches!(stream, StreamError::Command(CommandError::NotConnected)));
    }

    #[test]
    fn test_command_error_predicates() {
        assert!(CommandError::Io {
            reason: "broken pipe".into()
        }
        .is_io());
        assert!(CommandError::LimitViolation {
            detail: "Y".into()
        }
        .is_limit_violation());
        assert!(!CommandError::MotionHeld.is_io());
    }
}
