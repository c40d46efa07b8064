//! Firmware protocol support
//!
//! Supported controllers:
//! - GRBL 1.1: `$I` identity, `?` status frames, real-time overrides
//! - Marlin: `M115` identity, `M114` position, `M220` speed
//!
//! This module identifies the firmware on a freshly opened channel and
//! issues the firmware-specific status query used for polling and liveness.

pub mod grbl;
pub mod marlin;

use crate::communication::channel::{is_ok_line, AckDrain, CommandChannel, Outcome};
use std::time::{Duration, Instant};
use xyctl_core::{CommandError, FirmwareKind};

/// Result of a successful handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareIdentity {
    /// Identified firmware
    pub kind: FirmwareKind,
    /// Banner or identity line
    pub info: String,
}

/// Whether a line identifies GRBL
pub fn is_grbl_banner(line: &str) -> bool {
    line.starts_with("Grbl")
        || line.starts_with("[VER:")
        || line.to_ascii_lowercase().contains("grbl")
}

fn is_unknown_command(line: &str) -> bool {
    line.to_ascii_lowercase().contains("unknown command")
}

/// Identify the firmware behind a freshly opened channel
///
/// Sends `$I` and waits up to `window` for a GRBL banner or a bare `ok`;
/// then sends `M115` and waits again for a Marlin banner or `ok`. An `ok`
/// that follows an "unknown command" echo does not count as GRBL. Leftover
/// output is flushed until the line stays quiet for `settle`.
pub fn detect_firmware(
    channel: &mut CommandChannel,
    window: Duration,
    settle: Duration,
) -> Result<Option<FirmwareIdentity>, CommandError> {
    let identity = match probe_grbl(channel, window)? {
        Some(identity) => Some(identity),
        None => probe_marlin(channel, window)?,
    };

    if identity.is_some() {
        let leftover = channel.flush_input(settle)?;
        if !leftover.is_empty() {
            tracing::debug!("Flushed {} handshake lines", leftover.len());
        }
    }
    Ok(identity)
}

fn probe_grbl(
    channel: &mut CommandChannel,
    window: Duration,
) -> Result<Option<FirmwareIdentity>, CommandError> {
    channel.write_line_fast(grbl::IDENTITY_QUERY)?;

    let mut version = None;
    let mut unknown = false;
    let found = channel.wait_for(window, |line| {
        if line.starts_with("[VER:") {
            version = Some(line.to_string());
            return false;
        }
        if is_unknown_command(line) {
            unknown = true;
            return false;
        }
        is_ok_line(line) || (is_grbl_banner(line) && !marlin::is_banner(line))
    })?;

    Ok(match found {
        Some(line) if is_ok_line(&line) => {
            if unknown {
                None
            } else {
                Some(FirmwareIdentity {
                    kind: FirmwareKind::Grbl,
                    info: version.unwrap_or_else(|| FirmwareKind::Grbl.to_string()),
                })
            }
        }
        Some(line) => Some(FirmwareIdentity {
            kind: FirmwareKind::Grbl,
            info: line,
        }),
        None => version.map(|info| FirmwareIdentity {
            kind: FirmwareKind::Grbl,
            info,
        }),
    })
}

fn probe_marlin(
    channel: &mut CommandChannel,
    window: Duration,
) -> Result<Option<FirmwareIdentity>, CommandError> {
    channel.write_line_fast(marlin::IDENTITY_QUERY)?;

    let found = channel.wait_for(window, |line| {
        marlin::is_banner(line) || is_grbl_banner(line) || is_ok_line(line)
    })?;

    Ok(found.map(|line| {
        if marlin::is_banner(&line) {
            FirmwareIdentity {
                kind: FirmwareKind::Marlin,
                info: line,
            }
        } else if is_grbl_banner(&line) {
            // late boot banner
            FirmwareIdentity {
                kind: FirmwareKind::Grbl,
                info: line,
            }
        } else {
            FirmwareIdentity {
                kind: FirmwareKind::Marlin,
                info: FirmwareKind::Marlin.to_string(),
            }
        }
    }))
}

/// Reply to one status query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReply {
    /// Status frame (GRBL), position line (Marlin), any line (unknown) or
    /// `None` if nothing recognizable arrived
    pub line: Option<String>,
    /// Answers to earlier pipelined lines, and alarms, read meanwhile
    pub pipeline: AckDrain,
}

impl StatusReply {
    /// Whether the firmware answered
    pub fn is_alive(&self) -> bool {
        self.line.is_some()
    }
}

/// Issue the firmware-specific status query and wait up to `timeout`
///
/// - GRBL: real-time `?`, answered by a `<...>` frame
/// - Marlin: `M114`, answered by `X:.. Y:..` and `ok`
/// - unknown: a bare newline, answered by anything
pub fn query_status(
    channel: &mut CommandChannel,
    kind: FirmwareKind,
    timeout: Duration,
) -> Result<StatusReply, CommandError> {
    let deadline = Instant::now() + timeout;
    let mut reply = StatusReply::default();
    let remaining = || deadline.saturating_duration_since(Instant::now());

    match kind {
        FirmwareKind::Grbl => {
            channel.send_realtime(grbl::realtime::STATUS_QUERY)?;
            while let Some(line) = channel.read_line(remaining())? {
                if grbl::StatusParser::is_status_frame(&line) {
                    reply.line = Some(line);
                    break;
                }
                if channel.absorb_pipelined(line, &mut reply.pipeline)? == Some(Outcome::Alarm) {
                    // the unlock may have swallowed the frame
                    channel.send_realtime(grbl::realtime::STATUS_QUERY)?;
                }
            }
        }
        FirmwareKind::Marlin => {
            channel.write_line_fast(marlin::POSITION_QUERY)?;
            let mut position = None;
            while let Some(line) = channel.read_line(remaining())? {
                if marlin::parse_position(&line).is_some() {
                    position = Some(line);
                } else if is_ok_line(&line) {
                    if position.is_some() {
                        reply.line = position.take();
                        break;
                    }
                    channel.absorb_pipelined(line, &mut reply.pipeline)?;
                }
            }
        }
        FirmwareKind::Unknown => {
            channel.write_line_fast("")?;
            reply.line = channel.read_line(timeout)?;
        }
    }

    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::simulated::{
        SimulatedMachine, SIMULATED_GRBL_BANNER, SIMULATED_MARLIN_BANNER,
    };

    fn channel(machine: &SimulatedMachine) -> CommandChannel {
        CommandChannel::new(Box::new(machine.connect("sim")), Duration::from_millis(100))
    }

    const WINDOW: Duration = Duration::from_millis(100);
    const SETTLE: Duration = Duration::from_millis(5);

    #[test]
    fn test_banner_classification() {
        assert!(is_grbl_banner("Grbl 1.1h ['$' for help]"));
        assert!(is_grbl_banner("[VER:1.1h.20190825:]"));
        assert!(is_grbl_banner("GrblHAL 1.1f"));
        assert!(!is_grbl_banner("ok"));
    }

    #[test]
    fn test_detect_grbl() {
        let machine = SimulatedMachine::grbl();
        let identity = detect_firmware(&mut channel(&machine), WINDOW, SETTLE)
            .expect("io")
            .expect("identity");
        assert_eq!(identity.kind, FirmwareKind::Grbl);
        assert_eq!(identity.info, SIMULATED_GRBL_BANNER);
        assert_eq!(machine.written_lines(), vec!["$I"]);
    }

    #[test]
    fn test_detect_marlin() {
        let machine = SimulatedMachine::marlin();
        let identity = detect_firmware(&mut channel(&machine), WINDOW, SETTLE)
            .expect("io")
            .expect("identity");
        assert_eq!(identity.kind, FirmwareKind::Marlin);
        assert_eq!(identity.info, SIMULATED_MARLIN_BANNER);
        assert_eq!(machine.written_lines(), vec!["$I", "M115"]);
    }

    #[test]
    fn test_detect_nothing() {
        let machine = SimulatedMachine::silent();
        let identity = detect_firmware(&mut channel(&machine), WINDOW, SETTLE).expect("io");
        assert_eq!(identity, None);
    }

    #[test]
    fn test_grbl_status_query() {
        let machine = SimulatedMachine::grbl();
        let mut ch = channel(&machine);
        let reply = query_status(&mut ch, FirmwareKind::Grbl, WINDOW).expect("io");
        assert!(reply.is_alive());
        assert!(reply.line.expect("frame").starts_with("<Idle"));
        assert_eq!(reply.pipeline, AckDrain::default());
    }

    #[test]
    fn test_grbl_status_counts_pipelined_acks() {
        let machine = SimulatedMachine::grbl();
        let mut ch = channel(&machine);
        ch.write_line_fast("G1 X1").expect("write");
        ch.write_line_fast("G1 X2").expect("write");
        let reply = query_status(&mut ch, FirmwareKind::Grbl, WINDOW).expect("io");
        assert_eq!(reply.pipeline.acks, 2);
        assert!(reply.is_alive());
    }

    #[test]
    fn test_grbl_status_unlocks_alarm() {
        let machine = SimulatedMachine::grbl();
        machine.raise_alarm_on_next_status("ALARM:1");
        let mut ch = channel(&machine);
        let reply = query_status(&mut ch, FirmwareKind::Grbl, WINDOW).expect("io");
        assert_eq!(reply.pipeline.alarms, vec!["ALARM:1"]);
        assert!(reply.is_alive());
        assert_eq!(machine.written_lines(), vec!["$X"]);
        assert!(!machine.is_locked());
    }

    #[test]
    fn test_marlin_status_query() {
        let machine = SimulatedMachine::marlin();
        let mut ch = channel(&machine);
        let reply = query_status(&mut ch, FirmwareKind::Marlin, WINDOW).expect("io");
        assert!(reply.line.expect("position").starts_with("X:"));
        // the trailing ok belongs to M114
        assert!(ch.flush_input(Duration::ZERO).expect("flush").is_empty());
    }

    #[test]
    fn test_silent_status_query() {
        let machine = SimulatedMachine::grbl();
        machine.set_silent(true);
        let reply = query_status(&mut channel(&machine), FirmwareKind::Grbl, WINDOW).expect("io");
        assert!(!reply.is_alive());
    }
}
