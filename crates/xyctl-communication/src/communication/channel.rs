//! Command channel
//!
//! Two protocols share one transport:
//! - the line protocol: a newline-terminated command answered by `ok`,
//!   `error:N` or an alarm, with everything in between collected as reply
//!   lines;
//! - the real-time protocol: single unacknowledged bytes (hold, resume,
//!   jog cancel, override pulses).
//!
//! The streamer additionally writes lines without waiting
//! ([`CommandChannel::write_line_fast`]) and collects their acknowledgments
//! later ([`CommandChannel::drain_acks`]).
//!
//! The channel itself is not synchronized; the controller keeps it behind
//! its single mutex so no two transactions interleave.

use super::Transport;
use crate::firmware::grbl::error_decoder;
use std::io;
use std::time::{Duration, Instant};
use xyctl_core::CommandError;

/// Unlock token sent after an alarm
pub const UNLOCK_COMMAND: &str = "$X";

/// Successful outcome of a line command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    /// Plain `ok`
    Ok,
    /// The firmware raised an alarm and was unlocked
    AlarmRecovered {
        /// Alarm line as received
        alarm: String,
    },
}

/// Reply to a line command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Terminal outcome
    pub ack: Ack,
    /// Non-terminal lines received before it
    pub lines: Vec<String>,
}

impl Reply {
    /// Whether the command ended in an alarm
    pub fn alarm(&self) -> Option<&str> {
        match &self.ack {
            Ack::AlarmRecovered { alarm } => Some(alarm),
            Ack::Ok => None,
        }
    }
}

/// How the firmware answered one pipelined line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// `ok`
    Accepted,
    /// `error:N`
    Rejected,
    /// An alarm, already unlocked
    Alarm,
}

/// Acknowledgments collected by one drain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AckDrain {
    /// Terminal replies consumed (`ok` and `error:` lines)
    pub acks: usize,
    /// Every answer to a pipelined line, in arrival order
    pub outcomes: Vec<Outcome>,
    /// `error:` lines among them
    pub rejected: Vec<String>,
    /// Alarms seen (already unlocked)
    pub alarms: Vec<String>,
    /// Other lines (status frames, messages)
    pub other: Vec<String>,
}

/// `ok` terminates a command
pub fn is_ok_line(line: &str) -> bool {
    line.starts_with("ok")
}

/// GRBL `error:N`
///
/// Marlin's `Error:` lines are always followed by `ok` and stay ordinary
/// reply lines.
pub fn is_error_line(line: &str) -> bool {
    line.starts_with("error:")
}

/// Alarm or hard-limit report
pub fn is_alarm_line(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower.contains("alarm") || lower.contains("hard limit")
}

fn io_error(err: io::Error) -> CommandError {
    CommandError::Io {
        reason: err.to_string(),
    }
}

/// Line and real-time protocol over one transport
pub struct CommandChannel {
    transport: Box<dyn Transport>,
    command_timeout: Duration,
}

impl std::fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandChannel")
            .field("port", &self.transport.name())
            .field("command_timeout", &self.command_timeout)
            .finish()
    }
}

impl CommandChannel {
    /// Wrap an open transport
    pub fn new(transport: Box<dyn Transport>, command_timeout: Duration) -> Self {
        Self {
            transport,
            command_timeout,
        }
    }

    /// Port identifier of the underlying transport
    pub fn port_name(&self) -> &str {
        self.transport.name()
    }

    /// Default line command timeout
    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Discard pending input and output
    pub fn clear_buffers(&mut self) -> Result<(), CommandError> {
        self.transport.clear_buffers().map_err(io_error)
    }

    /// Send a line command and wait for its terminal reply
    pub fn send_line(&mut self, text: &str) -> Result<Reply, CommandError> {
        self.send_line_with_timeout(text, self.command_timeout)
    }

    /// Send a line command with an explicit reply timeout
    pub fn send_line_with_timeout(
        &mut self,
        text: &str,
        timeout: Duration,
    ) -> Result<Reply, CommandError> {
        tracing::debug!("-> {}", text);
        self.write_line(text)?;

        let deadline = Instant::now() + timeout;
        let mut lines = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(line) = self.transport.read_line(remaining).map_err(io_error)? else {
                tracing::warn!("No reply to '{}' within {:?}", text, timeout);
                return Err(CommandError::Timeout {
                    command: text.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            };
            tracing::trace!("<- {}", line);

            if is_ok_line(&line) {
                return Ok(Reply {
                    ack: Ack::Ok,
                    lines,
                });
            }
            if is_alarm_line(&line) {
                self.recover_alarm(&line)?;
                return Ok(Reply {
                    ack: Ack::AlarmRecovered { alarm: line },
                    lines,
                });
            }
            if is_error_line(&line) {
                let message = error_decoder::describe_reply(&line);
                tracing::warn!("'{}' rejected: {}", text, message);
                return Err(CommandError::Rejected {
                    command: text.to_string(),
                    message,
                });
            }
            if line.starts_with("Error:") {
                tracing::warn!("'{}': {}", text, line);
            }
            lines.push(line);
        }
    }

    /// Write a single real-time byte
    pub fn send_realtime(&mut self, byte: u8) -> Result<(), CommandError> {
        tracing::trace!("-> realtime 0x{:02X}", byte);
        self.transport.write_all(&[byte]).map_err(io_error)
    }

    /// Write a line without waiting for its acknowledgment
    pub fn write_line_fast(&mut self, text: &str) -> Result<(), CommandError> {
        tracing::trace!("-> (fast) {}", text);
        self.write_line(text)
    }

    fn write_line(&mut self, text: &str) -> Result<(), CommandError> {
        let mut data = Vec::with_capacity(text.len() + 1);
        data.extend_from_slice(text.as_bytes());
        data.push(b'\n');
        self.transport.write_all(&data).map_err(io_error)
    }

    /// Collect acknowledgments of fast-path lines
    ///
    /// Waits up to `max_wait` for the first terminal reply, then only takes
    /// what is already available. `error:` lines and alarms each answer one
    /// pipelined line; alarms are unlocked on the spot.
    pub fn drain_acks(&mut self, max_wait: Duration) -> Result<AckDrain, CommandError> {
        let deadline = Instant::now() + max_wait;
        let mut drain = AckDrain::default();

        loop {
            let wait = if !drain.outcomes.is_empty() {
                Duration::ZERO
            } else {
                deadline.saturating_duration_since(Instant::now())
            };
            let Some(line) = self.transport.read_line(wait).map_err(io_error)? else {
                break;
            };
            tracing::trace!("<- {}", line);
            self.absorb_pipelined(line, &mut drain)?;

            if Instant::now() >= deadline && drain.outcomes.is_empty() {
                break;
            }
        }

        Ok(drain)
    }

    /// File one line read while pipelined lines may be outstanding
    ///
    /// Alarms are unlocked on the spot. Lines that answer nothing end up in
    /// `drain.other`.
    pub(crate) fn absorb_pipelined(
        &mut self,
        line: String,
        drain: &mut AckDrain,
    ) -> Result<Option<Outcome>, CommandError> {
        let outcome = if is_ok_line(&line) {
            drain.acks += 1;
            Outcome::Accepted
        } else if is_alarm_line(&line) {
            self.recover_alarm(&line)?;
            drain.alarms.push(line);
            Outcome::Alarm
        } else if is_error_line(&line) {
            tracing::warn!("Streamed line rejected: {}", error_decoder::describe_reply(&line));
            drain.acks += 1;
            drain.rejected.push(line);
            Outcome::Rejected
        } else {
            drain.other.push(line);
            return Ok(None);
        };
        drain.outcomes.push(outcome);
        Ok(Some(outcome))
    }

    /// Read one reply line
    pub fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, CommandError> {
        let line = self.transport.read_line(timeout).map_err(io_error)?;
        if let Some(line) = &line {
            tracing::trace!("<- {}", line);
        }
        Ok(line)
    }

    /// Read lines until one satisfies `accept` or `window` elapses
    pub fn wait_for<F>(&mut self, window: Duration, mut accept: F) -> Result<Option<String>, CommandError>
    where
        F: FnMut(&str) -> bool,
    {
        let deadline = Instant::now() + window;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.transport.read_line(remaining).map_err(io_error)? {
                Some(line) if accept(&line) => return Ok(Some(line)),
                Some(line) => tracing::trace!("<- (ignored) {}", line),
                None => return Ok(None),
            }
        }
    }

    /// Read and discard input until it stays quiet for `quiet`
    pub fn flush_input(&mut self, quiet: Duration) -> Result<Vec<String>, CommandError> {
        let mut flushed = Vec::new();
        while let Some(line) = self.transport.read_line(quiet).map_err(io_error)? {
            tracing::trace!("<- (flushed) {}", line);
            flushed.push(line);
        }
        Ok(flushed)
    }

    /// Unlock after an alarm and consume the unlock reply
    fn recover_alarm(&mut self, alarm: &str) -> Result<(), CommandError> {
        tracing::warn!("Alarm: {}; unlocking", error_decoder::describe_reply(alarm));
        self.write_line(UNLOCK_COMMAND)?;

        let timeout = self.command_timeout;
        let reply = self.wait_for(timeout, |line| is_ok_line(line) || is_error_line(line))?;
        if reply.is_none() {
            tracing::warn!("No reply to {} after alarm", UNLOCK_COMMAND);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted transport: every written line pops the next canned reply batch
    struct Scripted {
        replies: VecDeque<Vec<&'static str>>,
        pending: VecDeque<String>,
        written: Vec<Vec<u8>>,
    }

    impl Scripted {
        fn new(replies: Vec<Vec<&'static str>>) -> Self {
            Self {
                replies: replies.into(),
                pending: VecDeque::new(),
                written: Vec::new(),
            }
        }
    }

    impl Transport for Scripted {
        fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            self.written.push(data.to_vec());
            if data.ends_with(b"\n") {
                if let Some(batch) = self.replies.pop_front() {
                    self.pending.extend(batch.into_iter().map(String::from));
                }
            }
            Ok(())
        }

        fn read_line(&mut self, _timeout: Duration) -> io::Result<Option<String>> {
            Ok(self.pending.pop_front())
        }

        fn clear_buffers(&mut self) -> io::Result<()> {
            self.pending.clear();
            Ok(())
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn channel(replies: Vec<Vec<&'static str>>) -> CommandChannel {
        CommandChannel::new(Box::new(Scripted::new(replies)), Duration::from_millis(20))
    }

    #[test]
    fn test_line_classification() {
        assert!(is_ok_line("ok"));
        assert!(is_error_line("error:20"));
        assert!(!is_error_line("Error:Printer halted"));
        assert!(!is_error_line("err"));
        assert!(is_alarm_line("ALARM:1"));
        assert!(is_alarm_line("[MSG:Hard limit]"));
        assert!(!is_alarm_line("<Idle|MPos:0.000,0.000,0.000>"));
    }

    #[test]
    fn test_send_line_collects_lines() {
        let mut ch = channel(vec![vec!["$0=10", "$1=25", "ok"]]);
        let reply = ch.send_line("$$").expect("reply");
        assert_eq!(reply.ack, Ack::Ok);
        assert_eq!(reply.lines, vec!["$0=10", "$1=25"]);
    }

    #[test]
    fn test_send_line_timeout() {
        let mut ch = channel(vec![vec![]]);
        assert!(matches!(
            ch.send_line("G0 X1"),
            Err(CommandError::Timeout { timeout_ms: 20, .. })
        ));
    }

    #[test]
    fn test_send_line_rejected() {
        let mut ch = channel(vec![vec!["error:20"]]);
        match ch.send_line("G5") {
            Err(CommandError::Rejected { command, message }) => {
                assert_eq!(command, "G5");
                assert!(message.contains("Unsupported"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_alarm_is_recovered() {
        let mut ch = channel(vec![vec!["ALARM:1"], vec!["[MSG:Caution: Unlocked]", "ok"]]);
        let reply = ch.send_line("G0 X50").expect("reply");
        assert_eq!(reply.alarm(), Some("ALARM:1"));
        // the unlock reply is consumed too
        assert!(ch.flush_input(Duration::ZERO).expect("flush").is_empty());
    }

    #[test]
    fn test_drain_counts_errors_as_acks() {
        let mut ch = channel(vec![
            vec![],
            vec![],
            vec!["ok", "error:9", "<Idle|MPos:0.000,0.000,0.000>", "ok"],
        ]);
        ch.write_line_fast("G1 X1").expect("write");
        ch.write_line_fast("G1 X2").expect("write");
        ch.write_line_fast("G1 X3").expect("write");

        let drain = ch.drain_acks(Duration::from_millis(10)).expect("drain");
        assert_eq!(drain.acks, 3);
        assert_eq!(drain.rejected, vec!["error:9"]);
        assert_eq!(drain.other.len(), 1);
        assert_eq!(
            drain.outcomes,
            vec![Outcome::Accepted, Outcome::Rejected, Outcome::Accepted]
        );
    }
}
