//! G-code streaming
//!
//! Explicit G1 lines are pipelined: they are written without waiting for
//! `ok` while at most `window_capacity` of them are unacknowledged. Every
//! other line first waits for the pipeline to drain and then goes through
//! the line protocol. The session releases the transport between steps, so
//! emergency stop, liveness checks and status reads from other callers get
//! through while a long program runs.

use super::gcode::{self, Motion};
use super::position::PendingMove;
use super::{Inner, MotionController};
use crate::communication::channel::{AckDrain, Outcome};
use crate::firmware::grbl::error_decoder;
use parking_lot::MutexGuard;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use xyctl_core::{
    CommandError, Event, EventKind, FirmwareKind, MachinePosition, StreamError,
};
use xyctl_settings::SidecarStore;

/// Outcome of a completed session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamReport {
    /// Lines transmitted
    pub lines_sent: usize,
    /// Blank and comment-only lines skipped
    pub lines_skipped: usize,
    /// Lines the firmware answered with an error
    pub lines_rejected: usize,
}

/// Clears the streaming flag when the session ends, however it ends
struct StreamingFlag<'a>(&'a AtomicBool);

impl Drop for StreamingFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Rate-limited position persistence
struct PositionSaver {
    min_interval: Duration,
    last_save: Option<Instant>,
}

impl PositionSaver {
    fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_save: None,
        }
    }

    fn maybe_save(&mut self, store: &SidecarStore, position: MachinePosition) {
        if self
            .last_save
            .is_some_and(|last| last.elapsed() < self.min_interval)
        {
            return;
        }
        self.last_save = Some(Instant::now());
        if let Err(e) = store.save_position(position.x, position.y) {
            tracing::warn!("Failed to save position: {}", e);
        }
    }
}

fn disconnected(err: CommandError) -> StreamError {
    StreamError::Disconnected {
        reason: err.to_string(),
    }
}

struct Session<'a> {
    ctl: &'a MotionController,
    /// Pipelined lines awaiting an answer, oldest first
    inflight: VecDeque<PendingMove>,
    report: StreamReport,
    saver: PositionSaver,
}

impl<'a> Session<'a> {
    fn new(ctl: &'a MotionController) -> Self {
        Self {
            ctl,
            inflight: VecDeque::new(),
            report: StreamReport::default(),
            saver: PositionSaver::new(ctl.config.position_save_interval()),
        }
    }

    fn capacity(&self) -> usize {
        self.ctl.config.streaming.window_capacity
    }

    fn transmit(&mut self, line: &str) -> Result<(), StreamError> {
        if gcode::motion(line) == Some(Motion::Linear) {
            self.send_fast(line)
        } else {
            self.send_sync(line)
        }
    }

    /// Pipelined write of a G1 line
    fn send_fast(&mut self, line: &str) -> Result<(), StreamError> {
        while self.inflight.len() >= self.capacity() {
            self.make_room()?;
        }

        let mut guard = self.lock_unheld()?;
        let inner = &mut *guard;
        if !inner.is_connected() {
            return Err(disconnected(CommandError::NotConnected));
        }

        let mode = inner.tracker.mode_for(line);
        if let Err(violation) = inner.guard.validate(line, &inner.tracker, mode) {
            let detail = violation.to_string();
            inner.events.push(
                Event::new(EventKind::LimitViolation)
                    .with("detail", &detail)
                    .with("command", line)
                    .with("axis", violation.axis),
            );
            self.ctl.abort.store(true, Ordering::SeqCst);
            return Err(StreamError::AbortedByLimit { detail });
        }

        let result = inner.channel()?.write_line_fast(line);
        inner.check_io(result).map_err(disconnected)?;
        self.inflight.push_back(inner.tracker.apply_pending(line));
        Ok(())
    }

    /// Line protocol after the pipeline drained
    ///
    /// Timeouts and rejections are reported as events and skipped; a limit
    /// violation aborts the session.
    fn send_sync(&mut self, line: &str) -> Result<(), StreamError> {
        self.drain_backlog(self.ctl.config.backlog_drain())?;
        let result = self.lock_unheld()?.send_command(line);
        self.absorb_command(line, result.map(|_| ()))
    }

    /// Take the transport once no hold is in effect
    ///
    /// The flag is checked under the lock: an emergency stop raised while
    /// the caller waited for the lock is honoured before anything is sent.
    fn lock_unheld(&self) -> Result<MutexGuard<'a, Inner>, StreamError> {
        let ctl = self.ctl;
        loop {
            let guard = ctl.inner.lock();
            if !ctl.is_held() {
                return Ok(guard);
            }
            drop(guard);
            self.wait_while_held()?;
        }
    }

    fn absorb_command(
        &mut self,
        line: &str,
        result: Result<(), CommandError>,
    ) -> Result<(), StreamError> {
        match result {
            Ok(()) => Ok(()),
            Err(CommandError::LimitViolation { detail }) => {
                self.ctl.abort.store(true, Ordering::SeqCst);
                Err(StreamError::AbortedByLimit { detail })
            }
            Err(e @ (CommandError::Io { .. } | CommandError::NotConnected)) => {
                Err(disconnected(e))
            }
            Err(e @ CommandError::Rejected { .. }) => {
                tracing::warn!("Skipping '{}': {}", line, e);
                self.report.lines_rejected += 1;
                Ok(())
            }
            Err(e @ CommandError::Timeout { .. }) => {
                tracing::warn!("Continuing after '{}': {}", line, e);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Account for one ack drain
    ///
    /// Answers arrive in the order the lines were written; a refused line
    /// has its move taken back from the tracker.
    fn absorb(&mut self, drain: AckDrain) {
        let ctl = self.ctl;
        for outcome in &drain.outcomes {
            // an alarm takes the slot of the line that raised it
            let Some(settled) = self.inflight.pop_front() else {
                break;
            };
            if *outcome == Outcome::Rejected {
                ctl.inner
                    .lock()
                    .tracker
                    .reject_pending(settled, self.inflight.iter_mut());
            }
        }
        self.report.lines_rejected += drain.rejected.len();

        for alarm in drain.alarms {
            self.ctl.events.push(
                Event::new(EventKind::AlarmRecovered).with("detail", alarm),
            );
        }
        for line in drain.rejected {
            self.ctl.events.push(
                Event::new(EventKind::CommandRejected)
                    .with("detail", error_decoder::describe_reply(&line)),
            );
        }
    }

    fn drain_slice(&mut self, max_wait: Duration) -> Result<usize, StreamError> {
        let drain = {
            let mut inner = self.ctl.inner.lock();
            let result = match inner.channel() {
                Ok(channel) => channel.drain_acks(max_wait),
                Err(e) => Err(e),
            };
            inner.check_io(result).map_err(disconnected)?
        };
        let consumed = drain.outcomes.len();
        self.absorb(drain);
        Ok(consumed)
    }

    /// Full window: drain in short slices until a slot frees up
    fn make_room(&mut self) -> Result<(), StreamError> {
        let timeout = self.ctl.config.window_stall_timeout();
        let mut started = Instant::now();
        while self.inflight.len() >= self.capacity() {
            if self.wait_while_held()? {
                started = Instant::now();
            }
            let consumed = self.drain_slice(self.ctl.config.ack_drain())?;
            if consumed == 0 && started.elapsed() >= timeout {
                let inflight = self.inflight.len();
                tracing::error!("{} lines unacknowledged for {:?}", inflight, timeout);
                return Err(StreamError::WindowStalled {
                    inflight,
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        }
        Ok(())
    }

    /// Wait up to `bound` for every in-flight line to be acknowledged
    ///
    /// Whatever is still missing afterwards is written off so the window
    /// does not shrink for the rest of the session.
    fn drain_backlog(&mut self, bound: Duration) -> Result<(), StreamError> {
        let mut deadline = Instant::now() + bound;
        while !self.inflight.is_empty() {
            if self.wait_while_held()? {
                deadline = Instant::now() + bound;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            self.drain_slice(remaining.min(self.ctl.config.ack_drain()))?;
        }

        if !self.inflight.is_empty() {
            tracing::warn!(
                "{} acknowledgments missing after {:?}; continuing",
                self.inflight.len(),
                bound
            );
            self.inflight.clear();
        }
        Ok(())
    }

    /// Sleep while the hold flag is set; returns whether it waited
    fn wait_while_held(&self) -> Result<bool, StreamError> {
        let mut waited = false;
        while self.ctl.is_held() {
            if !self.ctl.inner.lock().is_connected() {
                return Err(disconnected(CommandError::NotConnected));
            }
            waited = true;
            std::thread::sleep(self.ctl.config.hold_poll());
        }
        Ok(waited)
    }

    /// Status query plus override reconciliation
    ///
    /// Answers read while waiting for the status reply settle their
    /// pipelined lines like any other drain.
    fn resync(&mut self) -> Result<(), StreamError> {
        let (reply, firmware, pending) = {
            let mut inner = self.ctl.inner.lock();
            let reply = inner
                .query_status(self.ctl.config.ping_timeout())
                .map_err(disconnected)?;
            (reply, inner.firmware(), inner.override_pending())
        };
        self.absorb(reply.pipeline);
        if !pending {
            return Ok(());
        }

        if firmware == FirmwareKind::Marlin {
            self.drain_backlog(self.ctl.config.backlog_drain())?;
        }
        let result = self
            .ctl
            .inner
            .lock()
            .apply_override(self.ctl.config.pulse_delay());
        self.absorb_command("override", result)
    }

    fn save_position(&mut self) {
        let position = self.ctl.inner.lock().tracker.position();
        self.saver.maybe_save(&self.ctl.store, position);
    }

    fn run<S: AsRef<str>>(&mut self, lines: &[S], invert_x: bool) -> Result<(), StreamError> {
        let ctl = self.ctl;
        let config = &ctl.config;
        let feed = format!("F{}", gcode::fmt_coord(config.motion.default_feed_rate));
        for line in ["G90", "G0 X0 Y0", feed.as_str()] {
            self.transmit(line)?;
        }

        let mut count = 0usize;
        for raw in lines {
            if self.ctl.abort.load(Ordering::SeqCst) {
                tracing::info!("Stream stopped by abort flag");
                break;
            }
            self.wait_while_held()?;

            let Some(line) = gcode::clean_line(raw.as_ref()) else {
                self.report.lines_skipped += 1;
                continue;
            };
            let line = if invert_x && gcode::is_motion(&line) {
                gcode::mirror_x(&line)
            } else {
                line
            };

            count += 1;
            if count % config.streaming.resync_every_lines == 0 {
                self.resync()?;
            }
            self.transmit(&line)?;
            self.report.lines_sent += 1;
            if count % config.streaming.position_save_every_lines == 0 {
                self.save_position();
            }
        }
        Ok(())
    }

    /// Drain, return to absolute mode and home
    fn finish(&mut self) -> Result<(), StreamError> {
        self.drain_backlog(self.ctl.config.final_drain())?;
        for line in ["G90", "G0 X0 Y0"] {
            let result = self.ctl.inner.lock().send_command(line);
            match self.absorb_command(line, result.map(|_| ())) {
                Err(StreamError::AbortedByLimit { detail }) => {
                    tracing::warn!("Not returning home: {}", detail);
                }
                other => other?,
            }
        }
        Ok(())
    }
}

impl MotionController {
    /// Stream G-code lines
    ///
    /// Requires a connection and an established origin; fails with
    /// [`StreamError::OriginNotSet`] before anything is sent otherwise. The
    /// session switches to absolute mode, homes and sets the default feed,
    /// then sends every non-empty cleaned line in order, mirroring X when
    /// `invert_x` is set. A line that would leave the envelope stops the
    /// session with [`StreamError::AbortedByLimit`]; in every case but a
    /// lost connection the machine is returned home afterwards.
    pub fn stream<S: AsRef<str>>(
        &self,
        lines: &[S],
        invert_x: bool,
    ) -> Result<StreamReport, StreamError> {
        {
            let inner = self.inner.lock();
            if !inner.is_connected() {
                return Err(StreamError::NotConnected);
            }
            if !inner.guard.envelope().origin_established {
                return Err(StreamError::OriginNotSet);
            }
        }
        if self
            .streaming
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(StreamError::AlreadyStreaming);
        }
        let _flag = StreamingFlag(&self.streaming);
        self.abort.store(false, Ordering::SeqCst);

        tracing::info!("Streaming {} lines", lines.len());
        self.events
            .push(Event::new(EventKind::StreamStarted).with("lines", lines.len()));

        let mut session = Session::new(self);
        let outcome = session.run(lines, invert_x);
        let outcome = match outcome {
            Ok(()) => session.finish(),
            Err(StreamError::AbortedByLimit { detail }) => {
                tracing::warn!("Stream aborted: {}", detail);
                session
                    .finish()
                    .and(Err(StreamError::AbortedByLimit { detail }))
            }
            Err(e) => Err(e),
        };

        let position = self.inner.lock().tracker.position();
        self.save_position(position);

        let report = session.report;
        let result = match &outcome {
            Ok(()) => "completed".to_string(),
            Err(e) => e.to_string(),
        };
        tracing::info!(
            "Stream finished: {} sent, {} skipped, {} rejected ({})",
            report.lines_sent,
            report.lines_skipped,
            report.lines_rejected,
            result
        );
        self.events.push(
            Event::new(EventKind::StreamFinished)
                .with("sent", report.lines_sent)
                .with("detail", result),
        );
        outcome.map(|()| report)
    }

    /// Stream the lines of a text file
    pub fn stream_from_file(
        &self,
        path: &Path,
        invert_x: bool,
    ) -> Result<StreamReport, StreamError> {
        let content = std::fs::read_to_string(path).map_err(|e| StreamError::File {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let lines: Vec<&str> = content.lines().collect();
        self.stream(&lines, invert_x)
    }
}

/// Run [`MotionController::stream`] on the tokio blocking pool
///
/// Must be called from within a tokio runtime.
pub fn spawn_stream(
    controller: Arc<MotionController>,
    lines: Vec<String>,
    invert_x: bool,
) -> tokio::task::JoinHandle<Result<StreamReport, StreamError>> {
    tokio::task::spawn_blocking(move || controller.stream(&lines, invert_x))
}

#[cfg(test)]
mod tests {
    use super::super::tests::controller;
    use super::*;
    use crate::communication::SimulatedMachine;

    fn ready(machine: &SimulatedMachine) -> (MotionController, tempfile::TempDir) {
        let (ctl, dir) = controller(machine);
        ctl.connect(None).expect("connect");
        ctl.establish_origin().expect("origin");
        ctl.drain_events();
        machine.clear_records();
        (ctl, dir)
    }

    #[test]
    fn test_requires_origin() {
        let machine = SimulatedMachine::grbl();
        let (ctl, _dir) = controller(&machine);
        ctl.connect(None).expect("connect");
        machine.clear_records();

        assert_eq!(
            ctl.stream(&["G1 X1"], false).unwrap_err(),
            StreamError::OriginNotSet
        );
        assert!(machine.written_lines().is_empty());
        assert!(!ctl.is_streaming());
    }

    #[test]
    fn test_requires_connection() {
        let machine = SimulatedMachine::grbl();
        let (ctl, _dir) = controller(&machine);
        assert_eq!(
            ctl.stream(&["G1 X1"], false).unwrap_err(),
            StreamError::NotConnected
        );
    }

    #[test]
    fn test_preamble_body_and_epilogue() {
        let machine = SimulatedMachine::grbl();
        let (ctl, _dir) = ready(&machine);

        let lines = ["(square)", "G1 X5 Y0 F300", "", "G1 X5 Y5 ; corner", "G4 P0"];
        let report = ctl.stream(&lines, false).expect("stream");
        assert_eq!(report.lines_sent, 3);
        assert_eq!(report.lines_skipped, 2);
        assert_eq!(
            machine.written_lines(),
            vec![
                "G90", "G0 X0 Y0", "F1000", "G1 X5 Y0 F300", "G1 X5 Y5", "G4 P0", "G90",
                "G0 X0 Y0"
            ]
        );
        assert!(!ctl.is_streaming());
        let kinds: Vec<_> = ctl.drain_events().into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds.first(), Some(&EventKind::StreamStarted));
        assert_eq!(kinds.last(), Some(&EventKind::StreamFinished));
    }

    #[test]
    fn test_invert_x() {
        let machine = SimulatedMachine::grbl();
        let (ctl, _dir) = ready(&machine);
        ctl.stream(&["G1 X3 Y1", "G91", "G1 X-1", "G90"], true)
            .expect("stream");
        let written = machine.written_lines();
        assert!(written.contains(&"G1 X-3 Y1".to_string()));
        assert!(written.contains(&"G1 X1".to_string()));
    }

    #[test]
    fn test_limit_aborts_and_returns_home() {
        let machine = SimulatedMachine::grbl();
        let (ctl, _dir) = ready(&machine);

        let err = ctl
            .stream(&["G1 X10", "G1 X25", "G1 X5"], false)
            .unwrap_err();
        assert!(matches!(err, StreamError::AbortedByLimit { .. }));
        let written = machine.written_lines();
        assert!(!written.iter().any(|l| l == "G1 X25" || l == "G1 X5"));
        assert_eq!(written.last().map(String::as_str), Some("G0 X0 Y0"));
        assert_eq!(ctl.position().x, 0.0);

        let kinds: Vec<_> = ctl.drain_events().into_iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&EventKind::LimitViolation));
        // a new session starts with a cleared abort flag
        ctl.stream(&["G1 X1"], false).expect("second stream");
    }

    #[test]
    fn test_relative_lines_checked_against_envelope() {
        let machine = SimulatedMachine::grbl();
        let (ctl, _dir) = ready(&machine);
        let err = ctl
            .stream(&["G91", "G1 X15", "G1 X15"], false)
            .unwrap_err();
        assert!(matches!(err, StreamError::AbortedByLimit { .. }));
    }

    #[test]
    fn test_window_never_exceeds_capacity() {
        let machine = SimulatedMachine::grbl().with_ack_latency(Duration::from_millis(3));
        let (ctl, _dir) = ready(&machine);

        let lines: Vec<String> = (0..60)
            .map(|i| format!("G1 X{} Y{}", i % 10, i % 7))
            .collect();
        let report = ctl.stream(&lines, false).expect("stream");
        assert_eq!(report.lines_sent, 60);
        assert!(machine.max_outstanding() <= 12, "{}", machine.max_outstanding());
        assert!(machine.max_outstanding() > 1);
    }

    #[test]
    fn test_small_window() {
        let machine = SimulatedMachine::grbl().with_ack_latency(Duration::from_millis(2));
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = super::super::tests::fast_config();
        config.streaming.window_capacity = 3;
        let ctl = MotionController::with_store(
            config,
            Arc::new(crate::communication::SimulatedOpener::new(machine.clone())),
            SidecarStore::new(dir.path()),
        )
        .expect("controller");
        ctl.connect(None).expect("connect");
        ctl.establish_origin().expect("origin");
        machine.clear_records();

        let lines: Vec<String> = (0..20).map(|i| format!("G1 X{}", i % 5)).collect();
        ctl.stream(&lines, false).expect("stream");
        assert!(machine.max_outstanding() <= 3);
    }

    #[test]
    fn test_resync_applies_target_override() {
        let machine = SimulatedMachine::grbl();
        let (ctl, _dir) = ready(&machine);
        ctl.set_target_speed(130);

        // deferred while streaming, applied by the session itself
        let lines: Vec<String> = (0..10).map(|i| format!("G1 X{}", i)).collect();
        ctl.stream(&lines, false).expect("stream");
        assert_eq!(machine.feed_override(), 130);
        assert_eq!(ctl.override_state().current_percent, 130);
    }

    #[test]
    fn test_rejected_line_is_skipped() {
        let machine = SimulatedMachine::grbl();
        let (ctl, _dir) = ready(&machine);
        let lines = ["G4 P0", "M5", "G1 X1"];
        machine.reject_next(20);
        // the first preamble line takes the rejection
        let report = ctl.stream(&lines, false).expect("stream");
        assert_eq!(report.lines_rejected, 1);
        assert!(ctl
            .drain_events()
            .iter()
            .any(|e| e.kind == EventKind::CommandRejected));
    }

    #[test]
    fn test_refused_pipelined_move_is_not_tracked() {
        let machine = SimulatedMachine::grbl();
        let (ctl, _dir) = ready(&machine);
        machine.reject_line("G1 X-10", 33);

        // X-10 never happened, so X25 would end at 25
        let err = ctl
            .stream(&["G91", "G1 X-10", "G4 P0", "G1 X25"], false)
            .unwrap_err();
        assert!(matches!(err, StreamError::AbortedByLimit { .. }));
        assert!(!machine.written_lines().iter().any(|l| l == "G1 X25"));
        assert!(ctl
            .drain_events()
            .iter()
            .any(|e| e.kind == EventKind::CommandRejected));
    }

    #[test]
    fn test_refused_move_undone_behind_accepted_one() {
        let machine = SimulatedMachine::grbl();
        let (ctl, _dir) = ready(&machine);
        machine.reject_line("G1 X-10", 33);

        // accepted moves leave the machine at X15; X6 more crosses 20
        let err = ctl
            .stream(&["G91", "G1 X-10", "G1 X15", "G4 P0", "G1 X6"], false)
            .unwrap_err();
        assert!(matches!(err, StreamError::AbortedByLimit { .. }));
        let written = machine.written_lines();
        assert!(written.iter().any(|l| l == "G1 X15"));
        assert!(!written.iter().any(|l| l == "G1 X6"));
    }

    #[test]
    fn test_alarm_during_resync_is_unlocked() {
        let machine = SimulatedMachine::grbl();
        let (ctl, _dir) = ready(&machine);
        machine.raise_alarm_on_next_status("ALARM:1");

        let lines: Vec<String> = (1..=9).map(|i| format!("G1 X{}", i)).collect();
        let report = ctl.stream(&lines, false).expect("stream");
        assert_eq!(report.lines_sent, 9);
        assert_eq!(report.lines_rejected, 0);
        assert!(!machine.is_locked());
        assert!(machine.written_lines().iter().any(|l| l == "$X"));

        let kinds: Vec<_> = ctl.drain_events().into_iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&EventKind::AlarmRecovered));
        assert!(!kinds.contains(&EventKind::CommandRejected));
    }

    #[test]
    fn test_io_failure_ends_session() {
        let machine = SimulatedMachine::grbl();
        let (ctl, _dir) = ready(&machine);
        machine.set_fail_io(true);
        let err = ctl.stream(&["G1 X1"], false).unwrap_err();
        assert!(matches!(err, StreamError::Disconnected { .. }));
        assert!(!ctl.is_streaming());
        assert_eq!(ctl.connection_state(), xyctl_core::ConnectionState::Disconnected);
    }

    #[test]
    fn test_hold_pauses_until_resume() {
        let machine = SimulatedMachine::grbl();
        let (ctl, _dir) = ready(&machine);
        let ctl = Arc::new(ctl);

        ctl.emergency_stop().expect("stop");
        let worker = {
            let ctl = ctl.clone();
            std::thread::spawn(move || ctl.stream(&["G1 X1", "G1 X2"], false))
        };
        std::thread::sleep(Duration::from_millis(50));
        assert!(ctl.is_streaming());
        // only the preamble went out
        assert!(!machine.written_lines().iter().any(|l| l.starts_with("G1")));

        ctl.resume().expect("resume");
        let report = worker.join().expect("join").expect("stream");
        assert_eq!(report.lines_sent, 2);
    }

    #[test]
    fn test_already_streaming() {
        let machine = SimulatedMachine::grbl();
        let (ctl, _dir) = ready(&machine);
        let ctl = Arc::new(ctl);

        ctl.emergency_stop().expect("stop");
        let worker = {
            let ctl = ctl.clone();
            std::thread::spawn(move || ctl.stream(&["G1 X1"], false))
        };
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(
            ctl.stream(&["G1 X2"], false).unwrap_err(),
            StreamError::AlreadyStreaming
        );
        assert!(matches!(ctl.move_step(1, 0), Err(CommandError::Busy { .. })));

        ctl.resume().expect("resume");
        worker.join().expect("join").expect("stream");
    }

    #[test]
    fn test_stream_from_missing_file() {
        let machine = SimulatedMachine::grbl();
        let (ctl, dir) = ready(&machine);
        let err = ctl
            .stream_from_file(&dir.path().join("missing.nc"), false)
            .unwrap_err();
        assert!(matches!(err, StreamError::File { .. }));
    }

    #[test]
    fn test_stream_from_file() {
        let machine = SimulatedMachine::grbl();
        let (ctl, dir) = ready(&machine);
        let path = dir.path().join("part.nc");
        std::fs::write(&path, "G1 X1 Y1\n; done\nG1 X0 Y0\n").expect("write");
        let report = ctl.stream_from_file(&path, false).expect("stream");
        assert_eq!(report.lines_sent, 2);
        assert_eq!(report.lines_skipped, 1);
    }

    #[test]
    fn test_position_saved_at_end() {
        let machine = SimulatedMachine::grbl();
        let (ctl, _dir) = ready(&machine);
        ctl.stream(&["G1 X3 Y4"], false).expect("stream");
        assert_eq!(ctl.store().load_position().expect("load"), Some((0.0, 0.0)));
    }
}
