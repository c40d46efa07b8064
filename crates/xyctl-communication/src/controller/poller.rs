//! Status polling and liveness debounce
//!
//! [`StatusPoller`] rate-limits status queries and folds GRBL status frames
//! into the override state. [`LivenessMonitor`] turns individual ping
//! results into a connection verdict that tolerates a run of failures.

use crate::firmware::grbl::StatusParser;
use std::time::{Duration, Instant};
use xyctl_core::OverrideState;

/// Rate limiter and frame interpreter for status polls
#[derive(Debug, Clone)]
pub struct StatusPoller {
    interval: Duration,
    last_poll: Option<Instant>,
}

impl StatusPoller {
    /// Poller allowing one query per `interval`
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_poll: None,
        }
    }

    /// Whether a query may be issued now
    pub fn is_due(&self) -> bool {
        self.last_poll
            .is_none_or(|last| last.elapsed() >= self.interval)
    }

    /// Record that a query was issued
    pub fn mark_polled(&mut self) {
        self.last_poll = Some(Instant::now());
    }

    /// Fold a status frame into `state`
    ///
    /// The first `Ov:` field becomes the feed override and, when in
    /// [1, 250], also the override the controller believes is active. The
    /// second and third fields are rapid and spindle; `F:`/`FS:` give the
    /// feed rate. Fields missing from the frame leave prior values alone.
    /// Returns whether anything was recognized.
    pub fn apply_frame(state: &mut OverrideState, line: &str) -> bool {
        let Some(report) = StatusParser::parse(line) else {
            return false;
        };

        if let Some(ov) = report.overrides {
            state.feed_override_percent = ov.feed;
            if (1..=250).contains(&ov.feed) {
                state.current_percent = ov.feed;
            }
            state.rapid_override_percent = ov.rapid;
            state.spindle_override_percent = ov.spindle;
        }
        if let Some(rate) = report.feed_rate.filter(|r| *r >= 0.0) {
            state.reported_feed_rate = rate;
        }
        true
    }
}

/// Outcome of recording a ping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Link considered up
    Alive,
    /// Threshold reached on this ping; the link is dead
    Dead,
}

/// Debounced liveness verdict
#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    threshold: u32,
    trust_window: Duration,
    failures: u32,
    last_check: Option<Instant>,
    last_alive: bool,
}

impl LivenessMonitor {
    /// Monitor declaring death after `threshold` consecutive failures
    pub fn new(threshold: u32, trust_window: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            trust_window,
            failures: 0,
            last_check: None,
            last_alive: false,
        }
    }

    /// Consecutive failed pings
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// A recent alive verdict that may be reused without pinging
    pub fn is_trusted(&self) -> bool {
        self.last_alive
            && self
                .last_check
                .is_some_and(|last| last.elapsed() < self.trust_window)
    }

    /// Record one ping result
    pub fn record(&mut self, answered: bool) -> Liveness {
        self.last_check = Some(Instant::now());
        if answered {
            self.failures = 0;
            self.last_alive = true;
            return Liveness::Alive;
        }

        self.failures += 1;
        if self.failures >= self.threshold {
            tracing::warn!("{} consecutive pings failed", self.failures);
            self.last_alive = false;
            self.failures = 0;
            return Liveness::Dead;
        }
        tracing::debug!("Ping failed ({}/{})", self.failures, self.threshold);
        Liveness::Alive
    }

    /// Start over after a (re)connect
    pub fn reset(&mut self) {
        self.failures = 0;
        self.last_check = None;
        self.last_alive = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_updates_overrides() {
        let mut state = OverrideState::default();
        assert!(StatusPoller::apply_frame(
            &mut state,
            "<Run|MPos:0.000,0.000,0.000|FS:500,0|Ov:120,100,100>"
        ));
        assert_eq!(state.feed_override_percent, 120);
        assert_eq!(state.current_percent, 120);
        assert_eq!(state.rapid_override_percent, 100);
        assert_eq!(state.spindle_override_percent, 100);
        assert_eq!(state.reported_feed_rate, 500.0);
        assert_eq!(state.target_speed_percent, 100);
    }

    #[test]
    fn test_out_of_range_override_not_mirrored() {
        let mut state = OverrideState::default();
        StatusPoller::apply_frame(&mut state, "<Idle|Ov:0,100,100>");
        assert_eq!(state.feed_override_percent, 0);
        assert_eq!(state.current_percent, 100);
    }

    #[test]
    fn test_partial_frame_keeps_prior_values() {
        let mut state = OverrideState {
            reported_feed_rate: 300.0,
            feed_override_percent: 90,
            ..Default::default()
        };
        assert!(StatusPoller::apply_frame(&mut state, "<Idle|MPos:1.000,2.000,0.000>"));
        assert_eq!(state.reported_feed_rate, 300.0);
        assert_eq!(state.feed_override_percent, 90);
        assert!(!StatusPoller::apply_frame(&mut state, "ok"));
    }

    #[test]
    fn test_rate_limit() {
        let mut poller = StatusPoller::new(Duration::from_secs(60));
        assert!(poller.is_due());
        poller.mark_polled();
        assert!(!poller.is_due());

        let mut eager = StatusPoller::new(Duration::ZERO);
        eager.mark_polled();
        assert!(eager.is_due());
    }

    #[test]
    fn test_debounce() {
        let mut monitor = LivenessMonitor::new(10, Duration::ZERO);
        for _ in 0..9 {
            assert_eq!(monitor.record(false), Liveness::Alive);
        }
        assert_eq!(monitor.failures(), 9);
        assert_eq!(monitor.record(false), Liveness::Dead);
    }

    #[test]
    fn test_success_resets_counter() {
        let mut monitor = LivenessMonitor::new(10, Duration::ZERO);
        for _ in 0..9 {
            monitor.record(false);
        }
        assert_eq!(monitor.record(true), Liveness::Alive);
        assert_eq!(monitor.failures(), 0);
    }

    #[test]
    fn test_trust_window() {
        let mut monitor = LivenessMonitor::new(3, Duration::from_secs(60));
        assert!(!monitor.is_trusted());
        monitor.record(true);
        assert!(monitor.is_trusted());
        monitor.record(false);
        assert!(monitor.is_trusted());

        let mut strict = LivenessMonitor::new(3, Duration::ZERO);
        strict.record(true);
        assert!(!strict.is_trusted());
    }
}
