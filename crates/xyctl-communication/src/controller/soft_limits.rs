//! Software travel limits
//!
//! Moves are checked against a rectangular envelope around the established
//! origin before they are transmitted. Until an origin exists, or while
//! enforcement is switched off, every move passes.

use super::gcode;
use super::position::PositionTracker;
use std::fmt;
use xyctl_core::{Axis, MotionMode, SafetyEnvelope};

/// A move whose target leaves the envelope
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Violation {
    /// Offending axis
    pub axis: Axis,
    /// Absolute target on that axis
    pub target: f64,
    /// Lower bound
    pub min: f64,
    /// Upper bound
    pub max: f64,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={:.3} outside [{:.3}, {:.3}]",
            self.axis, self.target, self.min, self.max
        )
    }
}

/// Envelope holder and move validator
#[derive(Debug, Clone, Default)]
pub struct SoftLimitGuard {
    envelope: SafetyEnvelope,
    last_violation: Option<Violation>,
}

impl SoftLimitGuard {
    /// Guard with no origin and enforcement off
    pub fn new() -> Self {
        Self::default()
    }

    /// Current envelope
    pub fn envelope(&self) -> SafetyEnvelope {
        self.envelope
    }

    /// Most recent rejection
    pub fn last_violation(&self) -> Option<Violation> {
        self.last_violation
    }

    /// Validate a command line before transmission
    ///
    /// Only G0/G1 motion is checked. The target of each axis present in the
    /// line is computed with `mode` (the line's own G90/G91 already folded
    /// in); axes the line does not mention keep their current value and are
    /// not checked.
    pub fn validate(
        &mut self,
        line: &str,
        tracker: &PositionTracker,
        mode: MotionMode,
    ) -> Result<(), Violation> {
        if !self.envelope.is_enforced() || !gcode::is_motion(line) {
            return Ok(());
        }

        let words = gcode::axis_words(line);
        let position = tracker.position();
        let target = |axis: Axis, word: f64| match mode {
            MotionMode::Absolute => word,
            MotionMode::Relative => position.get(axis) + word,
        };

        let candidates = [
            words.x.map(|w| (Axis::X, target(Axis::X, w))),
            words.y.map(|w| (Axis::Y, target(Axis::Y, w))),
        ];
        for (axis, value) in candidates.into_iter().flatten() {
            self.check(axis, value)?;
        }
        Ok(())
    }

    /// Validate one discrete jog step
    pub fn validate_move_delta(
        &mut self,
        dx: f64,
        dy: f64,
        tracker: &PositionTracker,
    ) -> Result<(), Violation> {
        if !self.envelope.is_enforced() {
            return Ok(());
        }

        let position = tracker.position();
        if dx != 0.0 {
            self.check(Axis::X, position.x + dx)?;
        }
        if dy != 0.0 {
            self.check(Axis::Y, position.y + dy)?;
        }
        Ok(())
    }

    fn check(&mut self, axis: Axis, target: f64) -> Result<(), Violation> {
        let (min, max) = self.envelope.bounds(axis);
        if target < min || target > max {
            let violation = Violation {
                axis,
                target,
                min,
                max,
            };
            tracing::warn!("Soft limit: {}", violation);
            self.last_violation = Some(violation);
            return Err(violation);
        }
        Ok(())
    }

    /// Mark the origin established and enforce the standard envelope
    pub fn establish_origin(&mut self, half_extent: f64) {
        self.envelope.origin_established = true;
        self.activate_standard_envelope(half_extent);
    }

    /// Symmetric envelope of `half_extent` around the origin, enforcement on
    pub fn activate_standard_envelope(&mut self, half_extent: f64) {
        self.envelope.x_min = -half_extent;
        self.envelope.x_max = half_extent;
        self.envelope.y_min = -half_extent;
        self.envelope.y_max = half_extent;
        self.envelope.limits_active = true;
    }

    /// Custom bounds; `min < max` on both axes
    pub fn set_envelope(&mut self, x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> bool {
        if !(x_min < x_max && y_min < y_max) {
            return false;
        }
        self.envelope.x_min = x_min;
        self.envelope.x_max = x_max;
        self.envelope.y_min = y_min;
        self.envelope.y_max = y_max;
        true
    }

    /// Switch enforcement; has no effect until an origin exists
    pub fn set_limits_active(&mut self, active: bool) {
        self.envelope.limits_active = active;
    }

    /// Forget the origin (disconnect)
    pub fn clear(&mut self) {
        self.envelope = SafetyEnvelope::default();
        self.last_violation = None;
    }
}
