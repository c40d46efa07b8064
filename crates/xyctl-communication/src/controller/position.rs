//! Logical position tracking
//!
//! The tracker follows the commanded X/Y position from the text of
//! acknowledged motion commands; it never reads the firmware's position.

use super::gcode::{self, AxisWords};
use xyctl_core::{MachinePosition, MotionMode};

/// Displacement of a motion line written ahead of its acknowledgment
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PendingMove {
    /// X change applied to the tracker
    pub dx: f64,
    /// Y change applied to the tracker
    pub dy: f64,
    /// The line set X to an absolute value
    pub sets_x: bool,
    /// The line set Y to an absolute value
    pub sets_y: bool,
}

/// Logical X/Y position, distance mode and last movement direction
#[derive(Debug, Clone, Default)]
pub struct PositionTracker {
    position: MachinePosition,
}

fn sign(delta: f64) -> Option<i8> {
    if delta > 0.0 {
        Some(1)
    } else if delta < 0.0 {
        Some(-1)
    } else {
        None
    }
}

impl PositionTracker {
    /// Tracker at (0, 0) in absolute mode
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot
    pub fn position(&self) -> MachinePosition {
        self.position
    }

    /// Current distance mode
    pub fn mode(&self) -> MotionMode {
        self.position.mode
    }

    /// Switch distance mode
    pub fn set_mode(&mut self, mode: MotionMode) {
        self.position.mode = mode;
    }

    /// Distance mode in effect for `line` (its own G90/G91 applies first)
    pub fn mode_for(&self, line: &str) -> MotionMode {
        gcode::mode_switch(line).unwrap_or(self.position.mode)
    }

    /// Absolute X/Y target of a motion line; unspecified axes keep their value
    pub fn target_for(&self, line: &str) -> (f64, f64) {
        let words = gcode::axis_words(line);
        self.resolve(self.mode_for(line), words)
    }

    fn resolve(&self, mode: MotionMode, words: AxisWords) -> (f64, f64) {
        let MachinePosition { x, y, .. } = self.position;
        match mode {
            MotionMode::Absolute => (words.x.unwrap_or(x), words.y.unwrap_or(y)),
            MotionMode::Relative => (x + words.x.unwrap_or(0.0), y + words.y.unwrap_or(0.0)),
        }
    }

    /// Apply an acknowledged command
    ///
    /// Mode switches always apply; X/Y words only for G0/G1 motion. In
    /// relative mode the words accumulate, in absolute mode they replace the
    /// axis and the delta only updates the remembered direction.
    pub fn update_from_command(&mut self, line: &str) {
        let mode = self.mode_for(line);
        self.position.mode = mode;
        if !gcode::is_motion(line) {
            return;
        }

        let (x, y) = self.resolve(mode, gcode::axis_words(line));
        if let Some(dir) = sign(x - self.position.x) {
            self.position.last_dir_x = dir;
        }
        if let Some(dir) = sign(y - self.position.y) {
            self.position.last_dir_y = dir;
        }
        self.position.x = x;
        self.position.y = y;
    }

    /// Apply a motion line before the firmware answered it
    ///
    /// The returned move is what [`PositionTracker::reject_pending`] takes
    /// back if the firmware refuses the line.
    pub fn apply_pending(&mut self, line: &str) -> PendingMove {
        let before = self.position;
        let absolute = gcode::is_motion(line) && self.mode_for(line) == MotionMode::Absolute;
        let words = gcode::axis_words(line);
        self.update_from_command(line);
        PendingMove {
            dx: self.position.x - before.x,
            dy: self.position.y - before.y,
            sets_x: absolute && words.x.is_some(),
            sets_y: absolute && words.y.is_some(),
        }
    }

    /// Take back a pending move the firmware refused
    ///
    /// `later` are the moves still pending behind it. On an axis a later
    /// move sets absolutely, the error is handed to the first such move
    /// instead of the tracker.
    pub fn reject_pending<'a>(
        &mut self,
        refused: PendingMove,
        later: impl IntoIterator<Item = &'a mut PendingMove>,
    ) {
        let (mut dx, mut dy) = (Some(refused.dx), Some(refused.dy));
        for pending in later {
            if pending.sets_x {
                if let Some(d) = dx.take() {
                    pending.dx += d;
                }
            }
            if pending.sets_y {
                if let Some(d) = dy.take() {
                    pending.dy += d;
                }
            }
        }
        if let Some(d) = dx {
            self.position.x -= d;
        }
        if let Some(d) = dy {
            self.position.y -= d;
        }
    }

    /// Redefine the current position as (0, 0)
    pub fn reset_origin(&mut self) {
        self.position.x = 0.0;
        self.position.y = 0.0;
    }

    /// Restore a remembered position (display only)
    pub fn restore(&mut self, x: f64, y: f64) {
        self.position.x = x;
        self.position.y = y;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absolute_replaces() {
        let mut tracker = PositionTracker::new();
        tracker.update_from_command("G0 X10 Y5");
        tracker.update_from_command("G1 X4");
        let pos = tracker.position();
        assert_eq!((pos.x, pos.y), (4.0, 5.0));
        assert_eq!(pos.last_dir_x, -1);
        assert_eq!(pos.last_dir_y, 1);
    }

    #[test]
    fn test_relative_accumulates() {
        let mut tracker = PositionTracker::new();
        tracker.update_from_command("G91");
        assert_eq!(tracker.mode(), MotionMode::Relative);
        tracker.update_from_command("G0 X1 Y-2");
        tracker.update_from_command("G0 X1");
        let pos = tracker.position();
        assert_eq!((pos.x, pos.y), (2.0, -2.0));
        assert_eq!(pos.last_dir_y, -1);
    }

    #[test]
    fn test_mode_switch_in_same_line() {
        let mut tracker = PositionTracker::new();
        tracker.restore(5.0, 5.0);
        assert_eq!(tracker.target_for("G91 G0 X1"), (6.0, 5.0));
        assert_eq!(tracker.target_for("G0 X1"), (1.0, 5.0));
    }

    #[test]
    fn test_non_motion_keeps_position() {
        let mut tracker = PositionTracker::new();
        tracker.update_from_command("G0 X3 Y3");
        tracker.update_from_command("G92 X0 Y0");
        tracker.update_from_command("G4 P1");
        let pos = tracker.position();
        assert_eq!((pos.x, pos.y), (3.0, 3.0));
    }

    #[test]
    fn test_zero_delta_keeps_direction() {
        let mut tracker = PositionTracker::new();
        tracker.update_from_command("G0 X-1");
        tracker.update_from_command("G0 X-1 Y2");
        assert_eq!(tracker.position().last_dir_x, -1);
    }

    #[test]
    fn test_reset_origin_keeps_mode() {
        let mut tracker = PositionTracker::new();
        tracker.update_from_command("G91 G0 X7");
        tracker.reset_origin();
        let pos = tracker.position();
        assert_eq!((pos.x, pos.y), (0.0, 0.0));
        assert_eq!(pos.mode, MotionMode::Relative);
    }

    #[test]
    fn test_rejected_relative_move_is_undone() {
        let mut tracker = PositionTracker::new();
        tracker.set_mode(MotionMode::Relative);
        let refused = tracker.apply_pending("G1 X-10");
        let mut later = tracker.apply_pending("G1 X2 Y1");
        tracker.reject_pending(refused, [&mut later]);
        let pos = tracker.position();
        assert_eq!((pos.x, pos.y), (2.0, 1.0));
    }

    #[test]
    fn test_absolute_successor_takes_the_error() {
        let mut tracker = PositionTracker::new();
        let refused = tracker.apply_pending("G1 X5 Y5");
        let mut pinned = tracker.apply_pending("G1 X1");
        tracker.reject_pending(refused, [&mut pinned]);
        let pos = tracker.position();
        assert_eq!((pos.x, pos.y), (1.0, 0.0));

        // refusing the absolute move too lands back where both started
        tracker.reject_pending(pinned, std::iter::empty());
        let pos = tracker.position();
        assert_eq!((pos.x, pos.y), (0.0, 0.0));
    }
}
