//! Jog, home, origin and emergency stop

use super::gcode::fmt_coord;
use super::MotionController;
use crate::firmware::grbl::realtime::{CYCLE_START, FEED_HOLD, JOG_CANCEL};
use std::sync::atomic::Ordering;
use xyctl_core::{CommandError, Event, EventKind, MotionMode};

/// Redefine the current position as the origin
const SET_ORIGIN: &str = "G92 X0 Y0";
/// Rapid back to the origin
const GO_HOME: &str = "G0 X0 Y0";

impl MotionController {
    /// Move one jog step in the given direction
    ///
    /// `dir_x`/`dir_y` are -1, 0 or 1 and not both zero. The step is checked
    /// against the envelope before anything is sent, then issued as a
    /// relative G0 bracketed by G91/G90. A failed G0 triggers an emergency
    /// stop.
    pub fn move_step(&self, dir_x: i8, dir_y: i8) -> Result<(), CommandError> {
        let valid = |dir: i8| (-1..=1).contains(&dir);
        if !valid(dir_x) || !valid(dir_y) || (dir_x == 0 && dir_y == 0) {
            return Err(CommandError::InvalidJog { dir_x, dir_y });
        }
        self.ensure_not_streaming()?;
        if self.is_held() || self.abort.load(Ordering::SeqCst) {
            return Err(CommandError::MotionHeld);
        }

        let step = self.config.motion.step_size;
        let dx = f64::from(dir_x) * step;
        let dy = f64::from(dir_y) * step;

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.channel()?;

        if let Err(violation) = inner.guard.validate_move_delta(dx, dy, &inner.tracker) {
            let detail = violation.to_string();
            inner.events.push(
                Event::new(EventKind::LimitViolation)
                    .with("detail", &detail)
                    .with("axis", violation.axis),
            );
            return Err(CommandError::LimitViolation { detail });
        }

        let mut words = Vec::with_capacity(2);
        if dir_x != 0 {
            words.push(format!("X{}", fmt_coord(dx)));
        }
        if dir_y != 0 {
            words.push(format!("Y{}", fmt_coord(dy)));
        }
        let command = format!("G0 {}", words.join(" "));

        inner.send_command("G91")?;
        let moved = inner.send_command(&command);
        let restored = inner.send_command("G90");
        drop(guard);

        if let Err(e) = moved {
            tracing::error!("Jog '{}' failed: {}", command, e);
            if let Err(stop) = self.emergency_stop() {
                tracing::warn!("Emergency stop after failed jog: {}", stop);
            }
            return Err(e);
        }
        restored.map(|_| ())
    }

    /// Rapid to (0, 0) in absolute mode
    pub fn home(&self) -> Result<(), CommandError> {
        self.ensure_not_streaming()?;
        if self.is_held() {
            return Err(CommandError::MotionHeld);
        }

        let mut inner = self.inner.lock();
        if inner.tracker.mode() == MotionMode::Relative {
            inner.send_command("G90")?;
        }
        inner.send_command(GO_HOME)?;
        Ok(())
    }

    /// Make the current position the origin and arm the standard envelope
    pub fn establish_origin(&self) -> Result<(), CommandError> {
        self.ensure_not_streaming()?;

        let mut inner = self.inner.lock();
        inner.send_command(SET_ORIGIN)?;
        inner.tracker.reset_origin();
        let half_extent = self.config.motion.envelope_half_extent;
        inner.guard.establish_origin(half_extent);
        let position = inner.tracker.position();
        drop(inner);

        self.save_position(position);
        self.abort.store(false, Ordering::SeqCst);
        tracing::info!("Origin established, envelope ±{}", half_extent);
        self.events.push(
            Event::new(EventKind::OriginEstablished).with("half_extent", half_extent),
        );
        Ok(())
    }

    /// Feed hold and jog cancel
    ///
    /// The hold flag is raised before anything is sent, so streaming and
    /// jogging stop even when the link is gone. Origin and alarm state are
    /// left untouched.
    pub fn emergency_stop(&self) -> Result<(), CommandError> {
        self.hold.store(true, Ordering::SeqCst);

        let mut inner = self.inner.lock();
        inner.send_realtime(FEED_HOLD)?;
        inner.send_realtime(JOG_CANCEL)?;
        drop(inner);

        tracing::warn!("Emergency stop");
        self.events.push(Event::new(EventKind::EmergencyStop));
        Ok(())
    }

    /// Cycle start; clears hold and any pending limit abort
    pub fn resume(&self) -> Result<(), CommandError> {
        self.inner.lock().send_realtime(CYCLE_START)?;
        self.hold.store(false, Ordering::SeqCst);
        self.abort.store(false, Ordering::SeqCst);

        tracing::info!("Resumed");
        self.events.push(Event::new(EventKind::Resumed));
        Ok(())
    }
}
