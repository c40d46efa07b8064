//! Feed override control
//!
//! GRBL (and unidentified firmware) is driven to the target percentage with
//! real-time pulses; Marlin gets a single `M220` speed command.

use super::{Inner, MotionController};
use crate::firmware::grbl::plan_override_pulses;
use crate::firmware::marlin;
use std::time::Duration;
use xyctl_core::{clamp_override, CommandError, Event, EventKind, FirmwareKind};

impl Inner {
    /// Whether the firmware override differs from the user target
    pub(crate) fn override_pending(&self) -> bool {
        clamp_override(i32::from(self.overrides.target_speed_percent))
            != self.overrides.current_percent
    }

    /// Move the firmware override to the user target
    pub(crate) fn apply_override(&mut self, pulse_delay: Duration) -> Result<(), CommandError> {
        let objective = clamp_override(i32::from(self.overrides.target_speed_percent));
        let current = self.overrides.current_percent;
        if objective == current {
            return Ok(());
        }

        if self.firmware() == FirmwareKind::Marlin {
            self.send_command(&marlin::speed_command(objective))?;
            tracing::info!("Speed {}% -> {}%", current, objective);
        } else {
            let pulses = plan_override_pulses(current, objective, &self.codes);
            tracing::info!(
                "Override {}% -> {}% ({} pulses)",
                current,
                objective,
                pulses.len()
            );
            for (i, byte) in pulses.iter().enumerate() {
                if i > 0 && !pulse_delay.is_zero() {
                    std::thread::sleep(pulse_delay);
                }
                self.send_realtime(*byte)?;
            }
        }

        self.overrides.current_percent = objective;
        self.events.push(
            Event::new(EventKind::OverrideApplied)
                .with("from", current)
                .with("percent", objective),
        );
        Ok(())
    }
}

impl MotionController {
    /// Set the user's target speed, clamped to [10, 200] and persisted
    ///
    /// Nothing is sent; see [`MotionController::apply_override`].
    pub fn set_target_speed(&self, percent: i32) -> u16 {
        let clamped = clamp_override(percent);
        self.inner.lock().overrides.target_speed_percent = clamped;
        if let Err(e) = self.store.save_speed(clamped) {
            tracing::warn!("Failed to persist speed: {}", e);
        }
        clamped
    }

    /// User's target speed
    pub fn target_speed(&self) -> u16 {
        self.inner.lock().overrides.target_speed_percent
    }

    /// Bring the firmware override to the target speed
    ///
    /// Does nothing while a stream runs (the streamer reconciles on its
    /// own) or while disconnected.
    pub fn apply_override(&self) -> Result<(), CommandError> {
        if self.is_streaming() {
            tracing::debug!("Override deferred to the stream session");
            return Ok(());
        }

        let mut inner = self.inner.lock();
        if !inner.is_connected() {
            return Ok(());
        }
        inner.apply_override(self.config.pulse_delay())
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::controller;
    use crate::communication::SimulatedMachine;
    use crate::firmware::grbl::realtime::OverrideCodes;
    use proptest::prelude::*;
    use xyctl_core::EventKind;
    use xyctl_settings::OverrideCodeTable;

    #[test]
    fn test_disconnected_is_noop() {
        let machine = SimulatedMachine::grbl();
        let (ctl, _dir) = controller(&machine);
        ctl.set_target_speed(150);
        ctl.apply_override().expect("no-op");
        assert!(machine.realtime_bytes().is_empty());
    }

    #[test]
    fn test_target_is_clamped_and_persisted() {
        let machine = SimulatedMachine::grbl();
        let (ctl, _dir) = controller(&machine);
        assert_eq!(ctl.set_target_speed(500), 200);
        assert_eq!(ctl.set_target_speed(3), 10);
        assert_eq!(ctl.target_speed(), 10);
        assert_eq!(ctl.store().load_speed().expect("load"), Some(10));
    }

    #[test]
    fn test_grbl_pulses_reach_target() {
        let machine = SimulatedMachine::grbl();
        let (ctl, _dir) = controller(&machine);
        ctl.connect(None).expect("connect");
        machine.clear_records();

        ctl.set_target_speed(123);
        ctl.apply_override().expect("override");
        assert_eq!(machine.realtime_bytes(), vec![0x91, 0x91, 0x94, 0x94, 0x94]);
        assert_eq!(machine.feed_override(), 123);
        assert_eq!(ctl.override_state().current_percent, 123);

        machine.clear_records();
        ctl.set_target_speed(100);
        ctl.apply_override().expect("reset");
        assert_eq!(machine.realtime_bytes(), vec![0x93]);
        assert_eq!(machine.feed_override(), 100);

        let kinds: Vec<_> = ctl.drain_events().into_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds.iter().filter(|k| **k == EventKind::OverrideApplied).count(),
            2
        );
    }

    #[test]
    fn test_matching_override_sends_nothing() {
        let machine = SimulatedMachine::grbl();
        let (ctl, _dir) = controller(&machine);
        ctl.connect(None).expect("connect");
        machine.clear_records();
        ctl.apply_override().expect("override");
        assert!(machine.realtime_bytes().is_empty());
    }

    #[test]
    fn test_marlin_uses_speed_command() {
        let machine = SimulatedMachine::marlin();
        let (ctl, _dir) = controller(&machine);
        ctl.connect(None).expect("connect");
        machine.clear_records();

        ctl.set_target_speed(80);
        ctl.apply_override().expect("override");
        assert_eq!(machine.written_lines(), vec!["M220 S80"]);
        assert!(machine.realtime_bytes().is_empty());
        assert_eq!(machine.marlin_speed(), 80);
    }

    #[test]
    fn test_grbl11_code_table() {
        let machine = SimulatedMachine::grbl().with_override_codes(OverrideCodeTable::Grbl11);
        let mut config = super::super::tests::fast_config();
        config.override_codes = OverrideCodeTable::Grbl11;
        let dir = tempfile::tempdir().expect("tempdir");
        let ctl = super::MotionController::with_store(
            config,
            std::sync::Arc::new(crate::communication::SimulatedOpener::new(machine.clone())),
            xyctl_settings::SidecarStore::new(dir.path()),
        )
        .expect("controller");
        ctl.connect(None).expect("connect");
        machine.clear_records();

        ctl.set_target_speed(111);
        ctl.apply_override().expect("override");
        assert_eq!(machine.realtime_bytes(), vec![0x91, 0x93]);
        assert_eq!(machine.feed_override(), 111);
    }

    fn pulse_counts(bytes: &[u8], codes: &OverrideCodes) -> (usize, usize, usize) {
        let count = |code: u8| bytes.iter().filter(|b| **b == code).count();
        let coarse = count(codes.coarse_plus) + count(codes.coarse_minus);
        let fine = count(codes.fine_plus) + count(codes.fine_minus);
        (coarse, fine, count(codes.reset))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn pulses_match_difference(current in 10u16..=200, objective in 10u16..=200) {
            let machine = SimulatedMachine::grbl();
            let (ctl, _dir) = controller(&machine);
            ctl.connect(None).expect("connect");

            ctl.set_target_speed(i32::from(current));
            ctl.apply_override().expect("setup");
            prop_assert_eq!(machine.feed_override(), current);
            machine.clear_records();

            ctl.set_target_speed(i32::from(objective));
            ctl.apply_override().expect("override");
            let bytes = machine.realtime_bytes();
            let codes = OverrideCodes::for_table(OverrideCodeTable::Legacy);
            let (coarse, fine, reset) = pulse_counts(&bytes, &codes);

            let diff = (i32::from(objective) - i32::from(current)).unsigned_abs() as usize;
            if objective == current {
                prop_assert!(bytes.is_empty());
            } else if objective == 100 {
                prop_assert_eq!(bytes, vec![codes.reset]);
            } else {
                prop_assert_eq!(reset, 0);
                prop_assert_eq!(coarse, diff / 10);
                prop_assert_eq!(fine, diff % 10);
                let up = objective > current;
                let wrong = if up {
                    [codes.coarse_minus, codes.fine_minus]
                } else {
                    [codes.coarse_plus, codes.fine_plus]
                };
                prop_assert!(bytes.iter().all(|b| !wrong.contains(b)));
            }
            prop_assert_eq!(machine.feed_override(), objective);
        }
    }
}
