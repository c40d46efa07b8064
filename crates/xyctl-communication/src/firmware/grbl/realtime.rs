//! Real-time command bytes and the feed override pulse planner
//!
//! Real-time bytes bypass the line buffer and are never acknowledged. The
//! feed override is moved in coarse (10%) and fine (1%) steps, so reaching a
//! target takes `|diff| / 10` coarse pulses plus `|diff| % 10` fine pulses.

use xyctl_core::{OVERRIDE_MAX_PERCENT, OVERRIDE_MIN_PERCENT};
use xyctl_settings::OverrideCodeTable;

/// Status report query
pub const STATUS_QUERY: u8 = b'?';
/// Feed hold
pub const FEED_HOLD: u8 = b'!';
/// Cycle start / resume
pub const CYCLE_START: u8 = b'~';
/// Jog cancel
pub const JOG_CANCEL: u8 = 0x85;

/// Feed override bytes for one firmware dialect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverrideCodes {
    /// Back to 100%
    pub reset: u8,
    /// +10%
    pub coarse_plus: u8,
    /// -10%
    pub coarse_minus: u8,
    /// +1%
    pub fine_plus: u8,
    /// -1%
    pub fine_minus: u8,
}

impl OverrideCodes {
    /// Reset 0x93, +10 0x91, -10 0x92, +1 0x94, -1 0x95
    pub const LEGACY: Self = Self {
        reset: 0x93,
        coarse_plus: 0x91,
        coarse_minus: 0x92,
        fine_plus: 0x94,
        fine_minus: 0x95,
    };

    /// Stock GRBL 1.1: reset 0x90, +10 0x91, -10 0x92, +1 0x93, -1 0x94
    pub const GRBL11: Self = Self {
        reset: 0x90,
        coarse_plus: 0x91,
        coarse_minus: 0x92,
        fine_plus: 0x93,
        fine_minus: 0x94,
    };

    /// Codes for a configured table
    pub fn for_table(table: OverrideCodeTable) -> Self {
        match table {
            OverrideCodeTable::Legacy => Self::LEGACY,
            OverrideCodeTable::Grbl11 => Self::GRBL11,
        }
    }
}

/// Pulses that move the feed override from `current` to `objective`
///
/// An objective of 100 is reached with a single reset byte. Equal values
/// need no pulses.
pub fn plan_override_pulses(current: u16, objective: u16, codes: &OverrideCodes) -> Vec<u8> {
    if objective == current {
        return Vec::new();
    }
    if objective == 100 {
        return vec![codes.reset];
    }

    let diff = objective as i32 - current as i32;
    let (coarse, fine) = if diff > 0 {
        (codes.coarse_plus, codes.fine_plus)
    } else {
        (codes.coarse_minus, codes.fine_minus)
    };
    let magnitude = diff.unsigned_abs() as usize;

    let mut pulses = vec![coarse; magnitude / 10];
    pulses.extend(std::iter::repeat(fine).take(magnitude % 10));
    pulses
}

/// Override percentage after the firmware applies one pulse
///
/// Returns `None` for bytes that are not feed override codes.
pub fn apply_pulse(codes: &OverrideCodes, current: u16, byte: u8) -> Option<u16> {
    let next = if byte == codes.reset {
        100
    } else if byte == codes.coarse_plus {
        current as i32 + 10
    } else if byte == codes.coarse_minus {
        current as i32 - 10
    } else if byte == codes.fine_plus {
        current as i32 + 1
    } else if byte == codes.fine_minus {
        current as i32 - 1
    } else {
        return None;
    };
    Some(next.clamp(OVERRIDE_MIN_PERCENT as i32, OVERRIDE_MAX_PERCENT as i32) as u16)
}
