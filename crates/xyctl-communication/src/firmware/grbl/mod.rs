//! GRBL protocol helpers
//!
//! Command tokens, real-time bytes, status frame parsing, `$$` parameter
//! parsing and error/alarm decoding for GRBL 1.1.

pub mod error_decoder;
pub mod realtime;
pub mod settings;
pub mod status_parser;

pub use realtime::{plan_override_pulses, OverrideCodes};
pub use settings::{parse_setting_line, setting_name};
pub use status_parser::{ReportedOverrides, StatusParser, StatusReport};

/// Identity query
pub const IDENTITY_QUERY: &str = "$I";
/// Alarm unlock
pub const UNLOCK: &str = "$X";
/// Full parameter dump
pub const DUMP_PARAMETERS: &str = "$$";
/// Disable hard limits on the firmware
pub const DISABLE_HARD_LIMITS: &str = "$21=0";
/// Disable soft limits on the firmware
pub const DISABLE_SOFT_LIMITS: &str = "$20=0";

/// `$3=<mask>` direction invert mask
pub fn direction_mask_command(mask: u8) -> String {
    format!("$3={}", mask)
}

/// `$11=<value>` junction deviation
pub fn junction_deviation_command(value: f64) -> String {
    format!("$11={}", value)
}
