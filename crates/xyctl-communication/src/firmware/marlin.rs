//! Marlin protocol helpers

/// Identity query
pub const IDENTITY_QUERY: &str = "M115";
/// Position report query
pub const POSITION_QUERY: &str = "M114";

/// `M220 S<percent>` feed rate percentage
pub fn speed_command(percent: u16) -> String {
    format!("M220 S{}", percent)
}

/// Whether a line identifies Marlin
pub fn is_banner(line: &str) -> bool {
    line.contains("FIRMWARE_NAME") || line.to_ascii_lowercase().contains("marlin")
}

/// Parse the X/Y position of an `M114` reply (`X:1.00 Y:2.00 Z:0.00 ...`)
///
/// Only the leading logical coordinates are read; the stepper counts after
/// `Count` are ignored.
pub fn parse_position(line: &str) -> Option<(f64, f64)> {
    let logical = line.split("Count").next()?;
    let value = |axis: &str| {
        logical
            .split_whitespace()
            .find_map(|word| word.strip_prefix(axis))
            .and_then(|v| v.parse::<f64>().ok())
    };
    Some((value("X:")?, value("Y:")?))
}
