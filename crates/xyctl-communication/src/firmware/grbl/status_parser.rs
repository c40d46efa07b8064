//! GRBL Status Report Parsing
//!
//! Extracts machine state, machine position, feed rate and override
//! percentages from `<State|MPos:...|FS:...|Ov:...>` status frames. Fields
//! are located by prefix, so their order inside the frame does not matter.

use serde::{Deserialize, Serialize};

/// Override state (Feed, Rapid, Spindle) as reported by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedOverrides {
    /// Feed override percentage
    pub feed: u16,
    /// Rapid override percentage
    pub rapid: u16,
    /// Spindle override percentage
    pub spindle: u16,
}

impl ReportedOverrides {
    /// Parse override state from string (format: "feed,rapid,spindle")
    pub fn parse(ov_str: &str) -> Option<Self> {
        let mut parts = ov_str.split(',').map(|p| p.trim().parse::<u16>().ok());
        let feed = parts.next()??;
        let rapid = parts.next()??;
        let spindle = parts.next()??;

        Some(Self {
            feed,
            rapid,
            spindle,
        })
    }
}

/// Parsed status frame
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    /// Machine state (Idle, Run, Hold:0, Alarm, ...)
    pub state: String,
    /// Machine X/Y position
    pub mpos: Option<(f64, f64)>,
    /// Override percentages
    pub overrides: Option<ReportedOverrides>,
    /// Current feed rate
    pub feed_rate: Option<f64>,
}

/// Status frame parser
pub struct StatusParser;

impl StatusParser {
    /// Whether a line is a status frame
    pub fn is_status_frame(line: &str) -> bool {
        line.starts_with('<')
    }

    /// Parse a complete frame; `None` if the line is not a status frame
    pub fn parse(status_line: &str) -> Option<StatusReport> {
        let line = status_line.trim();
        if !Self::is_status_frame(line) {
            return None;
        }

        Some(StatusReport {
            state: Self::parse_machine_state(line)?,
            mpos: Self::parse_mpos(line),
            overrides: Self::parse_overrides(line),
            feed_rate: Self::parse_feed_rate(line),
        })
    }

    /// Parse machine state from status report
    /// Extracts state from format: <Idle|...> or <Run|...>
    pub fn parse_machine_state(status_line: &str) -> Option<String> {
        let start = status_line.find('<')?;
        let rest = &status_line[start + 1..];
        let end = rest.find(['|', '>']).unwrap_or(rest.len());
        let state = rest[..end].trim();
        (!state.is_empty()).then(|| state.to_string())
    }

    /// Parse machine X/Y position from status report
    pub fn parse_mpos(status_line: &str) -> Option<(f64, f64)> {
        let field = Self::extract_field(status_line, "MPos:")?;
        let mut coords = field.split(',').map(|c| c.trim().parse::<f64>().ok());
        Some((coords.next()??, coords.next()??))
    }

    /// Parse overrides from status report
    pub fn parse_overrides(status_line: &str) -> Option<ReportedOverrides> {
        Self::extract_field(status_line, "Ov:").and_then(ReportedOverrides::parse)
    }

    /// Parse feed rate from status report
    /// Handles both separate "F:" field and combined "FS:feed,spindle" field
    pub fn parse_feed_rate(status_line: &str) -> Option<f64> {
        if let Some(rate_str) = Self::extract_field(status_line, "F:") {
            return rate_str.trim().parse::<f64>().ok();
        }

        let fs_str = Self::extract_field(status_line, "FS:")?;
        fs_str.split(',').next()?.trim().parse::<f64>().ok()
    }

    /// Extract field value from status report
    fn extract_field<'a>(status_line: &'a str, field_prefix: &str) -> Option<&'a str> {
        // Strip angle brackets if present
        let search_line = status_line
            .trim()
            .trim_start_matches('<')
            .trim_end_matches('>');

        // Match whole field names only ("F:" must not hit "FS:" or "WCO:...F")
        let field = search_line
            .split('|')
            .find(|field| field.starts_with(field_prefix))?;
        Some(&field[field_prefix.len()..])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_frame() {
        let report =
            StatusParser::parse("<Run|MPos:0.000,0.000,0.000|FS:500,0|Ov:120,100,100>")
                .expect("frame");
        assert_eq!(report.state, "Run");
        assert_eq!(report.mpos, Some((0.0, 0.0)));
        assert_eq!(
            report.overrides,
            Some(ReportedOverrides {
                feed: 120,
                rapid: 100,
                spindle: 100
            })
        );
        assert_eq!(report.feed_rate, Some(500.0));
    }

    #[test]
    fn test_separate_feed_field() {
        let line = "<Idle|MPos:1.500,-2.250,0.000|F:750>";
        assert_eq!(StatusParser::parse_feed_rate(line), Some(750.0));
        assert_eq!(StatusParser::parse_mpos(line), Some((1.5, -2.25)));
        assert_eq!(StatusParser::parse_overrides(line), None);
    }

    #[test]
    fn test_field_order_does_not_matter() {
        let line = "<Hold:0|Ov:80,50,100|FS:120,0|WCO:0.000,0.000,0.000>";
        assert_eq!(StatusParser::parse_machine_state(line).as_deref(), Some("Hold:0"));
        assert_eq!(StatusParser::parse_overrides(line).map(|o| o.feed), Some(80));
        assert_eq!(StatusParser::parse_feed_rate(line), Some(120.0));
    }

    #[test]
    fn test_not_a_frame() {
        assert_eq!(StatusParser::parse("ok"), None);
        assert_eq!(StatusParser::parse("[MSG:Caution: Unlocked]"), None);
        assert_eq!(StatusParser::parse("<>"), None);
    }

    #[test]
    fn test_truncated_overrides() {
        assert_eq!(ReportedOverrides::parse("120,100"), None);
        assert_eq!(ReportedOverrides::parse("x,100,100"), None);
    }
}
