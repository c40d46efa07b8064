//! `$$` parameter dump parsing

/// Parse one `$n=value` line of a parameter dump
///
/// Trailing parenthetical comments (`$110=500.000 (x max rate, mm/min)`)
/// are dropped. Returns the key with its `$` prefix and the trimmed value.
pub fn parse_setting_line(line: &str) -> Option<(String, String)> {
    let line = line.trim();
    let rest = line.strip_prefix('$')?;
    let (number, value) = rest.split_once('=')?;

    let number = number.trim();
    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    let value = match value.find('(') {
        Some(start) => &value[..start],
        None => value,
    }
    .trim();
    if value.is_empty() {
        return None;
    }

    Some((format!("${}", number), value.to_string()))
}

/// Human-readable name of a GRBL 1.1 setting
pub fn setting_name(number: u32) -> &'static str {
    match number {
        0 => "Step pulse time",
        1 => "Step idle delay",
        2 => "Step pulse invert",
        3 => "Step direction invert",
        4 => "Invert step enable pin",
        5 => "Invert limit pins",
        6 => "Invert probe pin",
        10 => "Status report options",
        11 => "Junction deviation",
        12 => "Arc tolerance",
        13 => "Report in inches",
        20 => "Soft limits enable",
        21 => "Hard limits enable",
        22 => "Homing cycle enable",
        23 => "Homing direction invert",
        24 => "Homing locate feed rate",
        25 => "Homing search seek rate",
        26 => "Homing switch debounce delay",
        27 => "Homing switch pull-off distance",
        30 => "Maximum spindle speed",
        31 => "Minimum spindle speed",
        32 => "Laser-mode enable",
        100 => "X-axis steps per millimeter",
        101 => "Y-axis steps per millimeter",
        102 => "Z-axis steps per millimeter",
        110 => "X-axis maximum rate",
        111 => "Y-axis maximum rate",
        112 => "Z-axis maximum rate",
        120 => "X-axis acceleration",
        121 => "Y-axis acceleration",
        122 => "Z-axis acceleration",
        130 => "X-axis maximum travel",
        131 => "Y-axis maximum travel",
        132 => "Z-axis maximum travel",
        _ => "Unknown setting",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain() {
        assert_eq!(
            parse_setting_line("$110=500.000"),
            Some(("$110".to_string(), "500.000".to_string()))
        );
    }

    #[test]
    fn test_parse_with_comment() {
        assert_eq!(
            parse_setting_line("$3=0 (dir port invert mask:00000000)"),
            Some(("$3".to_string(), "0".to_string()))
        );
    }

    #[test]
    fn test_parse_rejects_non_settings() {
        assert_eq!(parse_setting_line("ok"), None);
        assert_eq!(parse_setting_line("$N0="), None);
        assert_eq!(parse_setting_line("$X"), None);
        assert_eq!(parse_setting_line("$=5"), None);
        assert_eq!(parse_setting_line("$11= (empty)"), None);
        assert_eq!(parse_setting_line("[MSG:Caution: Unlocked]"), None);
    }

    #[test]
    fn test_setting_name() {
        assert_eq!(setting_name(11), "Junction deviation");
        assert_eq!(setting_name(3), "Step direction invert");
        assert_eq!(setting_name(999), "Unknown setting");
    }
}
