//! G-code line utilities
//!
//! Comment stripping, word parsing and the handful of classifications the
//! controller needs: distance-mode switches, straight-line motion, X/Y
//! targets and X mirroring.

use xyctl_core::MotionMode;

/// Strip comments and normalize whitespace
///
/// Parenthetical comments (nesting allowed) and everything from `;` to the
/// end of the line are removed, runs of whitespace collapse to one space.
/// Returns `None` when nothing is left.
pub fn clean_line(raw: &str) -> Option<String> {
    let mut stripped = String::with_capacity(raw.len());
    let mut depth = 0usize;
    for c in raw.chars() {
        match c {
            '(' => depth += 1,
            ')' if depth > 0 => depth -= 1,
            ';' if depth == 0 => break,
            _ if depth == 0 => stripped.push(c),
            _ => {}
        }
    }

    let cleaned = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    (!cleaned.is_empty()).then_some(cleaned)
}

/// Letter/value words of a line (`G1 X10 Y-5` or `G1X10Y-5`)
///
/// Letters are upper-cased; words whose value does not parse are skipped.
pub fn words(line: &str) -> Vec<(char, f64)> {
    let mut words = Vec::new();
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        if !c.is_ascii_alphabetic() {
            continue;
        }
        let mut number = String::new();
        while let Some(&next) = chars.peek() {
            if next.is_ascii_digit() || matches!(next, '.' | '-' | '+') {
                number.push(next);
                chars.next();
            } else {
                break;
            }
        }
        if let Ok(value) = number.parse::<f64>() {
            words.push((c.to_ascii_uppercase(), value));
        }
    }

    words
}

fn g_codes(words: &[(char, f64)]) -> impl Iterator<Item = f64> + '_ {
    words.iter().filter(|(l, _)| *l == 'G').map(|(_, v)| *v)
}

/// Distance mode selected by the line (last G90/G91 wins)
pub fn mode_switch(line: &str) -> Option<MotionMode> {
    g_codes(&words(line)).fold(None, |mode, code| {
        if code == 90.0 {
            Some(MotionMode::Absolute)
        } else if code == 91.0 {
            Some(MotionMode::Relative)
        } else {
            mode
        }
    })
}

/// Straight-line motion kind of a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Motion {
    /// Explicit G0
    Rapid,
    /// Explicit G1
    Linear,
    /// Axis words without any G or M word (modal continuation)
    Modal,
}

/// Classify a line as G0/G1 motion
pub fn motion(line: &str) -> Option<Motion> {
    let words = words(line);
    let mut has_g = false;
    let mut kind = None;
    for (letter, value) in &words {
        match letter {
            'G' => {
                has_g = true;
                if *value == 0.0 {
                    kind = Some(Motion::Rapid);
                } else if *value == 1.0 {
                    kind = Some(Motion::Linear);
                }
            }
            'M' => has_g = true,
            _ => {}
        }
    }
    if kind.is_some() {
        return kind;
    }

    let has_axis = words.iter().any(|(l, _)| matches!(l, 'X' | 'Y'));
    (!has_g && has_axis).then_some(Motion::Modal)
}

/// Whether a line is a G0/G1 motion
pub fn is_motion(line: &str) -> bool {
    motion(line).is_some()
}

/// X/Y words present in a line
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AxisWords {
    /// X value
    pub x: Option<f64>,
    /// Y value
    pub y: Option<f64>,
}

/// Extract X/Y words (the last occurrence wins)
pub fn axis_words(line: &str) -> AxisWords {
    words(line)
        .into_iter()
        .fold(AxisWords::default(), |mut acc, (letter, value)| {
            match letter {
                'X' => acc.x = Some(value),
                'Y' => acc.y = Some(value),
                _ => {}
            }
            acc
        })
}

/// Format a coordinate without trailing zeros (`10`, `-2.5`, `0.125`)
pub fn fmt_coord(value: f64) -> String {
    let text = format!("{:.4}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    if text == "-0" {
        "0".to_string()
    } else {
        text.to_string()
    }
}

/// Negate the X word of a line, leaving everything else untouched
pub fn mirror_x(line: &str) -> String {
    let mut out = String::with_capacity(line.len() + 1);
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        out.push(c);
        if !c.eq_ignore_ascii_case(&'x') {
            continue;
        }
        let mut number = String::new();
        while let Some(&next) = chars.peek() {
            if next.is_ascii_digit() || matches!(next, '.' | '-' | '+') {
                number.push(next);
                chars.next();
            } else {
                break;
            }
        }
        match number.parse::<f64>() {
            Ok(value) => out.push_str(&fmt_coord(-value)),
            Err(_) => out.push_str(&number),
        }
    }

    out
}
