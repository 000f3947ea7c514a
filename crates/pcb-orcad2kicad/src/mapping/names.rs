//! Identifier sanitizing and net name classification

use regex::Regex;
use std::sync::LazyLock;

/// OrCAD view suffixes appended to part names (`LM324.Normal`)
static VIEW_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.(normal|convert)$").unwrap());

/// Anything KiCad does not accept in a symbol name, plus separators that
/// would be mistaken for a `Lib:Name` split
static UNSAFE_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_+\-]+").unwrap());

/// Symbol name usable as a KiCad library key.
///
/// Examples:
/// - `LM324.Normal` -> `LM324`
/// - `CAP NP` -> `CAP_NP`
/// - `R/0805` -> `R_0805`
pub fn safe_symbol_name(raw: &str) -> String {
    let trimmed = raw.trim();
    let base = VIEW_SUFFIX.replace(trimmed, "");
    let replaced = UNSAFE_CHARS.replace_all(&base, "_");
    replaced.trim_matches('_').to_string()
}

/// Case-insensitive comparison key used for fallback symbol lookup
pub fn lookup_key(raw: &str) -> String {
    safe_symbol_name(raw).to_ascii_lowercase()
}

/// Rough net role, used to orient power and ground labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetRole {
    Power,
    Ground,
    Signal,
}

static POWER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)^V(CC|DD|BAT|IN|BUS)").unwrap(),
        Regex::new(r"(?i)^\+\d+V").unwrap(), // +5V, +3V3
        Regex::new(r"(?i)^\d+V\d*$").unwrap(), // 3V3, 12V
        Regex::new(r"(?i)^VREF").unwrap(),
    ]
});

static GROUND_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)^[ADPS]?GND").unwrap(), // GND, AGND, DGND, PGND
        Regex::new(r"(?i)^V(SS|EE)").unwrap(),
        Regex::new(r"(?i)^-\d+V").unwrap(),
        Regex::new(r"(?i)^0V$").unwrap(),
    ]
});

/// Classify a net name
pub fn net_role(name: &str) -> NetRole {
    if GROUND_PATTERNS.iter().any(|p| p.is_match(name)) {
        NetRole::Ground
    } else if POWER_PATTERNS.iter().any(|p| p.is_match(name)) {
        NetRole::Power
    } else {
        NetRole::Signal
    }
}

/// OrCAD power graphics whose names differ from the net they drive
static POWER_ALIASES: &[(&str, &str)] = &[
    ("VCC_ARROW", "+5V"),
    ("VCC_BAR", "VCC"),
    ("VCC_CIRCLE", "VCC"),
    ("GND_SIGNAL", "GND"),
    ("GND_POWER", "GND"),
    ("GND_EARTH", "Earth"),
];

/// Net name implied by an OrCAD power symbol graphic
pub fn power_net_name(symbol: &str) -> &str {
    POWER_ALIASES
        .iter()
        .find(|(graphic, _)| graphic.eq_ignore_ascii_case(symbol))
        .map(|(_, net)| *net)
        .unwrap_or(symbol)
}

/// Whether an OrCAD global graphic is one of the known power symbols
pub fn is_power_graphic(symbol: &str) -> bool {
    POWER_ALIASES
        .iter()
        .any(|(graphic, _)| graphic.eq_ignore_ascii_case(symbol))
}
