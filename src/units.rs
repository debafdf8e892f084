//! SPICE-style engineering notation: `28.05u`, `100G`, `4.7Meg`.

use std::fmt;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;

use crate::error::{Error, Result};

/// SI scale prefixes understood by SPICE simulators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SiPrefix {
    Tera,
    Giga,
    Mega,
    Kilo,
    Unit,
    Milli,
    Micro,
    Nano,
    Pico,
    Femto,
}

impl SiPrefix {
    pub fn scale(self) -> f64 {
        match self {
            Self::Tera => 1e12,
            Self::Giga => 1e9,
            Self::Mega => 1e6,
            Self::Kilo => 1e3,
            Self::Unit => 1.0,
            Self::Milli => 1e-3,
            Self::Micro => 1e-6,
            Self::Nano => 1e-9,
            Self::Pico => 1e-12,
            Self::Femto => 1e-15,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Tera => "T",
            Self::Giga => "G",
            Self::Mega => "Meg",
            Self::Kilo => "k",
            Self::Unit => "",
            Self::Milli => "m",
            Self::Micro => "u",
            Self::Nano => "n",
            Self::Pico => "p",
            Self::Femto => "f",
        }
    }

    /// Match a suffix the way SPICE does: `meg` first, then the first
    /// letter. Trailing unit letters (`pF`, `uA`) are ignored.
    pub fn from_suffix(suffix: &str) -> Self {
        let lower = suffix.to_ascii_lowercase();
        if lower.starts_with("meg") {
            return Self::Mega;
        }
        match lower.chars().next() {
            Some('t') => Self::Tera,
            Some('g') => Self::Giga,
            Some('k') => Self::Kilo,
            Some('m') => Self::Milli,
            Some('u') => Self::Micro,
            Some('n') => Self::Nano,
            Some('p') => Self::Pico,
            Some('f') => Self::Femto,
            _ => Self::Unit,
        }
    }

    const DESCENDING: [SiPrefix; 10] = [
        Self::Tera,
        Self::Giga,
        Self::Mega,
        Self::Kilo,
        Self::Unit,
        Self::Milli,
        Self::Micro,
        Self::Nano,
        Self::Pico,
        Self::Femto,
    ];
}

/// A parsed number with its explicit scale.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quantity {
    pub mantissa: f64,
    pub prefix: SiPrefix,
}

impl Quantity {
    pub fn value(&self) -> f64 {
        self.mantissa * self.prefix.scale()
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.mantissa, self.prefix.symbol())
    }
}

static QUANTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?)([a-zA-Z]*)$")
        .expect("quantity pattern is valid")
});

static ASSIGNMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\w+)\s*=\s*([-+]?(?:\d+\.?\d*|\.\d+)(?:[eE][-+]?\d+)?[a-zA-Z]*)")
        .expect("assignment pattern is valid")
});

/// Parse a single SPICE number such as `572.1u` or `1e-9`.
pub fn parse_quantity(text: &str) -> Result<Quantity> {
    let trimmed = text.trim();
    let caps = QUANTITY_RE
        .captures(trimmed)
        .ok_or_else(|| Error::Config(format!("not a SPICE number: '{}'", trimmed)))?;

    let mantissa: f64 = caps[1]
        .parse()
        .map_err(|_| Error::Config(format!("invalid mantissa in '{}'", trimmed)))?;

    Ok(Quantity {
        mantissa,
        prefix: SiPrefix::from_suffix(&caps[2]),
    })
}

/// Parse every `name=value` pair of a `.param` line into base-unit values.
pub fn parse_param_line(line: &str) -> Result<IndexMap<String, f64>> {
    let mut values = IndexMap::new();
    for caps in ASSIGNMENT_RE.captures_iter(line) {
        let quantity = parse_quantity(&caps[2])?;
        values.insert(caps[1].to_string(), quantity.value());
    }
    Ok(values)
}

/// Format a value in engineering notation for a netlist (`100G`, `5u`).
pub fn format_spice(value: f64) -> String {
    if value == 0.0 || !value.is_finite() {
        return format!("{}", value);
    }

    let magnitude = value.abs();
    let prefix = SiPrefix::DESCENDING
        .iter()
        .copied()
        .find(|p| magnitude >= p.scale() * (1.0 - 1e-12))
        .unwrap_or(SiPrefix::Femto);

    let mantissa = value / prefix.scale();
    // Trim representation noise such as 4.999999999999999.
    let rounded = (mantissa * 1e9).round() / 1e9;
    format!("{}{}", rounded, prefix.symbol())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn parses_prefixes() {
        assert_relative_eq!(parse_quantity("572.1u").unwrap().value(), 572.1e-6);
        assert_relative_eq!(parse_quantity("32.36p").unwrap().value(), 32.36e-12);
        assert_relative_eq!(parse_quantity("4.7Meg").unwrap().value(), 4.7e6);
        assert_relative_eq!(parse_quantity("2m").unwrap().value(), 2e-3);
        assert_relative_eq!(parse_quantity("100G").unwrap().value(), 1e11);
        assert_relative_eq!(parse_quantity("1e-9").unwrap().value(), 1e-9);
        assert_relative_eq!(parse_quantity("95").unwrap().value(), 95.0);
    }

    #[test]
    fn trailing_unit_letters_are_ignored() {
        let q = parse_quantity("10pF").unwrap();
        assert_eq!(q.prefix, SiPrefix::Pico);
        assert_relative_eq!(q.value(), 10e-12);

        let q = parse_quantity("3V").unwrap();
        assert_eq!(q.prefix, SiPrefix::Unit);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_quantity("abc").is_err());
        assert!(parse_quantity("").is_err());
    }

    #[test]
    fn parses_param_lines() {
        let values =
            parse_param_line(".param Cin=32.36p Ibmain=572.1u Rmp=0.907 Sa=0.986 Sa_b=16.907 R34=95")
                .unwrap();
        assert_eq!(values.len(), 6);
        assert_relative_eq!(values["Cin"], 32.36e-12);
        assert_relative_eq!(values["Ibmain"], 572.1e-6);
        assert_relative_eq!(values["Sa_b"], 16.907);
        assert_eq!(values.keys().next().map(String::as_str), Some("Cin"));
    }

    #[test]
    fn formats_engineering_notation() {
        assert_eq!(format_spice(1e11), "100G");
        assert_eq!(format_spice(5e-9), "5n");
        assert_eq!(format_spice(200e-6), "200u");
        assert_eq!(format_spice(2.5), "2.5");
        assert_eq!(format_spice(1e4), "10k");
        assert_eq!(format_spice(0.0), "0");
    }
}
