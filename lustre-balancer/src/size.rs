//! `lfs find --size` predicates
//!
//! Parsed once at startup so a typo fails before the filesystem is touched,
//! then handed back to `lfs find` verbatim.

use std::fmt;
use std::str::FromStr;

use crate::config::ConfigError;

/// Comparison applied by `lfs find --size`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeComparison {
    /// `+N`: strictly larger than N
    Larger,
    /// `-N`: strictly smaller than N
    Smaller,
    /// `N`: exactly N (rounded to the unit, as lfs does)
    Exact,
}

/// Minimum (or maximum) file size for candidate discovery, e.g. `+1M`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeFilter {
    spec: String,
    comparison: SizeComparison,
    bytes: u64,
}

impl SizeFilter {
    /// Parse an lfs size spec: optional sign, integer, optional unit.
    ///
    /// Units follow `lfs find`: `c` for bytes, `k M G T P E` for binary
    /// multiples. Lowercase unit letters are accepted.
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidSize(spec.to_string());

        let trimmed = spec.trim();
        let (comparison, rest) = match trimmed.as_bytes().first() {
            Some(b'+') => (SizeComparison::Larger, &trimmed[1..]),
            Some(b'-') => (SizeComparison::Smaller, &trimmed[1..]),
            Some(_) => (SizeComparison::Exact, trimmed),
            None => return Err(invalid()),
        };

        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        let (number, unit) = rest.split_at(digits_end);
        if number.is_empty() {
            return Err(invalid());
        }
        let value: u64 = number.parse().map_err(|_| invalid())?;

        let multiplier: u64 = match unit {
            "" | "c" => 1,
            "k" | "K" => 1 << 10,
            "m" | "M" => 1 << 20,
            "g" | "G" => 1 << 30,
            "t" | "T" => 1 << 40,
            "p" | "P" => 1 << 50,
            "e" | "E" => 1 << 60,
            _ => return Err(invalid()),
        };

        let bytes = value.checked_mul(multiplier).ok_or_else(invalid)?;

        Ok(Self {
            spec: trimmed.to_string(),
            comparison,
            bytes,
        })
    }

    /// The spec as given, suitable for `lfs find --size`
    pub fn as_spec(&self) -> &str {
        &self.spec
    }

    pub fn comparison(&self) -> SizeComparison {
        self.comparison
    }

    /// Threshold in bytes
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl Default for SizeFilter {
    fn default() -> Self {
        Self {
            spec: "+1M".to_string(),
            comparison: SizeComparison::Larger,
            bytes: 1 << 20,
        }
    }
}

impl FromStr for SizeFilter {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SizeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.spec)
    }
}
