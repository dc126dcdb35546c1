//! Resource quantities such as `128Mi` or `500m`
//!
//! Quantities keep the text they were written with, but compare by value so
//! that `1Gi` and `1024Mi` are equal.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Quantity parse errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuantityError {
    /// Empty input
    #[error("empty quantity")]
    Empty,

    /// Numeric part could not be parsed
    #[error("invalid quantity number: {0}")]
    InvalidNumber(String),

    /// Unknown unit suffix
    #[error("unknown quantity suffix: {0}")]
    UnknownSuffix(String),

    /// Value does not fit in the supported range
    #[error("quantity out of range: {0}")]
    Overflow(String),
}

/// A resource amount
#[derive(Debug, Clone)]
pub struct Quantity(String);

const KI: u128 = 1024;

impl Quantity {
    /// Parse and validate a quantity
    ///
    /// # Errors
    /// Returns [`QuantityError`] when the text is not a valid quantity.
    pub fn parse(s: impl Into<String>) -> Result<Self, QuantityError> {
        let s = s.into();
        parse_milli(&s)?;
        Ok(Self(s))
    }

    /// Build from a byte (or unit) count, using the largest exact binary suffix
    #[must_use]
    pub fn from_units(value: u128) -> Self {
        const SUFFIXES: [(&str, u128); 3] = [("Gi", KI * KI * KI), ("Mi", KI * KI), ("Ki", KI)];
        for (suffix, scale) in SUFFIXES {
            if value != 0 && value % scale == 0 {
                return Self(format!("{}{suffix}", value / scale));
            }
        }
        Self(value.to_string())
    }

    /// Original text
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Value in thousandths of the base unit
    ///
    /// # Errors
    /// Returns [`QuantityError`] when the stored text does not parse.
    #[inline]
    pub fn milli_value(&self) -> Result<u128, QuantityError> {
        parse_milli(&self.0)
    }

    /// Value in base units, rounded up
    ///
    /// # Errors
    /// Returns [`QuantityError`] when the stored text does not parse.
    #[inline]
    pub fn value(&self) -> Result<u128, QuantityError> {
        self.milli_value().map(|m| m.div_ceil(1000))
    }
}

fn suffix_scale(suffix: &str) -> Option<u128> {
    let scale = match suffix {
        "m" => 1,
        "" => 1_000,
        "k" => 1_000_000,
        "M" => 1_000_000_000,
        "G" => 1_000_000_000_000,
        "T" => 1_000_000_000_000_000,
        "P" => 1_000_000_000_000_000_000,
        "E" => 1_000_000_000_000_000_000_000,
        "Ki" => KI * 1_000,
        "Mi" => KI.pow(2) * 1_000,
        "Gi" => KI.pow(3) * 1_000,
        "Ti" => KI.pow(4) * 1_000,
        "Pi" => KI.pow(5) * 1_000,
        "Ei" => KI.pow(6) * 1_000,
        _ => return None,
    };
    Some(scale)
}

fn parse_milli(s: &str) -> Result<u128, QuantityError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(QuantityError::Empty);
    }

    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(split);
    let scale = suffix_scale(suffix).ok_or_else(|| QuantityError::UnknownSuffix(suffix.to_string()))?;

    let (whole, frac) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && frac.is_empty() {
        return Err(QuantityError::InvalidNumber(s.to_string()));
    }
    let digits = format!("{whole}{frac}");
    let mantissa: u128 = digits
        .parse()
        .map_err(|_| QuantityError::InvalidNumber(s.to_string()))?;
    let divisor = u32::try_from(frac.len())
        .ok()
        .and_then(|n| 10u128.checked_pow(n))
        .ok_or_else(|| QuantityError::Overflow(s.to_string()))?;

    mantissa
        .checked_mul(scale)
        .map(|v| v.div_ceil(divisor))
        .ok_or_else(|| QuantityError::Overflow(s.to_string()))
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        match (self.milli_value(), other.milli_value()) {
            (Ok(a), Ok(b)) => a == b,
            _ => self.0 == other.0,
        }
    }
}

impl Eq for Quantity {}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self.milli_value(), other.milli_value()) {
            (Ok(a), Ok(b)) => Some(a.cmp(&b)),
            _ if self.0 == other.0 => Some(Ordering::Equal),
            _ => None,
        }
    }
}

impl Display for Quantity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Int(u64),
        }

        let text = match Raw::deserialize(deserializer)? {
            Raw::Text(s) => s,
            Raw::Int(n) => n.to_string(),
        };
        Self::parse(text).map_err(serde::de::Error::custom)
    }
}
