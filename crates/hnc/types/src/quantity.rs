//! Resource quantities (`500m`, `2Gi`, `1.5k`)
//!
//! Values are held as an exact count of nano-units so sums over many quota
//! objects never lose precision.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign};
use std::str::FromStr;
use thiserror::Error;

const NANO: i128 = 1_000_000_000;

const BINARY_SUFFIXES: [(&str, u32); 6] = [
    ("Ki", 1),
    ("Mi", 2),
    ("Gi", 3),
    ("Ti", 4),
    ("Pi", 5),
    ("Ei", 6),
];

const DECIMAL_SUFFIXES: [(&str, i32); 9] = [
    ("n", -9),
    ("u", -6),
    ("m", -3),
    ("k", 3),
    ("M", 6),
    ("G", 9),
    ("T", 12),
    ("P", 15),
    ("E", 18),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,

    #[error("invalid quantity: {0}")]
    Invalid(String),

    #[error("quantity out of range: {0}")]
    Overflow(String),
}

/// Preferred rendering of a quantity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityFormat {
    DecimalSi,
    BinarySi,
}

#[derive(Debug, Clone, Copy)]
pub struct Quantity {
    nanos: i128,
    format: QuantityFormat,
}

impl Quantity {
    pub fn zero() -> Self {
        Self {
            nanos: 0,
            format: QuantityFormat::DecimalSi,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.nanos == 0
    }

    /// Value in milli-units, rounded towards zero
    pub fn as_millis(&self) -> i128 {
        self.nanos / 1_000_000
    }
}

impl Default for Quantity {
    fn default() -> Self {
        Self::zero()
    }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.nanos == other.nanos
    }
}

impl Eq for Quantity {}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.nanos.cmp(&other.nanos)
    }
}

impl Add for Quantity {
    type Output = Quantity;

    fn add(self, rhs: Self) -> Self::Output {
        let format = if self.is_zero() { rhs.format } else { self.format };
        Quantity {
            nanos: self.nanos.saturating_add(rhs.nanos),
            format,
        }
    }
}

impl AddAssign for Quantity {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl FromStr for Quantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(QuantityError::Empty);
        }

        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
            .unwrap_or(s.len());
        let (number, suffix) = s.split_at(split);
        let (negative, number) = match number.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, number.strip_prefix('+').unwrap_or(number)),
        };

        let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(QuantityError::Invalid(s.to_string()));
        }
        if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
            return Err(QuantityError::Invalid(s.to_string()));
        }

        // Mantissa as an integer plus a base-10 exponent
        let digits = format!("{}{}", int_part, frac_part);
        let mantissa: i128 = digits
            .parse()
            .map_err(|_| QuantityError::Overflow(s.to_string()))?;
        let mut exp10 = -(frac_part.len() as i32);
        let mut binary_pow = 0u32;
        let mut format = QuantityFormat::DecimalSi;

        if let Some((_, pow)) = BINARY_SUFFIXES.iter().find(|(sfx, _)| *sfx == suffix) {
            binary_pow = *pow;
            format = QuantityFormat::BinarySi;
        } else if let Some((_, e)) = DECIMAL_SUFFIXES.iter().find(|(sfx, _)| *sfx == suffix) {
            exp10 += e;
        } else if let Some(e) = suffix.strip_prefix(&['e', 'E'][..]) {
            let e: i32 = e
                .parse()
                .map_err(|_| QuantityError::Invalid(s.to_string()))?;
            exp10 += e;
        } else if !suffix.is_empty() {
            return Err(QuantityError::Invalid(s.to_string()));
        }

        let overflow = || QuantityError::Overflow(s.to_string());
        let mut nanos = mantissa.checked_mul(NANO).ok_or_else(overflow)?;
        nanos = nanos
            .checked_mul(1i128 << (10 * binary_pow))
            .ok_or_else(overflow)?;
        if exp10 >= 0 {
            nanos = nanos
                .checked_mul(10i128.checked_pow(exp10 as u32).ok_or_else(overflow)?)
                .ok_or_else(overflow)?;
        } else {
            let divisor = 10i128
                .checked_pow(exp10.unsigned_abs())
                .ok_or_else(overflow)?;
            // Sub-nano precision rounds up, as the platform does
            nanos = (nanos + divisor - 1) / divisor;
        }

        Ok(Quantity {
            nanos: if negative { -nanos } else { nanos },
            format,
        })
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nanos == 0 {
            return f.write_str("0");
        }

        if self.nanos % NANO == 0 {
            let units = self.nanos / NANO;
            if self.format == QuantityFormat::BinarySi {
                for (suffix, pow) in BINARY_SUFFIXES.iter().rev() {
                    let scale = 1i128 << (10 * pow);
                    if units % scale == 0 {
                        return write!(f, "{}{}", units / scale, suffix);
                    }
                }
                return write!(f, "{}", units);
            }
            for (suffix, e) in DECIMAL_SUFFIXES.iter().rev().filter(|(_, e)| *e > 0) {
                let scale = 10i128.pow(*e as u32);
                if units % scale == 0 {
                    return write!(f, "{}{}", units / scale, suffix);
                }
            }
            return write!(f, "{}", units);
        }

        for (suffix, e) in [("m", 6u32), ("u", 3u32)] {
            let scale = 10i128.pow(e);
            if self.nanos % scale == 0 {
                return write!(f, "{}{}", self.nanos / scale, suffix);
            }
        }
        write!(f, "{}n", self.nanos)
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_and_compare() {
        assert_eq!(q("1"), q("1000m"));
        assert_eq!(q("1k"), q("1000"));
        assert_eq!(q("1Ki"), q("1024"));
        assert_eq!(q("0.5"), q("500m"));
        assert_eq!(q("1e3"), q("1k"));
        assert!(q("1Gi") > q("1G"));
    }

    #[test]
    fn test_invalid() {
        assert_eq!("".parse::<Quantity>(), Err(QuantityError::Empty));
        assert!("abc".parse::<Quantity>().is_err());
        assert!("1Xi".parse::<Quantity>().is_err());
        assert!("1.2.3".parse::<Quantity>().is_err());
    }

    #[test]
    fn test_sum_keeps_format() {
        assert_eq!((q("1Gi") + q("1Gi")).to_string(), "2Gi");
        assert_eq!((q("1") + q("500m")).to_string(), "1500m");
        assert_eq!((q("2k") + q("1k")).to_string(), "3k");
        assert_eq!((Quantity::zero() + q("512Mi")).to_string(), "512Mi");
        assert_eq!(q("10").to_string(), "10");
    }

    proptest::proptest! {
        #[test]
        fn test_sum_matches_millis(a in 0u32..10_000_000, b in 0u32..10_000_000) {
            let sum = q(&format!("{a}m")) + q(&format!("{b}m"));
            proptest::prop_assert_eq!(sum.as_millis(), i128::from(a) + i128::from(b));
            proptest::prop_assert_eq!(q(&sum.to_string()), sum);
        }
    }
}
