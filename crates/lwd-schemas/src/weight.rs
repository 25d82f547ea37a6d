//! Fixed-point weight type.
//!
//! All weights in this system are kilograms with exactly three decimal
//! places, stored as an `i64` count of grams. Using floats for weights makes
//! tolerance comparisons unstable at the boundary (0.05 vs 0.0500000001);
//! `Grams` keeps every comparison exact.
//!
//! # Wire format
//!
//! `Grams` serializes as a JSON number in kilograms (`12.345`) and
//! deserializes from any JSON number, rounding to the nearest gram.

use std::fmt;
use std::ops::{Add, AddAssign, Neg, Sub};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// Grams newtype
// ---------------------------------------------------------------------------

/// A weight at 1e-3 kg scale.
///
/// There is intentionally no `From<i64>`; use [`Grams::new`] when a raw
/// integer is known to be a gram count and [`Grams::from_kg`] for float input.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Grams(i64);

impl Grams {
    pub const ZERO: Grams = Grams(0);

    #[inline]
    pub const fn new(raw: i64) -> Self {
        Grams(raw)
    }

    #[inline]
    pub const fn raw(self) -> i64 {
        self.0
    }

    /// Convert a float kilogram value, rounding to the nearest gram.
    ///
    /// Returns `None` for NaN, infinities, and values outside `i64` range.
    pub fn from_kg(kg: f64) -> Option<Grams> {
        if !kg.is_finite() {
            return None;
        }
        let g = (kg * 1000.0).round();
        if g.abs() >= i64::MAX as f64 {
            return None;
        }
        Some(Grams(g as i64))
    }

    pub fn as_kg(self) -> f64 {
        self.0 as f64 / 1000.0
    }

    /// Parse a decimal kilogram string (`"12.345"`, `"-0.5"`, `"+7"`).
    ///
    /// Digits past the third decimal place round half away from zero.
    /// Decimal commas are not accepted here; callers normalize first.
    pub fn parse_kg(raw: &str) -> Result<Grams, WeightParseError> {
        let s = raw.trim();
        if s.is_empty() {
            return Err(WeightParseError::Empty);
        }

        let (negative, body) = match s.as_bytes()[0] {
            b'-' => (true, &s[1..]),
            b'+' => (false, &s[1..]),
            _ => (false, s),
        };

        let (int_part, frac_part) = body.split_once('.').unwrap_or((body, ""));
        let all_digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
        if (int_part.is_empty() && frac_part.is_empty())
            || !all_digits(int_part)
            || !all_digits(frac_part)
        {
            return Err(WeightParseError::Invalid(raw.to_string()));
        }

        let whole: i64 = if int_part.is_empty() {
            0
        } else {
            int_part
                .parse()
                .map_err(|_| WeightParseError::OutOfRange(raw.to_string()))?
        };

        let frac_bytes = frac_part.as_bytes();
        let mut frac: i64 = 0;
        for i in 0..3 {
            let digit = frac_bytes.get(i).map(|b| i64::from(b - b'0')).unwrap_or(0);
            frac = frac * 10 + digit;
        }
        let round_up = frac_bytes.get(3).is_some_and(|b| *b >= b'5');

        let grams = whole
            .checked_mul(1000)
            .and_then(|v| v.checked_add(frac))
            .and_then(|v| v.checked_add(i64::from(round_up)))
            .ok_or_else(|| WeightParseError::OutOfRange(raw.to_string()))?;

        Ok(Grams(if negative { -grams } else { grams }))
    }

    /// Absolute difference; always non-negative.
    #[inline]
    pub fn abs_diff(self, other: Grams) -> Grams {
        Grams(self.0.saturating_sub(other.0).saturating_abs())
    }

    /// Arithmetic mean, rounded half up to the gram.
    #[inline]
    pub fn midpoint(self, other: Grams) -> Grams {
        let sum = i128::from(self.0) + i128::from(other.0) + 1;
        // The mean of two i64 values is itself in i64 range.
        Grams(sum.div_euclid(2) as i64)
    }

    #[inline]
    pub fn saturating_mul(self, factor: i64) -> Grams {
        Grams(self.0.saturating_mul(factor))
    }

    #[inline]
    pub fn is_negative(self) -> bool {
        self.0 < 0
    }
}

// ---------------------------------------------------------------------------
// Parse error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WeightParseError {
    #[error("weight string is empty")]
    Empty,
    #[error("weight string could not be parsed: '{0}'")]
    Invalid(String),
    #[error("weight out of range: '{0}'")]
    OutOfRange(String),
}

// ---------------------------------------------------------------------------
// Arithmetic (saturating: readings come straight from hardware)
// ---------------------------------------------------------------------------

impl Add for Grams {
    type Output = Grams;
    #[inline]
    fn add(self, rhs: Grams) -> Grams {
        Grams(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Grams {
    type Output = Grams;
    #[inline]
    fn sub(self, rhs: Grams) -> Grams {
        Grams(self.0.saturating_sub(rhs.0))
    }
}

impl Neg for Grams {
    type Output = Grams;
    #[inline]
    fn neg(self) -> Grams {
        Grams(self.0.saturating_neg())
    }
}

impl AddAssign for Grams {
    #[inline]
    fn add_assign(&mut self, rhs: Grams) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

// ---------------------------------------------------------------------------
// Display / serde
// ---------------------------------------------------------------------------

impl fmt::Display for Grams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kg = self.0 / 1000;
        let frac = (self.0 % 1000).abs();
        if self.0 < 0 && kg == 0 {
            write!(f, "-{kg}.{frac:03}")
        } else {
            write!(f, "{kg}.{frac:03}")
        }
    }
}

impl Serialize for Grams {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_kg())
    }
}

impl<'de> Deserialize<'de> for Grams {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let kg = f64::deserialize(deserializer)?;
        Grams::from_kg(kg)
            .ok_or_else(|| serde::de::Error::custom(format!("weight out of range: {kg}")))
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
