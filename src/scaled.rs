//! Exact fixed-point quantities for percentages and durations.
//!
//! Catalog stats arrive as decimal percentages (`7.4` meaning 7.4%) and ability timings as
//! decimal seconds. The optimizer works on integers only, so every quantity is multiplied by a
//! per-kind scale and stored as an `i64`. Each kind is its own type: a [Pct] cannot be added to
//! a [Time], and there is no implicit conversion to or from plain integers.

use std::fmt;
use std::iter::Sum;
use std::marker::PhantomData;
use std::ops::{Add, AddAssign, Mul, Neg, Sub};
use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScaleError {
    #[error("{value} cannot be stored at scale {scale} without truncation")]
    Precision { value: Decimal, scale: i64 },
    #[error("{value} looks like a fraction; write 7.4 for 7.4{unit}, not 0.074")]
    Unit { value: Decimal, unit: &'static str },
    #[error("{value} overflows the scaled integer range")]
    Overflow { value: Decimal },
    #[error("'{input}' is not a decimal number")]
    Parse { input: String },
}

/// A quantity kind and the number of decimal digits it keeps.
pub trait QuantityKind:
    fmt::Debug + Clone + Copy + Default + PartialEq + Eq + PartialOrd + Ord + Send + Sync + 'static
{
    /// Decimal digits kept after the point.
    const DIGITS: u32;
    /// Integer multiplier, `10^DIGITS`.
    const SCALE: i64 = 10_i64.pow(Self::DIGITS);
    /// Suffix used when displaying a value.
    const UNIT: &'static str;
}

/// Percentages. Two digits: some modules carry values such as `+8.79%`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Percent;

impl QuantityKind for Percent {
    const DIGITS: u32 = 2;
    const UNIT: &'static str = "%";
}

/// Seconds. One digit is enough for server-tick granularity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Seconds;

impl QuantityKind for Seconds {
    const DIGITS: u32 = 1;
    const UNIT: &'static str = "s";
}

/// An integer holding `decimal * K::SCALE` exactly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Scaled<K> {
    raw: i64,
    kind: PhantomData<K>,
}

pub type Pct = Scaled<Percent>;
pub type Time = Scaled<Seconds>;

impl<K: QuantityKind> Scaled<K> {
    pub const ZERO: Self = Self::from_raw(0);

    /// Wraps an already-scaled integer.
    pub const fn from_raw(raw: i64) -> Self {
        Self {
            raw,
            kind: PhantomData,
        }
    }

    /// Whole units, e.g. `Pct::units(100)` is 100%.
    pub fn units(whole: i64) -> Self {
        Self::from_raw(whole * K::SCALE)
    }

    /// Scales a decimal quantity.
    ///
    /// Values with magnitude strictly between 0 and 1 are rejected: inputs in this domain are
    /// always written as `7.4` for 7.4%, so `0.074` is almost certainly a unit mistake.
    pub fn from_decimal(value: Decimal) -> Result<Self, ScaleError> {
        if !value.is_zero() && value.abs() < Decimal::ONE {
            return Err(ScaleError::Unit {
                value,
                unit: K::UNIT,
            });
        }
        let scaled = value
            .checked_mul(Decimal::from(K::SCALE))
            .ok_or(ScaleError::Overflow { value })?;
        if !scaled.fract().is_zero() {
            return Err(ScaleError::Precision {
                value,
                scale: K::SCALE,
            });
        }
        let raw = scaled.trunc().to_i64().ok_or(ScaleError::Overflow { value })?;
        Ok(Self::from_raw(raw))
    }

    /// Parses a decimal literal such as `"-5.5"` and scales it.
    pub fn parse(input: &str) -> Result<Self, ScaleError> {
        let value = Decimal::from_str(input.trim()).map_err(|_| ScaleError::Parse {
            input: input.to_string(),
        })?;
        Self::from_decimal(value)
    }

    /// The exact decimal this value represents. For display and reporting only.
    pub fn unscale(&self) -> Decimal {
        Decimal::new(self.raw, K::DIGITS).normalize()
    }

    pub const fn raw(&self) -> i64 {
        self.raw
    }

    pub fn is_zero(&self) -> bool {
        self.raw == 0
    }

    pub fn abs(&self) -> Self {
        Self::from_raw(self.raw.abs())
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.raw.checked_add(other.raw).map(Self::from_raw)
    }
}

impl Pct {
    /// 100%, the neutral element of a `(100% + bonus)` factor.
    pub fn hundred_percent() -> Self {
        Self::units(100)
    }
}

impl<K: QuantityKind> Add for Scaled<K> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::from_raw(self.raw + rhs.raw)
    }
}

impl<K: QuantityKind> AddAssign for Scaled<K> {
    fn add_assign(&mut self, rhs: Self) {
        self.raw += rhs.raw;
    }
}

impl<K: QuantityKind> Sub for Scaled<K> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::from_raw(self.raw - rhs.raw)
    }
}

impl<K: QuantityKind> Neg for Scaled<K> {
    type Output = Self;

    fn neg(self) -> Self {
        Self::from_raw(-self.raw)
    }
}

/// Repetition count, e.g. the same bonus taken `n` times.
impl<K: QuantityKind> Mul<i64> for Scaled<K> {
    type Output = Self;

    fn mul(self, count: i64) -> Self {
        Self::from_raw(self.raw * count)
    }
}

impl<K: QuantityKind> Sum for Scaled<K> {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl<'a, K: QuantityKind> Sum<&'a Scaled<K>> for Scaled<K> {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

impl<K: QuantityKind> fmt::Display for Scaled<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.unscale(), K::UNIT)
    }
}

impl<K: QuantityKind> Serialize for Scaled<K> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        Serialize::serialize(&self.unscale(), serializer)
    }
}

impl<'de, K: QuantityKind> Deserialize<'de> for Scaled<K> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = <Decimal as Deserialize>::deserialize(deserializer)?;
        Self::from_decimal(value).map_err(serde::de::Error::custom)
    }
}
