//! Fixed-precision decimal type for anything that crosses a money boundary.
//!
//! Quantities, prices, commissions and percents are never carried as
//! `f64` once they leave a calculation — they are parsed into a `Decimal`
//! and serialized back out as a string. Scale conventions follow the
//! persistence contract: 8 for quantity/price, 4 for percents (bps math
//! is done in `i64` basis points instead, see `domain::entities::config`).

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Decimal(#[serde(with = "rust_decimal::serde::str")] rust_decimal::Decimal);

impl Decimal {
    pub const ZERO: Decimal = Decimal(rust_decimal::Decimal::ZERO);

    pub fn new_non_negative(value: rust_decimal::Decimal) -> Result<Self, String> {
        if value.is_sign_negative() {
            Err(format!("value must be non-negative, got {value}"))
        } else {
            Ok(Decimal(value))
        }
    }

    pub fn from_f64(value: f64) -> Option<Self> {
        rust_decimal::Decimal::from_f64(value).map(Decimal)
    }

    pub fn to_f64(self) -> f64 {
        self.0.to_f64().unwrap_or(0.0)
    }

    pub fn inner(self) -> rust_decimal::Decimal {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(self) -> bool {
        self.0 > rust_decimal::Decimal::ZERO
    }

    pub fn checked_add(self, other: Decimal) -> Option<Decimal> {
        self.0.checked_add(other.0).map(Decimal)
    }

    pub fn checked_sub(self, other: Decimal) -> Option<Decimal> {
        self.0.checked_sub(other.0).map(Decimal)
    }

    pub fn checked_mul(self, other: Decimal) -> Option<Decimal> {
        self.0.checked_mul(other.0).map(Decimal)
    }

    pub fn checked_div(self, other: Decimal) -> Option<Decimal> {
        if other.0.is_zero() {
            None
        } else {
            self.0.checked_div(other.0).map(Decimal)
        }
    }

    /// Rounds down to the nearest non-negative multiple of `step`.
    /// Used for `adjustPrice` (tick grid) and quantity-to-stepSize rounding.
    pub fn floor_to_step(self, step: Decimal) -> Decimal {
        if step.0.is_zero() {
            return self;
        }
        let quotient = (self.0 / step.0).trunc();
        Decimal(quotient * step.0)
    }

    /// Whether `self` is an integer multiple of `step`, within `tolerance`
    /// (absolute, in the same scale as `self`). Used by C3's step-size check.
    pub fn is_multiple_of(self, step: Decimal, tolerance: Decimal) -> bool {
        if step.0.is_zero() {
            return true;
        }
        let quotient = self.0 / step.0;
        let nearest = quotient.round();
        let remainder = (self.0 - nearest * step.0).abs();
        remainder <= tolerance.0
    }

    pub fn abs(self) -> Decimal {
        Decimal(self.0.abs())
    }
}

impl FromStr for Decimal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        rust_decimal::Decimal::from_str(s)
            .map(Decimal)
            .map_err(|e| format!("invalid decimal '{s}': {e}"))
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Decimal {
    fn from(value: u32) -> Self {
        Decimal(rust_decimal::Decimal::from(value))
    }
}
