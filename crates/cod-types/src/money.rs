//! Money type for COD settlement
//!
//! Amounts are fixed-point decimals in a single settlement currency.
//! Rounding to the currency's minor unit is always half-up (away from zero)
//! so computed COD figures agree with upstream invoice totals.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

/// Default number of minor units (piastres, cents)
pub const DEFAULT_MINOR_UNITS: u32 = 2;

/// A monetary amount in the settlement currency
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    /// Create from a decimal value
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    /// Create from an integer number of minor units, e.g. `from_minor(11550, 2)` is 115.50
    pub fn from_minor(units: i64, minor_units: u32) -> Self {
        Self(Decimal::new(units, minor_units))
    }

    /// Get the inner decimal value
    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Round to `minor_units` decimal places, half away from zero
    pub fn round_to(self, minor_units: u32) -> Self {
        Self(
            self.0
                .round_dp_with_strategy(minor_units, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Strictly greater than zero
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Strictly less than zero
    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    pub fn abs(self) -> Self {
        Self(self.0.abs())
    }

    /// Clamp negative amounts to zero
    pub fn non_negative(self) -> Self {
        self.max(Self::ZERO)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl FromStr for Money {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s.trim()).map(Self)
    }
}

impl From<Decimal> for Money {
    fn from(value: Decimal) -> Self {
        Self(value)
    }
}

impl From<i64> for Money {
    fn from(value: i64) -> Self {
        Self(Decimal::from(value))
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Money) {
        self.0 -= rhs.0;
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.copied().sum()
    }
}

/// The single currency all amounts are settled in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementCurrency {
    /// ISO 4217 code, informational only
    pub code: String,
    /// Decimal places of the minor unit
    pub minor_units: u32,
}

impl SettlementCurrency {
    pub fn new(code: impl Into<String>, minor_units: u32) -> Self {
        Self {
            code: code.into(),
            minor_units,
        }
    }

    /// Round an amount to this currency's minor unit
    pub fn round(&self, amount: Money) -> Money {
        amount.round_to(self.minor_units)
    }
}

impl Default for SettlementCurrency {
    fn default() -> Self {
        Self::new("EGP", DEFAULT_MINOR_UNITS)
    }
}
