//! Fixed-point monetary amounts.
//!
//! Every monetary column of the ledger (prices, subtotals, taxes, discounts,
//! totals) is a `decimal(10,2)`. `Money` mirrors that: a `Decimal` that is
//! always rounded to exactly two places (half away from zero). Binary floating
//! point never enters the arithmetic.

use core::fmt;
use core::iter::Sum;
use core::ops::{Add, AddAssign, Sub};
use core::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

/// A monetary amount with two decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

impl Money {
    /// Number of decimal places carried by every amount.
    pub const SCALE: u32 = 2;

    pub const ZERO: Money = Money(Decimal::ZERO);

    /// Largest amount a `decimal(10,2)` column holds: 99,999,999.99.
    pub const MAX: Money = Money(Decimal::from_parts(1_410_065_407, 2, 0, false, 2));

    /// Round `amount` to two places and wrap it.
    pub fn new(amount: Decimal) -> Self {
        let mut rounded =
            amount.round_dp_with_strategy(Self::SCALE, RoundingStrategy::MidpointAwayFromZero);
        rounded.rescale(Self::SCALE);
        if rounded.is_zero() {
            rounded.set_sign_positive(true);
        }
        Self(rounded)
    }

    pub fn from_cents(cents: i64) -> Self {
        Self::new(Decimal::new(cents, Self::SCALE))
    }

    pub fn zero() -> Self {
        Self::ZERO
    }

    pub fn amount(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// Whether the amount fits a `decimal(10,2)` column.
    pub fn is_storable(&self) -> bool {
        self.0.abs() <= Self::MAX.0
    }

    /// `self × quantity`, exact. Fails when the product overflows `Decimal`.
    pub fn times(self, quantity: u32) -> LedgerResult<Self> {
        self.0
            .checked_mul(Decimal::from(quantity))
            .map(Self::new)
            .ok_or_else(|| LedgerError::constraint(format!("{self} × {quantity} overflows")))
    }

    /// `self × rate / 100`, rounded to two places.
    pub fn percent(self, rate: Decimal) -> LedgerResult<Self> {
        self.0
            .checked_mul(rate)
            .and_then(|scaled| scaled.checked_div(Decimal::ONE_HUNDRED))
            .map(Self::new)
            .ok_or_else(|| LedgerError::constraint(format!("{rate}% of {self} overflows")))
    }

    /// Subtract, returning `None` when the result would be negative.
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        let result = self - rhs;
        if result.is_negative() { None } else { Some(result) }
    }
}

impl From<Decimal> for Money {
    fn from(value: Decimal) -> Self {
        Self::new(value)
    }
}

impl From<Money> for Decimal {
    fn from(value: Money) -> Self {
        value.0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for Money {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let amount = Decimal::from_str(s.trim())
            .map_err(|e| LedgerError::validation(format!("invalid amount '{s}': {e}")))?;
        Ok(Self::new(amount))
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Self::new(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Self) -> Self::Output {
        Self::new(self.0 - rhs.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Self {
        iter.copied().sum()
    }
}
