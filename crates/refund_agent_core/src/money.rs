//! crates/refund_agent_core/src/money.rs
//!
//! Integer minor-unit money and fixed-point percentage arithmetic.
//! Every stored price, discount amount and refund amount in the system is a
//! `Money`; percentages (tax rates, percent discounts) are `Percent` values
//! held as integer basis points. Nothing in this module touches binary
//! floating point, so repeated computation always reproduces the same
//! minor-unit result.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};

/// A monetary value as an integer count of the currency's minor unit (paise).
///
/// Signed so that breakdown arithmetic (subtracting discounts) can pass
/// through intermediate values without panicking; persisted amounts are
/// non-negative.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    #[inline]
    pub const fn from_minor(minor: i64) -> Self {
        Money(minor)
    }

    /// The raw minor-unit count.
    #[inline]
    pub const fn minor(&self) -> i64 {
        self.0
    }

    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Clamps negative intermediate results back to zero. A fixed-amount
    /// discount larger than the line it targets must not produce a negative
    /// refundable base.
    #[inline]
    pub const fn max_zero(&self) -> Self {
        if self.0 < 0 {
            Money(0)
        } else {
            *self
        }
    }
}

/// Display in major units for human-readable breakdowns (`₹2999.00`).
/// The wire format stays in minor units; this is only for prose.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}₹{}.{:02}", sign, (self.0 / 100).abs(), (self.0 % 100).abs())
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

/// Multiplication by a quantity.
impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

/// A percentage with two-decimal precision, stored as integer basis points
/// (`18.0%` == `Percent::from_bps(1800)`). Unsigned, so a negative percent
/// is unrepresentable rather than a runtime error case.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Percent(u32);

impl Percent {
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        Percent(bps)
    }

    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

/// Display as the decimal percentage (`18%`, `12.5%`).
impl fmt::Display for Percent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % 100 == 0 {
            write!(f, "{}%", self.0 / 100)
        } else {
            write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
        }
    }
}

const BPS_SCALE: i128 = 10_000;

/// `amount × (1 + percent)`, truncated toward zero to whole minor units.
///
/// Truncation (not rounding to nearest) matches the amounts baked into the
/// existing order fixtures: `299900 @ 18% → 353882`.
pub fn apply_tax(amount: Money, rate: Percent) -> Money {
    let scaled = amount.minor() as i128 * (BPS_SCALE + rate.bps() as i128) / BPS_SCALE;
    Money::from_minor(scaled as i64)
}

/// `amount × percent`, truncated toward zero. The share of `amount` a
/// percent discount removes.
pub fn percent_of(amount: Money, rate: Percent) -> Money {
    let scaled = amount.minor() as i128 * rate.bps() as i128 / BPS_SCALE;
    Money::from_minor(scaled as i64)
}

/// `amount × (1 − percent)`, truncated toward zero.
pub fn apply_percent_discount(amount: Money, rate: Percent) -> Money {
    amount - percent_of(amount, rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tax_is_truncated_toward_zero() {
        // 299900 × 1.18 = 353882 exactly
        assert_eq!(
            apply_tax(Money::from_minor(299_900), Percent::from_bps(1800)).minor(),
            353_882
        );
        // 999 × 1.18 = 1178.82 → 1178
        assert_eq!(
            apply_tax(Money::from_minor(999), Percent::from_bps(1800)).minor(),
            1_178
        );
    }

    #[test]
    fn tax_is_reproducible() {
        let amount = Money::from_minor(299_900);
        let rate = Percent::from_bps(1800);
        let first = apply_tax(amount, rate);
        for _ in 0..1000 {
            assert_eq!(apply_tax(amount, rate), first);
        }
    }

    #[test]
    fn zero_rate_is_identity() {
        let amount = Money::from_minor(12_345);
        assert_eq!(apply_tax(amount, Percent::from_bps(0)), amount);
        assert_eq!(apply_percent_discount(amount, Percent::from_bps(0)), amount);
    }

    #[test]
    fn percent_discount_truncates() {
        // 10% of 999 = 99.9 → 99, discounted = 900
        assert_eq!(
            apply_percent_discount(Money::from_minor(999), Percent::from_bps(1000)).minor(),
            900
        );
    }

    #[test]
    fn large_amounts_do_not_overflow() {
        let amount = Money::from_minor(i64::MAX / 100_000);
        let taxed = apply_tax(amount, Percent::from_bps(2800));
        assert!(taxed.minor() > amount.minor());
    }

    #[test]
    fn money_arithmetic() {
        let a = Money::from_minor(1_000);
        let b = Money::from_minor(300);
        assert_eq!((a + b).minor(), 1_300);
        assert_eq!((a - b).minor(), 700);
        assert_eq!((b * 3).minor(), 900);
        assert_eq!((b - a).max_zero(), Money::zero());
    }

    #[test]
    fn display_formats() {
        assert_eq!(Money::from_minor(353_882).to_string(), "₹3538.82");
        assert_eq!(Money::from_minor(-550).to_string(), "-₹5.50");
        assert_eq!(Percent::from_bps(1800).to_string(), "18%");
        assert_eq!(Percent::from_bps(1250).to_string(), "12.50%");
    }
}
