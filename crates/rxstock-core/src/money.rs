//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌ WRONG!                           │
//! │                                                                         │
//! │  Pricing compares a requested price to a computed one with a           │
//! │  tolerance of ONE minor unit. Float drift would make that check        │
//! │  flaky, so every amount is an integer count of minor units             │
//! │  (cents / paise).                                                       │
//! │                                                                         │
//! │  MRP 105.00 at 5% tax → net  = 10500 × 10000 / 10500 = 10000           │
//! │                         tax  = 10000 × 500 / 10000  =   500            │
//! │                         back = 10000 + 500          = 10500 ✓          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use rxstock_core::money::Money;
//!
//! let ptr = Money::from_cents(1000);       // 10.00 per unit
//! let with_margin = ptr.apply_markup(2000); // +20%
//! assert_eq!(with_margin.cents(), 1200);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};

use crate::types::TaxRate;

// =============================================================================
// Money Type
// =============================================================================

/// Represents a monetary value in the smallest currency unit.
///
/// ## Where Money is Used
/// ```text
/// PurchaseItem.ptr_cents ──► Batch.unit_cost_cents ──► PricingInput.ptr
/// PurchaseItem.mrp_cents ──► Batch.mrp_cents       ──► PricingInput.mrp
///                                                           │
///                                   expected price ◄────────┘
///                                          │
/// SaleItem.unit_price_cents ◄── validated ─┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from minor units.
    ///
    /// ## Example
    /// ```rust
    /// use rxstock_core::money::Money;
    ///
    /// let price = Money::from_cents(1099);
    /// assert_eq!(price.cents(), 1099);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in minor units.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is positive (greater than zero).
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Returns the absolute value.
    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Absolute difference between two amounts.
    ///
    /// Used by price validation: a requested price is accepted when
    /// `expected.abs_diff(requested) <= tolerance`.
    #[inline]
    pub const fn abs_diff(&self, other: Money) -> Money {
        Money((self.0 - other.0).abs())
    }

    /// Calculates tax on this (tax-exclusive) amount.
    ///
    /// ## Implementation
    /// Integer math: `(amount * rate + 5000) / 10000`.
    /// The +5000 rounds half up (5000/10000 = 0.5).
    ///
    /// ## Example
    /// ```rust
    /// use rxstock_core::money::Money;
    /// use rxstock_core::types::TaxRate;
    ///
    /// let net = Money::from_cents(1000);
    /// let tax = net.calculate_tax(TaxRate::from_bps(1200)); // 12%
    /// assert_eq!(tax.cents(), 120);
    /// ```
    pub fn calculate_tax(&self, rate: TaxRate) -> Money {
        // i128 prevents overflow on large amounts
        let tax_cents = (self.0 as i128 * rate.bps() as i128 + 5000) / 10000;
        Money::from_cents(tax_cents as i64)
    }

    /// Removes tax from a tax-inclusive amount (e.g. MRP).
    ///
    /// Closed form `gross × 10000 / (10000 + bps)`, rounded half up, so that
    /// `net + net.calculate_tax(rate)` reproduces `gross` within one minor unit.
    ///
    /// ## Example
    /// ```rust
    /// use rxstock_core::money::Money;
    /// use rxstock_core::types::TaxRate;
    ///
    /// let mrp = Money::from_cents(11200);
    /// let rate = TaxRate::from_bps(1200);
    /// let net = mrp.net_of_tax(rate);
    /// assert_eq!(net.cents(), 10000);
    /// assert_eq!((net + net.calculate_tax(rate)).cents(), 11200);
    /// ```
    pub fn net_of_tax(&self, rate: TaxRate) -> Money {
        let divisor = 10000i128 + rate.bps() as i128;
        let numerator = self.0 as i128 * 10000;
        Money::from_cents(((numerator * 2 + divisor) / (divisor * 2)) as i64)
    }

    /// Multiplies money by a quantity.
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// Divides into `parts` equal shares, rounding half up.
    ///
    /// Used to turn a per-pack PTR/MRP into a per-unit value.
    /// `parts <= 0` returns the amount unchanged.
    pub fn divide_rounded(&self, parts: i64) -> Money {
        if parts <= 0 {
            return *self;
        }
        let value = self.0 as i128;
        let parts = parts as i128;
        Money::from_cents(((value * 2 + parts) / (parts * 2)) as i64)
    }

    /// Applies a percentage discount and returns the discounted amount.
    ///
    /// ## Arguments
    /// * `discount_bps` - Discount in basis points (1000 = 10%)
    ///
    /// ## Example
    /// ```rust
    /// use rxstock_core::money::Money;
    ///
    /// let net = Money::from_cents(10000);
    /// assert_eq!(net.apply_percentage_discount(1000).cents(), 9000);
    /// ```
    pub fn apply_percentage_discount(&self, discount_bps: u32) -> Money {
        let discount_amount = (self.0 as i128 * discount_bps as i128 + 5000) / 10000;
        Money::from_cents(self.0 - discount_amount as i64)
    }

    /// Adds a percentage markup (margin on cost).
    ///
    /// ## Arguments
    /// * `markup_bps` - Markup in basis points (2000 = 20%)
    pub fn apply_markup(&self, markup_bps: u32) -> Money {
        let markup = (self.0 as i128 * markup_bps as i128 + 5000) / 10000;
        Money::from_cents(self.0 + markup as i64)
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Plain decimal rendering for logs and error messages.
///
/// No currency symbol: display formatting belongs to the caller.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}{}.{:02}", sign, (self.0 / 100).abs(), (self.0 % 100).abs())
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
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

/// Multiplication by quantity.
impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Money::from_cents(1099).to_string(), "10.99");
        assert_eq!(Money::from_cents(500).to_string(), "5.00");
        assert_eq!(Money::from_cents(-550).to_string(), "-5.50");
        assert_eq!(Money::from_cents(-5).to_string(), "-0.05");
    }

    #[test]
    fn test_arithmetic_and_sum() {
        let a = Money::from_cents(1000);
        let b = Money::from_cents(500);

        assert_eq!((a + b).cents(), 1500);
        assert_eq!((a - b).cents(), 500);
        assert_eq!((a * 3).cents(), 3000);

        let total: Money = vec![a, b, b].into_iter().sum();
        assert_eq!(total.cents(), 2000);
    }

    #[test]
    fn test_abs_diff() {
        let a = Money::from_cents(1000);
        assert_eq!(a.abs_diff(Money::from_cents(1001)).cents(), 1);
        assert_eq!(a.abs_diff(Money::from_cents(998)).cents(), 2);
    }

    #[test]
    fn test_tax_calculation_with_rounding() {
        // 10.00 at 8.25% = 0.825 → 0.83
        let tax = Money::from_cents(1000).calculate_tax(TaxRate::from_bps(825));
        assert_eq!(tax.cents(), 83);
    }

    #[test]
    fn test_net_of_tax_round_trips_to_gross() {
        let rates = [0u32, 500, 1200, 1800, 2800];
        let grosses = [1i64, 99, 1050, 4999, 11200, 123_457];

        for bps in rates {
            let rate = TaxRate::from_bps(bps);
            for gross in grosses {
                let mrp = Money::from_cents(gross);
                let net = mrp.net_of_tax(rate);
                let back = net + net.calculate_tax(rate);
                assert!(
                    back.abs_diff(mrp).cents() <= 1,
                    "gross {} at {} bps came back as {}",
                    gross,
                    bps,
                    back.cents()
                );
            }
        }
    }

    #[test]
    fn test_divide_rounded() {
        assert_eq!(Money::from_cents(1000).divide_rounded(10).cents(), 100);
        assert_eq!(Money::from_cents(1000).divide_rounded(3).cents(), 333);
        assert_eq!(Money::from_cents(1001).divide_rounded(2).cents(), 501);
        assert_eq!(Money::from_cents(1000).divide_rounded(0).cents(), 1000);
    }

    #[test]
    fn test_discount_and_markup() {
        let net = Money::from_cents(10000);
        assert_eq!(net.apply_percentage_discount(1000).cents(), 9000);
        assert_eq!(net.apply_markup(2000).cents(), 12000);
        assert_eq!(Money::from_cents(333).apply_markup(2000).cents(), 400);
    }

    #[test]
    fn test_zero_and_checks() {
        assert!(Money::zero().is_zero());
        assert!(Money::from_cents(1).is_positive());
        assert!(Money::from_cents(-1).is_negative());
        assert_eq!(Money::from_cents(-550).abs().cents(), 550);
    }
}
