//! Precision-safe decimal types for order amounts and prices.
//!
//! Uses `rust_decimal` for exact decimal arithmetic. Fill accounting sums
//! many partial fills across reprices, so binary floating point is not an
//! option here.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Div, Mul, Sub};
use std::str::FromStr;

/// Price with exact decimal precision.
///
/// Wraps `Decimal` so that prices and amounts cannot be mixed by accident.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Price(pub Decimal);

impl Price {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Round down to the tick size. A zero tick leaves the price untouched.
    #[inline]
    pub fn round_to_tick(&self, tick_size: Price) -> Self {
        if tick_size.is_zero() {
            return *self;
        }
        Self((self.0 / tick_size.0).floor() * tick_size.0)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Price {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Price {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Price {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Price {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Price {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Div<Decimal> for Price {
    type Output = Self;

    fn div(self, rhs: Decimal) -> Self::Output {
        Self(self.0 / rhs)
    }
}

/// Order amount (base currency units) with exact decimal precision.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Size(pub Decimal);

impl Size {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// `self - rhs`, floored at zero.
    #[inline]
    pub fn saturating_sub(self, rhs: Size) -> Self {
        if rhs.0 >= self.0 {
            Self::ZERO
        } else {
            Self(self.0 - rhs.0)
        }
    }

    /// Notional value: amount * price.
    #[inline]
    pub fn notional(&self, price: Price) -> Decimal {
        self.0 * price.0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Size {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Size {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Size {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Size {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Size {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Mul<Decimal> for Size {
    type Output = Self;

    fn mul(self, rhs: Decimal) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Sum for Size {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Size::ZERO, |acc, s| acc + s)
    }
}

impl<'a> Sum<&'a Size> for Size {
    fn sum<I: Iterator<Item = &'a Size>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_round_to_tick() {
        let price = Price::new(dec!(12345.6789));
        let tick = Price::new(dec!(0.01));

        assert_eq!(price.round_to_tick(tick).0, dec!(12345.67));
        assert_eq!(price.round_to_tick(Price::ZERO), price);
    }

    #[test]
    fn test_size_saturating_sub() {
        let six = Size::new(dec!(6));
        let four = Size::new(dec!(4));

        assert_eq!(six.saturating_sub(four), Size::new(dec!(2)));
        assert_eq!(four.saturating_sub(six), Size::ZERO);
    }

    #[test]
    fn test_size_sum() {
        let fills = [Size::new(dec!(0.1)), Size::new(dec!(0.2)), Size::new(dec!(0.3))];
        let total: Size = fills.iter().sum();

        // Exact, unlike 0.1 + 0.2 + 0.3 in f64
        assert_eq!(total, Size::new(dec!(0.6)));
    }

    #[test]
    fn test_notional_calculation() {
        let size = Size::new(dec!(0.5));
        let price = Price::new(dec!(50000));

        assert_eq!(size.notional(price), dec!(25000));
    }
}
