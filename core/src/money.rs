//! Money primitives
//!
//! Amounts are integer minor units (cents) and rates are basis points, so
//! ledger math never touches floating point. Both serialize as decimal
//! numbers (`12.5`, `0.2`) so persisted records and config files stay
//! readable.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Minor units per major unit
pub const MINOR_PER_MAJOR: i64 = 100;

/// Basis points in a whole
pub const BPS_SCALE: u32 = 10_000;

/// Arithmetic errors on money values
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    #[error("amount overflow while computing {operation}")]
    Overflow { operation: &'static str },
    #[error("not a finite amount: {0}")]
    NotFinite(String),
    #[error("rate out of range: {0}")]
    RateOutOfRange(String),
}

/// A signed amount in minor units
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub const fn from_major(units: i64) -> Self {
        Self(units * MINOR_PER_MAJOR)
    }

    /// Convert a decimal major-unit value, rounding to the nearest cent
    pub fn from_major_f64(value: f64) -> Result<Self, MoneyError> {
        if !value.is_finite() {
            return Err(MoneyError::NotFinite(value.to_string()));
        }
        let cents = (value * MINOR_PER_MAJOR as f64).round();
        if cents > i64::MAX as f64 || cents < i64::MIN as f64 {
            return Err(MoneyError::Overflow { operation: "conversion" });
        }
        Ok(Self(cents as i64))
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub fn as_major_f64(self) -> f64 {
        self.0 as f64 / MINOR_PER_MAJOR as f64
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn checked_add(self, other: Amount) -> Result<Amount, MoneyError> {
        self.0
            .checked_add(other.0)
            .map(Amount)
            .ok_or(MoneyError::Overflow { operation: "addition" })
    }

    pub fn checked_sub(self, other: Amount) -> Result<Amount, MoneyError> {
        self.0
            .checked_sub(other.0)
            .map(Amount)
            .ok_or(MoneyError::Overflow { operation: "subtraction" })
    }

    /// `self × rate`, truncated toward zero
    pub fn apply(self, rate: Rate) -> Result<Amount, MoneyError> {
        let scaled = self.0 as i128 * rate.0 as i128 / BPS_SCALE as i128;
        i64::try_from(scaled)
            .map(Amount)
            .map_err(|_| MoneyError::Overflow { operation: "rate application" })
    }

    /// Split into `(self × rate, remainder)`; the two parts always sum to `self`
    pub fn split(self, rate: Rate) -> Result<(Amount, Amount), MoneyError> {
        let part = self.apply(rate)?;
        let rest = self.checked_sub(part)?;
        Ok((part, rest))
    }

    pub fn sum<I: IntoIterator<Item = Amount>>(items: I) -> Result<Amount, MoneyError> {
        items
            .into_iter()
            .try_fold(Amount::ZERO, |acc, item| acc.checked_add(item))
    }
}

impl std::ops::Neg for Amount {
    type Output = Amount;

    fn neg(self) -> Amount {
        Amount(self.0.saturating_neg())
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let minor = MINOR_PER_MAJOR as u64;
        write!(f, "{}{}.{:02}", sign, abs / minor, abs % minor)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_major_f64())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Amount::from_major_f64(value).map_err(serde::de::Error::custom)
    }
}

/// A non-negative rate in basis points
///
/// Used for percentages (`0.2`), multipliers (`1.8`) and split ratios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Rate(u32);

impl Rate {
    pub const ZERO: Rate = Rate(0);
    pub const ONE: Rate = Rate(BPS_SCALE);

    pub const fn from_bps(bps: u32) -> Self {
        Self(bps)
    }

    pub const fn percent(pct: u32) -> Self {
        Self(pct * 100)
    }

    pub fn from_fraction(value: f64) -> Result<Self, MoneyError> {
        if !value.is_finite() || value < 0.0 {
            return Err(MoneyError::RateOutOfRange(value.to_string()));
        }
        let bps = (value * BPS_SCALE as f64).round();
        if bps > u32::MAX as f64 {
            return Err(MoneyError::RateOutOfRange(value.to_string()));
        }
        Ok(Self(bps as u32))
    }

    pub const fn bps(self) -> u32 {
        self.0
    }

    pub fn as_fraction(self) -> f64 {
        self.0 as f64 / BPS_SCALE as f64
    }

    /// Whether the rate is a share of a whole (≤ 100%)
    pub const fn is_share(self) -> bool {
        self.0 <= BPS_SCALE
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0 as f64 / 100.0)
    }
}

impl Serialize for Rate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_fraction())
    }
}

impl<'de> Deserialize<'de> for Rate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = f64::deserialize(deserializer)?;
        Rate::from_fraction(value).map_err(serde::de::Error::custom)
    }
}

/// Ledger currency
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// Fiat, used for escrow release and buyer refunds
    Usd,
    /// Internal settlement credits, used for bonds, bonuses and pool credits
    Credits,
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Currency::Usd => write!(f, "USD"),
            Currency::Credits => write!(f, "CREDITS"),
        }
    }
}

impl FromStr for Currency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "USD" => Ok(Currency::Usd),
            "CREDITS" => Ok(Currency::Credits),
            other => Err(format!("unknown currency: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_and_split() {
        let job = Amount::from_major(1000);
        let bond = job.apply(Rate::percent(20)).unwrap();
        assert_eq!(bond, Amount::from_major(200));

        let (pool, buyer) = bond.split(Rate::percent(70)).unwrap();
        assert_eq!(pool, Amount::from_major(140));
        assert_eq!(buyer, Amount::from_major(60));
    }

    #[test]
    fn test_split_never_loses_a_cent() {
        let odd = Amount::from_cents(333);
        let (part, rest) = odd.split(Rate::percent(70)).unwrap();
        assert_eq!(part.cents() + rest.cents(), 333);
        assert_eq!(part, Amount::from_cents(233));
    }

    #[test]
    fn test_multiplier_above_one() {
        let job = Amount::from_major(1000);
        let adjusted = job.apply(Rate::from_fraction(1.8).unwrap()).unwrap();
        assert_eq!(adjusted, Amount::from_major(1800));
    }

    #[test]
    fn test_display() {
        assert_eq!(Amount::from_cents(1250).to_string(), "12.50");
        assert_eq!(Amount::from_cents(-5).to_string(), "-0.05");
        assert_eq!(Rate::percent(8).to_string(), "8%");
    }

    #[test]
    fn test_serde_decimal_form() {
        let amount: Amount = serde_json::from_str("12.5").unwrap();
        assert_eq!(amount.cents(), 1250);
        assert_eq!(serde_json::to_string(&Amount::from_major(30)).unwrap(), "30.0");

        let rate: Rate = serde_json::from_str("0.07").unwrap();
        assert_eq!(rate.bps(), 700);
        assert!(serde_json::from_str::<Rate>("-0.1").is_err());
    }

    #[test]
    fn test_overflow_is_reported() {
        let huge = Amount::from_cents(i64::MAX);
        assert!(huge.checked_add(Amount::from_cents(1)).is_err());
        assert!(huge.apply(Rate::from_bps(20_000)).is_err());
    }
}
