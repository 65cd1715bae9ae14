//! SLA tier table
//!
//! A tier fixes the delivery window and the bond, protection-fee,
//! early-bonus and price-multiplier rates applied to a job's value.

use crate::error::MarketError;
use crate::money::{Amount, MoneyError, Rate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlaTier {
    Express,
    Premium,
    Standard,
    Economy,
}

impl SlaTier {
    pub const ALL: [SlaTier; 4] = [
        SlaTier::Express,
        SlaTier::Premium,
        SlaTier::Standard,
        SlaTier::Economy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Express => "express",
            Self::Premium => "premium",
            Self::Standard => "standard",
            Self::Economy => "economy",
        }
    }
}

impl fmt::Display for SlaTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SlaTier {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "express" => Ok(Self::Express),
            "premium" => Ok(Self::Premium),
            "standard" => Ok(Self::Standard),
            "economy" => Ok(Self::Economy),
            other => Err(MarketError::validation(
                "tier",
                format!("unknown tier '{}', expected one of express, premium, standard, economy", other),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierDefinition {
    pub label: String,
    #[serde(default)]
    pub description: String,
    pub window_hours: u32,
    pub bond_pct: Rate,
    pub protection_fee_pct: Rate,
    pub early_bonus_pct: Rate,
    pub price_multiplier: Rate,
}

impl TierDefinition {
    fn new(
        label: &str,
        description: &str,
        window_hours: u32,
        bond_pct: u32,
        protection_fee_pct: u32,
        early_bonus_pct: u32,
        price_multiplier_bps: u32,
    ) -> Self {
        Self {
            label: label.to_string(),
            description: description.to_string(),
            window_hours,
            bond_pct: Rate::percent(bond_pct),
            protection_fee_pct: Rate::percent(protection_fee_pct),
            early_bonus_pct: Rate::percent(early_bonus_pct),
            price_multiplier: Rate::from_bps(price_multiplier_bps),
        }
    }

    pub fn express() -> Self {
        Self::new("Express SLA", "Rush 24-hour delivery with maximum commitment", 24, 40, 8, 20, 18_000)
    }

    pub fn premium() -> Self {
        Self::new("Premium SLA", "Guaranteed 3-day delivery with highest priority", 72, 30, 5, 15, 13_000)
    }

    pub fn standard() -> Self {
        Self::new("Standard SLA", "Standard 7-day delivery with quality guarantee", 168, 20, 3, 10, 10_000)
    }

    pub fn economy() -> Self {
        Self::new("Economy SLA", "Budget-friendly 14-day delivery", 336, 10, 1, 5, 8_000)
    }

    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.window_hours))
    }

    /// Price a job under this tier without creating anything
    pub fn requirements(&self, tier: SlaTier, job_value: Amount) -> Result<SlaRequirements, MoneyError> {
        let adjusted_price = job_value.apply(self.price_multiplier)?;
        let protection_fee = job_value.apply(self.protection_fee_pct)?;
        Ok(SlaRequirements {
            tier,
            label: self.label.clone(),
            job_value,
            adjusted_price,
            bond_amount: job_value.apply(self.bond_pct)?,
            protection_fee,
            early_bonus: job_value.apply(self.early_bonus_pct)?,
            total_buyer_payment: adjusted_price.checked_add(protection_fee)?,
            window_hours: self.window_hours,
        })
    }
}

/// Quote for a job under one tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlaRequirements {
    pub tier: SlaTier,
    pub label: String,
    pub job_value: Amount,
    pub adjusted_price: Amount,
    pub bond_amount: Amount,
    pub protection_fee: Amount,
    pub early_bonus: Amount,
    pub total_buyer_payment: Amount,
    pub window_hours: u32,
}

/// The four configurable tiers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierTable {
    #[serde(default = "TierDefinition::express")]
    pub express: TierDefinition,
    #[serde(default = "TierDefinition::premium")]
    pub premium: TierDefinition,
    #[serde(default = "TierDefinition::standard")]
    pub standard: TierDefinition,
    #[serde(default = "TierDefinition::economy")]
    pub economy: TierDefinition,
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            express: TierDefinition::express(),
            premium: TierDefinition::premium(),
            standard: TierDefinition::standard(),
            economy: TierDefinition::economy(),
        }
    }
}

impl TierTable {
    pub fn get(&self, tier: SlaTier) -> &TierDefinition {
        match tier {
            SlaTier::Express => &self.express,
            SlaTier::Premium => &self.premium,
            SlaTier::Standard => &self.standard,
            SlaTier::Economy => &self.economy,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlaTier, &TierDefinition)> {
        SlaTier::ALL.into_iter().map(move |tier| (tier, self.get(tier)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_tier_on_thousand_dollar_job() {
        let table = TierTable::default();
        let quote = table
            .get(SlaTier::Standard)
            .requirements(SlaTier::Standard, Amount::from_major(1000))
            .unwrap();

        assert_eq!(quote.adjusted_price, Amount::from_major(1000));
        assert_eq!(quote.bond_amount, Amount::from_major(200));
        assert_eq!(quote.protection_fee, Amount::from_major(30));
        assert_eq!(quote.early_bonus, Amount::from_major(100));
        assert_eq!(quote.total_buyer_payment, Amount::from_major(1030));
        assert_eq!(quote.window_hours, 168);
    }

    #[test]
    fn test_express_and_economy_multipliers() {
        let table = TierTable::default();
        let job = Amount::from_major(500);

        let express = table.get(SlaTier::Express).requirements(SlaTier::Express, job).unwrap();
        assert_eq!(express.adjusted_price, Amount::from_major(900));
        assert_eq!(express.bond_amount, Amount::from_major(200));
        assert_eq!(express.protection_fee, Amount::from_major(40));

        let economy = table.get(SlaTier::Economy).requirements(SlaTier::Economy, job).unwrap();
        assert_eq!(economy.adjusted_price, Amount::from_major(400));
        assert_eq!(economy.early_bonus, Amount::from_cents(2500));
    }

    #[test]
    fn test_tier_parsing() {
        assert_eq!("PREMIUM".parse::<SlaTier>().unwrap(), SlaTier::Premium);
        assert_eq!(" economy ".parse::<SlaTier>().unwrap(), SlaTier::Economy);
        let err = "gold".parse::<SlaTier>().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[test]
    fn test_tier_table_partial_override() {
        let table: TierTable = toml::from_str(
            r#"
            [express]
            label = "Rush"
            window_hours = 12
            bond_pct = 0.5
            protection_fee_pct = 0.1
            early_bonus_pct = 0.25
            price_multiplier = 2.0
            "#,
        )
        .unwrap();

        assert_eq!(table.express.window_hours, 12);
        assert_eq!(table.express.price_multiplier, Rate::from_bps(20_000));
        assert_eq!(table.standard, TierDefinition::standard());
    }
}
