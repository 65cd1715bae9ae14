use crate::error::MarketError;
use crate::money::Amount;
use crate::store::Record;
use crate::types::{AccountId, IntentId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BondStatus {
    Staked,
    Returned,
    Slashed,
}

impl fmt::Display for BondStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Staked => "STAKED",
            Self::Returned => "RETURNED",
            Self::Slashed => "SLASHED",
        })
    }
}

/// How badly a dispute went for the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Minor,
    Moderate,
    Major,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Minor => "minor",
            Self::Moderate => "moderate",
            Self::Major => "major",
        })
    }
}

impl FromStr for Severity {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minor" => Ok(Self::Minor),
            "moderate" => Ok(Self::Moderate),
            "major" => Ok(Self::Major),
            other => Err(MarketError::validation(
                "severity",
                format!("unknown severity '{}', expected minor, moderate or major", other),
            )),
        }
    }
}

/// A fixed-size bond staked against an intent that has no SLA contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceBond {
    pub intent_id: IntentId,
    pub agent: AccountId,
    pub band: String,
    pub order_value: Amount,
    pub amount: Amount,
    pub status: BondStatus,
    pub staked_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub returned: Amount,
    #[serde(default)]
    pub slashed: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    /// Set once a delivery bonus has been paid (possibly zero)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bonus_awarded: Option<Amount>,
}

impl Record for PerformanceBond {
    type Key = IntentId;
    const KIND: &'static str = "performance bond";
    const COLLECTION: &'static str = "performance_bonds";

    fn key(&self) -> &IntentId {
        &self.intent_id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BondQuote {
    pub band: String,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryBonus {
    /// Speed band earned, `None` when delivery was too slow for any
    pub band: Option<String>,
    pub amount: Amount,
    /// Elapsed share of the SLA window at delivery
    pub completion_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlashReceipt {
    pub intent_id: IntentId,
    pub severity: Severity,
    pub slashed: Amount,
    pub returned: Amount,
}
