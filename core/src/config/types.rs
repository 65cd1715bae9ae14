//! Configuration section types
//!
//! Every field has a serde default so a partial `clearhouse.toml` only needs
//! the values it changes.

use crate::money::{Amount, Currency, Rate};
use crate::sla::SlaTier;
use crate::types::AccountId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Auction
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuctionConfig {
    /// Bidding window when the requester does not give one
    #[serde(default = "default_duration_secs")]
    pub default_duration_secs: u64,

    /// Weight of the price score in the bid score
    #[serde(default = "default_price_weight")]
    pub price_weight: f64,

    /// Weight of the delivery-speed score in the bid score
    #[serde(default = "default_speed_weight")]
    pub speed_weight: f64,

    /// Backoff for clearing jobs that fail on storage or ledger errors
    #[serde(default = "RetryConfig::aggressive")]
    pub clearing_retry: RetryConfig,
}

impl Default for AuctionConfig {
    fn default() -> Self {
        Self {
            default_duration_secs: default_duration_secs(),
            price_weight: default_price_weight(),
            speed_weight: default_speed_weight(),
            clearing_retry: RetryConfig::aggressive(),
        }
    }
}

fn default_duration_secs() -> u64 {
    90
}

fn default_price_weight() -> f64 {
    0.7
}

fn default_speed_weight() -> f64 {
    0.3
}

// ============================================================================
// Settlement
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SettlementConfig {
    /// Currency of intent escrow and buyer refunds
    #[serde(default = "default_escrow_currency")]
    pub escrow_currency: Currency,

    /// Currency of bonds, bonuses and pool credits
    #[serde(default = "default_bond_currency")]
    pub bond_currency: Currency,

    /// Account receiving the pool share of slashed bonds
    #[serde(default = "default_risk_pool")]
    pub risk_pool_account: AccountId,

    /// Share of a breached bond credited to the risk pool; the rest goes to the buyer
    #[serde(default = "default_breach_pool_share")]
    pub breach_pool_share: Rate,

    /// Largest elapsed fraction of the window that still earns the early bonus
    #[serde(default = "default_early_bonus_max_elapsed")]
    pub early_bonus_max_elapsed: Rate,

    /// Open an SLA contract on every award, using `default_tier` when the
    /// intent names none; when off, only intents published with a tier get one
    #[serde(default = "default_true")]
    pub auto_contract: bool,

    /// Tier used when an award auto-creates a contract
    #[serde(default = "default_tier")]
    pub default_tier: SlaTier,

    /// How often the breach watcher sweeps active contracts
    #[serde(default = "default_breach_sweep_secs")]
    pub breach_sweep_secs: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            escrow_currency: default_escrow_currency(),
            bond_currency: default_bond_currency(),
            risk_pool_account: default_risk_pool(),
            breach_pool_share: default_breach_pool_share(),
            early_bonus_max_elapsed: default_early_bonus_max_elapsed(),
            auto_contract: default_true(),
            default_tier: default_tier(),
            breach_sweep_secs: default_breach_sweep_secs(),
        }
    }
}

fn default_escrow_currency() -> Currency {
    Currency::Usd
}

fn default_bond_currency() -> Currency {
    Currency::Credits
}

fn default_risk_pool() -> AccountId {
    AccountId::new("risk_pool")
}

fn default_breach_pool_share() -> Rate {
    Rate::percent(70)
}

fn default_early_bonus_max_elapsed() -> Rate {
    Rate::percent(50)
}

fn default_true() -> bool {
    true
}

fn default_tier() -> SlaTier {
    SlaTier::Standard
}

fn default_breach_sweep_secs() -> u64 {
    300
}

// ============================================================================
// Performance bonds
// ============================================================================

/// Order-value band with a fixed bond
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValueBand {
    pub name: String,
    /// Inclusive upper bound; the last band is open-ended
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_order_value: Option<Amount>,
    pub bond: Amount,
}

/// Delivery-speed band with a fixed bonus
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpeedBand {
    pub name: String,
    /// Inclusive upper bound on elapsed fraction of the SLA window
    pub max_elapsed: Rate,
    pub bonus: Amount,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SlashRates {
    #[serde(default = "default_slash_minor")]
    pub minor: Rate,
    #[serde(default = "default_slash_moderate")]
    pub moderate: Rate,
    #[serde(default = "default_slash_major")]
    pub major: Rate,
}

impl Default for SlashRates {
    fn default() -> Self {
        Self {
            minor: default_slash_minor(),
            moderate: default_slash_moderate(),
            major: default_slash_major(),
        }
    }
}

fn default_slash_minor() -> Rate {
    Rate::percent(25)
}

fn default_slash_moderate() -> Rate {
    Rate::percent(50)
}

fn default_slash_major() -> Rate {
    Rate::percent(100)
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceBondConfig {
    #[serde(default = "default_value_bands")]
    pub value_bands: Vec<ValueBand>,
    #[serde(default = "default_speed_bands")]
    pub speed_bands: Vec<SpeedBand>,
    #[serde(default)]
    pub slash: SlashRates,
}

impl Default for PerformanceBondConfig {
    fn default() -> Self {
        Self {
            value_bands: default_value_bands(),
            speed_bands: default_speed_bands(),
            slash: SlashRates::default(),
        }
    }
}

fn default_value_bands() -> Vec<ValueBand> {
    let band = |name: &str, max: Option<i64>, bond: i64| ValueBand {
        name: name.to_string(),
        max_order_value: max.map(Amount::from_major),
        bond: Amount::from_major(bond),
    };
    vec![
        band("micro", Some(50), 1),
        band("small", Some(200), 3),
        band("medium", Some(500), 5),
        band("large", Some(1000), 10),
        band("enterprise", None, 20),
    ]
}

fn default_speed_bands() -> Vec<SpeedBand> {
    vec![
        SpeedBand {
            name: "early".to_string(),
            max_elapsed: Rate::percent(50),
            bonus: Amount::from_cents(300),
        },
        SpeedBand {
            name: "on_time".to_string(),
            max_elapsed: Rate::percent(80),
            bonus: Amount::from_cents(150),
        },
    ]
}

// ============================================================================
// Pricing, notifier, storage
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Exploration rate for experiments started without one
    #[serde(default = "default_epsilon")]
    pub default_epsilon: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            default_epsilon: default_epsilon(),
        }
    }
}

fn default_epsilon() -> f64 {
    0.15
}

/// Exponential backoff policy
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_exponential_base")]
    pub exponential_base: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            exponential_base: default_exponential_base(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_exponential_base() -> f64 {
    2.0
}

impl RetryConfig {
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
            max_delay_ms: 0,
            exponential_base: 2.0,
        }
    }

    pub fn aggressive() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            exponential_base: 2.0,
        }
    }

    /// Calculate delay for retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }

        let delay = self.base_delay_ms as f64 * self.exponential_base.powi(attempt as i32 - 1);
        let delay = delay.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(delay)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for JSON collections; platform data dir when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}
