use super::tiers::SlaTier;
use crate::money::Amount;
use crate::store::Record;
use crate::types::{AccountId, ContractId, IntentId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractStatus {
    Active,
    Completed,
    Breached,
}

impl fmt::Display for ContractStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Breached => "BREACHED",
        };
        f.write_str(name)
    }
}

/// Enforcement and settlement log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContractAction {
    BondStaked {
        at: DateTime<Utc>,
        amount: Amount,
        remaining_balance: Amount,
    },
    BreachEnforced {
        at: DateTime<Utc>,
        hours_overdue: f64,
        pool_credit: Amount,
        buyer_bond_refund: Amount,
        fee_refund: Amount,
    },
    DeliveryProcessed {
        at: DateTime<Utc>,
        on_time: bool,
        elapsed_fraction: f64,
        bond_returned: Amount,
        bonus: Amount,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlaContract {
    pub id: ContractId,
    pub intent_id: IntentId,
    pub agent: AccountId,
    pub buyer: AccountId,
    pub tier: SlaTier,
    pub status: ContractStatus,
    pub created_at: DateTime<Utc>,
    pub delivery_deadline: DateTime<Utc>,
    pub job_value: Amount,
    pub adjusted_price: Amount,
    pub bond_amount: Amount,
    pub protection_fee: Amount,
    pub early_bonus: Amount,
    pub bond_staked: bool,
    pub delivered_at: Option<DateTime<Utc>>,
    pub enforcement_log: Vec<ContractAction>,
}

impl SlaContract {
    /// Bond actually held against the contract
    pub fn staked_amount(&self) -> Amount {
        if self.bond_staked {
            self.bond_amount
        } else {
            Amount::ZERO
        }
    }

    pub fn breach_status(&self, now: DateTime<Utc>) -> BreachStatus {
        if self.delivered_at.is_some() {
            return BreachStatus::Delivered;
        }
        if self.status != ContractStatus::Active {
            return BreachStatus::Inactive { status: self.status };
        }
        if now > self.delivery_deadline {
            BreachStatus::Breached {
                overdue: now - self.delivery_deadline,
            }
        } else {
            BreachStatus::Pending {
                remaining: self.delivery_deadline - now,
            }
        }
    }

    /// Fraction of the delivery window used by `at`
    pub fn elapsed_fraction(&self, at: DateTime<Utc>) -> f64 {
        let window = (self.delivery_deadline - self.created_at).num_milliseconds();
        if window <= 0 {
            return 1.0;
        }
        (at - self.created_at).num_milliseconds() as f64 / window as f64
    }
}

impl Record for SlaContract {
    type Key = ContractId;
    const KIND: &'static str = "contract";
    const COLLECTION: &'static str = "sla_contracts";

    fn key(&self) -> &ContractId {
        &self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreachStatus {
    Delivered,
    Inactive { status: ContractStatus },
    Pending { remaining: Duration },
    Breached { overdue: Duration },
}

impl BreachStatus {
    pub fn is_breached(&self) -> bool {
        matches!(self, Self::Breached { .. })
    }
}

// ============================================================================
// Receipts
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractTerms {
    pub contract_id: ContractId,
    pub bond_required: Amount,
    pub protection_fee: Amount,
    pub adjusted_price: Amount,
    pub deadline: DateTime<Utc>,
}

impl From<&SlaContract> for ContractTerms {
    fn from(contract: &SlaContract) -> Self {
        Self {
            contract_id: contract.id.clone(),
            bond_required: contract.bond_amount,
            protection_fee: contract.protection_fee,
            adjusted_price: contract.adjusted_price,
            deadline: contract.delivery_deadline,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeReceipt {
    pub contract_id: ContractId,
    pub intent_id: IntentId,
    pub staked: Amount,
    pub remaining_balance: Amount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    pub contract_id: ContractId,
    pub on_time: bool,
    pub elapsed_fraction: f64,
    pub bond_returned: Amount,
    pub bonus_awarded: Amount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreachReceipt {
    pub contract_id: ContractId,
    pub intent_id: IntentId,
    pub bond_slashed: Amount,
    pub pool_credit: Amount,
    pub buyer_bond_refund: Amount,
    pub fee_refund: Amount,
    /// Bond refund plus protection-fee refund
    pub buyer_refunded: Amount,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    pub agent: AccountId,
    pub total_contracts: u32,
    pub active: u32,
    pub on_time_deliveries: u32,
    pub late_deliveries: u32,
    pub breaches: u32,
    pub on_time_rate: f64,
    pub breach_rate: f64,
    pub bonds_staked: Amount,
    pub bonds_slashed: Amount,
    pub bonuses_earned: Amount,
    pub by_tier: BTreeMap<SlaTier, u32>,
}
