//! Ledger client interface
//!
//! The ledger owns account balances and lives outside this crate. The
//! marketplace only moves value through [`Ledger`]; [`InMemoryLedger`] is the
//! in-process reference adapter.

pub mod memory;

pub use memory::InMemoryLedger;

use crate::money::{Amount, Currency};
use crate::types::AccountId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

/// Why value moved; stored on every ledger entry for reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Basis {
    IntentSettlement,
    SlaBondStake,
    SlaBondReturn,
    SlaBondSlash,
    SlaEarlyBonus,
    BreachPoolCredit,
    BreachBondRefund,
    ProtectionFeeRefund,
    PerformanceBondStake,
    PerformanceBondReturn,
    PerformanceBondSlash,
    PerformanceDeliveryBonus,
    DisputePoolCredit,
    Reversal,
}

impl Basis {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IntentSettlement => "intent_settlement",
            Self::SlaBondStake => "sla_bond_stake",
            Self::SlaBondReturn => "sla_bond_return",
            Self::SlaBondSlash => "sla_bond_slash",
            Self::SlaEarlyBonus => "sla_early_bonus",
            Self::BreachPoolCredit => "breach_pool_credit",
            Self::BreachBondRefund => "breach_bond_refund",
            Self::ProtectionFeeRefund => "protection_fee_refund",
            Self::PerformanceBondStake => "performance_bond_stake",
            Self::PerformanceBondReturn => "performance_bond_return",
            Self::PerformanceBondSlash => "performance_bond_slash",
            Self::PerformanceDeliveryBonus => "performance_delivery_bonus",
            Self::DisputePoolCredit => "dispute_pool_credit",
            Self::Reversal => "reversal",
        }
    }
}

impl fmt::Display for Basis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An append-only record of one value movement
///
/// `amount` is signed: credits positive, debits negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub ts: DateTime<Utc>,
    pub amount: Amount,
    pub currency: Currency,
    pub basis: Basis,
    #[serde(rename = "ref")]
    pub reference: String,
    pub settled: bool,
}

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("insufficient funds in {account}: required {required}, available {available}")]
    InsufficientFunds {
        account: AccountId,
        required: Amount,
        available: Amount,
    },

    #[error("invalid ledger amount {amount}: {reason}")]
    InvalidAmount { amount: Amount, reason: String },

    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

impl LedgerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[async_trait::async_trait]
pub trait Ledger: Send + Sync {
    async fn credit(
        &self,
        account: &AccountId,
        amount: Amount,
        currency: Currency,
        basis: Basis,
        reference: &str,
    ) -> Result<LedgerEntry, LedgerError>;

    /// Fails without effect when the balance does not cover `amount`
    async fn debit(
        &self,
        account: &AccountId,
        amount: Amount,
        currency: Currency,
        basis: Basis,
        reference: &str,
    ) -> Result<LedgerEntry, LedgerError>;

    async fn balance(&self, account: &AccountId, currency: Currency) -> Result<Amount, LedgerError>;

    /// Append an audit entry without moving value
    async fn record(&self, account: &AccountId, entry: LedgerEntry) -> Result<(), LedgerError>;

    /// Flag the newest unsettled entry with this basis and reference as
    /// settled; `false` when there is none
    async fn mark_settled(&self, account: &AccountId, basis: Basis, reference: &str) -> Result<bool, LedgerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Credit,
    Debit,
}

/// One planned money movement
#[derive(Debug, Clone)]
pub struct Posting {
    pub account: AccountId,
    pub amount: Amount,
    pub currency: Currency,
    pub basis: Basis,
    pub direction: Direction,
}

impl Posting {
    pub fn credit(account: AccountId, amount: Amount, currency: Currency, basis: Basis) -> Self {
        Self {
            account,
            amount,
            currency,
            basis,
            direction: Direction::Credit,
        }
    }

    pub fn debit(account: AccountId, amount: Amount, currency: Currency, basis: Basis) -> Self {
        Self {
            account,
            amount,
            currency,
            basis,
            direction: Direction::Debit,
        }
    }

    async fn apply(&self, ledger: &dyn Ledger, reference: &str) -> Result<LedgerEntry, LedgerError> {
        match self.direction {
            Direction::Credit => {
                ledger
                    .credit(&self.account, self.amount, self.currency, self.basis, reference)
                    .await
            }
            Direction::Debit => {
                ledger
                    .debit(&self.account, self.amount, self.currency, self.basis, reference)
                    .await
            }
        }
    }

    fn reversed(&self) -> Self {
        Self {
            account: self.account.clone(),
            amount: self.amount,
            currency: self.currency,
            basis: Basis::Reversal,
            direction: match self.direction {
                Direction::Credit => Direction::Debit,
                Direction::Debit => Direction::Credit,
            },
        }
    }
}

/// Apply postings in order, all or nothing
///
/// Zero-amount postings are skipped. When a posting fails, the ones already
/// applied are reversed newest first and the original error is returned.
pub async fn post_all(
    ledger: &dyn Ledger,
    postings: &[Posting],
    reference: &str,
) -> Result<Vec<LedgerEntry>, LedgerError> {
    let mut entries = Vec::new();

    for (i, posting) in postings.iter().enumerate() {
        if posting.amount.is_zero() {
            continue;
        }
        match posting.apply(ledger, reference).await {
            Ok(entry) => entries.push(entry),
            Err(err) => {
                reverse_all(ledger, &postings[..i], reference).await;
                return Err(err);
            }
        }
    }

    Ok(entries)
}

/// Undo postings that were applied, newest first
///
/// Used when a later step of the same operation fails. Reversal failures are
/// logged at error level and not returned.
pub async fn reverse_all(ledger: &dyn Ledger, postings: &[Posting], reference: &str) {
    for done in postings.iter().rev().filter(|p| !p.amount.is_zero()) {
        let reversal = done.reversed();
        if let Err(rev_err) = reversal.apply(ledger, reference).await {
            error!(
                account = %reversal.account,
                amount = %reversal.amount,
                currency = %reversal.currency,
                reference,
                error = %rev_err,
                "compensating ledger posting failed"
            );
        }
    }
}

/// Flag a stake entry settled once the bond it paid for has closed
///
/// The money has already moved; a failure here only leaves the audit flag
/// stale, so it is logged rather than returned.
pub async fn settle_stake(ledger: &dyn Ledger, account: &AccountId, basis: Basis, reference: &str) {
    match ledger.mark_settled(account, basis, reference).await {
        Ok(true) => {}
        Ok(false) => warn!(account = %account, %basis, reference, "no open stake entry to settle"),
        Err(err) => warn!(account = %account, %basis, reference, error = %err, "could not settle stake entry"),
    }
}
