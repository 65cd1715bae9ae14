//! Performance bonds
//!
//! Tier-independent collateral for awarded intents that are not bound to an
//! SLA contract. Bond size comes from order-value bands, the delivery bonus
//! from speed bands, and disputes slash at graded severities.

pub mod model;

pub use model::{BondQuote, BondStatus, DeliveryBonus, PerformanceBond, Severity, SlashReceipt};

use crate::auction::{Intent, IntentStatus};
use crate::clock::Clock;
use crate::config::{PerformanceBondConfig, SettlementConfig};
use crate::error::{MarketError, OptionExt, Result};
use crate::ledger::{self, Basis, Ledger, LedgerEntry, Posting};
use crate::locks::KeyedLocks;
use crate::money::{Amount, Rate};
use crate::sla::AccountLocks;
use crate::store::Repo;
use crate::types::{AccountId, IntentId};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

pub struct PerformanceBondManager {
    bonds: Repo<PerformanceBond>,
    ledger: Arc<dyn Ledger>,
    clock: Arc<dyn Clock>,
    policy: PerformanceBondConfig,
    settlement: SettlementConfig,
    bond_locks: KeyedLocks<IntentId>,
    account_locks: Arc<AccountLocks>,
}

impl PerformanceBondManager {
    pub fn new(
        bonds: Repo<PerformanceBond>,
        ledger: Arc<dyn Ledger>,
        clock: Arc<dyn Clock>,
        policy: PerformanceBondConfig,
        settlement: SettlementConfig,
        account_locks: Arc<AccountLocks>,
    ) -> Self {
        Self {
            bonds,
            ledger,
            clock,
            policy,
            settlement,
            bond_locks: KeyedLocks::new(),
            account_locks,
        }
    }

    /// Band and fixed bond for an order value
    pub fn quote(&self, order_value: Amount) -> Result<BondQuote> {
        if order_value.is_negative() {
            return Err(MarketError::validation("order_value", "must be non-negative"));
        }
        let band = self
            .policy
            .value_bands
            .iter()
            .find(|band| band.max_order_value.map_or(true, |max| order_value <= max))
            .or_else(|| self.policy.value_bands.last())
            .ok_or_else(|| MarketError::validation("performance_bond.value_bands", "no bands configured"))?;

        Ok(BondQuote {
            band: band.name.clone(),
            amount: band.bond,
        })
    }

    pub fn get(&self, intent_id: &IntentId) -> Result<PerformanceBond> {
        self.bonds.get(intent_id)?.ok_or_not_found("performance bond", intent_id)
    }

    /// True when a bond is currently staked against the intent
    pub fn has_active_bond(&self, intent_id: &IntentId) -> Result<bool> {
        Ok(self
            .bonds
            .get(intent_id)?
            .is_some_and(|bond| bond.status == BondStatus::Staked))
    }

    /// Debit the winner's bond for an awarded intent; one bond per intent
    pub async fn stake(
        &self,
        intent: &Intent,
        agent: &AccountId,
        order_value: Amount,
    ) -> Result<PerformanceBond> {
        if !matches!(intent.status, IntentStatus::Awarded | IntentStatus::InProgress) {
            return Err(MarketError::invalid_state(
                "intent",
                &intent.id,
                intent.status,
                "stake a performance bond on",
            ));
        }
        if let Some(contract_id) = &intent.contract_id {
            return Err(MarketError::invalid_state(
                "intent",
                &intent.id,
                format!("bound to SLA contract {}", contract_id),
                "stake a performance bond on",
            ));
        }
        if intent.claimed_by.as_ref() != Some(agent) {
            return Err(MarketError::validation(
                "agent",
                format!("{} did not win intent {}", agent, intent.id),
            ));
        }
        let quote = self.quote(order_value)?;

        let _bond_guard = self.bond_locks.lock(&intent.id).await;
        if let Some(existing) = self.bonds.get(&intent.id)? {
            return Err(MarketError::already_processed(
                "performance bond",
                &intent.id,
                existing.status,
            ));
        }

        let currency = self.settlement.bond_currency;
        let _account_guard = self.account_locks.lock(&(agent.clone(), currency)).await;
        let available = self.ledger.balance(agent, currency).await?;
        if available < quote.amount {
            return Err(MarketError::InsufficientFunds {
                account: agent.to_string(),
                required: quote.amount,
                available,
            });
        }

        let reference = intent.id.as_str();
        let postings = [Posting::debit(
            agent.clone(),
            quote.amount,
            currency,
            Basis::PerformanceBondStake,
        )];
        ledger::post_all(self.ledger.as_ref(), &postings, reference).await?;

        let bond = PerformanceBond {
            intent_id: intent.id.clone(),
            agent: agent.clone(),
            band: quote.band,
            order_value,
            amount: quote.amount,
            status: BondStatus::Staked,
            staked_at: self.clock.now(),
            closed_at: None,
            returned: Amount::ZERO,
            slashed: Amount::ZERO,
            severity: None,
            bonus_awarded: None,
        };
        self.commit(&bond, &postings).await?;

        info!(
            intent_id = %bond.intent_id,
            agent = %agent,
            band = %bond.band,
            amount = %bond.amount,
            "performance bond staked"
        );
        Ok(bond)
    }

    /// Return the full bond after a clean delivery
    pub async fn release(&self, intent_id: &IntentId) -> Result<PerformanceBond> {
        let _guard = self.bond_locks.lock(intent_id).await;
        let mut bond = self.staked(intent_id)?;

        let postings = [Posting::credit(
            bond.agent.clone(),
            bond.amount,
            self.settlement.bond_currency,
            Basis::PerformanceBondReturn,
        )];
        ledger::post_all(self.ledger.as_ref(), &postings, intent_id.as_str()).await?;

        bond.status = BondStatus::Returned;
        bond.returned = bond.amount;
        bond.closed_at = Some(self.clock.now());
        self.commit(&bond, &postings).await?;
        ledger::settle_stake(self.ledger.as_ref(), &bond.agent, Basis::PerformanceBondStake, intent_id.as_str()).await;

        info!(intent_id = %intent_id, agent = %bond.agent, amount = %bond.amount, "performance bond returned");
        Ok(bond)
    }

    /// Speed bonus for a delivery against an SLA of `sla_hours`
    pub fn delivery_bonus(
        &self,
        accepted_at: DateTime<Utc>,
        delivered_at: DateTime<Utc>,
        sla_hours: f64,
    ) -> Result<DeliveryBonus> {
        if !(sla_hours.is_finite() && sla_hours > 0.0) {
            return Err(MarketError::validation("sla_hours", "must be positive"));
        }
        if delivered_at < accepted_at {
            return Err(MarketError::validation("delivered_at", "is before accepted_at"));
        }

        let actual_hours = (delivered_at - accepted_at).num_seconds() as f64 / 3600.0;
        let completion_rate = actual_hours / sla_hours;
        let band = self
            .policy
            .speed_bands
            .iter()
            .find(|band| completion_rate <= band.max_elapsed.as_fraction());

        Ok(DeliveryBonus {
            band: band.map(|b| b.name.clone()),
            amount: band.map_or(Amount::ZERO, |b| b.bonus),
            completion_rate,
        })
    }

    /// Credit the delivery bonus once per bond
    pub async fn award_bonus(
        &self,
        intent_id: &IntentId,
        accepted_at: DateTime<Utc>,
        delivered_at: DateTime<Utc>,
        sla_hours: f64,
    ) -> Result<DeliveryBonus> {
        let bonus = self.delivery_bonus(accepted_at, delivered_at, sla_hours)?;

        let _guard = self.bond_locks.lock(intent_id).await;
        let mut bond = self.get(intent_id)?;
        if bond.bonus_awarded.is_some() {
            return Err(MarketError::already_processed(
                "performance bond",
                intent_id,
                "bonus already awarded",
            ));
        }
        if bond.status == BondStatus::Slashed {
            return Err(MarketError::invalid_state(
                "performance bond",
                intent_id,
                bond.status,
                "award a bonus on",
            ));
        }

        let postings = [Posting::credit(
            bond.agent.clone(),
            bonus.amount,
            self.settlement.bond_currency,
            Basis::PerformanceDeliveryBonus,
        )];
        ledger::post_all(self.ledger.as_ref(), &postings, intent_id.as_str()).await?;

        bond.bonus_awarded = Some(bonus.amount);
        self.commit(&bond, &postings).await?;

        info!(
            intent_id = %intent_id,
            agent = %bond.agent,
            band = bonus.band.as_deref().unwrap_or("none"),
            bonus = %bonus.amount,
            completion_rate = bonus.completion_rate,
            "delivery bonus awarded"
        );
        Ok(bonus)
    }

    /// Slash a staked bond after a lost dispute
    ///
    /// The slashed part goes to the risk pool and the remainder back to the
    /// agent, so the two always add up to the bond.
    pub async fn slash(&self, intent_id: &IntentId, severity: Severity) -> Result<SlashReceipt> {
        let _guard = self.bond_locks.lock(intent_id).await;
        let mut bond = self.staked(intent_id)?;

        let (slashed, returned) = bond.amount.split(self.slash_rate(severity))?;
        let currency = self.settlement.bond_currency;
        let postings = [
            Posting::credit(
                self.settlement.risk_pool_account.clone(),
                slashed,
                currency,
                Basis::DisputePoolCredit,
            ),
            Posting::credit(bond.agent.clone(), returned, currency, Basis::PerformanceBondReturn),
        ];
        ledger::post_all(self.ledger.as_ref(), &postings, intent_id.as_str()).await?;

        let now = self.clock.now();
        if slashed.is_positive() {
            let audit = LedgerEntry {
                ts: now,
                amount: -slashed,
                currency,
                basis: Basis::PerformanceBondSlash,
                reference: intent_id.to_string(),
                settled: true,
            };
            if let Err(err) = self.ledger.record(&bond.agent, audit).await {
                ledger::reverse_all(self.ledger.as_ref(), &postings, intent_id.as_str()).await;
                return Err(err.into());
            }
        }

        bond.status = BondStatus::Slashed;
        bond.slashed = slashed;
        bond.returned = returned;
        bond.severity = Some(severity);
        bond.closed_at = Some(now);
        self.commit(&bond, &postings).await?;
        ledger::settle_stake(self.ledger.as_ref(), &bond.agent, Basis::PerformanceBondStake, intent_id.as_str()).await;

        info!(
            intent_id = %intent_id,
            agent = %bond.agent,
            %severity,
            slashed = %slashed,
            returned = %returned,
            "performance bond slashed"
        );
        Ok(SlashReceipt {
            intent_id: intent_id.clone(),
            severity,
            slashed,
            returned,
        })
    }

    fn slash_rate(&self, severity: Severity) -> Rate {
        match severity {
            Severity::Minor => self.policy.slash.minor,
            Severity::Moderate => self.policy.slash.moderate,
            Severity::Major => self.policy.slash.major,
        }
    }

    fn staked(&self, intent_id: &IntentId) -> Result<PerformanceBond> {
        let bond = self.get(intent_id)?;
        if bond.status != BondStatus::Staked {
            debug!(intent_id = %intent_id, status = %bond.status, "bond already closed");
            return Err(MarketError::already_processed("performance bond", intent_id, bond.status));
        }
        Ok(bond)
    }

    async fn commit(&self, bond: &PerformanceBond, postings: &[Posting]) -> Result<()> {
        if let Err(err) = self.bonds.put(bond.clone()) {
            ledger::reverse_all(self.ledger.as_ref(), postings, bond.intent_id.as_str()).await;
            return Err(err.into());
        }
        Ok(())
    }
}
