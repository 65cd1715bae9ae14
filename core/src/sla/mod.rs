//! SLA Contract & Bond Manager
//!
//! Turns an award into a contract priced by its tier, stakes the agent's
//! bond, and settles the bond on delivery or breach.
//!
//! Locking: every mutation takes the contract's lock. Staking also takes the
//! paying account's lock so the balance check and the debit are one step.
//! Ledger legs run before the contract is committed; if the commit fails the
//! legs are reversed.

pub mod contract;
pub mod tiers;
pub mod watcher;


pub use contract::{
    AgentStats, BreachReceipt, BreachStatus, ContractAction, ContractStatus, ContractTerms,
    DeliveryReceipt, SlaContract, StakeReceipt,
};
pub use tiers::{SlaRequirements, SlaTier, TierDefinition, TierTable};
pub use watcher::{BreachHandler, BreachWatcher};

use crate::auction::{Intent, IntentStatus};
use crate::clock::Clock;
use crate::config::SettlementConfig;
use crate::error::{MarketError, OptionExt, Result};
use crate::ledger::{self, Basis, Ledger, LedgerEntry, Posting};
use crate::locks::KeyedLocks;
use crate::money::{Amount, Currency};
use crate::store::Repo;
use crate::types::{AccountId, ContractId, IntentId};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Locks on paying accounts, shared by every component that debits agents
pub type AccountLocks = KeyedLocks<(AccountId, Currency)>;

pub struct SlaManager {
    contracts: Repo<SlaContract>,
    ledger: Arc<dyn Ledger>,
    clock: Arc<dyn Clock>,
    tiers: TierTable,
    settlement: SettlementConfig,
    contract_locks: KeyedLocks<ContractId>,
    account_locks: Arc<AccountLocks>,
}

impl SlaManager {
    pub fn new(
        contracts: Repo<SlaContract>,
        ledger: Arc<dyn Ledger>,
        clock: Arc<dyn Clock>,
        tiers: TierTable,
        settlement: SettlementConfig,
        account_locks: Arc<AccountLocks>,
    ) -> Self {
        Self {
            contracts,
            ledger,
            clock,
            tiers,
            settlement,
            contract_locks: KeyedLocks::new(),
            account_locks,
        }
    }

    pub fn tiers(&self) -> &TierTable {
        &self.tiers
    }

    pub fn default_tier(&self) -> SlaTier {
        self.settlement.default_tier
    }

    /// Quote a job under a tier without creating anything
    pub fn requirements(&self, job_value: Amount, tier: SlaTier) -> Result<SlaRequirements> {
        if job_value.is_negative() {
            return Err(MarketError::validation("job_value", "must be non-negative"));
        }
        Ok(self.tiers.get(tier).requirements(tier, job_value)?)
    }

    pub fn get(&self, id: &ContractId) -> Result<SlaContract> {
        self.contracts.get(id)?.ok_or_not_found("contract", id)
    }

    pub fn active_contract_for(&self, intent_id: &IntentId) -> Result<Option<SlaContract>> {
        Ok(self
            .contracts
            .list()?
            .into_iter()
            .find(|c| &c.intent_id == intent_id && c.status == ContractStatus::Active))
    }

    pub fn contracts_for_intent(&self, intent_id: &IntentId) -> Result<Vec<SlaContract>> {
        Ok(self
            .contracts
            .list()?
            .into_iter()
            .filter(|c| &c.intent_id == intent_id)
            .collect())
    }

    /// Open a contract for an awarded intent
    ///
    /// Callers hold the intent's lock, which is what keeps an intent at one
    /// ACTIVE contract. No funds move here.
    pub(crate) fn create_contract(
        &self,
        intent: &Intent,
        agent: &AccountId,
        tier: SlaTier,
    ) -> Result<SlaContract> {
        if !matches!(intent.status, IntentStatus::Awarded | IntentStatus::InProgress) {
            return Err(MarketError::invalid_state(
                "intent",
                &intent.id,
                intent.status,
                "open a contract on",
            ));
        }
        if intent.claimed_by.as_ref() != Some(agent) {
            return Err(MarketError::validation(
                "agent",
                format!("{} is not the winner of intent {}", agent, intent.id),
            ));
        }
        if let Some(existing) = self.active_contract_for(&intent.id)? {
            return Err(MarketError::invalid_state(
                "intent",
                &intent.id,
                format!("{} with active contract {}", intent.status, existing.id),
                "open a second contract on",
            ));
        }

        let job_value = intent.job_value().ok_or_else(|| {
            MarketError::invalid_state("intent", &intent.id, intent.status, "price a contract for")
        })?;
        let quote = self.requirements(job_value, tier)?;
        let now = self.clock.now();

        let contract = SlaContract {
            id: ContractId::generate(),
            intent_id: intent.id.clone(),
            agent: agent.clone(),
            buyer: intent.requester.clone(),
            tier,
            status: ContractStatus::Active,
            created_at: now,
            delivery_deadline: now + self.tiers.get(tier).window(),
            job_value,
            adjusted_price: quote.adjusted_price,
            bond_amount: quote.bond_amount,
            protection_fee: quote.protection_fee,
            early_bonus: quote.early_bonus,
            bond_staked: false,
            delivered_at: None,
            enforcement_log: Vec::new(),
        };
        self.contracts.put(contract.clone())?;

        info!(
            contract_id = %contract.id,
            intent_id = %contract.intent_id,
            agent = %contract.agent,
            tier = %tier,
            bond = %contract.bond_amount,
            deadline = %contract.delivery_deadline,
            "SLA contract opened"
        );
        Ok(contract)
    }

    /// Debit the agent's bond; all or nothing
    pub async fn stake_bond(&self, id: &ContractId) -> Result<StakeReceipt> {
        let _contract_guard = self.contract_locks.lock(id).await;
        let mut contract = self.get(id)?;

        if contract.status != ContractStatus::Active {
            return Err(MarketError::invalid_state("contract", id, contract.status, "stake a bond on"));
        }
        if contract.bond_staked {
            return Err(MarketError::already_processed("contract", id, "bond already staked"));
        }

        let currency = self.settlement.bond_currency;
        let _account_guard = self
            .account_locks
            .lock(&(contract.agent.clone(), currency))
            .await;

        let available = self.ledger.balance(&contract.agent, currency).await?;
        if available < contract.bond_amount {
            return Err(MarketError::InsufficientFunds {
                account: contract.agent.to_string(),
                required: contract.bond_amount,
                available,
            });
        }

        let postings = [Posting::debit(
            contract.agent.clone(),
            contract.bond_amount,
            currency,
            Basis::SlaBondStake,
        )];
        ledger::post_all(self.ledger.as_ref(), &postings, id.as_str()).await?;
        let remaining_balance = match self.ledger.balance(&contract.agent, currency).await {
            Ok(balance) => balance,
            Err(err) => {
                warn!(contract_id = %id, error = %err, "balance unavailable after staking, reporting an estimate");
                available.checked_sub(contract.bond_amount)?
            }
        };

        contract.bond_staked = true;
        contract.enforcement_log.push(ContractAction::BondStaked {
            at: self.clock.now(),
            amount: contract.bond_amount,
            remaining_balance,
        });
        self.commit(&contract, &postings).await?;

        info!(contract_id = %id, agent = %contract.agent, bond = %contract.bond_amount, "SLA bond staked");
        Ok(StakeReceipt {
            contract_id: contract.id,
            intent_id: contract.intent_id,
            staked: contract.bond_amount,
            remaining_balance,
        })
    }

    pub fn breach_status(&self, id: &ContractId) -> Result<BreachStatus> {
        Ok(self.get(id)?.breach_status(self.clock.now()))
    }

    /// True iff the contract is ACTIVE, undelivered, and past its deadline
    pub fn check_breach(&self, id: &ContractId) -> Result<bool> {
        Ok(self.breach_status(id)?.is_breached())
    }

    /// Split the staked bond between the risk pool and the buyer, refund the
    /// protection fee, and close the contract as BREACHED
    pub async fn enforce_breach(&self, id: &ContractId) -> Result<BreachReceipt> {
        let _guard = self.contract_locks.lock(id).await;
        let mut contract = self.get(id)?;

        if contract.status != ContractStatus::Active {
            return Err(MarketError::already_processed("contract", id, contract.status));
        }
        let now = self.clock.now();
        let overdue = match contract.breach_status(now) {
            BreachStatus::Breached { overdue } => overdue,
            BreachStatus::Pending { remaining } => {
                return Err(MarketError::invalid_state(
                    "contract",
                    id,
                    format!("ACTIVE with {}h remaining", remaining.num_hours()),
                    "enforce a breach on",
                ));
            }
            other => {
                return Err(MarketError::invalid_state(
                    "contract",
                    id,
                    format!("{:?}", other),
                    "enforce a breach on",
                ));
            }
        };

        let staked = contract.staked_amount();
        let (pool_credit, buyer_bond_refund) = staked.split(self.settlement.breach_pool_share)?;
        let fee_refund = contract.protection_fee;

        let postings = [
            Posting::credit(
                self.settlement.risk_pool_account.clone(),
                pool_credit,
                self.settlement.bond_currency,
                Basis::BreachPoolCredit,
            ),
            Posting::credit(
                contract.buyer.clone(),
                buyer_bond_refund,
                self.settlement.bond_currency,
                Basis::BreachBondRefund,
            ),
            Posting::credit(
                contract.buyer.clone(),
                fee_refund,
                self.settlement.escrow_currency,
                Basis::ProtectionFeeRefund,
            ),
        ];
        ledger::post_all(self.ledger.as_ref(), &postings, id.as_str()).await?;

        if staked.is_positive() {
            let audit = LedgerEntry {
                ts: now,
                amount: -staked,
                currency: self.settlement.bond_currency,
                basis: Basis::SlaBondSlash,
                reference: id.to_string(),
                settled: true,
            };
            if let Err(err) = self.ledger.record(&contract.agent, audit).await {
                ledger::reverse_all(self.ledger.as_ref(), &postings, id.as_str()).await;
                return Err(err.into());
            }
        }

        let hours_overdue = overdue.num_minutes() as f64 / 60.0;
        contract.status = ContractStatus::Breached;
        contract.enforcement_log.push(ContractAction::BreachEnforced {
            at: now,
            hours_overdue,
            pool_credit,
            buyer_bond_refund,
            fee_refund,
        });
        self.commit(&contract, &postings).await?;
        if contract.bond_staked {
            ledger::settle_stake(self.ledger.as_ref(), &contract.agent, Basis::SlaBondStake, id.as_str()).await;
        }

        info!(
            contract_id = %id,
            intent_id = %contract.intent_id,
            agent = %contract.agent,
            slashed = %staked,
            pool_credit = %pool_credit,
            buyer_refund = %buyer_bond_refund,
            fee_refund = %fee_refund,
            hours_overdue,
            "SLA breach enforced"
        );
        Ok(BreachReceipt {
            contract_id: contract.id,
            intent_id: contract.intent_id,
            bond_slashed: staked,
            pool_credit,
            buyer_bond_refund,
            fee_refund,
            buyer_refunded: buyer_bond_refund.checked_add(fee_refund)?,
        })
    }

    /// Return the bond, pay the early bonus when earned, and close the
    /// contract as COMPLETED
    ///
    /// Late delivery still returns the bond; it only forfeits the bonus.
    pub async fn process_delivery(
        &self,
        id: &ContractId,
        delivered_at: DateTime<Utc>,
    ) -> Result<DeliveryReceipt> {
        let _guard = self.contract_locks.lock(id).await;
        let mut contract = self.get(id)?;

        match contract.status {
            ContractStatus::Active => {}
            ContractStatus::Completed => {
                return Err(MarketError::already_processed("contract", id, contract.status));
            }
            ContractStatus::Breached => {
                return Err(MarketError::invalid_state("contract", id, contract.status, "deliver"));
            }
        }
        if delivered_at < contract.created_at {
            return Err(MarketError::validation(
                "delivered_at",
                format!("{} is before the contract was created", delivered_at),
            ));
        }

        let on_time = delivered_at <= contract.delivery_deadline;
        let elapsed_fraction = contract.elapsed_fraction(delivered_at);
        let earns_bonus =
            on_time && elapsed_fraction <= self.settlement.early_bonus_max_elapsed.as_fraction();

        let bond_returned = contract.staked_amount();
        let bonus_awarded = if earns_bonus {
            contract.early_bonus
        } else {
            Amount::ZERO
        };

        let currency = self.settlement.bond_currency;
        let postings = [
            Posting::credit(contract.agent.clone(), bond_returned, currency, Basis::SlaBondReturn),
            Posting::credit(contract.agent.clone(), bonus_awarded, currency, Basis::SlaEarlyBonus),
        ];
        ledger::post_all(self.ledger.as_ref(), &postings, id.as_str()).await?;

        contract.status = ContractStatus::Completed;
        contract.delivered_at = Some(delivered_at);
        contract.enforcement_log.push(ContractAction::DeliveryProcessed {
            at: self.clock.now(),
            on_time,
            elapsed_fraction,
            bond_returned,
            bonus: bonus_awarded,
        });
        self.commit(&contract, &postings).await?;
        if contract.bond_staked {
            ledger::settle_stake(self.ledger.as_ref(), &contract.agent, Basis::SlaBondStake, id.as_str()).await;
        }

        info!(
            contract_id = %id,
            agent = %contract.agent,
            on_time,
            elapsed_fraction,
            bond_returned = %bond_returned,
            bonus = %bonus_awarded,
            "SLA delivery processed"
        );
        Ok(DeliveryReceipt {
            contract_id: contract.id,
            on_time,
            elapsed_fraction,
            bond_returned,
            bonus_awarded,
        })
    }

    /// ACTIVE contracts whose deadline has passed
    pub fn overdue_contracts(&self) -> Result<Vec<ContractId>> {
        let now = self.clock.now();
        Ok(self
            .contracts
            .list()?
            .into_iter()
            .filter(|c| c.breach_status(now).is_breached())
            .map(|c| c.id)
            .collect())
    }

    pub fn agent_stats(&self, agent: &AccountId) -> Result<AgentStats> {
        let mut stats = AgentStats {
            agent: agent.clone(),
            ..AgentStats::default()
        };

        for contract in self.contracts.list()?.into_iter().filter(|c| &c.agent == agent) {
            stats.total_contracts += 1;
            *stats.by_tier.entry(contract.tier).or_insert(0) += 1;
            if contract.bond_staked {
                stats.bonds_staked = stats.bonds_staked.checked_add(contract.bond_amount)?;
            }

            for action in &contract.enforcement_log {
                match action {
                    ContractAction::DeliveryProcessed { on_time, bonus, .. } => {
                        if *on_time {
                            stats.on_time_deliveries += 1;
                        } else {
                            stats.late_deliveries += 1;
                        }
                        stats.bonuses_earned = stats.bonuses_earned.checked_add(*bonus)?;
                    }
                    ContractAction::BreachEnforced { .. } => {
                        stats.breaches += 1;
                        stats.bonds_slashed = stats.bonds_slashed.checked_add(contract.staked_amount())?;
                    }
                    ContractAction::BondStaked { .. } => {}
                }
            }
            if contract.status == ContractStatus::Active {
                stats.active += 1;
            }
        }

        let closed = stats.on_time_deliveries + stats.late_deliveries + stats.breaches;
        if closed > 0 {
            stats.on_time_rate = f64::from(stats.on_time_deliveries) / f64::from(closed);
            stats.breach_rate = f64::from(stats.breaches) / f64::from(closed);
        }
        debug!(agent = %agent, contracts = stats.total_contracts, "computed agent SLA stats");
        Ok(stats)
    }

    /// Persist the contract; reverse `postings` if that fails
    async fn commit(&self, contract: &SlaContract, postings: &[Posting]) -> Result<()> {
        if let Err(err) = self.contracts.put(contract.clone()) {
            ledger::reverse_all(self.ledger.as_ref(), postings, contract.id.as_str()).await;
            return Err(err.into());
        }
        Ok(())
    }
}
