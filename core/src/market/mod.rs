//! Marketplace facade
//!
//! Wires the auction engine, SLA manager, performance bonds, pricing engine,
//! clearing scheduler and notification outbox over one set of repositories,
//! and carries the effects that cross component boundaries: staking starts
//! the work, a breach or lost dispute marks the intent DISPUTED, and settling
//! a priced intent feeds its experiment.


use crate::auction::{
    AuctionEngine, BidRequest, ClearOutcome, Intent, IntentView, PublishReceipt, PublishRequest,
    SettleReceipt, SettlementOutcome,
};
use crate::bond::{BondQuote, DeliveryBonus, PerformanceBond, PerformanceBondManager, Severity, SlashReceipt};
use crate::clock::Clock;
use crate::config::MarketConfig;
use crate::error::{MarketError, Result};
use crate::ledger::Ledger;
use crate::money::Amount;
use crate::notify::{NotificationOutbox, Notifier};
use crate::pricing::{Arm, ArmChoice, ArmSpec, BestArm, Experiment, PricingEngine};
use crate::scheduler::{ClearingScheduler, ReconcileReport};
use crate::sla::{
    AccountLocks, AgentStats, BreachHandler, BreachReceipt, BreachStatus, BreachWatcher, ContractTerms,
    DeliveryReceipt, SlaContract, SlaManager, SlaRequirements, SlaTier, StakeReceipt,
};
use crate::store::Stores;
use crate::types::{AccountId, ArmId, BidId, ContractId, ExperimentId, IntentId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Marketplace {
    engine: Arc<AuctionEngine>,
    sla: Arc<SlaManager>,
    bonds: PerformanceBondManager,
    pricing: PricingEngine,
    scheduler: Arc<ClearingScheduler>,
    outbox: Arc<NotificationOutbox>,
    clock: Arc<dyn Clock>,
    breach_sweep: Duration,
    cancel: CancellationToken,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl Marketplace {
    pub fn new(
        config: &MarketConfig,
        stores: Stores,
        ledger: Arc<dyn Ledger>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        let pricing = PricingEngine::new(stores.experiments.clone(), clock.clone(), config.pricing.clone());
        Self::assemble(config, stores, ledger, notifier, clock, pricing)
    }

    /// Same as [`Marketplace::new`] with a seeded pricing engine
    pub fn with_pricing_seed(
        config: &MarketConfig,
        stores: Stores,
        ledger: Arc<dyn Ledger>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        seed: u64,
    ) -> Arc<Self> {
        let pricing =
            PricingEngine::with_seed(stores.experiments.clone(), clock.clone(), config.pricing.clone(), seed);
        Self::assemble(config, stores, ledger, notifier, clock, pricing)
    }

    fn assemble(
        config: &MarketConfig,
        stores: Stores,
        ledger: Arc<dyn Ledger>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        pricing: PricingEngine,
    ) -> Arc<Self> {
        let account_locks = Arc::new(AccountLocks::new());
        let outbox = Arc::new(NotificationOutbox::new(notifier, config.notifier.clone()));
        let sla = Arc::new(SlaManager::new(
            stores.contracts.clone(),
            ledger.clone(),
            clock.clone(),
            config.tiers.clone(),
            config.settlement.clone(),
            account_locks.clone(),
        ));
        let engine = Arc::new(AuctionEngine::new(
            stores.intents.clone(),
            stores.bids.clone(),
            ledger.clone(),
            outbox.clone(),
            clock.clone(),
            sla.clone(),
            config.auction.clone(),
            config.settlement.clone(),
        ));
        let bonds = PerformanceBondManager::new(
            stores.bonds.clone(),
            ledger,
            clock.clone(),
            config.performance_bond.clone(),
            config.settlement.clone(),
            account_locks,
        );
        let scheduler = Arc::new(ClearingScheduler::new(
            stores.clearing_jobs.clone(),
            stores.intents.clone(),
            engine.clone(),
            clock.clone(),
            config.auction.clearing_retry.clone(),
        ));

        Arc::new(Self {
            engine,
            sla,
            bonds,
            pricing,
            scheduler,
            outbox,
            clock,
            breach_sweep: Duration::from_secs(config.settlement.breach_sweep_secs),
            cancel: CancellationToken::new(),
            background: Mutex::new(Vec::new()),
        })
    }

    /// Start background work and re-arm clearing jobs left by a previous run
    pub async fn start(self: &Arc<Self>) -> Result<ReconcileReport> {
        let outbox = self.outbox.spawn(self.cancel.child_token());
        let handler: Arc<dyn BreachHandler> = self.clone();
        let watcher = Arc::new(BreachWatcher::new(self.sla.clone(), handler, self.breach_sweep))
            .spawn(self.cancel.child_token());
        self.background.lock().extend([outbox, watcher]);

        let report = self.scheduler.reconcile().await?;
        info!("marketplace started");
        Ok(report)
    }

    /// Stop timers and workers; queued notifications are flushed first
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        self.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = self.background.lock().drain(..).collect();
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "background task ended abnormally");
            }
        }
        info!("marketplace stopped");
    }

    pub fn engine(&self) -> &Arc<AuctionEngine> {
        &self.engine
    }

    pub fn sla(&self) -> &Arc<SlaManager> {
        &self.sla
    }

    pub fn outbox(&self) -> &Arc<NotificationOutbox> {
        &self.outbox
    }

    pub fn scheduler(&self) -> &Arc<ClearingScheduler> {
        &self.scheduler
    }

    // ========================================================================
    // Intents
    // ========================================================================

    /// Publish an intent and schedule its clearing at the deadline
    pub fn publish_intent(&self, request: PublishRequest) -> Result<PublishReceipt> {
        if let Some(binding) = &request.pricing_arm {
            let experiment = self.pricing.get(&binding.owner, &binding.experiment_id)?;
            if experiment.arm(&binding.arm_id).is_none() {
                return Err(MarketError::not_found("arm", &binding.arm_id));
            }
        }

        let receipt = self.engine.publish(request)?;
        self.scheduler
            .enqueue(receipt.intent_id.clone(), receipt.auction_ends_at);
        Ok(receipt)
    }

    pub async fn submit_bid(&self, intent_id: &IntentId, request: BidRequest) -> Result<BidId> {
        self.engine.submit_bid(intent_id, request).await
    }

    /// Clear now instead of waiting for the scheduled job
    pub async fn clear_intent(&self, intent_id: &IntentId) -> Result<ClearOutcome> {
        self.engine.clear(intent_id).await
    }

    /// Release escrow to the winner; a priced intent also records its revenue
    pub async fn settle_intent(&self, intent_id: &IntentId, outcome: SettlementOutcome) -> Result<SettleReceipt> {
        let explicit_revenue = outcome.revenue;
        let receipt = self.engine.settle(intent_id, outcome).await?;

        match self.engine.get(intent_id) {
            Ok(view) => self.record_pricing_outcome(&view.intent, explicit_revenue).await,
            Err(err) => warn!(intent_id = %intent_id, error = %err, "could not reload settled intent"),
        }
        Ok(receipt)
    }

    pub fn list_intents(&self, status_filter: Option<&str>) -> Result<Vec<Intent>> {
        self.engine.list(status_filter)
    }

    pub fn get_intent(&self, intent_id: &IntentId) -> Result<IntentView> {
        self.engine.get(intent_id)
    }

    async fn record_pricing_outcome(&self, intent: &Intent, explicit_revenue: Option<Amount>) {
        let Some(binding) = &intent.pricing_arm else {
            return;
        };
        let Some(revenue) = explicit_revenue.or_else(|| intent.job_value()) else {
            return;
        };
        if let Err(err) = self
            .pricing
            .record_outcome(&binding.owner, &binding.experiment_id, &binding.arm_id, revenue)
            .await
        {
            warn!(
                intent_id = %intent.id,
                experiment_id = %binding.experiment_id,
                arm_id = %binding.arm_id,
                error = %err,
                "could not record pricing outcome"
            );
        }
    }

    // ========================================================================
    // SLA contracts
    // ========================================================================

    pub fn sla_requirements(&self, job_value: Amount, tier: SlaTier) -> Result<SlaRequirements> {
        self.sla.requirements(job_value, tier)
    }

    pub async fn create_sla_contract(
        &self,
        intent_id: &IntentId,
        agent: &AccountId,
        tier: Option<SlaTier>,
    ) -> Result<ContractTerms> {
        let contract = self
            .engine
            .open_contract_checked(intent_id, agent, tier, |intent| {
                if self.bonds.has_active_bond(&intent.id)? {
                    return Err(MarketError::invalid_state(
                        "intent",
                        &intent.id,
                        "backed by a performance bond",
                        "open an SLA contract on",
                    ));
                }
                Ok(())
            })
            .await?;
        Ok(ContractTerms::from(&contract))
    }

    pub fn get_contract(&self, contract_id: &ContractId) -> Result<SlaContract> {
        self.sla.get(contract_id)
    }

    /// Stake the SLA bond; the intent moves to IN_PROGRESS
    pub async fn stake_bond(&self, contract_id: &ContractId) -> Result<StakeReceipt> {
        let receipt = self.sla.stake_bond(contract_id).await?;
        self.start_work(&receipt.intent_id).await;
        Ok(receipt)
    }

    /// Report delivery; `None` means now
    pub async fn report_delivery(
        &self,
        contract_id: &ContractId,
        delivered_at: Option<DateTime<Utc>>,
    ) -> Result<DeliveryReceipt> {
        let delivered_at = delivered_at.unwrap_or_else(|| self.clock.now());
        self.sla.process_delivery(contract_id, delivered_at).await
    }

    pub fn check_breach(&self, contract_id: &ContractId) -> Result<bool> {
        self.sla.check_breach(contract_id)
    }

    pub fn breach_status(&self, contract_id: &ContractId) -> Result<BreachStatus> {
        self.sla.breach_status(contract_id)
    }

    /// Enforce a breach; the intent becomes DISPUTED
    pub async fn enforce_breach(&self, contract_id: &ContractId) -> Result<BreachReceipt> {
        let receipt = self.sla.enforce_breach(contract_id).await?;
        let reason = format!("SLA contract {} breached", contract_id);
        self.dispute(&receipt.intent_id, &reason).await;
        Ok(receipt)
    }

    pub fn agent_stats(&self, agent: &AccountId) -> Result<AgentStats> {
        self.sla.agent_stats(agent)
    }

    // ========================================================================
    // Performance bonds
    // ========================================================================

    pub fn quote_performance_bond(&self, order_value: Amount) -> Result<BondQuote> {
        self.bonds.quote(order_value)
    }

    /// Stake a performance bond sized on `order_value`, or on the winning
    /// price when none is given
    pub async fn stake_performance_bond(
        &self,
        intent_id: &IntentId,
        agent: &AccountId,
        order_value: Option<Amount>,
    ) -> Result<PerformanceBond> {
        self.engine
            .with_intent(intent_id, |intent| async move {
                if self.sla.active_contract_for(&intent.id)?.is_some() {
                    return Err(MarketError::invalid_state(
                        "intent",
                        &intent.id,
                        "bound to an SLA contract",
                        "stake a performance bond on",
                    ));
                }
                let order_value = order_value.or_else(|| intent.job_value()).unwrap_or(intent.escrow_usd);
                let bond = self.bonds.stake(&intent, agent, order_value).await?;
                if let Err(err) = self.engine.begin_work(intent) {
                    warn!(intent_id = %bond.intent_id, error = %err, "bond staked but intent not moved to IN_PROGRESS");
                }
                Ok(bond)
            })
            .await
    }

    pub fn get_performance_bond(&self, intent_id: &IntentId) -> Result<PerformanceBond> {
        self.bonds.get(intent_id)
    }

    pub async fn release_performance_bond(&self, intent_id: &IntentId) -> Result<PerformanceBond> {
        self.bonds.release(intent_id).await
    }

    pub fn delivery_bonus(
        &self,
        accepted_at: DateTime<Utc>,
        delivered_at: DateTime<Utc>,
        sla_hours: f64,
    ) -> Result<DeliveryBonus> {
        self.bonds.delivery_bonus(accepted_at, delivered_at, sla_hours)
    }

    pub async fn award_delivery_bonus(
        &self,
        intent_id: &IntentId,
        accepted_at: DateTime<Utc>,
        delivered_at: DateTime<Utc>,
        sla_hours: f64,
    ) -> Result<DeliveryBonus> {
        self.bonds
            .award_bonus(intent_id, accepted_at, delivered_at, sla_hours)
            .await
    }

    /// Slash after a lost dispute; the intent becomes DISPUTED
    pub async fn slash_performance_bond(&self, intent_id: &IntentId, severity: Severity) -> Result<SlashReceipt> {
        let receipt = self.bonds.slash(intent_id, severity).await?;
        let reason = format!("{} dispute on performance bond", severity);
        self.dispute(intent_id, &reason).await;
        Ok(receipt)
    }

    // ========================================================================
    // Pricing experiments
    // ========================================================================

    pub fn start_pricing_experiment(
        &self,
        owner: &AccountId,
        arms: Vec<ArmSpec>,
        epsilon: Option<f64>,
    ) -> Result<ExperimentId> {
        self.pricing.start_experiment(owner, arms, epsilon)
    }

    pub async fn next_arm(&self, owner: &AccountId, experiment_id: &ExperimentId) -> Result<ArmChoice> {
        self.pricing.next_arm(owner, experiment_id).await
    }

    pub async fn record_outcome(
        &self,
        owner: &AccountId,
        experiment_id: &ExperimentId,
        arm_id: &ArmId,
        revenue: Amount,
    ) -> Result<Arm> {
        self.pricing
            .record_outcome(owner, experiment_id, arm_id, revenue)
            .await
    }

    pub fn best_arm(&self, owner: &AccountId, experiment_id: &ExperimentId) -> Result<BestArm> {
        self.pricing.best_arm(owner, experiment_id)
    }

    pub fn list_experiments(&self, owner: &AccountId) -> Result<Vec<Experiment>> {
        self.pricing.list_experiments(owner)
    }

    // Funds have already moved when these run, so a failure here is logged
    // and the intent is left where it was.

    async fn start_work(&self, intent_id: &IntentId) {
        if let Err(err) = self.engine.start_work(intent_id).await {
            warn!(intent_id = %intent_id, error = %err, "bond staked but intent not moved to IN_PROGRESS");
        }
    }

    async fn dispute(&self, intent_id: &IntentId, reason: &str) {
        if let Err(err) = self.engine.mark_disputed(intent_id, reason).await {
            warn!(intent_id = %intent_id, error = %err, "could not mark intent DISPUTED");
        }
    }
}

#[async_trait::async_trait]
impl BreachHandler for Marketplace {
    async fn handle_breach(&self, id: &ContractId) -> Result<BreachReceipt> {
        self.enforce_breach(id).await
    }
}
