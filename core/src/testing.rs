//! Shared fixtures and fault-injecting adapters for unit tests

use crate::auction::{AuctionEngine, Bid, BidRequest, ClearOutcome, Intent, IntentStatus, PublishRequest};
use crate::clock::{Clock, ManualClock};
use crate::config::MarketConfig;
use crate::ledger::{Basis, InMemoryLedger, Ledger, LedgerEntry, LedgerError};
use crate::money::{Amount, Currency};
use crate::notify::{NotificationOutbox, TracingNotifier};
use crate::sla::{AccountLocks, SlaContract, SlaManager, SlaTier};
use crate::store::{MemoryRepository, Record, Repository, StoreError, Stores};
use crate::types::{AccountId, BidId, IntentEvent, IntentId};
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub(crate) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

pub(crate) fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(t0()))
}

pub(crate) fn acct(name: &str) -> AccountId {
    AccountId::new(name)
}

/// An intent already awarded to `winner` at `price`
pub(crate) fn awarded_intent(requester: &str, winner: &str, price: Amount, now: DateTime<Utc>) -> Intent {
    let id = IntentId::generate();
    let bid = Bid {
        id: BidId::generate(),
        intent_id: id.clone(),
        bidder: acct(winner),
        price,
        delivery_hours: 48.0,
        message: None,
        submitted_at: now,
        sequence: 0,
    };
    Intent {
        id,
        requester: acct(requester),
        spec: serde_json::json!({ "task": "translate the onboarding guide" }),
        status: IntentStatus::Awarded,
        auction_ends_at: now,
        events: vec![IntentEvent::Awarded {
            at: now,
            bid_id: bid.id.clone(),
            winner: bid.bidder.clone(),
            price,
            score: 0.0,
        }],
        claimed_by: Some(acct(winner)),
        winning_bid: Some(bid),
        settlement: None,
        escrow_usd: price,
        created_at: now,
        sla_tier: None,
        pricing_arm: None,
        contract_id: None,
        next_bid_sequence: 1,
    }
}

/// In-memory ledger that refuses chosen legs
pub(crate) struct FlakyLedger {
    inner: InMemoryLedger,
    refused: Mutex<Vec<Basis>>,
    refuse_audit: AtomicBool,
    slow_reads: AtomicBool,
}

impl FlakyLedger {
    pub(crate) fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            inner: InMemoryLedger::new(clock),
            refused: Mutex::new(Vec::new()),
            refuse_audit: AtomicBool::new(false),
            slow_reads: AtomicBool::new(false),
        }
    }

    /// Balance reads yield to the scheduler first, like a remote ledger would
    pub(crate) fn slow_reads(&self, on: bool) {
        self.slow_reads.store(on, Ordering::SeqCst);
    }

    pub(crate) fn refuse(&self, basis: Basis) {
        self.refused.lock().push(basis);
    }

    pub(crate) fn refuse_audit(&self, on: bool) {
        self.refuse_audit.store(on, Ordering::SeqCst);
    }

    pub(crate) fn heal(&self) {
        self.refused.lock().clear();
        self.refuse_audit(false);
    }

    pub(crate) fn inner(&self) -> &InMemoryLedger {
        &self.inner
    }

    fn check(&self, basis: Basis) -> Result<(), LedgerError> {
        if self.refused.lock().contains(&basis) {
            return Err(LedgerError::Unavailable(format!("{} leg refused", basis)));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Ledger for FlakyLedger {
    async fn credit(
        &self,
        account: &AccountId,
        amount: Amount,
        currency: Currency,
        basis: Basis,
        reference: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        self.check(basis)?;
        self.inner.credit(account, amount, currency, basis, reference).await
    }

    async fn debit(
        &self,
        account: &AccountId,
        amount: Amount,
        currency: Currency,
        basis: Basis,
        reference: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        self.check(basis)?;
        self.inner.debit(account, amount, currency, basis, reference).await
    }

    async fn balance(&self, account: &AccountId, currency: Currency) -> Result<Amount, LedgerError> {
        if self.slow_reads.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        self.inner.balance(account, currency).await
    }

    async fn record(&self, account: &AccountId, entry: LedgerEntry) -> Result<(), LedgerError> {
        if self.refuse_audit.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("audit refused".to_string()));
        }
        self.inner.record(account, entry).await
    }

    async fn mark_settled(&self, account: &AccountId, basis: Basis, reference: &str) -> Result<bool, LedgerError> {
        self.inner.mark_settled(account, basis, reference).await
    }
}

/// Memory repository whose writes can be switched off
pub(crate) struct FailingRepository<T: Record> {
    inner: MemoryRepository<T>,
    fail_puts: AtomicBool,
}

impl<T: Record> FailingRepository<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: MemoryRepository::new(),
            fail_puts: AtomicBool::new(false),
        }
    }

    pub(crate) fn fail_puts(&self, on: bool) {
        self.fail_puts.store(on, Ordering::SeqCst);
    }
}

impl<T: Record> Repository<T> for FailingRepository<T> {
    fn get(&self, key: &T::Key) -> Result<Option<T>, StoreError> {
        self.inner.get(key)
    }

    fn put(&self, record: T) -> Result<(), StoreError> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("{} write refused", T::KIND)));
        }
        self.inner.put(record)
    }

    fn list(&self) -> Result<Vec<T>, StoreError> {
        self.inner.list()
    }
}

/// Engine and SLA manager over in-memory stores, a flaky ledger and a
/// manual clock
pub(crate) struct Harness {
    pub clock: Arc<ManualClock>,
    pub ledger: Arc<FlakyLedger>,
    pub stores: Stores,
    pub outbox: Arc<NotificationOutbox>,
    pub sla: Arc<SlaManager>,
    pub engine: Arc<AuctionEngine>,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self::with(MarketConfig::default(), Stores::in_memory())
    }

    pub(crate) fn with(config: MarketConfig, stores: Stores) -> Self {
        let clock = manual_clock();
        let ledger = Arc::new(FlakyLedger::new(clock.clone()));
        let outbox = Arc::new(NotificationOutbox::new(
            Arc::new(TracingNotifier),
            config.notifier.clone(),
        ));
        let sla = Arc::new(SlaManager::new(
            stores.contracts.clone(),
            ledger.clone(),
            clock.clone(),
            config.tiers.clone(),
            config.settlement.clone(),
            Arc::new(AccountLocks::new()),
        ));
        let engine = Arc::new(AuctionEngine::new(
            stores.intents.clone(),
            stores.bids.clone(),
            ledger.clone(),
            outbox.clone(),
            clock.clone(),
            sla.clone(),
            config.auction,
            config.settlement,
        ));
        Self {
            clock,
            ledger,
            stores,
            outbox,
            sla,
            engine,
        }
    }

    pub(crate) fn deposit(&self, account: &str, major: i64, currency: Currency) {
        self.ledger
            .inner()
            .deposit(&acct(account), Amount::from_major(major), currency);
    }

    pub(crate) async fn balance(&self, account: &str, currency: Currency) -> Amount {
        self.ledger.balance(&acct(account), currency).await.unwrap()
    }

    pub(crate) fn publish(&self, escrow_major: i64, tier: Option<SlaTier>) -> IntentId {
        self.engine
            .publish(PublishRequest {
                requester: acct("buyer-1"),
                spec: serde_json::json!({ "task": "label 2k product photos" }),
                escrow: Amount::from_major(escrow_major),
                duration_secs: Some(90),
                sla_tier: tier,
                pricing_arm: None,
            })
            .unwrap()
            .intent_id
    }

    pub(crate) async fn bid(&self, intent_id: &IntentId, bidder: &str, price_major: i64, hours: f64) -> BidId {
        self.engine
            .submit_bid(
                intent_id,
                BidRequest {
                    bidder: acct(bidder),
                    price: Amount::from_major(price_major),
                    delivery_hours: hours,
                    message: None,
                },
            )
            .await
            .unwrap()
    }

    /// Publish, take one bid from `agent-7` at `price_major`, and clear
    pub(crate) async fn award(&self, price_major: i64, tier: Option<SlaTier>) -> (IntentId, Option<SlaContract>) {
        let intent_id = self.publish(price_major, tier);
        self.bid(&intent_id, "agent-7", price_major, 24.0).await;
        self.clock.advance(Duration::seconds(91));
        match self.engine.clear(&intent_id).await.unwrap() {
            ClearOutcome::Awarded { contract, .. } => (intent_id, contract),
            other => panic!("expected an award, got {:?}", other),
        }
    }

    /// An awarded intent with an ACTIVE contract under `tier`
    pub(crate) async fn contract(&self, job_value_major: i64, tier: SlaTier) -> SlaContract {
        let (_, contract) = self.award(job_value_major, Some(tier)).await;
        contract.unwrap()
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
