//! Auction Engine
//!
//! Owns the intent lifecycle: publish, bid intake, clearing, and settlement.
//!
//! Every read-modify-write on an intent runs under that intent's lock, so a
//! clearing job, a bid, and a settlement call on the same intent are applied
//! one at a time and each sees the status the previous one left. Ledger calls
//! happen before the intent is committed; notifications are queued after.

pub mod model;
pub mod scorer;

#[cfg(test)]
mod tests;

pub use model::{
    ArmBinding, Bid, BidBook, BidRequest, ClearOutcome, Intent, IntentStatus, IntentView, PublishReceipt,
    PublishRequest, SettleReceipt, Settlement, SettlementOutcome,
};
pub use scorer::{ScoreWeights, ScoredBid};

use crate::clock::Clock;
use crate::config::{AuctionConfig, SettlementConfig};
use crate::error::{MarketError, OptionExt, Result};
use crate::ledger::{self, Basis, Ledger, Posting};
use crate::locks::KeyedLocks;
use crate::notify::{Notification, NotificationOutbox};
use crate::sla::{SlaContract, SlaManager, SlaTier};
use crate::store::Repo;
use crate::types::{AccountId, BidId, IntentEvent, IntentId};
use chrono::Duration;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

pub struct AuctionEngine {
    intents: Repo<Intent>,
    bids: Repo<BidBook>,
    ledger: Arc<dyn Ledger>,
    outbox: Arc<NotificationOutbox>,
    clock: Arc<dyn Clock>,
    sla: Arc<SlaManager>,
    auction: AuctionConfig,
    settlement: SettlementConfig,
    locks: KeyedLocks<IntentId>,
}

impl AuctionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        intents: Repo<Intent>,
        bids: Repo<BidBook>,
        ledger: Arc<dyn Ledger>,
        outbox: Arc<NotificationOutbox>,
        clock: Arc<dyn Clock>,
        sla: Arc<SlaManager>,
        auction: AuctionConfig,
        settlement: SettlementConfig,
    ) -> Self {
        Self {
            intents,
            bids,
            ledger,
            outbox,
            clock,
            sla,
            auction,
            settlement,
            locks: KeyedLocks::new(),
        }
    }

    pub fn publish(&self, request: PublishRequest) -> Result<PublishReceipt> {
        if request.requester.as_str().trim().is_empty() {
            return Err(MarketError::validation("requester", "must not be empty"));
        }
        if request.escrow.is_negative() {
            return Err(MarketError::validation("escrow", "must be non-negative"));
        }
        let duration_secs = match request.duration_secs {
            Some(0) => return Err(MarketError::validation("duration_secs", "must be positive")),
            Some(secs) => secs,
            None => self.auction.default_duration_secs,
        };
        let duration = i64::try_from(duration_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .ok_or_else(|| MarketError::validation("duration_secs", "out of range"))?;

        let now = self.clock.now();
        let auction_ends_at = now + duration;
        let intent = Intent {
            id: IntentId::generate(),
            requester: request.requester.clone(),
            spec: request.spec,
            status: IntentStatus::Auction,
            auction_ends_at,
            events: vec![IntentEvent::Published {
                at: now,
                requester: request.requester,
                escrow: request.escrow,
                auction_ends_at,
            }],
            claimed_by: None,
            winning_bid: None,
            settlement: None,
            escrow_usd: request.escrow,
            created_at: now,
            sla_tier: request.sla_tier,
            pricing_arm: request.pricing_arm,
            contract_id: None,
            next_bid_sequence: 0,
        };
        self.intents.put(intent.clone())?;

        info!(
            intent_id = %intent.id,
            requester = %intent.requester,
            escrow = %intent.escrow_usd,
            ends_at = %auction_ends_at,
            "intent published"
        );
        Ok(PublishReceipt {
            intent_id: intent.id,
            auction_ends_at,
        })
    }

    pub async fn submit_bid(&self, intent_id: &IntentId, request: BidRequest) -> Result<BidId> {
        if request.bidder.as_str().trim().is_empty() {
            return Err(MarketError::validation("bidder", "must not be empty"));
        }
        if !request.price.is_positive() {
            return Err(MarketError::validation("price", "must be positive"));
        }
        if !(request.delivery_hours.is_finite() && request.delivery_hours > 0.0) {
            return Err(MarketError::validation("delivery_hours", "must be positive"));
        }

        let _guard = self.locks.lock(intent_id).await;
        let mut intent = self.load(intent_id)?;
        let now = self.clock.now();

        if intent.status != IntentStatus::Auction {
            return Err(MarketError::invalid_state("intent", intent_id, intent.status, "bid on"));
        }
        if !intent.bidding_open(now) {
            return Err(MarketError::invalid_state(
                "intent",
                intent_id,
                format!("{} (window closed at {})", intent.status, intent.auction_ends_at),
                "bid on",
            ));
        }

        let bid = Bid {
            id: BidId::generate(),
            intent_id: intent_id.clone(),
            bidder: request.bidder,
            price: request.price,
            delivery_hours: request.delivery_hours,
            message: request.message,
            submitted_at: now,
            sequence: intent.next_bid_sequence,
        };
        intent.next_bid_sequence += 1;
        intent.events.push(IntentEvent::BidReceived {
            at: now,
            bid_id: bid.id.clone(),
            bidder: bid.bidder.clone(),
            price: bid.price,
        });

        let mut book = self
            .bids
            .get(intent_id)?
            .unwrap_or_else(|| BidBook::new(intent_id.clone()));
        book.bids.push(bid.clone());
        self.bids.put(book)?;
        self.intents.put(intent)?;

        debug!(
            intent_id = %intent_id,
            bid_id = %bid.id,
            bidder = %bid.bidder,
            price = %bid.price,
            hours = bid.delivery_hours,
            "bid received"
        );
        Ok(bid.id)
    }

    /// Close the auction: award the best bid, or expire when there are none
    ///
    /// Safe to call any number of times, concurrently or after the intent has
    /// moved on; only the first call that finds AUCTION changes anything.
    pub async fn clear(&self, intent_id: &IntentId) -> Result<ClearOutcome> {
        let _guard = self.locks.lock(intent_id).await;
        let mut intent = self.load(intent_id)?;

        if intent.status != IntentStatus::Auction {
            debug!(intent_id = %intent_id, status = %intent.status, "clear skipped, already cleared");
            return Ok(ClearOutcome::AlreadyCleared {
                status: intent.status,
            });
        }

        let bids = self.bids_for(intent_id)?;
        let now = self.clock.now();
        let weights = ScoreWeights::from(&self.auction);

        let Some(best) = scorer::winner(&bids, weights) else {
            intent.advance(IntentStatus::Expired, IntentEvent::Expired { at: now })?;
            self.intents.put(intent.clone())?;

            info!(intent_id = %intent_id, "auction expired with no bids");
            self.outbox.enqueue(
                Notification::new(
                    intent.requester.clone(),
                    "Intent expired",
                    format!("No bids arrived for intent {}", intent_id),
                )
                .with_meta("intent_id", intent_id.as_str()),
            );
            return Ok(ClearOutcome::Expired);
        };

        let winning = best.bid.clone();
        let score = best.score;
        intent.advance(
            IntentStatus::Awarded,
            IntentEvent::Awarded {
                at: now,
                bid_id: winning.id.clone(),
                winner: winning.bidder.clone(),
                price: winning.price,
                score,
            },
        )?;
        intent.claimed_by = Some(winning.bidder.clone());
        intent.winning_bid = Some(winning.clone());

        let contract = match self.auto_contract_tier(&intent) {
            Some(tier) => Some(self.attach_contract(&mut intent, &winning.bidder, tier, true)?),
            None => None,
        };
        self.intents.put(intent.clone())?;

        info!(
            intent_id = %intent_id,
            winner = %winning.bidder,
            price = %winning.price,
            score,
            bids = bids.len(),
            "auction awarded"
        );
        self.notify_award(&intent, &winning, contract.as_ref());

        Ok(ClearOutcome::Awarded {
            bid: winning,
            score,
            contract,
        })
    }

    /// Open an SLA contract for the winner of an awarded intent
    pub async fn open_contract(
        &self,
        intent_id: &IntentId,
        agent: &AccountId,
        tier: Option<SlaTier>,
    ) -> Result<SlaContract> {
        self.open_contract_checked(intent_id, agent, tier, |_| Ok(())).await
    }

    /// Like [`AuctionEngine::open_contract`], but `precheck` runs first on the
    /// intent while its lock is held and can refuse the contract
    pub async fn open_contract_checked<F>(
        &self,
        intent_id: &IntentId,
        agent: &AccountId,
        tier: Option<SlaTier>,
        precheck: F,
    ) -> Result<SlaContract>
    where
        F: FnOnce(&Intent) -> Result<()>,
    {
        let _guard = self.locks.lock(intent_id).await;
        let mut intent = self.load(intent_id)?;
        precheck(&intent)?;
        let tier = tier.or(intent.sla_tier).unwrap_or(self.settlement.default_tier);

        let contract = self.attach_contract(&mut intent, agent, tier, false)?;
        self.intents.put(intent)?;
        Ok(contract)
    }

    /// AWARDED → IN_PROGRESS once the winner acknowledges the work
    pub async fn start_work(&self, intent_id: &IntentId) -> Result<Intent> {
        let _guard = self.locks.lock(intent_id).await;
        let intent = self.load(intent_id)?;
        self.begin_work(intent)
    }

    /// Run `f` on the current intent with its lock held
    ///
    /// Other calls on the same intent wait until `f` completes. Inside `f`,
    /// use [`AuctionEngine::begin_work`] rather than the locking methods.
    pub async fn with_intent<T, F, Fut>(&self, intent_id: &IntentId, f: F) -> Result<T>
    where
        F: FnOnce(Intent) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _guard = self.locks.lock(intent_id).await;
        let intent = self.load(intent_id)?;
        f(intent).await
    }

    /// AWARDED → IN_PROGRESS on an intent the caller already holds the lock for
    pub(crate) fn begin_work(&self, mut intent: Intent) -> Result<Intent> {
        let intent_id = intent.id.clone();
        if intent.status == IntentStatus::InProgress {
            return Ok(intent);
        }
        let agent = intent
            .claimed_by
            .clone()
            .ok_or_else(|| MarketError::invalid_state("intent", &intent_id, intent.status, "start work on"))?;
        intent.advance(
            IntentStatus::InProgress,
            IntentEvent::WorkStarted {
                at: self.clock.now(),
                agent,
            },
        )?;
        self.intents.put(intent.clone())?;

        info!(intent_id = %intent_id, "work started");
        Ok(intent)
    }

    /// Release escrow to the winner and close the intent as SETTLED
    pub async fn settle(&self, intent_id: &IntentId, outcome: SettlementOutcome) -> Result<SettleReceipt> {
        if outcome.revenue.is_some_and(|r| r.is_negative()) {
            return Err(MarketError::validation("revenue", "must be non-negative"));
        }

        let _guard = self.locks.lock(intent_id).await;
        let mut intent = self.load(intent_id)?;

        if !matches!(intent.status, IntentStatus::Awarded | IntentStatus::InProgress) {
            return Err(MarketError::invalid_state("intent", intent_id, intent.status, "settle"));
        }
        let winner = intent
            .claimed_by
            .clone()
            .ok_or_else(|| MarketError::invalid_state("intent", intent_id, intent.status, "settle"))?;

        let escrow = intent.escrow_usd;
        let postings = [Posting::credit(
            winner.clone(),
            escrow,
            self.settlement.escrow_currency,
            Basis::IntentSettlement,
        )];
        ledger::post_all(self.ledger.as_ref(), &postings, intent_id.as_str()).await?;

        let now = self.clock.now();
        intent.advance(
            IntentStatus::Settled,
            IntentEvent::Settled {
                at: now,
                escrow_released: escrow,
            },
        )?;
        intent.settlement = Some(Settlement {
            outcome,
            escrow_released: escrow,
            settled_at: now,
        });
        if let Err(err) = self.intents.put(intent.clone()) {
            ledger::reverse_all(self.ledger.as_ref(), &postings, intent_id.as_str()).await;
            return Err(err.into());
        }

        info!(intent_id = %intent_id, winner = %winner, escrow = %escrow, "intent settled");
        self.outbox.enqueue(
            Notification::new(
                winner.clone(),
                "Escrow released",
                format!("{} released for intent {}", escrow, intent_id),
            )
            .with_meta("intent_id", intent_id.as_str()),
        );

        Ok(SettleReceipt {
            intent_id: intent.id,
            winner,
            escrow_released: escrow,
        })
    }

    /// Move an intent to DISPUTED; only the breach and bond-dispute paths call this
    pub(crate) async fn mark_disputed(&self, intent_id: &IntentId, reason: &str) -> Result<Intent> {
        let _guard = self.locks.lock(intent_id).await;
        let mut intent = self.load(intent_id)?;

        if intent.status == IntentStatus::Disputed {
            return Ok(intent);
        }
        intent.advance(
            IntentStatus::Disputed,
            IntentEvent::Disputed {
                at: self.clock.now(),
                reason: reason.to_string(),
            },
        )?;
        self.intents.put(intent.clone())?;

        info!(intent_id = %intent_id, reason, "intent disputed");
        Ok(intent)
    }

    pub fn get(&self, intent_id: &IntentId) -> Result<IntentView> {
        let intent = self.load(intent_id)?;
        let bids = self.bids_for(intent_id)?;
        Ok(IntentView { intent, bids })
    }

    /// Intents newest first, optionally filtered by a status name
    pub fn list(&self, status_filter: Option<&str>) -> Result<Vec<Intent>> {
        let status = status_filter
            .filter(|s| !s.trim().is_empty())
            .map(str::parse::<IntentStatus>)
            .transpose()?;

        let mut intents: Vec<Intent> = self
            .intents
            .list()?
            .into_iter()
            .filter(|intent| status.map_or(true, |s| intent.status == s))
            .collect();
        intents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(intents)
    }

    fn load(&self, intent_id: &IntentId) -> Result<Intent> {
        self.intents.get(intent_id)?.ok_or_not_found("intent", intent_id)
    }

    fn bids_for(&self, intent_id: &IntentId) -> Result<Vec<Bid>> {
        Ok(self.bids.get(intent_id)?.map(|book| book.bids).unwrap_or_default())
    }

    fn auto_contract_tier(&self, intent: &Intent) -> Option<SlaTier> {
        match intent.sla_tier {
            Some(tier) => Some(tier),
            None if self.settlement.auto_contract => Some(self.settlement.default_tier),
            None => None,
        }
    }

    /// Create (or, on a retried clear, adopt) the contract and link it
    fn attach_contract(
        &self,
        intent: &mut Intent,
        agent: &AccountId,
        tier: SlaTier,
        adopt_existing: bool,
    ) -> Result<SlaContract> {
        let existing = if adopt_existing {
            self.sla.active_contract_for(&intent.id)?
        } else {
            None
        };
        let contract = match existing {
            Some(contract) => contract,
            None => self.sla.create_contract(intent, agent, tier)?,
        };

        intent.contract_id = Some(contract.id.clone());
        intent.events.push(IntentEvent::ContractOpened {
            at: self.clock.now(),
            contract_id: contract.id.clone(),
            tier: contract.tier,
        });
        Ok(contract)
    }

    fn notify_award(&self, intent: &Intent, winning: &Bid, contract: Option<&SlaContract>) {
        let mut to_requester = Notification::new(
            intent.requester.clone(),
            "Intent awarded",
            format!(
                "{} won intent {} at {} with {}h delivery",
                winning.bidder, intent.id, winning.price, winning.delivery_hours
            ),
        )
        .with_meta("intent_id", intent.id.as_str())
        .with_meta("bid_id", winning.id.as_str());

        let mut to_winner = Notification::new(
            winning.bidder.clone(),
            "You won an intent",
            format!("Your bid of {} on intent {} was accepted", winning.price, intent.id),
        )
        .with_meta("intent_id", intent.id.as_str());

        if let Some(contract) = contract {
            to_requester = to_requester.with_meta("contract_id", contract.id.as_str());
            to_winner = to_winner
                .with_meta("contract_id", contract.id.as_str())
                .with_meta("bond_required", contract.bond_amount.as_major_f64())
                .with_meta("deadline", contract.delivery_deadline.to_rfc3339());
        }

        self.outbox.enqueue(to_requester);
        self.outbox.enqueue(to_winner);
    }
}
