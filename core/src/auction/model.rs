use crate::error::MarketError;
use crate::money::Amount;
use crate::sla::{SlaContract, SlaTier};
use crate::store::Record;
use crate::types::{AccountId, ArmId, BidId, ContractId, ExperimentId, IntentEvent, IntentId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentStatus {
    Auction,
    Awarded,
    Expired,
    InProgress,
    Settled,
    Disputed,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auction => "AUCTION",
            Self::Awarded => "AWARDED",
            Self::Expired => "EXPIRED",
            Self::InProgress => "IN_PROGRESS",
            Self::Settled => "SETTLED",
            Self::Disputed => "DISPUTED",
        }
    }

    /// Whether `self → next` is an edge of the intent state machine
    pub fn can_become(self, next: IntentStatus) -> bool {
        use IntentStatus::*;
        matches!(
            (self, next),
            (Auction, Awarded)
                | (Auction, Expired)
                | (Awarded, InProgress)
                | (Awarded, Settled)
                | (InProgress, Settled)
                | (Awarded, Disputed)
                | (InProgress, Disputed)
                | (Settled, Disputed)
        )
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentStatus {
    type Err = MarketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "AUCTION" => Ok(Self::Auction),
            "AWARDED" => Ok(Self::Awarded),
            "EXPIRED" => Ok(Self::Expired),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "SETTLED" => Ok(Self::Settled),
            "DISPUTED" => Ok(Self::Disputed),
            other => Err(MarketError::validation("status", format!("unknown intent status '{}'", other))),
        }
    }
}

/// Ties an intent to the pricing-experiment arm that priced it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmBinding {
    pub owner: AccountId,
    pub experiment_id: ExperimentId,
    pub arm_id: ArmId,
}

/// What the requester reports when settling
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettlementOutcome {
    /// Revenue attributed to the bound pricing arm; winning price when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revenue: Option<Amount>,
    #[serde(default)]
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub outcome: SettlementOutcome,
    pub escrow_released: Amount,
    pub settled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Intent {
    pub id: IntentId,
    #[serde(rename = "from")]
    pub requester: AccountId,
    pub spec: serde_json::Value,
    pub status: IntentStatus,
    pub auction_ends_at: DateTime<Utc>,
    pub events: Vec<IntentEvent>,
    pub claimed_by: Option<AccountId>,
    pub winning_bid: Option<Bid>,
    pub settlement: Option<Settlement>,
    pub escrow_usd: Amount,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla_tier: Option<SlaTier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing_arm: Option<ArmBinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_id: Option<ContractId>,
    #[serde(default)]
    pub next_bid_sequence: u64,
}

impl Intent {
    /// Move along a state-machine edge and log the event
    pub(crate) fn advance(&mut self, next: IntentStatus, event: IntentEvent) -> Result<(), MarketError> {
        if !self.status.can_become(next) {
            return Err(MarketError::invalid_state(
                "intent",
                &self.id,
                self.status,
                transition_action(next),
            ));
        }
        self.status = next;
        self.events.push(event);
        Ok(())
    }

    pub fn bidding_open(&self, now: DateTime<Utc>) -> bool {
        self.status == IntentStatus::Auction && now < self.auction_ends_at
    }

    /// Winning price; the job value contracts and bonds are sized on
    pub fn job_value(&self) -> Option<Amount> {
        self.winning_bid.as_ref().map(|bid| bid.price)
    }
}

fn transition_action(next: IntentStatus) -> &'static str {
    match next {
        IntentStatus::Auction => "reopen",
        IntentStatus::Awarded => "award",
        IntentStatus::Expired => "expire",
        IntentStatus::InProgress => "start work on",
        IntentStatus::Settled => "settle",
        IntentStatus::Disputed => "dispute",
    }
}

impl Record for Intent {
    type Key = IntentId;
    const KIND: &'static str = "intent";
    const COLLECTION: &'static str = "intents";

    fn key(&self) -> &IntentId {
        &self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bid {
    pub id: BidId,
    pub intent_id: IntentId,
    pub bidder: AccountId,
    pub price: Amount,
    pub delivery_hours: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub submitted_at: DateTime<Utc>,
    /// Arrival order within the intent
    pub sequence: u64,
}

/// Every bid on one intent, in arrival order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BidBook {
    pub intent_id: IntentId,
    pub bids: Vec<Bid>,
}

impl BidBook {
    pub fn new(intent_id: IntentId) -> Self {
        Self {
            intent_id,
            bids: Vec::new(),
        }
    }
}

impl Record for BidBook {
    type Key = IntentId;
    const KIND: &'static str = "bid book";
    const COLLECTION: &'static str = "bids";

    fn key(&self) -> &IntentId {
        &self.intent_id
    }
}

// ============================================================================
// Requests and receipts
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishRequest {
    pub requester: AccountId,
    pub spec: serde_json::Value,
    pub escrow: Amount,
    /// Bidding window; configured default when absent
    #[serde(default)]
    pub duration_secs: Option<u64>,
    #[serde(default)]
    pub sla_tier: Option<SlaTier>,
    #[serde(default)]
    pub pricing_arm: Option<ArmBinding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReceipt {
    pub intent_id: IntentId,
    pub auction_ends_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BidRequest {
    pub bidder: AccountId,
    pub price: Amount,
    pub delivery_hours: f64,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClearOutcome {
    Awarded {
        bid: Bid,
        score: f64,
        contract: Option<SlaContract>,
    },
    Expired,
    /// Someone else already moved the intent out of AUCTION
    AlreadyCleared { status: IntentStatus },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleReceipt {
    pub intent_id: IntentId,
    pub winner: AccountId,
    pub escrow_released: Amount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentView {
    pub intent: Intent,
    pub bids: Vec<Bid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parsing_is_case_insensitive() {
        assert_eq!("auction".parse::<IntentStatus>().unwrap(), IntentStatus::Auction);
        assert_eq!("In_Progress".parse::<IntentStatus>().unwrap(), IntentStatus::InProgress);
        assert_eq!("in-progress".parse::<IntentStatus>().unwrap(), IntentStatus::InProgress);
        assert!("open".parse::<IntentStatus>().is_err());
    }

    #[test]
    fn test_state_machine_edges() {
        use IntentStatus::*;
        assert!(Auction.can_become(Awarded));
        assert!(Auction.can_become(Expired));
        assert!(!Expired.can_become(Awarded));
        assert!(!Awarded.can_become(Expired));
        assert!(!Settled.can_become(Settled));
        assert!(InProgress.can_become(Disputed));
        assert!(!Auction.can_become(Disputed));
    }

    #[test]
    fn test_intent_record_shape() {
        let now = Utc::now();
        let intent = Intent {
            id: IntentId::new("int_1"),
            requester: AccountId::new("buyer"),
            spec: serde_json::json!({"task": "logo"}),
            status: IntentStatus::Auction,
            auction_ends_at: now,
            events: Vec::new(),
            claimed_by: None,
            winning_bid: None,
            settlement: None,
            escrow_usd: Amount::from_major(100),
            created_at: now,
            sla_tier: None,
            pricing_arm: None,
            contract_id: None,
            next_bid_sequence: 0,
        };

        let json = serde_json::to_value(&intent).unwrap();
        for key in [
            "id", "from", "spec", "status", "auctionEndsAt", "events", "claimedBy", "winningBid",
            "settlement", "escrowUsd", "createdAt",
        ] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(json["status"], "AUCTION");
        assert_eq!(json["escrowUsd"], 100.0);
    }
}
