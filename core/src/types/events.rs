//! Intent lifecycle events
//!
//! Appended to an intent's event log on every transition. Each variant
//! carries only the fields its kind needs.

use super::ids::{AccountId, BidId, ContractId};
use crate::money::Amount;
use crate::sla::SlaTier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentEvent {
    Published {
        at: DateTime<Utc>,
        requester: AccountId,
        escrow: Amount,
        auction_ends_at: DateTime<Utc>,
    },
    BidReceived {
        at: DateTime<Utc>,
        bid_id: BidId,
        bidder: AccountId,
        price: Amount,
    },
    Awarded {
        at: DateTime<Utc>,
        bid_id: BidId,
        winner: AccountId,
        price: Amount,
        score: f64,
    },
    Expired {
        at: DateTime<Utc>,
    },
    ContractOpened {
        at: DateTime<Utc>,
        contract_id: ContractId,
        tier: SlaTier,
    },
    WorkStarted {
        at: DateTime<Utc>,
        agent: AccountId,
    },
    Settled {
        at: DateTime<Utc>,
        escrow_released: Amount,
    },
    Disputed {
        at: DateTime<Utc>,
        reason: String,
    },
}

impl IntentEvent {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            Self::Published { at, .. }
            | Self::BidReceived { at, .. }
            | Self::Awarded { at, .. }
            | Self::Expired { at }
            | Self::ContractOpened { at, .. }
            | Self::WorkStarted { at, .. }
            | Self::Settled { at, .. }
            | Self::Disputed { at, .. } => *at,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Published { .. } => "PUBLISHED",
            Self::BidReceived { .. } => "BID_RECEIVED",
            Self::Awarded { .. } => "AWARDED",
            Self::Expired { .. } => "EXPIRED",
            Self::ContractOpened { .. } => "CONTRACT_OPENED",
            Self::WorkStarted { .. } => "WORK_STARTED",
            Self::Settled { .. } => "SETTLED",
            Self::Disputed { .. } => "DISPUTED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_tagged_by_kind() {
        let event = IntentEvent::Expired { at: Utc::now() };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "EXPIRED");
        assert_eq!(event.name(), "EXPIRED");

        let event = IntentEvent::BidReceived {
            at: Utc::now(),
            bid_id: BidId::new("bid_1"),
            bidder: AccountId::new("agent-1"),
            price: Amount::from_major(80),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "BID_RECEIVED");
        assert_eq!(json["price"], 80.0);
        assert!(json.get("reason").is_none());
    }
}
