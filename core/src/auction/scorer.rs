//! Bid scoring
//!
//! `price_score = 1 − price / max_price`, `speed_score = 1 − hours / max_hours`,
//! `score = w_price · price_score + w_speed · speed_score`. Higher is better.
//! Equal scores go to the earliest submission, then the lowest sequence.

use super::model::Bid;
use crate::config::AuctionConfig;
use std::cmp::Reverse;

/// Scores closer than this are treated as equal
const SCORE_RESOLUTION: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub price: f64,
    pub speed: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            price: 0.7,
            speed: 0.3,
        }
    }
}

impl From<&AuctionConfig> for ScoreWeights {
    fn from(config: &AuctionConfig) -> Self {
        Self {
            price: config.price_weight,
            speed: config.speed_weight,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredBid<'a> {
    pub bid: &'a Bid,
    pub score: f64,
}

/// All bids, best first
pub fn rank(bids: &[Bid], weights: ScoreWeights) -> Vec<ScoredBid<'_>> {
    let max_price = bids.iter().map(|b| b.price.cents()).max().unwrap_or(0) as f64;
    let max_hours = bids.iter().map(|b| b.delivery_hours).fold(0.0_f64, f64::max);

    let mut scored: Vec<ScoredBid<'_>> = bids
        .iter()
        .map(|bid| {
            let price_score = ratio_score(bid.price.cents() as f64, max_price);
            let speed_score = ratio_score(bid.delivery_hours, max_hours);
            ScoredBid {
                bid,
                score: weights.price * price_score + weights.speed * speed_score,
            }
        })
        .collect();

    scored.sort_by_key(|s| {
        (
            Reverse(quantize(s.score)),
            s.bid.submitted_at,
            s.bid.sequence,
        )
    });
    scored
}

pub fn winner(bids: &[Bid], weights: ScoreWeights) -> Option<ScoredBid<'_>> {
    rank(bids, weights).into_iter().next()
}

fn ratio_score(value: f64, max: f64) -> f64 {
    if max > 0.0 {
        1.0 - value / max
    } else {
        0.0
    }
}

fn quantize(score: f64) -> i64 {
    (score / SCORE_RESOLUTION).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Amount;
    use crate::types::{AccountId, BidId, IntentId};
    use chrono::{DateTime, Duration, Utc};

    fn bid(id: &str, price: i64, hours: f64, at: DateTime<Utc>, sequence: u64) -> Bid {
        Bid {
            id: BidId::new(id),
            intent_id: IntentId::new("int_1"),
            bidder: AccountId::new(format!("agent-{}", id)),
            price: Amount::from_major(price),
            delivery_hours: hours,
            message: None,
            submitted_at: at,
            sequence,
        }
    }

    #[test]
    fn test_cheaper_slower_bid_wins_scenario() {
        let t0 = Utc::now();
        let bids = vec![bid("a", 100, 48.0, t0, 0), bid("b", 80, 72.0, t0, 1)];

        let ranked = rank(&bids, ScoreWeights::default());
        assert_eq!(ranked[0].bid.id.as_str(), "b");
        assert!((ranked[0].score - 0.14).abs() < 1e-12);
        assert!((ranked[1].score - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_equal_scores_go_to_earliest_submission() {
        let t0 = Utc::now();
        // Identical offers; the later one arrived first in the vector.
        let bids = vec![
            bid("late", 50, 10.0, t0 + Duration::seconds(5), 1),
            bid("early", 50, 10.0, t0, 0),
        ];

        let best = winner(&bids, ScoreWeights::default()).unwrap();
        assert_eq!(best.bid.id.as_str(), "early");
    }

    #[test]
    fn test_same_timestamp_falls_back_to_sequence() {
        let t0 = Utc::now();
        let bids = vec![bid("second", 50, 10.0, t0, 7), bid("first", 50, 10.0, t0, 3)];

        let best = winner(&bids, ScoreWeights::default()).unwrap();
        assert_eq!(best.bid.id.as_str(), "first");
    }

    #[test]
    fn test_single_bid_scores_zero_and_wins() {
        let bids = vec![bid("only", 70, 24.0, Utc::now(), 0)];
        let best = winner(&bids, ScoreWeights::default()).unwrap();
        assert_eq!(best.score, 0.0);
        assert_eq!(best.bid.id.as_str(), "only");
    }

    #[test]
    fn test_no_bids_no_winner() {
        assert!(winner(&[], ScoreWeights::default()).is_none());
    }

    #[test]
    fn test_winner_always_has_max_score() {
        let t0 = Utc::now();
        let bids: Vec<Bid> = (0..20)
            .map(|i| {
                let price = 40 + (i * 37) % 90;
                let hours = 6.0 + ((i * 13) % 70) as f64;
                bid(&format!("b{}", i), price, hours, t0 + Duration::seconds(i), i as u64)
            })
            .collect();

        let ranked = rank(&bids, ScoreWeights::default());
        let best = ranked[0].score;
        assert!(ranked.iter().all(|s| s.score <= best + SCORE_RESOLUTION));
    }
}
