use super::*;
use crate::config::MarketConfig;
use crate::error::ErrorKind;
use crate::money::{Amount, Currency};
use crate::sla::ContractStatus;
use crate::store::Stores;
use crate::testing::{acct, FailingRepository, Harness};
use chrono::Duration;

fn request(escrow_major: i64) -> PublishRequest {
    PublishRequest {
        requester: acct("buyer-1"),
        spec: serde_json::json!({ "task": "transcribe 40 minutes of audio" }),
        escrow: Amount::from_major(escrow_major),
        duration_secs: Some(90),
        sla_tier: None,
        pricing_arm: None,
    }
}

fn bid_request(bidder: &str, price_major: i64, hours: f64) -> BidRequest {
    BidRequest {
        bidder: acct(bidder),
        price: Amount::from_major(price_major),
        delivery_hours: hours,
        message: None,
    }
}

fn manual_only() -> MarketConfig {
    let mut config = MarketConfig::default();
    config.settlement.auto_contract = false;
    config
}

#[test]
fn test_publish_validation() {
    let h = Harness::new();

    let err = h
        .engine
        .publish(PublishRequest {
            requester: acct("  "),
            ..request(10)
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = h.engine.publish(request(-1)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = h
        .engine
        .publish(PublishRequest {
            duration_secs: Some(0),
            ..request(10)
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    // A free intent is allowed.
    h.engine.publish(request(0)).unwrap();
}

#[test]
fn test_publish_uses_default_window() {
    let h = Harness::new();
    let receipt = h
        .engine
        .publish(PublishRequest {
            duration_secs: None,
            ..request(10)
        })
        .unwrap();
    assert_eq!(receipt.auction_ends_at, h.now() + Duration::seconds(90));

    let view = h.engine.get(&receipt.intent_id).unwrap();
    assert_eq!(view.intent.status, IntentStatus::Auction);
    assert!(view.bids.is_empty());
    assert!(matches!(view.intent.events[0], IntentEvent::Published { .. }));
}

#[tokio::test]
async fn test_bid_validation() {
    let h = Harness::new();
    let id = h.publish(100, None);

    for bad in [
        bid_request("", 50, 10.0),
        bid_request("agent-1", 0, 10.0),
        bid_request("agent-1", -3, 10.0),
        bid_request("agent-1", 50, 0.0),
        bid_request("agent-1", 50, f64::NAN),
    ] {
        let err = h.engine.submit_bid(&id, bad).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    let err = h
        .engine
        .submit_bid(&IntentId::new("int_missing"), bid_request("agent-1", 50, 10.0))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(h.engine.get(&id).unwrap().bids.is_empty());
}

#[tokio::test]
async fn test_bids_after_window_are_refused() {
    let h = Harness::new();
    let id = h.publish(100, None);
    h.bid(&id, "agent-1", 90, 10.0).await;

    h.clock.advance(Duration::seconds(90));
    let err = h
        .engine
        .submit_bid(&id, bid_request("agent-2", 50, 10.0))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    h.engine.clear(&id).await.unwrap();
    let err = h
        .engine
        .submit_bid(&id, bid_request("agent-2", 50, 10.0))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(h.engine.get(&id).unwrap().bids.len(), 1);
}

#[tokio::test]
async fn test_cheaper_slower_bid_wins_on_score() {
    let h = Harness::new();
    let id = h.publish(100, None);
    h.bid(&id, "agent-a", 100, 48.0).await;
    let b = h.bid(&id, "agent-b", 80, 72.0).await;
    h.clock.advance(Duration::seconds(91));

    let outcome = h.engine.clear(&id).await.unwrap();
    let ClearOutcome::Awarded { bid, score, contract } = outcome else {
        panic!("expected an award, got {:?}", outcome);
    };
    assert_eq!(bid.id, b);
    assert!((score - 0.14).abs() < 1e-9);

    let intent = h.engine.get(&id).unwrap().intent;
    assert_eq!(intent.status, IntentStatus::Awarded);
    assert_eq!(intent.claimed_by, Some(acct("agent-b")));
    assert_eq!(intent.winning_bid.as_ref().map(|w| w.id.clone()), Some(b));
    assert_eq!(intent.job_value(), Some(Amount::from_major(80)));

    // Auto-contract at the default tier, priced on the winning bid.
    let contract = contract.unwrap();
    assert_eq!(intent.contract_id, Some(contract.id.clone()));
    assert_eq!(contract.tier, SlaTier::Standard);
    assert_eq!(contract.agent, acct("agent-b"));
    assert_eq!(contract.bond_amount, Amount::from_major(16));
}

#[tokio::test]
async fn test_clear_before_deadline_still_awards() {
    let h = Harness::new();
    let id = h.publish(100, None);
    h.bid(&id, "agent-a", 60, 12.0).await;

    let outcome = h.engine.clear(&id).await.unwrap();
    assert!(matches!(outcome, ClearOutcome::Awarded { .. }));
}

#[tokio::test]
async fn test_no_bids_expires() {
    let h = Harness::new();
    let id = h.publish(100, None);
    h.clock.advance(Duration::seconds(91));

    assert_eq!(h.engine.clear(&id).await.unwrap(), ClearOutcome::Expired);
    let intent = h.engine.get(&id).unwrap().intent;
    assert_eq!(intent.status, IntentStatus::Expired);
    assert!(intent.claimed_by.is_none());
    assert!(h.sla.contracts_for_intent(&id).unwrap().is_empty());

    assert_eq!(
        h.engine.clear(&id).await.unwrap(),
        ClearOutcome::AlreadyCleared {
            status: IntentStatus::Expired
        }
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_clears_award_once() {
    let h = Harness::new();
    let id = h.publish(100, Some(SlaTier::Express));
    h.bid(&id, "agent-a", 70, 20.0).await;
    h.bid(&id, "agent-b", 90, 10.0).await;
    h.clock.advance(Duration::seconds(91));

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let engine = h.engine.clone();
        let id = id.clone();
        tasks.spawn(async move { engine.clear(&id).await });
    }

    let mut awarded = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined.unwrap().unwrap() {
            ClearOutcome::Awarded { .. } => awarded += 1,
            ClearOutcome::AlreadyCleared { status } => assert_eq!(status, IntentStatus::Awarded),
            ClearOutcome::Expired => panic!("intent with bids expired"),
        }
    }
    assert_eq!(awarded, 1);

    let intent = h.engine.get(&id).unwrap().intent;
    let awards = intent
        .events
        .iter()
        .filter(|e| matches!(e, IntentEvent::Awarded { .. }))
        .count();
    assert_eq!(awards, 1);
    assert_eq!(h.sla.contracts_for_intent(&id).unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bids_racing_a_clear_are_either_counted_or_refused() {
    let h = Harness::new();
    let id = h.publish(100, None);
    h.bid(&id, "agent-0", 80, 12.0).await;

    let mut bids = tokio::task::JoinSet::new();
    for n in 1..=12 {
        let engine = h.engine.clone();
        let id = id.clone();
        bids.spawn(async move {
            engine
                .submit_bid(&id, bid_request(&format!("agent-{n}"), 50 + n, 10.0))
                .await
        });
    }
    let clearing = {
        let engine = h.engine.clone();
        let id = id.clone();
        tokio::spawn(async move { engine.clear(&id).await })
    };

    let mut accepted = Vec::new();
    while let Some(joined) = bids.join_next().await {
        match joined.unwrap() {
            Ok(bid_id) => accepted.push(bid_id),
            Err(err) => assert_eq!(err.kind(), ErrorKind::InvalidState),
        }
    }
    assert!(matches!(clearing.await.unwrap().unwrap(), ClearOutcome::Awarded { .. }));

    let view = h.engine.get(&id).unwrap();
    assert_eq!(view.bids.len(), accepted.len() + 1);
    for bid_id in &accepted {
        assert!(view.bids.iter().any(|b| &b.id == bid_id));
    }
    let mut sequences: Vec<u64> = view.bids.iter().map(|b| b.sequence).collect();
    sequences.sort_unstable();
    sequences.dedup();
    assert_eq!(sequences.len(), view.bids.len());

    let winner = view.intent.winning_bid.unwrap();
    assert!(view.bids.iter().any(|b| b.id == winner.id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_settles_pay_once() {
    let h = Harness::new();
    let (id, _) = h.award(250, None).await;

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..6 {
        let engine = h.engine.clone();
        let id = id.clone();
        tasks.spawn(async move { engine.settle(&id, SettlementOutcome::default()).await });
    }

    let mut settled = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined.unwrap() {
            Ok(_) => settled += 1,
            Err(err) => assert_eq!(err.kind(), ErrorKind::InvalidState),
        }
    }
    assert_eq!(settled, 1);
    assert_eq!(h.balance("agent-7", Currency::Usd).await, Amount::from_major(250));
}

#[tokio::test]
async fn test_manual_contract_when_auto_contract_is_off() {
    let h = Harness::with(manual_only(), Stores::in_memory());
    let (id, contract) = h.award(500, None).await;
    assert!(contract.is_none());
    assert!(h.engine.get(&id).unwrap().intent.contract_id.is_none());

    let err = h
        .engine
        .open_contract(&id, &acct("agent-2"), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let contract = h
        .engine
        .open_contract(&id, &acct("agent-7"), Some(SlaTier::Premium))
        .await
        .unwrap();
    assert_eq!(contract.tier, SlaTier::Premium);
    assert_eq!(contract.status, ContractStatus::Active);
    assert_eq!(contract.adjusted_price, Amount::from_major(650));

    let intent = h.engine.get(&id).unwrap().intent;
    assert_eq!(intent.contract_id, Some(contract.id));
    assert!(intent
        .events
        .iter()
        .any(|e| matches!(e, IntentEvent::ContractOpened { tier: SlaTier::Premium, .. })));
}

#[tokio::test]
async fn test_tiered_intent_gets_contract_even_without_auto_contract() {
    let h = Harness::with(manual_only(), Stores::in_memory());
    let (_, contract) = h.award(200, Some(SlaTier::Economy)).await;
    assert_eq!(contract.unwrap().tier, SlaTier::Economy);
}

#[tokio::test]
async fn test_contract_refused_before_award() {
    let h = Harness::new();
    let id = h.publish(100, None);
    let err = h
        .engine
        .open_contract(&id, &acct("agent-7"), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[tokio::test]
async fn test_settle_releases_escrow_once() {
    let h = Harness::new();
    let (id, _) = h.award(250, None).await;

    let receipt = h
        .engine
        .settle(
            &id,
            SettlementOutcome {
                revenue: None,
                details: serde_json::json!({ "rating": 5 }),
            },
        )
        .await
        .unwrap();
    assert_eq!(receipt.winner, acct("agent-7"));
    assert_eq!(receipt.escrow_released, Amount::from_major(250));
    assert_eq!(h.balance("agent-7", Currency::Usd).await, Amount::from_major(250));

    let intent = h.engine.get(&id).unwrap().intent;
    assert_eq!(intent.status, IntentStatus::Settled);
    let settlement = intent.settlement.unwrap();
    assert_eq!(settlement.outcome.details["rating"], 5);

    let err = h.engine.settle(&id, SettlementOutcome::default()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(h.balance("agent-7", Currency::Usd).await, Amount::from_major(250));
}

#[tokio::test]
async fn test_settle_requires_an_award() {
    let h = Harness::new();
    let id = h.publish(100, None);
    let err = h.engine.settle(&id, SettlementOutcome::default()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let err = h
        .engine
        .settle(
            &id,
            SettlementOutcome {
                revenue: Some(Amount::from_major(-1)),
                details: serde_json::Value::Null,
            },
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_ledger_failure_leaves_intent_unsettled() {
    let h = Harness::new();
    let (id, _) = h.award(250, None).await;

    h.ledger.refuse(Basis::IntentSettlement);
    let err = h.engine.settle(&id, SettlementOutcome::default()).await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(h.engine.get(&id).unwrap().intent.status, IntentStatus::Awarded);

    h.ledger.heal();
    h.engine.settle(&id, SettlementOutcome::default()).await.unwrap();
}

#[tokio::test]
async fn test_store_failure_on_settle_reverses_the_credit() {
    let intents: Arc<FailingRepository<Intent>> = Arc::new(FailingRepository::new());
    let stores = Stores {
        intents: intents.clone(),
        ..Stores::in_memory()
    };
    let h = Harness::with(MarketConfig::default(), stores);
    let (id, _) = h.award(250, None).await;

    intents.fail_puts(true);
    let err = h.engine.settle(&id, SettlementOutcome::default()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
    assert_eq!(h.balance("agent-7", Currency::Usd).await, Amount::ZERO);
    let entries = h.ledger.inner().entries(&acct("agent-7"));
    assert_eq!(entries.last().map(|e| e.basis), Some(Basis::Reversal));
    assert_eq!(h.engine.get(&id).unwrap().intent.status, IntentStatus::Awarded);
}

#[tokio::test]
async fn test_work_and_dispute_transitions() {
    let h = Harness::new();
    let (id, _) = h.award(100, None).await;

    let intent = h.engine.start_work(&id).await.unwrap();
    assert_eq!(intent.status, IntentStatus::InProgress);
    let again = h.engine.start_work(&id).await.unwrap();
    assert_eq!(again.events.len(), intent.events.len());

    let disputed = h.engine.mark_disputed(&id, "bond slashed").await.unwrap();
    assert_eq!(disputed.status, IntentStatus::Disputed);
    assert!(h.engine.mark_disputed(&id, "again").await.is_ok());

    let err = h.engine.settle(&id, SettlementOutcome::default()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let open = h.publish(10, None);
    let err = h.engine.start_work(&open).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    let err = h.engine.mark_disputed(&open, "no award").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[tokio::test]
async fn test_list_filters_and_orders_newest_first() {
    let h = Harness::new();
    let first = h.publish(10, None);
    h.clock.advance(Duration::seconds(5));
    let second = h.publish(20, None);
    h.clock.advance(Duration::seconds(5));
    let third = h.publish(30, None);

    h.clock.advance(Duration::seconds(120));
    h.engine.clear(&first).await.unwrap();

    let all: Vec<IntentId> = h.engine.list(None).unwrap().into_iter().map(|i| i.id).collect();
    assert_eq!(all, vec![third.clone(), second.clone(), first.clone()]);

    let expired = h.engine.list(Some("expired")).unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].id, first);

    assert_eq!(h.engine.list(Some("AUCTION")).unwrap().len(), 2);
    assert_eq!(h.engine.list(Some("")).unwrap().len(), 3);

    let err = h.engine.list(Some("closed")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn test_bids_are_kept_per_intent_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let h = Harness::with(MarketConfig::default(), Stores::open(dir.path()).unwrap());
    let first = h.publish(100, None);
    let second = h.publish(100, None);
    h.bid(&first, "agent-a", 70, 20.0).await;
    h.bid(&second, "agent-c", 60, 8.0).await;
    h.bid(&first, "agent-b", 90, 10.0).await;
    assert!(dir.path().join("bids").join(format!("{}.json", first)).exists());

    let reopened = Harness::with(MarketConfig::default(), Stores::open(dir.path()).unwrap());
    let view = reopened.engine.get(&first).unwrap();
    let order: Vec<(&str, u64)> = view.bids.iter().map(|b| (b.bidder.as_str(), b.sequence)).collect();
    assert_eq!(order, vec![("agent-a", 0), ("agent-b", 1)]);
    assert_eq!(reopened.engine.get(&second).unwrap().bids.len(), 1);
}
