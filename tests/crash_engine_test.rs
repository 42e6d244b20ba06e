//! Crash engine behaviour across full round cycles

use std::sync::Arc;
use std::time::Duration;
use wagerhub::common::types::round_money;
use wagerhub::errors::{ConflictError, WagerError};
use wagerhub::games::crash::{CrashEngine, Order, OrderStatus, PlaceBet, RandomEntropy, RoundStatus};
use wagerhub::notify::NullNotifier;
use wagerhub::storage::{CrashStore, MemoryCrashStore};
use wagerhub::{CrashSettings, EngineMetrics, WagerConfig};

async fn start(settings: CrashSettings, store: Arc<MemoryCrashStore>) -> Arc<CrashEngine> {
    CrashEngine::start(
        settings,
        store,
        Arc::new(NullNotifier),
        Arc::new(RandomEntropy),
        Arc::new(EngineMetrics::new()),
    )
    .await
    .unwrap()
}

fn bet(uid: &str, bet_index: u32, amount: f64, auto: f64) -> PlaceBet {
    PlaceBet {
        uid: uid.to_string(),
        bet_index,
        amount,
        auto_escape_height: auto,
    }
}

async fn wait_until_settled(store: &MemoryCrashStore, round_id: u64) -> bool {
    for _ in 0..1_000 {
        if let Ok(Some(round)) = store.get_round(round_id).await {
            if round.settled {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn test_bet_is_settled_with_its_round() {
    let store = Arc::new(MemoryCrashStore::new());
    let engine = start(WagerConfig::fast().crash, store.clone()).await;

    let order = engine.place_bet(bet("alice", 1, 10.0, 1.5)).await.unwrap();
    assert_eq!(order.delivery, 10.0);
    assert!(wait_until_settled(&store, order.round_id).await);

    let stored = store.order(order.round_id, &order.id()).unwrap();
    assert_eq!(stored.status, OrderStatus::Settle);
    let round = store.get_round(order.round_id).await.unwrap().unwrap();
    if round.crash_multiplier >= 1.5 {
        assert_eq!(stored.escape_height, 1.5);
        assert_eq!(stored.reward_amount, round_money(order.delivery * 1.5));
    } else {
        assert_eq!(stored.reward_amount, 0.0);
    }

    let history = engine.recent_rounds(1, 5).await.unwrap();
    assert!(history.iter().any(|r| r.round_id == order.round_id && r.server_seed.is_some()));
    engine.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_bets_with_distinct_indices() {
    let store = Arc::new(MemoryCrashStore::new());
    let engine = start(CrashSettings::default(), store).await;

    let mut handles = Vec::new();
    for i in 0..20 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move { engine.place_bet(bet("bob", i, 5.0, 0.0)).await }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }
    assert_eq!(engine.get_round().await.bet_count, 20);

    let first = engine.clone();
    let second = engine.clone();
    let (a, b) = tokio::join!(
        tokio::spawn(async move { first.place_bet(bet("carol", 7, 5.0, 0.0)).await }),
        tokio::spawn(async move { second.place_bet(bet("carol", 7, 5.0, 0.0)).await }),
    );
    let results = [a.unwrap(), b.unwrap()];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(WagerError::Conflict(ConflictError::AlreadyExists(_))))));
    engine.shutdown().await;
}

#[tokio::test]
async fn test_failed_bet_write_rolls_back() {
    let store = Arc::new(MemoryCrashStore::new());
    let engine = start(CrashSettings::default(), store.clone()).await;

    store.fail_writes(true);
    engine.place_bet(bet("dave", 1, 10.0, 0.0)).await.unwrap();

    let mut rolled_back = false;
    for _ in 0..100 {
        if engine.get_order("dave", 1).await.is_none() {
            rolled_back = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(rolled_back);
    assert_eq!(engine.metrics().snapshot().bets_rolled_back, 1);
    assert_eq!(engine.get_round().await.bet_count, 0);

    store.fail_writes(false);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_cancel_right_after_placement_stays_cancelled() {
    let store = Arc::new(MemoryCrashStore::new());
    let engine = start(CrashSettings::default(), store.clone()).await;

    store.set_write_delay(Duration::from_millis(50));
    let order = engine.place_bet(bet("hugo", 1, 10.0, 0.0)).await.unwrap();
    let cancelled = engine.cancel_bet("hugo", 1).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::CancelBet);

    tokio::time::sleep(Duration::from_millis(150)).await;
    let stored = store.order(order.round_id, "hugo-1").unwrap();
    assert_eq!(stored.status, OrderStatus::CancelBet);

    store.set_write_delay(Duration::ZERO);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_cancel_waits_for_failed_placement() {
    let store = Arc::new(MemoryCrashStore::new());
    let engine = start(CrashSettings::default(), store.clone()).await;

    store.set_write_delay(Duration::from_millis(50));
    store.fail_writes(true);
    engine.place_bet(bet("ines", 1, 10.0, 0.0)).await.unwrap();
    let err = engine.cancel_bet("ines", 1).await.unwrap_err();
    assert!(matches!(err, WagerError::Conflict(ConflictError::OrderNotFound(_))));
    assert_eq!(engine.metrics().snapshot().bets_rolled_back, 1);

    store.fail_writes(false);
    store.set_write_delay(Duration::ZERO);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_history_read_during_placement_write() {
    let store = Arc::new(MemoryCrashStore::new());
    store.save_order(&Order::new("iris", 9, 0, 5.0, 0.0, 0)).await.unwrap();
    let engine = start(CrashSettings::default(), store.clone()).await;

    store.set_write_delay(Duration::from_millis(100));
    let order = engine.place_bet(bet("iris", 1, 10.0, 0.0)).await.unwrap();

    let latest = engine.user_orders("iris", 1, 1).await.unwrap();
    assert_eq!((latest[0].round_id, latest[0].bet_index), (order.round_id, 1));

    tokio::time::sleep(Duration::from_millis(150)).await;
    let both = engine.user_orders("iris", 1, 2).await.unwrap();
    assert_eq!(both.len(), 2);
    assert_eq!((both[0].round_id, both[0].bet_index), (order.round_id, 1));
    assert_eq!((both[1].round_id, both[1].bet_index), (0, 9));

    store.set_write_delay(Duration::ZERO);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_round_readable_while_settlement_waits_for_writes() {
    let store = Arc::new(MemoryCrashStore::new());
    let engine = start(WagerConfig::fast().crash, store.clone()).await;
    while !engine.get_round().await.status.accepts_bets() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    store.set_write_delay(Duration::from_millis(1_500));
    let order = engine.place_bet(bet("jade", 1, 10.0, 0.0)).await.unwrap();
    loop {
        let view = tokio::time::timeout(Duration::from_millis(100), engine.get_round())
            .await
            .unwrap();
        if view.round_id != order.round_id || view.status >= RoundStatus::Crashed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    store.set_write_delay(Duration::ZERO);

    // The placement write is still sleeping; reads must not queue behind it
    for _ in 0..10 {
        assert!(tokio::time::timeout(Duration::from_millis(100), engine.get_round())
            .await
            .is_ok());
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(wait_until_settled(&store, order.round_id).await);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_cancel_and_escape_guards() {
    let store = Arc::new(MemoryCrashStore::new());
    let engine = start(CrashSettings::default(), store.clone()).await;

    engine.place_bet(bet("erin", 1, 10.0, 0.0)).await.unwrap();
    let err = engine.escape_bet("erin", 1, 1.5).await.unwrap_err();
    assert!(matches!(err, WagerError::Conflict(ConflictError::WrongPhase { .. })));

    let cancelled = engine.cancel_bet("erin", 1).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::CancelBet);
    assert_eq!(store.order(cancelled.round_id, "erin-1").unwrap().status, OrderStatus::CancelBet);

    let err = engine.cancel_bet("erin", 1).await.unwrap_err();
    assert!(matches!(err, WagerError::Conflict(ConflictError::AlreadyCancelled(_))));
    let err = engine.cancel_bet("erin", 2).await.unwrap_err();
    assert!(matches!(err, WagerError::Conflict(ConflictError::OrderNotFound(_))));
    engine.shutdown().await;
}

#[tokio::test]
async fn test_escape_locks_reward_once() {
    let store = Arc::new(MemoryCrashStore::new());
    let engine = start(WagerConfig::fast().crash, store.clone()).await;

    let mut escaped = None;
    for bet_index in 0..40 {
        while !engine.get_round().await.status.accepts_bets() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let order = engine.place_bet(bet("frank", bet_index, 10.0, 0.0)).await.unwrap();

        loop {
            let view = engine.get_round().await;
            if view.round_id != order.round_id || view.status > RoundStatus::Flying {
                break;
            }
            if view.status == RoundStatus::Flying && view.current_multiplier >= 1.05 {
                if let Ok(done) = engine.escape_bet("frank", bet_index, view.current_multiplier).await {
                    escaped = Some(done);
                }
                break;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        if escaped.is_some() {
            break;
        }
    }

    let escaped = escaped.expect("no round flew high enough to escape");
    assert_eq!(escaped.status, OrderStatus::Escape);
    assert_eq!(
        escaped.reward_amount,
        round_money(escaped.delivery * escaped.escape_height)
    );

    let err = engine
        .escape_bet("frank", escaped.bet_index, escaped.escape_height)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        WagerError::Conflict(ConflictError::AlreadyEscaped(_) | ConflictError::WrongPhase { .. })
    ));

    assert!(wait_until_settled(&store, escaped.round_id).await);
    let settled = store.order(escaped.round_id, &escaped.id()).unwrap();
    assert_eq!(settled.status, OrderStatus::Settle);
    assert_eq!(settled.reward_amount, escaped.reward_amount);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_restart_resumes_the_same_round() {
    let store = Arc::new(MemoryCrashStore::new());
    let engine = start(CrashSettings::default(), store.clone()).await;
    engine.place_bet(bet("gina", 3, 25.0, 2.0)).await.unwrap();
    let before = engine.get_round().await;
    engine.shutdown().await;

    let engine = start(CrashSettings::default(), store).await;
    let after = engine.get_round().await;
    assert_eq!(after.round_id, before.round_id);
    assert_eq!(after.schedule, before.schedule);
    let order = engine.get_order("gina", 3).await.unwrap();
    assert_eq!(order.auto_escape_height, 2.0);
    assert_eq!(after.top_orders.len(), 1);
    engine.shutdown().await;
}
