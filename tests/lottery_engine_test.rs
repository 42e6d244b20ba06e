//! Lottery rooms driven by real timers

use std::sync::Arc;
use std::time::Duration;
use wagerhub::games::lottery::{LotteryEngine, LotteryGame, LotteryOrderStatus, Period, Phase, SyntheticPrice};
use wagerhub::notify::{BroadcastNotifier, NullNotifier};
use wagerhub::storage::{LotteryStore, MemoryLotteryStore};
use wagerhub::{EngineMetrics, LotterySettings, WagerConfig};

async fn start(game: LotteryGame, settings: LotterySettings, store: Arc<MemoryLotteryStore>) -> Arc<LotteryEngine> {
    LotteryEngine::start(
        game,
        settings,
        store,
        Arc::new(NullNotifier),
        Arc::new(SyntheticPrice::new()),
        Arc::new(EngineMetrics::new()),
    )
    .await
    .unwrap()
}

async fn open_period(engine: &LotteryEngine, bet_type: u32, after: Option<u64>) -> Period {
    for _ in 0..500 {
        if engine.phase(bet_type).await.unwrap() == Phase::Betting {
            if let Some(period) = engine.current_period(bet_type).await.unwrap() {
                if Some(period.period_id) != after {
                    return period;
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("room {} did not open a new period", bet_type);
}

#[tokio::test]
async fn test_latest_history_page_matches_storage() {
    let store = Arc::new(MemoryLotteryStore::new());
    let engine = start(LotteryGame::WINGO, WagerConfig::fast().wingo, store.clone()).await;

    let mut last = None;
    for round in 0..2 {
        let period = open_period(&engine, 1, last).await;
        engine
            .create_order(1, "hana", period.period_id, &round.to_string(), 10.0)
            .await
            .unwrap();
        last = Some(period.period_id);
    }
    // Wait for the second period to settle
    open_period(&engine, 1, last).await;

    let from_cache = engine.period_history(1, 1, 1).await.unwrap();
    let from_store = store.recent_periods(1, 1).await.unwrap();
    assert_eq!(from_cache.len(), 1);
    assert_eq!(from_cache[0].period_id, from_store[0].period_id);
    assert_eq!(from_cache[0].period_id, last.unwrap());

    // Deeper than the cache holds, served from storage
    let deep = engine.period_history(1, 1, 50).await.unwrap();
    assert_eq!(deep[0].period_id, from_cache[0].period_id);

    let orders = engine.user_orders(1, "hana", 1, 1).await.unwrap();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].period_id, last.unwrap());
    assert_ne!(orders[0].status, LotteryOrderStatus::Pending);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_orders_rejected_after_betting_closes() {
    let store = Arc::new(MemoryLotteryStore::new());
    let engine = start(LotteryGame::NINE, WagerConfig::fast().nine, store).await;

    let period = open_period(&engine, 1, None).await;
    engine
        .create_order(1, "ivan", period.period_id, "123", 5.0)
        .await
        .unwrap();

    while engine.phase(1).await.unwrap() == Phase::Betting {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(engine
        .create_order(1, "ivan", period.period_id, "4", 5.0)
        .await
        .is_err());
    engine.shutdown().await;
}

#[tokio::test]
async fn test_rooms_publish_on_their_own_channel() {
    let notifier = Arc::new(BroadcastNotifier::default());
    let mut rx = notifier.subscribe();
    let engine = LotteryEngine::start(
        LotteryGame::WINGO,
        LotterySettings {
            bet_types: vec![2],
            ..WagerConfig::fast().wingo
        },
        Arc::new(MemoryLotteryStore::new()),
        notifier.clone(),
        Arc::new(SyntheticPrice::new()),
        Arc::new(EngineMetrics::new()),
    )
    .await
    .unwrap();

    let notification = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(notification.channel, "room:wingo-2");
    assert!(notification.payload.contains("\"state\":\"betting\""));
    engine.shutdown().await;
}

#[tokio::test]
async fn test_restart_continues_period_sequence() {
    let store = Arc::new(MemoryLotteryStore::new());
    let engine = start(LotteryGame::WINGO, WagerConfig::fast().wingo, store.clone()).await;
    let first = open_period(&engine, 1, None).await;
    engine.shutdown().await;

    let engine = start(LotteryGame::WINGO, WagerConfig::fast().wingo, store.clone()).await;
    let second = open_period(&engine, 1, None).await;
    assert!(second.period_id > first.period_id);
    // The interrupted period was swept at startup
    assert!(store.period(1, first.period_id).unwrap().settled);
    engine.shutdown().await;
}
