//! Session games checked against the stateless verifier

use std::sync::Arc;
use wagerhub::errors::{ConflictError, WagerError};
use wagerhub::fairness;
use wagerhub::games::session::mine::MineBet;
use wagerhub::games::session::{RollBet, SessionDetail, SessionStatus};
use wagerhub::notify::NullNotifier;
use wagerhub::storage::MemorySessionStore;
use wagerhub::{DiceEngine, EngineMetrics, FairnessVerifier, LimboEngine, MineEngine, SessionSettings};

fn dice(store: Arc<MemorySessionStore>) -> DiceEngine {
    DiceEngine::new(SessionSettings::default(), store, Arc::new(NullNotifier), Arc::new(EngineMetrics::new()))
}

#[tokio::test]
async fn test_dice_result_verifies_after_reveal() {
    let engine = dice(Arc::new(MemorySessionStore::new()));
    let before = engine.seed_info("kai").await.unwrap();

    let order = engine
        .place_bet(
            "kai",
            RollBet {
                amount: 10.0,
                target: 50.0,
                is_above: 1,
            },
        )
        .await
        .unwrap();
    assert_eq!(order.server_seed_hash, before.server_seed_hash);

    let revealed = order.server_seed.clone().unwrap();
    let proof = FairnessVerifier::verify_dice(&before.client_seed, &revealed);
    assert_eq!(proof.server_seed_hash, before.server_seed_hash);
    match order.detail {
        SessionDetail::Roll { result, .. } => {
            assert_eq!(result, proof.result);
            assert_eq!(order.status == SessionStatus::Win, result > 50.0);
        }
        SessionDetail::Mine { .. } => panic!("dice produced a mine order"),
    }

    let after = engine.seed_info("kai").await.unwrap();
    assert_eq!(after.client_seed, before.client_seed);
    assert_ne!(after.server_seed_hash, before.server_seed_hash);
    assert_eq!(after.round_id, before.round_id + 1);
}

#[tokio::test]
async fn test_dice_and_limbo_mirror_each_other() {
    let store = Arc::new(MemorySessionStore::new());
    let dice = dice(store.clone());
    let limbo = LimboEngine::new(SessionSettings::default(), store, Arc::new(NullNotifier), Arc::new(EngineMetrics::new()));

    dice.change_seed("lee", "shared-client").await.unwrap();
    limbo.change_seed("lee", "shared-client").await.unwrap();
    let bet = RollBet {
        amount: 1.0,
        target: 30.0,
        is_above: 1,
    };
    let d = dice.place_bet("lee", bet.clone()).await.unwrap();
    let l = limbo.place_bet("lee", bet).await.unwrap();

    // Same target and flag, opposite sides of the roll
    assert_eq!(d.multiplier, 1.4143);
    assert_eq!(l.multiplier, 3.3);
}

#[tokio::test]
async fn test_mine_layout_revealed_on_settlement() {
    let engine = MineEngine::new(
        SessionSettings::default(),
        Arc::new(MemorySessionStore::new()),
        Arc::new(NullNotifier),
        Arc::new(EngineMetrics::new()),
    );
    let seeds = engine.seed_info("mia").await.unwrap();

    engine
        .place_bet(
            "mia",
            MineBet {
                amount: 5.0,
                mine_count: 24,
            },
        )
        .await
        .unwrap();
    let err = engine.change_seed("mia", "new-seed").await.unwrap_err();
    assert!(matches!(err, WagerError::Conflict(ConflictError::ActiveOrderExists(_))));

    // One safe cell: the first open either hits or wins outright
    let order = engine.open_position("mia", 0).await.unwrap();
    assert_ne!(order.status, SessionStatus::InProgress);

    let revealed = order.server_seed.clone().unwrap();
    let expected = fairness::mine_positions(&seeds.client_seed, &revealed, 24).unwrap();
    match &order.detail {
        SessionDetail::Mine { mines, .. } => assert_eq!(mines, &expected),
        SessionDetail::Roll { .. } => panic!("mine produced a roll order"),
    }
    assert_eq!(order.status == SessionStatus::Lose, expected.contains(&0));

    let history = engine.user_orders("mia", 1, 1).await.unwrap();
    assert_eq!(history[0].order_id, order.order_id);
    assert!(engine.active("mia").await.unwrap().is_none());
}
