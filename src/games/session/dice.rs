//! Dice: win when the roll lands on the chosen side of the target

use super::roll::{RollEngine, RollRules};
use crate::common::types::GameType;
use crate::fairness;

pub struct Dice;

pub type DiceEngine = RollEngine<Dice>;

impl RollRules for Dice {
    const GAME: GameType = GameType::Dice;

    fn roll(client_seed: &str, server_seed: &str) -> f64 {
        fairness::dice_result(client_seed, server_seed)
    }

    fn win_chance(is_above: u8, target: f64) -> f64 {
        if is_above == 1 {
            100.0 - target
        } else {
            target
        }
    }

    fn is_win(is_above: u8, result: f64, target: f64) -> bool {
        if is_above == 1 {
            result > target
        } else {
            result < target
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionSettings;
    use crate::games::session::{RollBet, SessionDetail, SessionStatus};
    use crate::metrics::EngineMetrics;
    use crate::notify::NullNotifier;
    use crate::storage::MemorySessionStore;
    use std::sync::Arc;

    fn engine(store: Arc<MemorySessionStore>) -> DiceEngine {
        DiceEngine::new(
            SessionSettings::default(),
            store,
            Arc::new(NullNotifier),
            Arc::new(EngineMetrics::new()),
        )
    }

    #[test]
    fn test_dice_direction() {
        assert!(Dice::is_win(1, 60.0, 50.0));
        assert!(!Dice::is_win(1, 40.0, 50.0));
        assert!(Dice::is_win(0, 40.0, 50.0));
        assert_eq!(Dice::win_chance(1, 75.0), 25.0);
        assert_eq!(Dice::win_chance(0, 75.0), 75.0);
    }

    #[tokio::test]
    async fn test_place_bet_settles_and_rotates() {
        let engine = engine(Arc::new(MemorySessionStore::new()));
        let before = engine.seed_info("u1").await.unwrap();

        let order = engine
            .place_bet("u1", RollBet { amount: 10.0, target: 50.0, is_above: 1 })
            .await
            .unwrap();
        assert!(order.is_settled());
        assert_eq!(order.round_id, before.round_id);
        assert_eq!(order.server_seed_hash, before.server_seed_hash);

        // The revealed seed reproduces the roll
        let seed = order.server_seed.clone().unwrap();
        let expected = fairness::dice_result(&order.client_seed, &seed);
        match order.detail {
            SessionDetail::Roll { result, .. } => assert_eq!(result, expected),
            _ => panic!("expected roll detail"),
        }
        match order.status {
            SessionStatus::Win => assert_eq!(order.reward_amount, 19.8),
            _ => assert_eq!(order.reward_amount, 0.0),
        }

        let after = engine.seed_info("u1").await.unwrap();
        assert_eq!(after.round_id, before.round_id + 1);
        assert_eq!(after.client_seed, before.client_seed);
        assert_ne!(after.server_seed_hash, before.server_seed_hash);
    }

    #[tokio::test]
    async fn test_rejected_bet_keeps_round() {
        let engine = engine(Arc::new(MemorySessionStore::new()));
        let before = engine.seed_info("u1").await.unwrap();
        assert!(engine
            .place_bet("u1", RollBet { amount: 0.0, target: 50.0, is_above: 1 })
            .await
            .is_err());
        assert_eq!(engine.seed_info("u1").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_store_failure_keeps_round() {
        let store = Arc::new(MemorySessionStore::new());
        let engine = engine(store.clone());
        let before = engine.seed_info("u1").await.unwrap();

        store.fail_writes(true);
        assert!(engine
            .place_bet("u1", RollBet { amount: 1.0, target: 50.0, is_above: 0 })
            .await
            .is_err());
        assert_eq!(engine.seed_info("u1").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_history_newest_first() {
        let engine = engine(Arc::new(MemorySessionStore::new()));
        for _ in 0..3 {
            engine
                .place_bet("u1", RollBet { amount: 1.0, target: 50.0, is_above: 1 })
                .await
                .unwrap();
        }
        let orders = engine.user_orders("u1", 1, 2).await.unwrap();
        assert_eq!(orders.len(), 2);
        assert!(orders[0].round_id > orders[1].round_id);
    }
}
