//! Mine: open cells on a 5x5 board until cashing out or hitting a mine
//!
//! The full layout is derived at placement and stays hidden in the session
//! until the round ends.

use super::{SeedChange, SeedInfo, SessionBook, SessionDetail, SessionOrder, SessionState};
use crate::common::types::GameType;
use crate::config::SessionSettings;
use crate::errors::{ConflictError, ValidationError, WagerResult};
use crate::fairness::{self, MINE_BOARD_SIZE};
use crate::metrics::EngineMetrics;
use crate::notify::Notifier;
use crate::storage::SessionStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MineBet {
    pub amount: f64,
    pub mine_count: u8,
}

pub struct MineEngine {
    book: SessionBook,
}

/// Unsettled order of a session together with its board
fn active_order(state: &SessionState) -> WagerResult<SessionOrder> {
    match &state.active {
        Some(order) if !order.is_settled() => Ok(order.clone()),
        _ => Err(ConflictError::NoActiveOrder(state.uid.clone()).into()),
    }
}

impl MineEngine {
    pub fn new(
        settings: SessionSettings,
        store: Arc<dyn SessionStore>,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            book: SessionBook::new(GameType::Mine, settings, store, notifier, metrics),
        }
    }

    pub fn book(&self) -> &SessionBook {
        &self.book
    }

    /// Start a round with a fixed number of mines
    pub async fn place_bet(&self, uid: &str, bet: MineBet) -> WagerResult<SessionOrder> {
        let settings = self.book.settings();
        let checked = self.book.validate_amount(bet.amount, &settings).and_then(|_| {
            if (1..MINE_BOARD_SIZE as u8).contains(&bet.mine_count) {
                Ok(())
            } else {
                Err(ValidationError::InvalidMineCount(bet.mine_count))
            }
        });
        if let Err(e) = checked {
            self.book.metrics().record_rejection();
            return Err(e.into());
        }

        let session = self.book.session(uid).await?;
        let mut state = session.lock().await;
        if state.has_active() {
            return Err(ConflictError::ActiveOrderExists(uid.to_string()).into());
        }

        let layout = fairness::mine_positions(&state.client_seed, &state.server_seed, bet.mine_count)?;
        let order = SessionOrder::open(
            &state,
            bet.amount,
            SessionDetail::Mine {
                mine_count: bet.mine_count,
                opened: Vec::new(),
                mines: Vec::new(),
            },
        );
        let next = SessionState {
            active: Some(order.clone()),
            mine_layout: layout,
            ..state.clone()
        };
        self.book.commit(&mut state, next, None).await?;
        self.book.metrics().record_bet(bet.amount);
        self.book.publish(&order);
        debug!("💣 Mine round {} for {} with {} mines", order.round_id, uid, bet.mine_count);
        Ok(order)
    }

    /// Reveal one cell
    pub async fn open_position(&self, uid: &str, index: usize) -> WagerResult<SessionOrder> {
        if index >= MINE_BOARD_SIZE {
            return Err(ValidationError::InvalidPosition(index).into());
        }
        let settings = self.book.settings();
        let session = self.book.session(uid).await?;
        let mut state = session.lock().await;
        let mut order = active_order(&state)?;

        let cell = index as u8;
        let (hit, opened_count, mine_count) = match &mut order.detail {
            SessionDetail::Mine { mine_count, opened, .. } => {
                if opened.contains(&cell) {
                    return Err(ConflictError::PositionAlreadyOpened(index).into());
                }
                opened.push(cell);
                (state.mine_layout.contains(&cell), opened.len(), *mine_count)
            }
            SessionDetail::Roll { .. } => return Err(ConflictError::NoActiveOrder(uid.to_string()).into()),
        };

        if hit {
            self.reveal(&mut order, &state);
            order.settle(&state.server_seed, false, 0.0, settings.max_reward);
            let next = state.rotated();
            self.book.commit(&mut state, next, Some(&order)).await?;
            debug!("💥 {} hit a mine at {} in round {}", uid, index, order.round_id);
            return Ok(order);
        }

        order.multiplier = fairness::calc_multiple(mine_count, opened_count, settings.rake);
        if opened_count == MINE_BOARD_SIZE - mine_count as usize {
            self.reveal(&mut order, &state);
            let multiplier = order.multiplier;
            order.settle(&state.server_seed, true, multiplier, settings.max_reward);
            let next = state.rotated();
            self.book.commit(&mut state, next, Some(&order)).await?;
            return Ok(order);
        }

        let next = SessionState {
            active: Some(order.clone()),
            ..state.clone()
        };
        self.book.commit(&mut state, next, None).await?;
        self.book.publish(&order);
        Ok(order)
    }

    /// End the round at the current multiplier
    pub async fn cashout(&self, uid: &str) -> WagerResult<SessionOrder> {
        let settings = self.book.settings();
        let session = self.book.session(uid).await?;
        let mut state = session.lock().await;
        let mut order = active_order(&state)?;

        let opened = match &order.detail {
            SessionDetail::Mine { opened, .. } => opened.len(),
            SessionDetail::Roll { .. } => 0,
        };
        if opened == 0 {
            return Err(ConflictError::NothingOpened.into());
        }

        self.reveal(&mut order, &state);
        let multiplier = order.multiplier;
        order.settle(&state.server_seed, true, multiplier, settings.max_reward);
        let next = state.rotated();
        self.book.commit(&mut state, next, Some(&order)).await?;
        debug!("💰 {} cashed out round {} at {}x", uid, order.round_id, multiplier);
        Ok(order)
    }

    /// The user's unsettled order, mines still hidden
    pub async fn active(&self, uid: &str) -> WagerResult<Option<SessionOrder>> {
        let session = self.book.session(uid).await?;
        let state = session.lock().await;
        Ok(state.active.clone().filter(|o| !o.is_settled()))
    }

    pub async fn change_seed(&self, uid: &str, client_seed: &str) -> WagerResult<SeedChange> {
        self.book.change_seed(uid, client_seed).await
    }

    pub async fn seed_info(&self, uid: &str) -> WagerResult<SeedInfo> {
        self.book.seed_info(uid).await
    }

    pub async fn user_orders(&self, uid: &str, page: usize, size: usize) -> WagerResult<Vec<SessionOrder>> {
        self.book.user_orders(uid, page, size).await
    }

    pub fn update_settings(&self, settings: SessionSettings) {
        self.book.update_settings(settings);
    }

    fn reveal(&self, order: &mut SessionOrder, state: &SessionState) {
        if let SessionDetail::Mine { mines, .. } = &mut order.detail {
            *mines = state.mine_layout.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::round_money;
    use crate::errors::WagerError;
    use crate::games::session::SessionStatus;
    use crate::notify::NullNotifier;
    use crate::storage::MemorySessionStore;

    fn engine(store: Arc<MemorySessionStore>) -> MineEngine {
        MineEngine::new(
            SessionSettings::default(),
            store,
            Arc::new(NullNotifier),
            Arc::new(EngineMetrics::new()),
        )
    }

    async fn layout(engine: &MineEngine, uid: &str, mine_count: u8) -> Vec<u8> {
        let session = engine.book.session(uid).await.unwrap();
        let state = session.lock().await;
        fairness::mine_positions(&state.client_seed, &state.server_seed, mine_count).unwrap()
    }

    fn first_safe(mines: &[u8]) -> usize {
        (0..MINE_BOARD_SIZE).find(|i| !mines.contains(&(*i as u8))).unwrap()
    }

    #[tokio::test]
    async fn test_one_active_order_per_user() {
        let engine = engine(Arc::new(MemorySessionStore::new()));
        engine.place_bet("u1", MineBet { amount: 1.0, mine_count: 3 }).await.unwrap();
        let err = engine.place_bet("u1", MineBet { amount: 1.0, mine_count: 3 }).await.unwrap_err();
        assert!(matches!(err, WagerError::Conflict(ConflictError::ActiveOrderExists(_))));
        assert!(engine.place_bet("u2", MineBet { amount: 1.0, mine_count: 3 }).await.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_mine_count() {
        let engine = engine(Arc::new(MemorySessionStore::new()));
        for count in [0, 25] {
            let err = engine.place_bet("u1", MineBet { amount: 1.0, mine_count: count }).await.unwrap_err();
            assert!(matches!(err, WagerError::Validation(ValidationError::InvalidMineCount(_))));
        }
    }

    #[tokio::test]
    async fn test_open_then_cashout() {
        let engine = engine(Arc::new(MemorySessionStore::new()));
        let mines = layout(&engine, "u1", 5).await;
        engine.place_bet("u1", MineBet { amount: 10.0, mine_count: 5 }).await.unwrap();

        let cashout_err = engine.cashout("u1").await.unwrap_err();
        assert!(matches!(cashout_err, WagerError::Conflict(ConflictError::NothingOpened)));

        let safe = first_safe(&mines);
        let order = engine.open_position("u1", safe).await.unwrap();
        assert_eq!(order.multiplier, fairness::calc_multiple(5, 1, 10));
        assert!(!order.is_settled());

        let again = engine.open_position("u1", safe).await.unwrap_err();
        assert!(matches!(again, WagerError::Conflict(ConflictError::PositionAlreadyOpened(_))));

        let settled = engine.cashout("u1").await.unwrap();
        assert_eq!(settled.status, SessionStatus::Win);
        assert_eq!(settled.reward_amount, round_money(10.0 * settled.multiplier));
        match &settled.detail {
            SessionDetail::Mine { mines: revealed, .. } => assert_eq!(revealed, &mines),
            _ => panic!("expected mine detail"),
        }
        assert!(engine.active("u1").await.unwrap().is_none());
        assert_eq!(engine.seed_info("u1").await.unwrap().round_id, 2);
    }

    #[tokio::test]
    async fn test_hitting_a_mine_loses() {
        let engine = engine(Arc::new(MemorySessionStore::new()));
        let mines = layout(&engine, "u1", 3).await;
        engine.place_bet("u1", MineBet { amount: 10.0, mine_count: 3 }).await.unwrap();

        let order = engine.open_position("u1", mines[0] as usize).await.unwrap();
        assert_eq!(order.status, SessionStatus::Lose);
        assert_eq!(order.reward_amount, 0.0);
        assert!(order.server_seed.is_some());

        let err = engine.open_position("u1", 0).await.unwrap_err();
        assert!(matches!(err, WagerError::Conflict(ConflictError::NoActiveOrder(_))));
    }

    #[tokio::test]
    async fn test_clearing_board_auto_settles() {
        let engine = engine(Arc::new(MemorySessionStore::new()));
        let mines = layout(&engine, "u1", 24).await;
        engine.place_bet("u1", MineBet { amount: 1.0, mine_count: 24 }).await.unwrap();

        let order = engine.open_position("u1", first_safe(&mines)).await.unwrap();
        assert_eq!(order.status, SessionStatus::Win);
        assert_eq!(order.multiplier, 24.75);
        assert_eq!(order.reward_amount, 24.75);
    }

    #[tokio::test]
    async fn test_position_out_of_range() {
        let engine = engine(Arc::new(MemorySessionStore::new()));
        let err = engine.open_position("u1", 25).await.unwrap_err();
        assert!(matches!(err, WagerError::Validation(ValidationError::InvalidPosition(25))));
    }

    #[tokio::test]
    async fn test_change_seed_blocked_while_playing() {
        let engine = engine(Arc::new(MemorySessionStore::new()));
        engine.place_bet("u1", MineBet { amount: 1.0, mine_count: 1 }).await.unwrap();
        let err = engine.change_seed("u1", "new").await.unwrap_err();
        assert!(matches!(err, WagerError::Conflict(ConflictError::ActiveOrderExists(_))));
    }

    #[tokio::test]
    async fn test_active_round_survives_restart() {
        let store = Arc::new(MemorySessionStore::new());
        let first = engine(store.clone());
        first.place_bet("u1", MineBet { amount: 2.0, mine_count: 4 }).await.unwrap();

        let second = engine(store);
        let active = second.active("u1").await.unwrap().unwrap();
        assert_eq!(active.amount, 2.0);
        assert_eq!(second.book.session("u1").await.unwrap().lock().await.mine_layout.len(), 4);
    }
}
