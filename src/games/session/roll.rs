//! Single-roll games settled at placement

use super::{SeedChange, SeedInfo, SessionBook, SessionDetail, SessionOrder};
use crate::common::types::{round_to, GameType};
use crate::config::SessionSettings;
use crate::errors::{ValidationError, WagerResult};
use crate::metrics::EngineMetrics;
use crate::notify::Notifier;
use crate::storage::SessionStore;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// Win rule of a roll game
pub trait RollRules: Send + Sync + 'static {
    const GAME: GameType;

    /// Roll in [0, 100.00] for the seed pair
    fn roll(client_seed: &str, server_seed: &str) -> f64;

    /// Chance of winning in percent
    fn win_chance(is_above: u8, target: f64) -> f64;

    fn is_win(is_above: u8, result: f64, target: f64) -> bool;
}

/// Payout multiplier for a win chance in percent, rake in per mille
pub fn roll_multiplier(rake: u32, win_chance: f64) -> f64 {
    round_to((100.0 - rake as f64 / 10.0) / win_chance, 4)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollBet {
    pub amount: f64,
    pub target: f64,
    /// 1 for above, 0 for below
    pub is_above: u8,
}

impl RollBet {
    fn validate(&self) -> Result<(), ValidationError> {
        if !self.target.is_finite() || self.target <= 0.0 || self.target >= 100.0 {
            return Err(ValidationError::InvalidTarget(self.target));
        }
        if self.is_above > 1 {
            return Err(ValidationError::InvalidDirection(self.is_above));
        }
        Ok(())
    }
}

/// Session engine for a roll game
pub struct RollEngine<R: RollRules> {
    book: SessionBook,
    _rules: PhantomData<R>,
}

impl<R: RollRules> RollEngine<R> {
    pub fn new(
        settings: SessionSettings,
        store: Arc<dyn SessionStore>,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            book: SessionBook::new(R::GAME, settings, store, notifier, metrics),
            _rules: PhantomData,
        }
    }

    pub fn book(&self) -> &SessionBook {
        &self.book
    }

    /// Roll once and settle immediately
    pub async fn place_bet(&self, uid: &str, bet: RollBet) -> WagerResult<SessionOrder> {
        let settings = self.book.settings();
        if let Err(e) = self
            .book
            .validate_amount(bet.amount, &settings)
            .and_then(|_| bet.validate())
        {
            self.book.metrics().record_rejection();
            return Err(e.into());
        }

        let session = self.book.session(uid).await?;
        let mut state = session.lock().await;

        let result = R::roll(&state.client_seed, &state.server_seed);
        let won = R::is_win(bet.is_above, result, bet.target);
        let multiplier = roll_multiplier(settings.rake, R::win_chance(bet.is_above, bet.target));

        let mut order = SessionOrder::open(
            &state,
            bet.amount,
            SessionDetail::Roll {
                target: bet.target,
                is_above: bet.is_above,
                result,
            },
        );
        order.settle(&state.server_seed, won, multiplier, settings.max_reward);

        let next = state.rotated();
        self.book.commit(&mut state, next, Some(&order)).await?;
        self.book.metrics().record_bet(bet.amount);
        debug!(
            "🎲 {} {} round {}: roll {} vs {} -> {:?} {}",
            R::GAME, uid, order.round_id, result, bet.target, order.status, order.reward_amount
        );
        Ok(order)
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
}
