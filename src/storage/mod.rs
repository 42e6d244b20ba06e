//! Persistence boundary for the engines
//!
//! Each game talks to storage through one of the traits below. Writes that
//! must land together (a round and all its orders, a period and its orders, a
//! session and its settled order) are single calls so an implementation can
//! make them atomic.

pub mod memory;

pub use memory::{MemoryCrashStore, MemoryLotteryStore, MemorySessionStore};

use crate::common::types::GameType;
use crate::config::{CrashSettings, LotterySettings};
use crate::errors::StorageResult;
use crate::games::crash::{Order, Round};
use crate::games::lottery::{LotteryOrder, Period};
use crate::games::session::{SessionOrder, SessionState};
use async_trait::async_trait;

/// Crash rounds and orders
#[async_trait]
pub trait CrashStore: Send + Sync {
    /// Operator settings kept alongside the data, if any
    async fn load_settings(&self) -> StorageResult<Option<CrashSettings>>;

    /// Insert or overwrite a round; a settled round is never reverted
    async fn save_round(&self, round: &Round) -> StorageResult<()>;

    async fn get_round(&self, round_id: u64) -> StorageResult<Option<Round>>;

    /// Round with the highest id
    async fn latest_round(&self) -> StorageResult<Option<Round>>;

    /// Settled rounds, newest first
    async fn recent_rounds(&self, limit: usize) -> StorageResult<Vec<Round>>;

    /// Unsettled rounds with an id below `before`
    async fn unsettled_rounds(&self, before: u64) -> StorageResult<Vec<Round>>;

    /// Insert or overwrite an order; a resolved order never returns to `Bet`
    async fn save_order(&self, order: &Order) -> StorageResult<()>;

    async fn round_orders(&self, round_ids: &[u64]) -> StorageResult<Vec<Order>>;

    /// A user's orders, newest first
    async fn user_orders(&self, uid: &str, limit: usize) -> StorageResult<Vec<Order>>;

    /// Persist a settled round with every order it resolved
    async fn settle_round(&self, round: &Round, orders: &[Order]) -> StorageResult<()>;
}

/// Lottery periods and orders for one game
#[async_trait]
pub trait LotteryStore: Send + Sync {
    async fn load_settings(&self) -> StorageResult<Option<LotterySettings>>;

    async fn save_period(&self, period: &Period) -> StorageResult<()>;

    async fn latest_period(&self, bet_type: u32) -> StorageResult<Option<Period>>;

    /// Settled periods of a room, newest first
    async fn recent_periods(&self, bet_type: u32, limit: usize) -> StorageResult<Vec<Period>>;

    /// Unsettled periods of a room with an id below `before`
    async fn unsettled_periods(&self, bet_type: u32, before: u64) -> StorageResult<Vec<Period>>;

    async fn save_order(&self, order: &LotteryOrder) -> StorageResult<()>;

    async fn period_orders(&self, bet_type: u32, period_id: u64) -> StorageResult<Vec<LotteryOrder>>;

    /// A user's orders in a room, newest first
    async fn user_orders(&self, bet_type: u32, uid: &str, limit: usize) -> StorageResult<Vec<LotteryOrder>>;

    /// Persist a settled period with every order it resolved
    async fn settle_period(&self, period: &Period, orders: &[LotteryOrder]) -> StorageResult<()>;
}

/// Per-user session state and settled session orders
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_session(&self, game: GameType, uid: &str) -> StorageResult<Option<SessionState>>;

    /// Write the session, and the order it just settled if any
    async fn commit(&self, state: &SessionState, settled: Option<&SessionOrder>) -> StorageResult<()>;

    /// Settled orders, newest first
    async fn user_orders(&self, game: GameType, uid: &str, limit: usize) -> StorageResult<Vec<SessionOrder>>;
}
