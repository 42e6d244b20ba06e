//! In-memory stores
//!
//! Used by the `wagerhub` binary and the tests. Every store can be told to
//! fail reads or writes, or to delay writes, so that rollback and retry paths
//! can be exercised.

use super::{CrashStore, LotteryStore, SessionStore};
use crate::common::types::GameType;
use crate::config::{CrashSettings, LotterySettings};
use crate::errors::{StorageError, StorageResult};
use crate::games::crash::{Order, OrderStatus, Round};
use crate::games::lottery::{LotteryOrder, Period};
use crate::games::session::{SessionOrder, SessionState};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Switchable failures shared by the memory stores
#[derive(Default)]
struct Faults {
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    write_delay_ms: AtomicU64,
    writes: AtomicUsize,
}

impl Faults {
    async fn before_write(&self, what: &str) -> StorageResult<()> {
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed(format!("{} rejected", what)));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn before_read(&self, what: &str) -> StorageResult<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::ReadFailed(format!("{} unavailable", what)));
        }
        Ok(())
    }
}

macro_rules! fault_controls {
    ($store:ty) => {
        impl $store {
            /// Make every following write fail until reset
            pub fn fail_writes(&self, fail: bool) {
                self.faults.fail_writes.store(fail, Ordering::SeqCst);
            }

            pub fn fail_reads(&self, fail: bool) {
                self.faults.fail_reads.store(fail, Ordering::SeqCst);
            }

            /// Hold every write for `delay` before applying it
            pub fn set_write_delay(&self, delay: Duration) {
                self.faults
                    .write_delay_ms
                    .store(delay.as_millis() as u64, Ordering::SeqCst);
            }

            /// Number of successful writes so far
            pub fn write_count(&self) -> usize {
                self.faults.writes.load(Ordering::SeqCst)
            }
        }
    };
}

#[derive(Default)]
pub struct MemoryCrashStore {
    settings: RwLock<Option<CrashSettings>>,
    rounds: RwLock<BTreeMap<u64, Round>>,
    orders: RwLock<BTreeMap<(u64, String), Order>>,
    settlements: AtomicUsize,
    faults: Faults,
}

fault_controls!(MemoryCrashStore);

impl MemoryCrashStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: CrashSettings) -> Self {
        let store = Self::default();
        *store.settings.write() = Some(settings);
        store
    }

    /// Number of successful `settle_round` calls
    pub fn settlement_count(&self) -> usize {
        self.settlements.load(Ordering::SeqCst)
    }

    pub fn order(&self, round_id: u64, order_id: &str) -> Option<Order> {
        self.orders.read().get(&(round_id, order_id.to_string())).cloned()
    }
}

#[async_trait]
impl CrashStore for MemoryCrashStore {
    async fn load_settings(&self) -> StorageResult<Option<CrashSettings>> {
        self.faults.before_read("settings")?;
        Ok(self.settings.read().clone())
    }

    async fn save_round(&self, round: &Round) -> StorageResult<()> {
        self.faults.before_write("round").await?;
        let mut rounds = self.rounds.write();
        if rounds.get(&round.round_id).map_or(false, |r| r.settled && !round.settled) {
            return Ok(());
        }
        rounds.insert(round.round_id, round.clone());
        Ok(())
    }

    async fn get_round(&self, round_id: u64) -> StorageResult<Option<Round>> {
        self.faults.before_read("round")?;
        Ok(self.rounds.read().get(&round_id).cloned())
    }

    async fn latest_round(&self) -> StorageResult<Option<Round>> {
        self.faults.before_read("round")?;
        Ok(self.rounds.read().values().next_back().cloned())
    }

    async fn recent_rounds(&self, limit: usize) -> StorageResult<Vec<Round>> {
        self.faults.before_read("rounds")?;
        Ok(self
            .rounds
            .read()
            .values()
            .rev()
            .filter(|r| r.settled)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn unsettled_rounds(&self, before: u64) -> StorageResult<Vec<Round>> {
        self.faults.before_read("rounds")?;
        Ok(self
            .rounds
            .read()
            .range(..before)
            .map(|(_, r)| r)
            .filter(|r| !r.settled)
            .cloned()
            .collect())
    }

    async fn save_order(&self, order: &Order) -> StorageResult<()> {
        self.faults.before_write("order").await?;
        let mut orders = self.orders.write();
        let key = (order.round_id, order.id());
        if order.status == OrderStatus::Bet && orders.get(&key).map_or(false, |o| o.status != OrderStatus::Bet) {
            return Ok(());
        }
        orders.insert(key, order.clone());
        Ok(())
    }

    async fn round_orders(&self, round_ids: &[u64]) -> StorageResult<Vec<Order>> {
        self.faults.before_read("orders")?;
        let orders = self.orders.read();
        let mut found: Vec<Order> = orders
            .values()
            .filter(|o| round_ids.contains(&o.round_id))
            .cloned()
            .collect();
        found.sort_by_key(|o| (o.round_id, o.created_at));
        Ok(found)
    }

    async fn user_orders(&self, uid: &str, limit: usize) -> StorageResult<Vec<Order>> {
        self.faults.before_read("orders")?;
        let mut found: Vec<Order> = self
            .orders
            .read()
            .values()
            .filter(|o| o.uid == uid)
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            (b.round_id, b.created_at, b.bet_index).cmp(&(a.round_id, a.created_at, a.bet_index))
        });
        found.truncate(limit);
        Ok(found)
    }

    async fn settle_round(&self, round: &Round, orders: &[Order]) -> StorageResult<()> {
        self.faults.before_write("settlement").await?;
        let mut stored = self.orders.write();
        for order in orders {
            stored.insert((order.round_id, order.id()), order.clone());
        }
        self.rounds.write().insert(round.round_id, round.clone());
        self.settlements.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryLotteryStore {
    settings: RwLock<Option<LotterySettings>>,
    periods: RwLock<BTreeMap<(u32, u64), Period>>,
    orders: RwLock<HashMap<String, (u64, LotteryOrder)>>,
    next_seq: AtomicU64,
    settlements: AtomicUsize,
    faults: Faults,
}

fault_controls!(MemoryLotteryStore);

impl MemoryLotteryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: LotterySettings) -> Self {
        let store = Self::default();
        *store.settings.write() = Some(settings);
        store
    }

    pub fn settlement_count(&self) -> usize {
        self.settlements.load(Ordering::SeqCst)
    }

    pub fn period(&self, bet_type: u32, period_id: u64) -> Option<Period> {
        self.periods.read().get(&(bet_type, period_id)).cloned()
    }

    fn upsert_order(&self, order: &LotteryOrder) {
        let mut orders = self.orders.write();
        let seq = match orders.get(&order.order_id) {
            Some((seq, _)) => *seq,
            None => self.next_seq.fetch_add(1, Ordering::SeqCst),
        };
        orders.insert(order.order_id.clone(), (seq, order.clone()));
    }
}

#[async_trait]
impl LotteryStore for MemoryLotteryStore {
    async fn load_settings(&self) -> StorageResult<Option<LotterySettings>> {
        self.faults.before_read("settings")?;
        Ok(self.settings.read().clone())
    }

    async fn save_period(&self, period: &Period) -> StorageResult<()> {
        self.faults.before_write("period").await?;
        self.periods
            .write()
            .insert((period.bet_type, period.period_id), period.clone());
        Ok(())
    }

    async fn latest_period(&self, bet_type: u32) -> StorageResult<Option<Period>> {
        self.faults.before_read("period")?;
        Ok(self
            .periods
            .read()
            .range((bet_type, 0)..=(bet_type, u64::MAX))
            .next_back()
            .map(|(_, p)| p.clone()))
    }

    async fn recent_periods(&self, bet_type: u32, limit: usize) -> StorageResult<Vec<Period>> {
        self.faults.before_read("periods")?;
        Ok(self
            .periods
            .read()
            .range((bet_type, 0)..=(bet_type, u64::MAX))
            .rev()
            .map(|(_, p)| p)
            .filter(|p| p.settled)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn unsettled_periods(&self, bet_type: u32, before: u64) -> StorageResult<Vec<Period>> {
        self.faults.before_read("periods")?;
        Ok(self
            .periods
            .read()
            .range((bet_type, 0)..(bet_type, before))
            .map(|(_, p)| p)
            .filter(|p| !p.settled)
            .cloned()
            .collect())
    }

    async fn save_order(&self, order: &LotteryOrder) -> StorageResult<()> {
        self.faults.before_write("order").await?;
        self.upsert_order(order);
        Ok(())
    }

    async fn period_orders(&self, bet_type: u32, period_id: u64) -> StorageResult<Vec<LotteryOrder>> {
        self.faults.before_read("orders")?;
        let mut found: Vec<(u64, LotteryOrder)> = self
            .orders
            .read()
            .values()
            .filter(|(_, o)| o.bet_type == bet_type && o.period_id == period_id)
            .cloned()
            .collect();
        found.sort_by_key(|(seq, _)| *seq);
        Ok(found.into_iter().map(|(_, o)| o).collect())
    }

    async fn user_orders(&self, bet_type: u32, uid: &str, limit: usize) -> StorageResult<Vec<LotteryOrder>> {
        self.faults.before_read("orders")?;
        let mut found: Vec<(u64, LotteryOrder)> = self
            .orders
            .read()
            .values()
            .filter(|(_, o)| o.bet_type == bet_type && o.uid == uid)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(found.into_iter().take(limit).map(|(_, o)| o).collect())
    }

    async fn settle_period(&self, period: &Period, orders: &[LotteryOrder]) -> StorageResult<()> {
        self.faults.before_write("settlement").await?;
        for order in orders {
            self.upsert_order(order);
        }
        self.periods
            .write()
            .insert((period.bet_type, period.period_id), period.clone());
        self.settlements.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<(GameType, String), SessionState>>,
    orders: RwLock<HashMap<(GameType, String), Vec<SessionOrder>>>,
    faults: Faults,
}

fault_controls!(MemorySessionStore);

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load_session(&self, game: GameType, uid: &str) -> StorageResult<Option<SessionState>> {
        self.faults.before_read("session")?;
        Ok(self.sessions.read().get(&(game, uid.to_string())).cloned())
    }

    async fn commit(&self, state: &SessionState, settled: Option<&SessionOrder>) -> StorageResult<()> {
        self.faults.before_write("session").await?;
        let key = (state.game, state.uid.clone());
        if let Some(order) = settled {
            self.orders
                .write()
                .entry(key.clone())
                .or_default()
                .push(order.clone());
        }
        self.sessions.write().insert(key, state.clone());
        Ok(())
    }

    async fn user_orders(&self, game: GameType, uid: &str, limit: usize) -> StorageResult<Vec<SessionOrder>> {
        self.faults.before_read("orders")?;
        Ok(self
            .orders
            .read()
            .get(&(game, uid.to_string()))
            .map(|orders| orders.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
