//! Crash engine: public bet operations, history reads and lifecycle
//!
//! Round state sits behind one `tokio::sync::RwLock`. Placement takes the read
//! lock and relies on the ledger's insert-if-absent for duplicates; cancel,
//! escape and every phase transition take the write lock and persist before
//! touching memory. Cancel and escape first wait for the order's placement
//! write, so storage never falls back to an older status.

use super::round::{LiveRound, Order, OrderStatus, Round, RoundStatus, RoundView, TopOrders};
use super::EntropySource;
use crate::cache::{BoundedHistory, UserOrderCache, HISTORY_CAPACITY, USER_ORDER_CAPACITY};
use crate::common::types::current_timestamp_ms;
use crate::config::CrashSettings;
use crate::errors::{ConflictError, ValidationError, WagerError, WagerResult};
use crate::ledger::OrderLedger;
use crate::metrics::EngineMetrics;
use crate::notify::{user_channel, Event, Notifier, OrderAction, CHANNEL_ALL};
use crate::settlement::crash_payout;
use crate::storage::CrashStore;
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const MIN_AUTO_ESCAPE: f64 = 1.01;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Bet request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceBet {
    pub uid: String,
    pub bet_index: u32,
    pub amount: f64,
    /// 0 for none
    #[serde(default)]
    pub auto_escape_height: f64,
}

/// The running round and the one queued behind it
pub(super) struct RoundPair {
    pub current: LiveRound,
    pub next: LiveRound,
}

pub struct CrashEngine {
    pub(super) rounds: RwLock<RoundPair>,
    pub(super) settings: parking_lot::RwLock<CrashSettings>,
    pub(super) store: Arc<dyn CrashStore>,
    pub(super) notifier: Arc<dyn Notifier>,
    pub(super) entropy: Arc<dyn EntropySource>,
    pub(super) metrics: Arc<EngineMetrics>,
    pub(super) history: BoundedHistory<RoundView>,
    pub(super) user_orders: UserOrderCache<Order>,
    pending_writes: AtomicUsize,
    /// Placement writes still in flight, keyed by round and order id
    placements: DashMap<(u64, String), (u64, watch::Receiver<()>)>,
    placement_seq: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl CrashEngine {
    /// Recover persisted rounds and start the scheduler
    pub async fn start(
        settings: CrashSettings,
        store: Arc<dyn CrashStore>,
        notifier: Arc<dyn Notifier>,
        entropy: Arc<dyn EntropySource>,
        metrics: Arc<EngineMetrics>,
    ) -> WagerResult<Arc<Self>> {
        let settings = match store.load_settings().await {
            Ok(Some(stored)) => {
                info!("⚙️ Using crash settings from storage");
                stored
            }
            Ok(None) => settings,
            Err(e) => {
                warn!("Could not load crash settings from storage, using configured values: {}", e);
                settings
            }
        };

        let pair = Self::recover(&settings, store.as_ref(), entropy.as_ref()).await?;
        let history = BoundedHistory::new();
        match Self::load_history(store.as_ref(), HISTORY_CAPACITY).await {
            Ok(views) => history.reload(views.into_iter().rev().collect()),
            Err(e) => warn!("Crash history preload failed: {}", e),
        }

        info!(
            round_id = pair.current.round.round_id,
            status = %pair.current.round.status,
            "🚀 Crash engine started"
        );

        let (shutdown_tx, _) = watch::channel(false);
        let engine = Arc::new(Self {
            rounds: RwLock::new(pair),
            settings: parking_lot::RwLock::new(settings),
            store,
            notifier,
            entropy,
            metrics,
            history,
            user_orders: UserOrderCache::new(),
            pending_writes: AtomicUsize::new(0),
            placements: DashMap::new(),
            placement_seq: AtomicU64::new(0),
            shutdown_tx,
            workers: parking_lot::Mutex::new(Vec::new()),
        });
        let handles = engine.clone().spawn_workers(engine.shutdown_tx.subscribe());
        engine.workers.lock().extend(handles);
        Ok(engine)
    }

    /// Build a round with fresh seeds
    pub(super) fn create_round(&self, round_id: u64, settings: &CrashSettings) -> WagerResult<Round> {
        super::scheduler::new_round(self.entropy.as_ref(), round_id, settings)
    }

    /// Accept a bet into the current round, or the next one once betting closed
    ///
    /// The order is live as soon as this returns. Its write to storage runs
    /// in the background and a failed write removes the order again.
    pub async fn place_bet(self: &Arc<Self>, bet: PlaceBet) -> WagerResult<Order> {
        let pair = self.rounds.read().await;
        let live = if pair.current.round.status.accepts_bets() {
            &pair.current
        } else {
            &pair.next
        };

        if let Err(e) = validate_bet(&bet, &live.round) {
            self.metrics.record_rejection();
            return Err(e.into());
        }

        let order = Order::new(
            &bet.uid,
            bet.bet_index,
            live.round.round_id,
            bet.amount,
            bet.auto_escape_height,
            live.round.limits.rake,
        );
        if let Err(e) = live.ledger.insert(order.id(), order.clone()) {
            self.metrics.record_rejection();
            return Err(e.into());
        }
        live.top.track(&order);
        self.metrics.record_bet(order.bet_amount);
        self.user_orders.push(&order.uid, order.clone());
        self.persist_placement(live.ledger.clone(), live.top.clone(), order.clone());
        self.publish_order(OrderAction::Placed, &order);
        Ok(order)
    }

    /// Withdraw a bet before its round takes off
    pub async fn cancel_bet(&self, uid: &str, bet_index: u32) -> WagerResult<Order> {
        let pair = self.rounds.write().await;
        let live = if pair.current.round.status.accepts_bets() {
            &pair.current
        } else {
            &pair.next
        };

        let id = Order::key(uid, bet_index);
        self.wait_for_placement(live.round.round_id, &id).await;
        let order = live
            .ledger
            .get(&id)
            .ok_or_else(|| ConflictError::OrderNotFound(id.clone()))?;
        ensure_open(&order)?;

        let mut cancelled = order;
        cancelled.status = OrderStatus::CancelBet;
        self.store.save_order(&cancelled).await?;

        live.ledger.replace(&id, cancelled.clone());
        live.top.untrack(&id);
        self.user_orders
            .update(uid, |o| o.round_id == cancelled.round_id && o.bet_index == bet_index, cancelled.clone());
        self.publish_order(OrderAction::Cancelled, &cancelled);
        info!(round_id = cancelled.round_id, uid, bet_index, "Bet cancelled");
        Ok(cancelled)
    }

    /// Cash out a bet of the flying round at `height`
    pub async fn escape_bet(&self, uid: &str, bet_index: u32, height: f64) -> WagerResult<Order> {
        let pair = self.rounds.write().await;
        let live = &pair.current;
        let round = &live.round;
        let now = current_timestamp_ms();

        if round.status != RoundStatus::Flying || now >= round.schedule.crashed_time {
            let actual = if round.status == RoundStatus::Flying {
                RoundStatus::Crashed
            } else {
                round.status
            };
            return Err(ConflictError::WrongPhase {
                expected: "flying",
                actual: actual.to_string(),
            }
            .into());
        }

        let current = round.multiplier_at(now);
        if !height.is_finite() || height <= 1.0 || height > current {
            return Err(ValidationError::InvalidEscapeHeight { height, current }.into());
        }

        let id = Order::key(uid, bet_index);
        self.wait_for_placement(round.round_id, &id).await;
        let order = live
            .ledger
            .get(&id)
            .ok_or_else(|| ConflictError::OrderNotFound(id.clone()))?;
        ensure_open(&order)?;

        let mut escaped = order;
        escaped.escape_height = height;
        escaped.escape_time = now;
        escaped.reward_amount = crash_payout(escaped.delivery, height, round.limits.max_reward);
        escaped.status = OrderStatus::Escape;
        self.store.save_order(&escaped).await?;

        live.ledger.replace(&id, escaped.clone());
        live.top.track(&escaped);
        self.user_orders
            .update(uid, |o| o.round_id == escaped.round_id && o.bet_index == bet_index, escaped.clone());
        self.publish_order(OrderAction::Escaped, &escaped);
        info!(
            round_id = escaped.round_id,
            uid,
            bet_index,
            height,
            reward = escaped.reward_amount,
            "Bet escaped"
        );
        Ok(escaped)
    }

    /// Public view of the running round
    pub async fn get_round(&self) -> RoundView {
        let pair = self.rounds.read().await;
        pair.current.view(current_timestamp_ms())
    }

    /// Public view of the queued round
    pub async fn next_round(&self) -> RoundView {
        let pair = self.rounds.read().await;
        pair.next.view(current_timestamp_ms())
    }

    /// Live order by id in the current or next round
    pub async fn get_order(&self, uid: &str, bet_index: u32) -> Option<Order> {
        let pair = self.rounds.read().await;
        let id = Order::key(uid, bet_index);
        pair.current
            .ledger
            .get(&id)
            .or_else(|| pair.next.ledger.get(&id))
    }

    /// Settled rounds, newest first
    pub async fn recent_rounds(&self, page: usize, size: usize) -> WagerResult<Vec<RoundView>> {
        if let Some(views) = self.history.page(page, size) {
            return Ok(views);
        }
        let page = page.max(1);
        let views = Self::load_history(self.store.as_ref(), page * size).await?;
        if self.history.is_empty() {
            self.history
                .reload(views.iter().take(HISTORY_CAPACITY).rev().cloned().collect());
        }
        Ok(views.into_iter().skip((page - 1) * size).take(size).collect())
    }

    /// A user's crash orders, newest first
    pub async fn user_orders(&self, uid: &str, page: usize, size: usize) -> WagerResult<Vec<Order>> {
        if let Some(orders) = self.user_orders.page(uid, page, size) {
            return Ok(orders);
        }
        let page = page.max(1);
        let limit = (page * size).max(USER_ORDER_CAPACITY);
        let stored = self.store.user_orders(uid, limit).await?;

        // Live orders may not be stored yet; the write lock keeps placements
        // out until the cache holds them
        let pair = self.rounds.write().await;
        let mut newest_first = pair.current.ledger.filter(|o| o.uid == uid);
        newest_first.extend(pair.next.ledger.filter(|o| o.uid == uid));
        let live: HashSet<(u64, u32)> = newest_first.iter().map(|o| (o.round_id, o.bet_index)).collect();
        newest_first.extend(
            stored
                .into_iter()
                .filter(|o| !live.contains(&(o.round_id, o.bet_index))),
        );
        newest_first.sort_by(|a, b| {
            (b.round_id, b.created_at, b.bet_index).cmp(&(a.round_id, a.created_at, a.bet_index))
        });
        newest_first.truncate(limit);
        self.user_orders
            .seed(uid, newest_first.iter().rev().cloned().collect());
        drop(pair);
        Ok(newest_first
            .into_iter()
            .skip((page - 1) * size)
            .take(size)
            .collect())
    }

    /// New settings apply from the next round created
    pub fn update_settings(&self, settings: CrashSettings) {
        info!("⚙️ Crash settings updated: {:?}", settings);
        *self.settings.write() = settings;
    }

    pub fn settings(&self) -> CrashSettings {
        self.settings.read().clone()
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Stop the scheduler after the transition in progress, then wait for
    /// background writes
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Crash worker ended abnormally: {}", e);
            }
        }
        if !self.drain_writes(DRAIN_TIMEOUT).await {
            warn!(
                pending = self.pending_writes.load(Ordering::SeqCst),
                "Crash engine stopped with writes still in flight"
            );
        }
        info!("🛑 Crash engine stopped");
    }

    /// Wait until background writes finish or `timeout` passes
    async fn drain_writes(&self, timeout: Duration) -> bool {
        let started = Instant::now();
        while self.pending_writes.load(Ordering::SeqCst) > 0 {
            if started.elapsed() >= timeout {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }

    /// Wait until the placement write of an order has finished
    ///
    /// Later status writes must land after it, or the stored row would fall
    /// back to `Bet`.
    pub(super) async fn wait_for_placement(&self, round_id: u64, id: &str) {
        let pending = self
            .placements
            .get(&(round_id, id.to_string()))
            .map(|entry| entry.value().1.clone());
        if let Some(mut rx) = pending {
            // Resolves once the writer drops its sender
            let _ = rx.changed().await;
        }
    }

    /// Wait for every placement write of a round, up to `timeout`
    pub(super) async fn drain_placements(&self, round_id: u64, timeout: Duration) -> bool {
        let pending: Vec<watch::Receiver<()>> = self
            .placements
            .iter()
            .filter(|entry| entry.key().0 == round_id)
            .map(|entry| entry.value().1.clone())
            .collect();
        let all_done = join_all(pending.into_iter().map(|mut rx| async move {
            let _ = rx.changed().await;
        }));
        tokio::time::timeout(timeout, all_done).await.is_ok()
    }

    fn persist_placement(self: &Arc<Self>, ledger: Arc<OrderLedger<Order>>, top: Arc<TopOrders>, order: Order) {
        self.pending_writes.fetch_add(1, Ordering::SeqCst);
        let key = (order.round_id, order.id());
        let seq = self.placement_seq.fetch_add(1, Ordering::SeqCst);
        let (done_tx, done_rx) = watch::channel(());
        self.placements.insert(key.clone(), (seq, done_rx));
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.store.save_order(&order).await {
                let id = order.id();
                // Settlement may have moved the order on; its own write stands
                match ledger.remove_if(&id, |o| o.status == OrderStatus::Bet) {
                    Some(removed) => {
                        top.untrack(&id);
                        engine
                            .user_orders
                            .remove(&order.uid, |o| o.round_id == order.round_id && o.bet_index == order.bet_index);
                        engine.metrics.record_rollback(removed.bet_amount);
                        engine.publish_order(OrderAction::RolledBack, &removed);
                        error!(round_id = order.round_id, order_id = %id, "Bet persistence failed, rolled back: {}", e);
                    }
                    None => error!(round_id = order.round_id, order_id = %id, "Bet persistence failed after the order moved on: {}", e),
                }
            }
            // A rolled back id may already carry a newer placement
            engine.placements.remove_if(&key, |_, (pending, _)| *pending == seq);
            drop(done_tx);
            engine.pending_writes.fetch_sub(1, Ordering::SeqCst);
        });
    }

    /// Persist a round in the background; the in-memory copy stays authoritative
    pub(super) fn persist_round(self: &Arc<Self>, round: Round) {
        self.pending_writes.fetch_add(1, Ordering::SeqCst);
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.store.save_round(&round).await {
                error!(round_id = round.round_id, status = %round.status, "Round persistence failed: {}", e);
            }
            engine.pending_writes.fetch_sub(1, Ordering::SeqCst);
        });
    }

    pub(super) fn publish_round(&self, view: RoundView) {
        self.notifier.send(CHANNEL_ALL, &Event::Round { round: view });
    }

    pub(super) fn publish_order(&self, action: OrderAction, order: &Order) {
        let event = Event::CrashOrder {
            action,
            order: order.clone(),
        };
        self.notifier.send(CHANNEL_ALL, &event);
        self.notifier.send(&user_channel(&order.uid), &event);
    }

    /// Settled rounds from storage as views, newest first
    pub(super) async fn load_history(store: &dyn CrashStore, limit: usize) -> WagerResult<Vec<RoundView>> {
        let rounds = store.recent_rounds(limit).await?;
        let ids: Vec<u64> = rounds.iter().map(|r| r.round_id).collect();
        let mut counts: HashMap<u64, usize> = HashMap::new();
        for order in store.round_orders(&ids).await? {
            *counts.entry(order.round_id).or_insert(0) += 1;
        }
        let now = current_timestamp_ms();
        Ok(rounds
            .iter()
            .map(|r| r.view(now, counts.get(&r.round_id).copied().unwrap_or(0), Vec::new()))
            .collect())
    }
}

fn validate_bet(bet: &PlaceBet, round: &Round) -> Result<(), ValidationError> {
    let limits = &round.limits;
    if !bet.amount.is_finite() || bet.amount <= 0.0 || bet.amount < limits.min_bet || bet.amount > limits.max_bet {
        return Err(ValidationError::InvalidAmount {
            amount: bet.amount,
            min: limits.min_bet,
            max: limits.max_bet,
        });
    }
    let auto = bet.auto_escape_height;
    if !auto.is_finite() || (auto != 0.0 && auto < MIN_AUTO_ESCAPE) {
        return Err(ValidationError::InvalidAutoEscape(auto));
    }
    Ok(())
}

fn ensure_open(order: &Order) -> Result<(), WagerError> {
    let id = order.id();
    match order.status {
        OrderStatus::Bet => Ok(()),
        OrderStatus::CancelBet => Err(ConflictError::AlreadyCancelled(id).into()),
        OrderStatus::Escape => Err(ConflictError::AlreadyEscaped(id).into()),
        OrderStatus::Settle => Err(ConflictError::AlreadySettled(id).into()),
    }
}
