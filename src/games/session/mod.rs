//! Per-user session games: Dice, Limbo and Mine
//!
//! Each user holds one provably fair session per game. The session carries a
//! client seed chosen by the player and a server seed whose hash is public
//! until the round settles. Settling reveals the server seed, bumps the round
//! id and draws a fresh server seed; the client seed carries over.
//!
//! Sessions are loaded lazily from the [`SessionStore`] and serialized per
//! user behind a `tokio::sync::Mutex`, so a user's calls never interleave
//! while different users proceed in parallel. Idle sessions without an order
//! in progress are dropped from memory and reload on next use.

pub mod dice;
pub mod limbo;
pub mod mine;
mod roll;

pub use dice::{Dice, DiceEngine};
pub use limbo::{Limbo, LimboEngine};
pub use mine::MineEngine;
pub use roll::{roll_multiplier, RollBet, RollEngine, RollRules};

use crate::cache::UserOrderCache;
use crate::common::types::{current_timestamp_ms, random_seed_hex, round_money, sha256_hex, GameType};
use crate::config::SessionSettings;
use crate::errors::{ConflictError, ValidationError, WagerResult};
use crate::metrics::EngineMetrics;
use crate::notify::{user_channel, Event, Notifier};
use crate::storage::SessionStore;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

const CLIENT_SEED_BYTES: usize = 16;
const SERVER_SEED_BYTES: usize = 32;
const MAX_CLIENT_SEED_LEN: usize = 64;

/// Sessions held in memory before idle ones are swept on load
const SESSION_CAPACITY: usize = 10_000;

/// How long an unused session stays in memory
pub const SESSION_IDLE_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Win,
    Lose,
}

/// Game-specific part of a session order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionDetail {
    Roll {
        target: f64,
        is_above: u8,
        result: f64,
    },
    Mine {
        mine_count: u8,
        opened: Vec<u8>,
        /// Revealed at settlement
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        mines: Vec<u8>,
    },
}

/// One round of a session game
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionOrder {
    pub order_id: String,
    pub uid: String,
    pub game: GameType,
    pub round_id: u64,
    pub amount: f64,
    pub client_seed: String,
    pub server_seed_hash: String,
    /// Revealed at settlement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_seed: Option<String>,
    pub multiplier: f64,
    pub reward_amount: f64,
    pub status: SessionStatus,
    pub detail: SessionDetail,
    pub created_at: i64,
    pub settled_at: i64,
}

impl SessionOrder {
    pub fn open(session: &SessionState, amount: f64, detail: SessionDetail) -> Self {
        Self {
            order_id: uuid::Uuid::new_v4().to_string(),
            uid: session.uid.clone(),
            game: session.game,
            round_id: session.round_id,
            amount,
            client_seed: session.client_seed.clone(),
            server_seed_hash: session.server_seed_hash.clone(),
            server_seed: None,
            multiplier: 1.0,
            reward_amount: 0.0,
            status: SessionStatus::InProgress,
            detail,
            created_at: current_timestamp_ms(),
            settled_at: 0,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.status != SessionStatus::InProgress
    }

    /// Close the order, revealing the seed it was played with
    pub fn settle(&mut self, server_seed: &str, won: bool, multiplier: f64, max_reward: f64) {
        self.server_seed = Some(server_seed.to_string());
        self.multiplier = multiplier;
        if won {
            self.status = SessionStatus::Win;
            self.reward_amount = round_money((self.amount * multiplier).min(max_reward));
        } else {
            self.status = SessionStatus::Lose;
            self.reward_amount = 0.0;
        }
        self.settled_at = current_timestamp_ms();
    }
}

/// Persisted state of one user's session in one game
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionState {
    pub uid: String,
    pub game: GameType,
    pub client_seed: String,
    pub server_seed: String,
    pub server_seed_hash: String,
    pub round_id: u64,
    /// Unsettled Mine order, if any
    pub active: Option<SessionOrder>,
    /// Hidden mine cells of the active order
    #[serde(default)]
    pub mine_layout: Vec<u8>,
}

impl SessionState {
    pub fn new(game: GameType, uid: &str) -> Self {
        let server_seed = random_seed_hex(SERVER_SEED_BYTES);
        Self {
            uid: uid.to_string(),
            game,
            client_seed: random_seed_hex(CLIENT_SEED_BYTES),
            server_seed_hash: sha256_hex(&[server_seed.as_bytes()]),
            server_seed,
            round_id: 1,
            active: None,
            mine_layout: Vec::new(),
        }
    }

    /// State after a round settles: next round id, fresh server seed
    pub fn rotated(&self) -> Self {
        let server_seed = random_seed_hex(SERVER_SEED_BYTES);
        Self {
            uid: self.uid.clone(),
            game: self.game,
            client_seed: self.client_seed.clone(),
            server_seed_hash: sha256_hex(&[server_seed.as_bytes()]),
            server_seed,
            round_id: self.round_id + 1,
            active: None,
            mine_layout: Vec::new(),
        }
    }

    pub fn has_active(&self) -> bool {
        self.active.as_ref().map_or(false, |o| !o.is_settled())
    }

    pub fn seed_info(&self) -> SeedInfo {
        SeedInfo {
            client_seed: self.client_seed.clone(),
            server_seed_hash: self.server_seed_hash.clone(),
            round_id: self.round_id,
        }
    }
}

/// Public commitment of a session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeedInfo {
    pub client_seed: String,
    pub server_seed_hash: String,
    pub round_id: u64,
}

/// Result of a seed change: the retired server seed and the new commitment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeedChange {
    pub previous_client_seed: String,
    pub previous_server_seed: String,
    pub previous_server_seed_hash: String,
    pub current: SeedInfo,
}

struct SessionSlot {
    state: Arc<Mutex<SessionState>>,
    last_used: Instant,
}

impl SessionSlot {
    /// Unused for `idle_for`, not borrowed by a call and not mid-round
    fn is_idle(&self, idle_for: Duration) -> bool {
        if self.last_used.elapsed() < idle_for || Arc::strong_count(&self.state) > 1 {
            return false;
        }
        match self.state.try_lock() {
            Ok(state) => !state.has_active(),
            Err(_) => false,
        }
    }
}

/// Session bookkeeping shared by every session game
pub struct SessionBook {
    game: GameType,
    sessions: DashMap<String, SessionSlot>,
    settings: parking_lot::RwLock<SessionSettings>,
    store: Arc<dyn SessionStore>,
    notifier: Arc<dyn Notifier>,
    metrics: Arc<EngineMetrics>,
    history: UserOrderCache<SessionOrder>,
}

impl SessionBook {
    pub fn new(
        game: GameType,
        settings: SessionSettings,
        store: Arc<dyn SessionStore>,
        notifier: Arc<dyn Notifier>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            game,
            sessions: DashMap::new(),
            settings: parking_lot::RwLock::new(settings),
            store,
            notifier,
            metrics,
            history: UserOrderCache::new(),
        }
    }

    pub fn game(&self) -> GameType {
        self.game
    }

    pub fn settings(&self) -> SessionSettings {
        self.settings.read().clone()
    }

    /// New limits apply to the next placed bet
    pub fn update_settings(&self, settings: SessionSettings) {
        info!("⚙️ {} settings updated: {:?}", self.game, settings);
        *self.settings.write() = settings;
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub fn validate_amount(&self, amount: f64, settings: &SessionSettings) -> Result<(), ValidationError> {
        if !amount.is_finite() || amount <= 0.0 || amount < settings.min_bet || amount > settings.max_bet {
            return Err(ValidationError::InvalidAmount {
                amount,
                min: settings.min_bet,
                max: settings.max_bet,
            });
        }
        Ok(())
    }

    /// The user's session, loaded from storage on first use
    ///
    /// A brand new session is stored before anyone can use it, so its
    /// published seed hash survives eviction.
    pub async fn session(&self, uid: &str) -> WagerResult<Arc<Mutex<SessionState>>> {
        if let Some(mut slot) = self.sessions.get_mut(uid) {
            slot.last_used = Instant::now();
            return Ok(slot.state.clone());
        }

        let stored = self.store.load_session(self.game, uid).await?;
        let fresh = stored.is_none();
        let state = match stored {
            Some(state) => {
                debug!("Restored {} session for {} at round {}", self.game, uid, state.round_id);
                state
            }
            None => SessionState::new(self.game, uid),
        };

        let created = Arc::new(Mutex::new(state));
        let guard = created.clone().lock_owned().await;
        let session = self
            .sessions
            .entry(uid.to_string())
            .or_insert_with(|| SessionSlot {
                state: created.clone(),
                last_used: Instant::now(),
            })
            .state
            .clone();
        if !Arc::ptr_eq(&session, &created) {
            return Ok(session);
        }

        if fresh {
            if let Err(e) = self.store.commit(&guard, None).await {
                self.sessions
                    .remove_if(uid, |_, slot| Arc::ptr_eq(&slot.state, &created));
                return Err(e.into());
            }
        }
        drop(guard);

        if self.sessions.len() > SESSION_CAPACITY {
            self.evict_idle(SESSION_IDLE_TTL);
        }
        Ok(session)
    }

    /// Drop sessions unused for `idle_for` that have no order in progress
    pub fn evict_idle(&self, idle_for: Duration) -> usize {
        let mut evicted = 0;
        self.sessions.retain(|_, slot| {
            let idle = slot.is_idle(idle_for);
            if idle {
                evicted += 1;
            }
            !idle
        });
        if evicted > 0 {
            debug!(game = %self.game, evicted, remaining = self.sessions.len(), "Evicted idle sessions");
        }
        evicted
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Persist `next`, then make it the live state
    ///
    /// Nothing in memory changes when the store rejects the write.
    pub async fn commit(&self, current: &mut SessionState, next: SessionState, settled: Option<&SessionOrder>) -> WagerResult<()> {
        self.store.commit(&next, settled).await?;
        *current = next;
        if let Some(order) = settled {
            self.metrics.record_order_settled(order.reward_amount);
            self.history.push(&order.uid, order.clone());
            self.publish(order);
        }
        Ok(())
    }

    pub fn publish(&self, order: &SessionOrder) {
        self.notifier.send(
            &user_channel(&order.uid),
            &Event::SessionOrder { order: order.clone() },
        );
    }

    pub async fn seed_info(&self, uid: &str) -> WagerResult<SeedInfo> {
        let session = self.session(uid).await?;
        let state = session.lock().await;
        Ok(state.seed_info())
    }

    /// Replace the client seed and retire the server seed
    ///
    /// Rejected while an order is in progress, since its outcome is bound to
    /// the current pair.
    pub async fn change_seed(&self, uid: &str, client_seed: &str) -> WagerResult<SeedChange> {
        let client_seed = client_seed.trim();
        if client_seed.is_empty() || client_seed.len() > MAX_CLIENT_SEED_LEN {
            return Err(ValidationError::InvalidSeed(client_seed.to_string()).into());
        }

        let session = self.session(uid).await?;
        let mut state = session.lock().await;
        if state.has_active() {
            return Err(ConflictError::ActiveOrderExists(uid.to_string()).into());
        }

        let server_seed = random_seed_hex(SERVER_SEED_BYTES);
        let next = SessionState {
            client_seed: client_seed.to_string(),
            server_seed_hash: sha256_hex(&[server_seed.as_bytes()]),
            server_seed,
            ..state.clone()
        };
        let change = SeedChange {
            previous_client_seed: state.client_seed.clone(),
            previous_server_seed: state.server_seed.clone(),
            previous_server_seed_hash: state.server_seed_hash.clone(),
            current: next.seed_info(),
        };
        self.commit(&mut state, next, None).await?;
        info!("🔑 {} seed changed for {}", self.game, uid);
        Ok(change)
    }

    /// Settled orders newest first
    pub async fn user_orders(&self, uid: &str, page: usize, size: usize) -> WagerResult<Vec<SessionOrder>> {
        if let Some(orders) = self.history.page(uid, page, size) {
            return Ok(orders);
        }
        let limit = (page.max(1) * size).max(crate::cache::USER_ORDER_CAPACITY);
        let newest_first = self.store.user_orders(self.game, uid, limit).await?;
        self.history.seed(uid, newest_first.iter().rev().cloned().collect());
        let start = (page.max(1) - 1) * size;
        Ok(newest_first.into_iter().skip(start).take(size).collect())
    }
}
