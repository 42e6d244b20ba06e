//! Lottery engine: rooms plus the actors that drive their phases
//!
//! Each actor owns one state machine and an event inbox. Entering a phase runs
//! the entry effect on every room the actor drives, then spawns a sleep task
//! that posts the follow-up event back into the inbox. Independent pacing gives
//! every room its own actor; lockstep pacing runs all rooms under one.

use super::fsm::{Phase, PhaseEvent};
use super::period::{LotteryOrder, Period};
use super::room::{Room, RoomContext};
use super::ticket::LotteryKind;
use super::PriceFeed;
use crate::config::LotterySettings;
use crate::errors::{ConflictError, WagerResult};
use crate::metrics::EngineMetrics;
use crate::notify::Notifier;
use crate::storage::LotteryStore;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const INBOX_CAPACITY: usize = 8;

/// How rooms of one engine share phase timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// One state machine per room
    Independent,
    /// One state machine for every room
    Lockstep,
}

/// Name, number range and pacing of a lottery product
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LotteryGame {
    pub name: &'static str,
    pub kind: LotteryKind,
    pub pacing: Pacing,
}

impl LotteryGame {
    pub const WINGO: LotteryGame = LotteryGame {
        name: "wingo",
        kind: LotteryKind::Wingo,
        pacing: Pacing::Independent,
    };

    pub const NINE: LotteryGame = LotteryGame {
        name: "nine",
        kind: LotteryKind::Nine,
        pacing: Pacing::Independent,
    };

    pub const MULTI_WINGO: LotteryGame = LotteryGame {
        name: "multi_wingo",
        kind: LotteryKind::Wingo,
        pacing: Pacing::Lockstep,
    };
}

pub struct LotteryEngine {
    game: LotteryGame,
    rooms: BTreeMap<u32, Arc<Room>>,
    settings: Arc<RwLock<LotterySettings>>,
    metrics: Arc<EngineMetrics>,
    shutdown_tx: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl LotteryEngine {
    /// Recover every room and start its phase actor
    pub async fn start(
        game: LotteryGame,
        settings: LotterySettings,
        store: Arc<dyn LotteryStore>,
        notifier: Arc<dyn Notifier>,
        price: Arc<dyn PriceFeed>,
        metrics: Arc<EngineMetrics>,
    ) -> WagerResult<Arc<Self>> {
        let settings = match store.load_settings().await {
            Ok(Some(stored)) => {
                info!(engine = game.name, "⚙️ Using lottery settings from storage");
                stored
            }
            Ok(None) => settings,
            Err(e) => {
                warn!(engine = game.name, "Could not load lottery settings from storage, using configured values: {}", e);
                settings
            }
        };

        let bet_types = settings.bet_types.clone();
        let settings = Arc::new(RwLock::new(settings));
        let ctx = RoomContext {
            engine: game.name,
            kind: game.kind,
            settings: settings.clone(),
            store,
            notifier,
            price,
            metrics: metrics.clone(),
        };

        let mut rooms = BTreeMap::new();
        for bet_type in bet_types {
            let room = Room::recover(bet_type, ctx.clone()).await?;
            rooms.insert(bet_type, Arc::new(room));
        }

        let (shutdown_tx, _) = watch::channel(false);
        let engine = Arc::new(Self {
            game,
            rooms,
            settings,
            metrics,
            shutdown_tx,
            workers: Mutex::new(Vec::new()),
        });

        let groups: Vec<Vec<Arc<Room>>> = match game.pacing {
            Pacing::Independent => engine.rooms.values().map(|r| vec![r.clone()]).collect(),
            Pacing::Lockstep => vec![engine.rooms.values().cloned().collect()],
        };
        let handles: Vec<JoinHandle<()>> = groups
            .into_iter()
            .filter(|rooms| !rooms.is_empty())
            .map(|rooms| engine.spawn_machine(rooms))
            .collect();
        engine.workers.lock().extend(handles);

        info!(
            engine = game.name,
            rooms = engine.rooms.len(),
            pacing = ?game.pacing,
            "🚀 Lottery engine started"
        );
        Ok(engine)
    }

    fn spawn_machine(&self, rooms: Vec<Arc<Room>>) -> JoinHandle<()> {
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let machine = PhaseMachine {
            engine: self.game.name,
            rooms,
            settings: self.settings.clone(),
            tx,
        };
        tokio::spawn(machine.run(rx, self.shutdown_tx.subscribe()))
    }

    pub fn game(&self) -> LotteryGame {
        self.game
    }

    pub fn room_ids(&self) -> Vec<u32> {
        self.rooms.keys().copied().collect()
    }

    fn room(&self, bet_type: u32) -> WagerResult<&Arc<Room>> {
        self.rooms
            .get(&bet_type)
            .ok_or_else(|| ConflictError::RoomNotFound(bet_type).into())
    }

    /// Buy a ticket for the active period of a room
    pub async fn create_order(&self, bet_type: u32, uid: &str, period_id: u64, ticket: &str, amount: f64) -> WagerResult<LotteryOrder> {
        let result = match self.room(bet_type) {
            Ok(room) => room.create_order(uid, period_id, ticket, amount).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            if e.is_rejection() {
                self.metrics.record_rejection();
            }
        }
        result
    }

    /// Admin override of the active period's draw
    pub async fn preset_number(&self, bet_type: u32, period_id: u64, number: i32) -> WagerResult<Period> {
        self.room(bet_type)?.preset_number(period_id, number).await
    }

    pub async fn current_period(&self, bet_type: u32) -> WagerResult<Option<Period>> {
        Ok(self.room(bet_type)?.current_period().await)
    }

    pub async fn phase(&self, bet_type: u32) -> WagerResult<Phase> {
        Ok(self.room(bet_type)?.phase().await)
    }

    /// Settled periods of a room, newest first
    pub async fn period_history(&self, bet_type: u32, page: usize, size: usize) -> WagerResult<Vec<Period>> {
        self.room(bet_type)?.period_history(page, size).await
    }

    /// A user's orders in a room, newest first
    pub async fn user_orders(&self, bet_type: u32, uid: &str, page: usize, size: usize) -> WagerResult<Vec<LotteryOrder>> {
        self.room(bet_type)?.user_orders(uid, page, size).await
    }

    /// New values apply from the next period opened
    pub fn update_settings(&self, settings: LotterySettings) {
        info!(engine = self.game.name, "⚙️ Lottery settings updated: {:?}", settings);
        *self.settings.write() = settings;
    }

    pub fn settings(&self) -> LotterySettings {
        self.settings.read().clone()
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    /// Stop every actor once its current phase effect has finished
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(engine = self.game.name, "Lottery actor ended abnormally: {}", e);
            }
        }
        info!(engine = self.game.name, "🛑 Lottery engine stopped");
    }
}

/// Single-threaded actor owning one state machine
struct PhaseMachine {
    engine: &'static str,
    rooms: Vec<Arc<Room>>,
    settings: Arc<RwLock<LotterySettings>>,
    tx: mpsc::Sender<PhaseEvent>,
}

impl PhaseMachine {
    async fn run(self, mut inbox: mpsc::Receiver<PhaseEvent>, mut shutdown: watch::Receiver<bool>) {
        let mut phase = Phase::Init;
        let mut timer: Option<JoinHandle<()>> = None;
        if self.tx.send(PhaseEvent::Start).await.is_err() {
            return;
        }

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                Some(event) = inbox.recv() => {
                    let Some(next) = phase.on(event) else {
                        warn!(engine = self.engine, phase = %phase, ?event, "Ignoring event with no transition");
                        continue;
                    };
                    phase = next;
                    join_all(self.rooms.iter().map(|room| room.enter(next))).await;
                    timer = self.arm(next);
                }
                else => break,
            }
        }

        if let Some(timer) = timer {
            timer.abort();
        }
        debug!(engine = self.engine, rooms = self.rooms.len(), "Lottery actor stopped");
    }

    /// Post the follow-up event of `phase` after its interval
    fn arm(&self, phase: Phase) -> Option<JoinHandle<()>> {
        let (event, delay) = phase.follow_up(&self.settings.read())?;
        let tx = self.tx.clone();
        Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event).await;
        }))
    }
}
