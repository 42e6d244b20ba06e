//! Round scheduler: deadline ticker, serial transition consumer and recovery
//!
//! The ticker only compares the clock with the current deadline and drops a
//! signal into the matching single-slot channel. The consumer drains those
//! channels one at a time, so no two transitions ever overlap. A signal that
//! no longer matches the round's status is ignored.

use super::engine::{CrashEngine, RoundPair};
use super::round::{LiveRound, OrderStatus, Round, RoundStatus};
use super::EntropySource;
use crate::common::types::current_timestamp_ms;
use crate::config::CrashSettings;
use crate::errors::WagerResult;
use crate::notify::OrderAction;
use crate::settlement::{self, crash_payout, max_reward_height};
use crate::storage::CrashStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// How long settlement waits for in-flight bet writes of the round
const SETTLE_WRITE_WAIT: Duration = Duration::from_secs(2);

struct SignalTx {
    countdown: mpsc::Sender<()>,
    takeoff: mpsc::Sender<()>,
    flying: mpsc::Sender<()>,
    crashed: mpsc::Sender<()>,
    result: mpsc::Sender<()>,
    waiting: mpsc::Sender<()>,
    flying_check: mpsc::Sender<()>,
}

struct SignalRx {
    countdown: mpsc::Receiver<()>,
    takeoff: mpsc::Receiver<()>,
    flying: mpsc::Receiver<()>,
    crashed: mpsc::Receiver<()>,
    result: mpsc::Receiver<()>,
    waiting: mpsc::Receiver<()>,
    flying_check: mpsc::Receiver<()>,
}

fn signal_channels() -> (SignalTx, SignalRx) {
    let (countdown_tx, countdown_rx) = mpsc::channel(1);
    let (takeoff_tx, takeoff_rx) = mpsc::channel(1);
    let (flying_tx, flying_rx) = mpsc::channel(1);
    let (crashed_tx, crashed_rx) = mpsc::channel(1);
    let (result_tx, result_rx) = mpsc::channel(1);
    let (waiting_tx, waiting_rx) = mpsc::channel(1);
    let (check_tx, check_rx) = mpsc::channel(1);
    (
        SignalTx {
            countdown: countdown_tx,
            takeoff: takeoff_tx,
            flying: flying_tx,
            crashed: crashed_tx,
            result: result_tx,
            waiting: waiting_tx,
            flying_check: check_tx,
        },
        SignalRx {
            countdown: countdown_rx,
            takeoff: takeoff_rx,
            flying: flying_rx,
            crashed: crashed_rx,
            result: result_rx,
            waiting: waiting_rx,
            flying_check: check_rx,
        },
    )
}

impl SignalTx {
    /// Channel that moves the round into `entering`
    fn entering(&self, entering: RoundStatus) -> &mpsc::Sender<()> {
        match entering {
            RoundStatus::Waiting => &self.waiting,
            RoundStatus::Countdown => &self.countdown,
            RoundStatus::Takeoff => &self.takeoff,
            RoundStatus::Flying => &self.flying,
            RoundStatus::Crashed => &self.crashed,
            RoundStatus::Result => &self.result,
        }
    }
}

pub(super) fn new_round(
    entropy: &dyn EntropySource,
    round_id: u64,
    settings: &CrashSettings,
) -> WagerResult<Round> {
    Ok(Round::create(round_id, entropy.server_seed(), entropy.block_hash(), settings)?)
}

impl CrashEngine {
    pub(super) fn spawn_workers(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let (tx, rx) = signal_channels();
        let ticker = tokio::spawn(self.clone().run_ticker(tx, shutdown.clone()));
        let consumer = tokio::spawn(self.run_consumer(rx, shutdown));
        vec![ticker, consumer]
    }

    async fn run_ticker(self: Arc<Self>, tx: SignalTx, mut shutdown: watch::Receiver<bool>) {
        let mut tick = interval(self.settings.read().tick_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                _ = tick.tick() => {
                    let (status, deadline) = {
                        let pair = self.rounds.read().await;
                        (pair.current.round.status, pair.current.round.deadline())
                    };
                    if status == RoundStatus::Flying {
                        let _ = tx.flying_check.try_send(());
                    }
                    if current_timestamp_ms() >= deadline {
                        // A full slot means the signal is already queued
                        let _ = tx.entering(status.next()).try_send(());
                    }
                }
            }
        }
        debug!("Crash ticker stopped");
    }

    async fn run_consumer(self: Arc<Self>, mut rx: SignalRx, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                Some(()) = rx.countdown.recv() => self.enter_phase(RoundStatus::Countdown).await,
                Some(()) = rx.takeoff.recv() => self.enter_phase(RoundStatus::Takeoff).await,
                Some(()) = rx.flying.recv() => self.enter_phase(RoundStatus::Flying).await,
                Some(()) = rx.crashed.recv() => self.enter_phase(RoundStatus::Crashed).await,
                Some(()) = rx.result.recv() => self.settle_current().await,
                Some(()) = rx.waiting.recv() => self.start_next_round().await,
                Some(()) = rx.flying_check.recv() => self.check_flight().await,
                else => break,
            }
        }
        debug!("Crash consumer stopped");
    }

    /// Plain status change: Countdown, Takeoff, Flying or Crashed
    async fn enter_phase(self: &Arc<Self>, target: RoundStatus) {
        let mut pair = self.rounds.write().await;
        let current = &mut pair.current;
        if current.round.status.next() != target {
            debug!(
                round_id = current.round.round_id,
                status = %current.round.status,
                "Ignoring stale {} signal", target
            );
            return;
        }
        current.round.status = target;
        let round = current.round.clone();
        let view = current.view(current_timestamp_ms());
        drop(pair);

        match target {
            RoundStatus::Crashed => info!(
                round_id = round.round_id,
                crash = round.crash_multiplier,
                "💥 Round crashed"
            ),
            _ => debug!(round_id = round.round_id, "Round entered {}", target),
        }
        self.persist_round(round);
        self.publish_round(view);
    }

    /// Crashed -> Result: resolve every open order, persist, then apply
    ///
    /// Nothing changes in memory unless the whole batch is stored. On failure
    /// the round stays Crashed and the next tick tries again.
    async fn settle_current(self: &Arc<Self>) {
        let round_id = {
            let pair = self.rounds.read().await;
            if pair.current.round.status != RoundStatus::Crashed {
                return;
            }
            pair.current.round.round_id
        };
        // Wait outside the lock so readers and bets on the next round go on
        if !self.drain_placements(round_id, SETTLE_WRITE_WAIT).await {
            warn!(round_id, "Settling with bet writes still in flight");
        }

        let mut pair = self.rounds.write().await;
        if pair.current.round.status != RoundStatus::Crashed || pair.current.round.round_id != round_id {
            return;
        }
        let live = &mut pair.current;
        let plan = settlement::plan_crash(&live.round, live.ledger.snapshot());
        let mut settled = live.round.clone();
        settled.status = RoundStatus::Result;
        settled.settled = true;

        if let Err(e) = self.store.settle_round(&settled, &plan.orders).await {
            error!(round_id = settled.round_id, "Round settlement failed, retrying next tick: {}", e);
            return;
        }

        live.round = settled;
        for order in &plan.orders {
            let id = order.id();
            live.ledger.replace(&id, order.clone());
            live.top.track(order);
            self.user_orders.update(
                &order.uid,
                |o| o.round_id == order.round_id && o.bet_index == order.bet_index,
                order.clone(),
            );
            self.publish_order(OrderAction::Settled, order);
        }
        self.metrics
            .record_round_settled(plan.orders.len(), plan.total_reward);

        let view = live.view(current_timestamp_ms());
        info!(
            round_id = view.round_id,
            orders = plan.orders.len(),
            stake = plan.total_stake,
            paid = plan.total_reward,
            "✅ Round settled"
        );
        self.history.push(view.clone());
        self.publish_round(view);
    }

    /// Result -> Waiting: the queued round becomes current and a new one is queued
    ///
    /// The replacement is built first; if that fails the round stays in
    /// Result and the next tick retries with fresh seeds.
    async fn start_next_round(self: &Arc<Self>) {
        let mut pair = self.rounds.write().await;
        if pair.current.round.status != RoundStatus::Result {
            return;
        }

        let settings = self.settings.read().clone();
        let queued_id = pair.next.round.round_id + 1;
        let queued = match self.create_round(queued_id, &settings) {
            Ok(round) => round,
            Err(e) => {
                error!(round_id = queued_id, "Could not create next round, retrying: {}", e);
                return;
            }
        };

        let now = current_timestamp_ms();
        let deadline = pair.current.round.deadline();
        let late = now - deadline > 2 * settings.tick_interval_ms as i64;
        let waiting_time = if late { now } else { deadline };

        let promoted = std::mem::replace(&mut pair.next, LiveRound::new(queued.clone(), settings.top_orders));
        let finished = std::mem::replace(&mut pair.current, promoted);
        let current = &mut pair.current;
        current.round.status = RoundStatus::Waiting;
        current.round.schedule_from(waiting_time);

        let round = current.round.clone();
        let view = current.view(now);
        let preplaced = current.ledger.snapshot();
        drop(pair);

        info!(
            round_id = round.round_id,
            previous = finished.round.round_id,
            preplaced = preplaced.len(),
            "🔄 New round waiting"
        );
        self.persist_round(round);
        self.persist_round(queued);
        self.publish_round(view);
        for order in preplaced.iter().filter(|o| o.status == OrderStatus::Bet) {
            self.publish_order(OrderAction::Placed, order);
        }
    }

    /// Resolve bets whose auto escape or reward cap the live multiplier reached
    async fn check_flight(&self) {
        let pair = self.rounds.write().await;
        let live = &pair.current;
        let round = &live.round;
        if round.status != RoundStatus::Flying {
            return;
        }
        let now = current_timestamp_ms();
        if now >= round.schedule.crashed_time {
            return;
        }
        let multiplier = round.multiplier_at(now);
        let max_reward = round.limits.max_reward;

        for order in live.ledger.filter(|o| o.status == OrderStatus::Bet) {
            self.wait_for_placement(round.round_id, &order.id()).await;
            if !live.ledger.contains(&order.id()) {
                continue;
            }
            let cap = max_reward_height(order.delivery, max_reward);
            let auto = order.auto_escape_height;
            let height = match (auto > 0.0 && auto <= multiplier, multiplier >= cap) {
                (true, true) => auto.min(cap),
                (true, false) => auto,
                (false, true) => cap,
                (false, false) => continue,
            };

            let mut escaped = order.clone();
            escaped.escape_height = height;
            escaped.escape_time = settlement::escape_time_for(round, height);
            escaped.reward_amount = crash_payout(escaped.delivery, height, max_reward);
            escaped.status = OrderStatus::Escape;

            if let Err(e) = self.store.save_order(&escaped).await {
                error!(round_id = round.round_id, order_id = %escaped.id(), "Auto escape not persisted, retrying: {}", e);
                continue;
            }
            live.ledger.replace(&escaped.id(), escaped.clone());
            live.top.track(&escaped);
            self.user_orders.update(
                &escaped.uid,
                |o| o.round_id == escaped.round_id && o.bet_index == escaped.bet_index,
                escaped.clone(),
            );
            self.publish_order(OrderAction::AutoEscaped, &escaped);
            debug!(round_id = round.round_id, order_id = %escaped.id(), height, "Auto escaped");
        }
    }

    /// Rebuild the round pair from storage
    ///
    /// Stale unsettled rounds are settled first. The live round's deadlines
    /// are recomputed from its persisted `waiting_time`, so the schedule
    /// lines up with the time that passed while the process was down.
    pub(super) async fn recover(
        settings: &CrashSettings,
        store: &dyn CrashStore,
        entropy: &dyn EntropySource,
    ) -> WagerResult<RoundPair> {
        let now = current_timestamp_ms();
        let Some(latest) = store.latest_round().await? else {
            let mut current = new_round(entropy, 1, settings)?;
            current.schedule_from(now);
            let next = new_round(entropy, 2, settings)?;
            store.save_round(&current).await?;
            store.save_round(&next).await?;
            info!("No persisted rounds, starting at round 1");
            return Ok(RoundPair {
                current: LiveRound::new(current, settings.top_orders),
                next: LiveRound::new(next, settings.top_orders),
            });
        };

        // An unscheduled latest round is the queued one; its predecessor is live
        let (mut current, queued) = if !latest.schedule.is_started() && latest.round_id > 1 {
            match store.get_round(latest.round_id - 1).await? {
                Some(previous) => (previous, Some(latest)),
                None => (latest, None),
            }
        } else {
            (latest, None)
        };

        let swept = Self::settle_stale(store, current.round_id).await?;
        if swept > 0 {
            warn!(rounds = swept, "Settled rounds left open by a previous run");
        }

        if current.schedule.is_started() {
            let waiting_time = current.schedule.waiting_time;
            current.schedule_from(waiting_time);
        } else {
            current.schedule_from(now);
        }
        current.status = if current.settled {
            RoundStatus::Result
        } else {
            match current.status_at(now) {
                // Past its result time but never settled
                RoundStatus::Result => RoundStatus::Crashed,
                status => status,
            }
        };

        let next = match queued {
            Some(round) => round,
            None => {
                let round = new_round(entropy, current.round_id + 1, settings)?;
                store.save_round(&round).await?;
                round
            }
        };

        let current = LiveRound::new(current, settings.top_orders);
        let next = LiveRound::new(next, settings.top_orders);
        let orders = store
            .round_orders(&[current.round.round_id, next.round.round_id])
            .await?;
        let mut reattached = 0;
        for order in orders {
            let live = if order.round_id == current.round.round_id {
                &current
            } else {
                &next
            };
            if order.status != OrderStatus::CancelBet {
                live.top.track(&order);
            }
            live.ledger.upsert(order.id(), order);
            reattached += 1;
        }

        info!(
            round_id = current.round.round_id,
            status = %current.round.status,
            orders = reattached,
            "♻️ Recovered crash round"
        );
        store.save_round(&current.round).await?;
        Ok(RoundPair { current, next })
    }

    /// Settle every unsettled round older than `before`
    async fn settle_stale(store: &dyn CrashStore, before: u64) -> WagerResult<usize> {
        let stale = store.unsettled_rounds(before).await?;
        for round in &stale {
            let orders = store.round_orders(&[round.round_id]).await?;
            let plan = settlement::plan_crash(round, orders);
            let mut settled = round.clone();
            settled.status = RoundStatus::Result;
            settled.settled = true;
            store.settle_round(&settled, &plan.orders).await?;
            info!(round_id = round.round_id, orders = plan.orders.len(), "Stale round settled");
        }
        Ok(stale.len())
    }
}
