//! Crash round and order records
//!
//! A round's hash and crash multiplier are fixed when the round is created.
//! Its six phase timestamps are derived from `waiting_time` and the round's
//! own timings, so a reloaded round reproduces the same deadlines.

use crate::common::types::{current_timestamp_ms, floor_to, net_of_rake};
use crate::config::CrashSettings;
use crate::errors::SolverError;
use crate::fairness;
use crate::hex_solver;
use crate::ledger::OrderLedger;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Round phases in strict cyclic order
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RoundStatus {
    Waiting = 1,
    Countdown = 2,
    Takeoff = 3,
    Flying = 4,
    Crashed = 5,
    Result = 6,
}

impl RoundStatus {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn next(self) -> Self {
        match self {
            RoundStatus::Waiting => RoundStatus::Countdown,
            RoundStatus::Countdown => RoundStatus::Takeoff,
            RoundStatus::Takeoff => RoundStatus::Flying,
            RoundStatus::Flying => RoundStatus::Crashed,
            RoundStatus::Crashed => RoundStatus::Result,
            RoundStatus::Result => RoundStatus::Waiting,
        }
    }

    /// Bets placed now attach to this round rather than the next one
    pub fn accepts_bets(self) -> bool {
        matches!(self, RoundStatus::Waiting | RoundStatus::Countdown)
    }
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoundStatus::Waiting => "waiting",
            RoundStatus::Countdown => "countdown",
            RoundStatus::Takeoff => "takeoff",
            RoundStatus::Flying => "flying",
            RoundStatus::Crashed => "crashed",
            RoundStatus::Result => "result",
        };
        f.write_str(name)
    }
}

/// Crash order lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Bet,
    CancelBet,
    Escape,
    Settle,
}

/// A single crash bet
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    pub uid: String,
    pub bet_index: u32,
    pub round_id: u64,
    pub bet_amount: f64,
    /// Stake net of rake, the payout base
    pub delivery: f64,
    /// 0 when the player did not set one
    pub auto_escape_height: f64,
    pub escape_height: f64,
    pub escape_time: i64,
    pub reward_amount: f64,
    pub status: OrderStatus,
    pub created_at: i64,
}

impl Order {
    pub fn new(uid: &str, bet_index: u32, round_id: u64, bet_amount: f64, auto_escape_height: f64, rake: u32) -> Self {
        Self {
            uid: uid.to_string(),
            bet_index,
            round_id,
            bet_amount,
            delivery: net_of_rake(bet_amount, rake),
            auto_escape_height,
            escape_height: 0.0,
            escape_time: 0,
            reward_amount: 0.0,
            status: OrderStatus::Bet,
            created_at: current_timestamp_ms(),
        }
    }

    /// Composite ledger key
    pub fn key(uid: &str, bet_index: u32) -> String {
        format!("{}-{}", uid, bet_index)
    }

    pub fn id(&self) -> String {
        Self::key(&self.uid, self.bet_index)
    }

    pub fn has_escaped(&self) -> bool {
        self.escape_height > 0.0
    }
}

/// Per-round copy of the limits that define its cost basis
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundLimits {
    pub rake: u32,
    pub min_bet: f64,
    pub max_bet: f64,
    pub max_reward: f64,
}

/// Per-round copy of the phase lengths
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundTimings {
    pub waiting_ms: u64,
    pub countdown_ms: u64,
    pub takeoff_ms: u64,
    pub crashed_ms: u64,
    pub result_ms: u64,
    pub flight_time_scale: f64,
}

impl From<&CrashSettings> for RoundLimits {
    fn from(settings: &CrashSettings) -> Self {
        Self {
            rake: settings.rake,
            min_bet: settings.min_bet,
            max_bet: settings.max_bet,
            max_reward: settings.max_reward,
        }
    }
}

impl From<&CrashSettings> for RoundTimings {
    fn from(settings: &CrashSettings) -> Self {
        Self {
            waiting_ms: settings.waiting_interval_ms,
            countdown_ms: settings.countdown_interval_ms,
            takeoff_ms: settings.takeoff_interval_ms,
            crashed_ms: settings.crashed_interval_ms,
            result_ms: settings.result_interval_ms,
            flight_time_scale: settings.flight_time_scale,
        }
    }
}

/// Phase entry times in ms since epoch; all zero until the round starts
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Schedule {
    pub waiting_time: i64,
    pub countdown_time: i64,
    pub takeoff_time: i64,
    pub flying_time: i64,
    pub crashed_time: i64,
    pub result_time: i64,
}

impl Schedule {
    pub fn from_waiting(waiting_time: i64, timings: &RoundTimings, crash_duration_ms: i64) -> Self {
        let countdown_time = waiting_time + timings.waiting_ms as i64;
        let takeoff_time = countdown_time + timings.countdown_ms as i64;
        let flying_time = takeoff_time + timings.takeoff_ms as i64;
        let crashed_time = flying_time + crash_duration_ms;
        let result_time = crashed_time + timings.crashed_ms as i64;
        Self {
            waiting_time,
            countdown_time,
            takeoff_time,
            flying_time,
            crashed_time,
            result_time,
        }
    }

    pub fn is_started(&self) -> bool {
        self.waiting_time > 0
    }
}

/// Persisted crash round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Round {
    pub round_id: u64,
    pub status: RoundStatus,
    pub server_seed: String,
    /// Public entropy mixed into the outcome
    pub block_hash: String,
    pub hash: String,
    pub commitment: String,
    pub crash_multiplier: f64,
    pub crash_duration_ms: i64,
    #[serde(flatten)]
    pub schedule: Schedule,
    pub settled: bool,
    pub limits: RoundLimits,
    pub timings: RoundTimings,
    pub created_at: i64,
}

impl Round {
    /// Build an unscheduled round; fails when no flight duration exists
    pub fn create(round_id: u64, server_seed: String, block_hash: String, settings: &CrashSettings) -> Result<Self, SolverError> {
        let crash_multiplier = fairness::crash_multiplier(&server_seed, &block_hash);
        let timings = RoundTimings::from(settings);
        let flight_seconds = hex_solver::solve_duration(crash_multiplier)?;
        let crash_duration_ms = (flight_seconds * 1000.0 / timings.flight_time_scale).ceil() as i64;

        Ok(Self {
            round_id,
            status: RoundStatus::Waiting,
            hash: fairness::crash_hash(&server_seed, &block_hash),
            commitment: fairness::crash_commitment(&server_seed, &block_hash),
            server_seed,
            block_hash,
            crash_multiplier,
            crash_duration_ms,
            schedule: Schedule::default(),
            settled: false,
            limits: RoundLimits::from(settings),
            timings,
            created_at: current_timestamp_ms(),
        })
    }

    /// Lay out every phase from `waiting_time`
    pub fn schedule_from(&mut self, waiting_time: i64) {
        self.schedule = Schedule::from_waiting(waiting_time, &self.timings, self.crash_duration_ms);
    }

    /// Time at which the current phase ends
    pub fn deadline(&self) -> i64 {
        let s = &self.schedule;
        match self.status {
            RoundStatus::Waiting => s.countdown_time,
            RoundStatus::Countdown => s.takeoff_time,
            RoundStatus::Takeoff => s.flying_time,
            RoundStatus::Flying => s.crashed_time,
            RoundStatus::Crashed => s.result_time,
            RoundStatus::Result => s.result_time + self.timings.result_ms as i64,
        }
    }

    /// Phase the schedule implies at `now`
    pub fn status_at(&self, now: i64) -> RoundStatus {
        let s = &self.schedule;
        if now < s.countdown_time {
            RoundStatus::Waiting
        } else if now < s.takeoff_time {
            RoundStatus::Countdown
        } else if now < s.flying_time {
            RoundStatus::Takeoff
        } else if now < s.crashed_time {
            RoundStatus::Flying
        } else if now < s.result_time {
            RoundStatus::Crashed
        } else {
            RoundStatus::Result
        }
    }

    /// Multiplier shown at `now`, never above the crash point
    pub fn multiplier_at(&self, now: i64) -> f64 {
        if now <= self.schedule.flying_time {
            return 1.0;
        }
        let elapsed_s = (now - self.schedule.flying_time) as f64 / 1000.0 * self.timings.flight_time_scale;
        floor_to(hex_solver::multiplier_at(elapsed_s), 2).min(self.crash_multiplier)
    }

    pub fn view(&self, now: i64, bet_count: usize, top_orders: Vec<Order>) -> RoundView {
        let crashed = self.status >= RoundStatus::Crashed;
        RoundView {
            round_id: self.round_id,
            status: self.status,
            status_code: self.status.code(),
            block_hash: self.block_hash.clone(),
            commitment: self.commitment.clone(),
            hash: crashed.then(|| self.hash.clone()),
            crash_multiplier: crashed.then_some(self.crash_multiplier),
            server_seed: self.settled.then(|| self.server_seed.clone()),
            current_multiplier: match self.status {
                RoundStatus::Flying => self.multiplier_at(now),
                RoundStatus::Crashed | RoundStatus::Result => self.crash_multiplier,
                _ => 1.0,
            },
            schedule: self.schedule.clone(),
            settled: self.settled,
            bet_count,
            top_orders,
        }
    }
}

/// Public snapshot of a round; secrets appear only once revealed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundView {
    pub round_id: u64,
    pub status: RoundStatus,
    pub status_code: u8,
    pub block_hash: String,
    pub commitment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crash_multiplier: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_seed: Option<String>,
    pub current_multiplier: f64,
    #[serde(flatten)]
    pub schedule: Schedule,
    pub settled: bool,
    pub bet_count: usize,
    pub top_orders: Vec<Order>,
}

/// Largest bets of a round, kept for display
pub struct TopOrders {
    orders: Mutex<Vec<Order>>,
    capacity: usize,
}

impl TopOrders {
    pub fn new(capacity: usize) -> Self {
        Self {
            orders: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn track(&self, order: &Order) {
        let mut top = self.orders.lock();
        top.retain(|o| o.id() != order.id());
        top.push(order.clone());
        top.sort_by(|a, b| b.bet_amount.total_cmp(&a.bet_amount));
        top.truncate(self.capacity);
    }

    pub fn untrack(&self, order_id: &str) {
        self.orders.lock().retain(|o| o.id() != order_id);
    }

    pub fn list(&self) -> Vec<Order> {
        self.orders.lock().clone()
    }
}

/// A round together with its live order ledger
///
/// The ledger and top set are shared with detached persistence tasks so a
/// failed write can be rolled back after the round has moved on.
pub struct LiveRound {
    pub round: Round,
    pub ledger: Arc<OrderLedger<Order>>,
    pub top: Arc<TopOrders>,
}

impl LiveRound {
    pub fn new(round: Round, top_capacity: usize) -> Self {
        Self {
            round,
            ledger: Arc::new(OrderLedger::new()),
            top: Arc::new(TopOrders::new(top_capacity)),
        }
    }

    pub fn view(&self, now: i64) -> RoundView {
        self.round.view(now, self.ledger.len(), self.top.list())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> CrashSettings {
        CrashSettings::default()
    }

    #[test]
    fn test_status_cycle() {
        let mut status = RoundStatus::Waiting;
        let mut seen = vec![status];
        for _ in 0..6 {
            status = status.next();
            seen.push(status);
        }
        assert_eq!(seen.first(), seen.last());
        assert_eq!(RoundStatus::Flying.code(), 4);
        assert!(RoundStatus::Countdown.accepts_bets());
        assert!(!RoundStatus::Takeoff.accepts_bets());
    }

    #[test]
    fn test_round_creation_fixes_outcome() {
        let round = Round::create(1, "server".into(), "block".into(), &settings()).unwrap();
        assert!(round.crash_multiplier >= 1.0);
        assert_eq!(round.crash_multiplier, fairness::crash_multiplier("server", "block"));
        assert_eq!(round.commitment, fairness::crash_commitment("server", "block"));
        assert!(!round.schedule.is_started());
    }

    #[test]
    fn test_schedule_layout() {
        let mut round = Round::create(7, "s".into(), "b".into(), &settings()).unwrap();
        round.schedule_from(1_000_000);
        let s = &round.schedule;
        assert_eq!(s.countdown_time, 1_001_000);
        assert_eq!(s.takeoff_time, 1_008_000);
        assert_eq!(s.flying_time, 1_009_500);
        assert_eq!(s.crashed_time, 1_009_500 + round.crash_duration_ms);
        assert_eq!(s.result_time, s.crashed_time + 1_000);

        assert_eq!(round.status_at(1_000_500), RoundStatus::Waiting);
        assert_eq!(round.status_at(1_008_000), RoundStatus::Takeoff);
        assert_eq!(round.status_at(s.result_time), RoundStatus::Result);
    }

    #[test]
    fn test_reschedule_is_reproducible() {
        let mut round = Round::create(3, "seed".into(), "hash".into(), &settings()).unwrap();
        round.schedule_from(42_000);
        let persisted = serde_json::to_string(&round).unwrap();

        let mut reloaded: Round = serde_json::from_str(&persisted).unwrap();
        let waiting = reloaded.schedule.waiting_time;
        reloaded.schedule = Schedule::default();
        reloaded.schedule_from(waiting);
        assert_eq!(reloaded.schedule, round.schedule);
    }

    #[test]
    fn test_live_multiplier_capped_at_crash() {
        let mut round = Round::create(1, "s".into(), "b".into(), &settings()).unwrap();
        round.schedule_from(0);
        let flying = round.schedule.flying_time;
        assert_eq!(round.multiplier_at(flying), 1.0);
        assert!(round.multiplier_at(flying + 1_000_000_000) <= round.crash_multiplier);
    }

    #[test]
    fn test_view_hides_secrets_until_revealed() {
        let mut round = Round::create(1, "secret".into(), "b".into(), &settings()).unwrap();
        let view = round.view(0, 0, vec![]);
        assert!(view.server_seed.is_none());
        assert!(view.hash.is_none());
        assert!(view.crash_multiplier.is_none());

        round.status = RoundStatus::Result;
        round.settled = true;
        let view = round.view(0, 0, vec![]);
        assert_eq!(view.server_seed.as_deref(), Some("secret"));
        assert_eq!(view.crash_multiplier, Some(round.crash_multiplier));
    }

    #[test]
    fn test_top_orders_bounded() {
        let round = Round::create(1, "s".into(), "b".into(), &settings()).unwrap();
        let live = LiveRound::new(round, 3);
        for i in 0..5 {
            live.top.track(&Order::new("u", i, 1, (i + 1) as f64 * 10.0, 0.0, 0));
        }
        let top: Vec<f64> = live.top.list().iter().map(|o| o.bet_amount).collect();
        assert_eq!(top, vec![50.0, 40.0, 30.0]);
        live.top.untrack("u-4");
        assert_eq!(live.top.list().len(), 2);
        assert_eq!(live.view(0).top_orders.len(), 2);
    }
}
