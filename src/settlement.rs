//! Round and period settlement
//!
//! Settlement is planned in memory first, persisted as one batch, and only
//! then applied to the live ledger. Orders that are already final are left
//! out of the plan, so settling the same round twice never pays twice.

use crate::common::types::{current_timestamp_ms, floor_to, round_money};
use crate::errors::StorageResult;
use crate::games::crash::{Order, OrderStatus, Round};
use crate::games::lottery::{LotteryOrder, LotteryOrderStatus, Period};
use crate::hex_solver;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Orders that can reach a final state
pub trait Settleable {
    fn is_final(&self) -> bool;
    fn stake(&self) -> f64;
    fn reward(&self) -> f64;
}

impl Settleable for Order {
    fn is_final(&self) -> bool {
        matches!(self.status, OrderStatus::Settle | OrderStatus::CancelBet)
    }

    fn stake(&self) -> f64 {
        self.bet_amount
    }

    fn reward(&self) -> f64 {
        self.reward_amount
    }
}

impl Settleable for LotteryOrder {
    fn is_final(&self) -> bool {
        self.is_settled()
    }

    fn stake(&self) -> f64 {
        self.amount
    }

    fn reward(&self) -> f64 {
        self.reward_amount
    }
}

/// Resolved orders of one round or period
#[derive(Debug, Clone)]
pub struct SettlementPlan<O> {
    pub orders: Vec<O>,
    /// Orders left untouched because they were already final
    pub skipped: usize,
    pub total_stake: f64,
    pub total_reward: f64,
}

impl<O: Settleable> SettlementPlan<O> {
    fn build<F: FnMut(O) -> O>(orders: Vec<O>, mut resolve: F) -> Self {
        let mut plan = Self {
            orders: Vec::with_capacity(orders.len()),
            skipped: 0,
            total_stake: 0.0,
            total_reward: 0.0,
        };
        for order in orders {
            if order.is_final() {
                plan.skipped += 1;
                continue;
            }
            let resolved = resolve(order);
            plan.total_stake = round_money(plan.total_stake + resolved.stake());
            plan.total_reward = round_money(plan.total_reward + resolved.reward());
            plan.orders.push(resolved);
        }
        plan
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

/// Payout for escaping at `height`, capped at `max_reward`
pub fn crash_payout(delivery: f64, height: f64, max_reward: f64) -> f64 {
    round_money((delivery * height).min(max_reward))
}

/// Highest escape height whose payout stays within `max_reward`
pub fn max_reward_height(delivery: f64, max_reward: f64) -> f64 {
    if delivery <= 0.0 {
        return f64::MAX;
    }
    floor_to(max_reward / delivery, 2)
}

/// Wall-clock time at which a round reaches `height`
pub fn escape_time_for(round: &Round, height: f64) -> i64 {
    match hex_solver::solve_duration(height) {
        Ok(seconds) => {
            round.schedule.flying_time + (seconds * 1000.0 / round.timings.flight_time_scale).round() as i64
        }
        Err(_) => round.schedule.crashed_time,
    }
}

/// Resolve every open crash order of a crashed round
///
/// Bets with an auto escape at or below the crash point are paid at that
/// height, and bets whose reward cap height the round reached are paid at the
/// cap; other plain bets lose. Escaped orders keep their locked reward.
pub fn plan_crash(round: &Round, orders: Vec<Order>) -> SettlementPlan<Order> {
    let crash = round.crash_multiplier;
    let max_reward = round.limits.max_reward;
    SettlementPlan::build(orders, |mut order| {
        if order.status == OrderStatus::Bet {
            let auto = order.auto_escape_height;
            let auto = (auto > 0.0 && auto <= crash).then_some(auto);
            let cap = max_reward_height(order.delivery, max_reward);
            let cap = (cap > 1.0 && cap <= crash).then_some(cap);
            let height = match (auto, cap) {
                (Some(auto), Some(cap)) => Some(auto.min(cap)),
                (auto, cap) => auto.or(cap),
            };
            match height {
                Some(height) => {
                    order.escape_height = height;
                    order.escape_time = escape_time_for(round, height);
                    order.reward_amount = crash_payout(order.delivery, height, max_reward);
                }
                None => order.reward_amount = 0.0,
            }
        }
        order.status = OrderStatus::Settle;
        order
    })
}

/// Resolve every pending order of a period against the drawn number
pub fn plan_lottery(period: &Period, number: u8, orders: Vec<LotteryOrder>) -> SettlementPlan<LotteryOrder> {
    let kind = period.kind;
    let now = current_timestamp_ms();
    SettlementPlan::build(orders, |mut order| {
        let odds = kind
            .parse_ticket(&order.ticket)
            .map(|ticket| kind.odds(&ticket, number))
            .unwrap_or(0.0);
        order.odds = odds;
        order.reward_amount = round_money(order.delivery * odds);
        order.status = if odds > 0.0 {
            LotteryOrderStatus::Win
        } else {
            LotteryOrderStatus::Lose
        };
        order.settled_at = now;
        order
    })
}

/// Run a storage write until it succeeds or `attempts` are used up
pub async fn persist_with_retry<F, Fut>(what: &str, attempts: usize, backoff: Duration, mut write: F) -> StorageResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StorageResult<()>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match write().await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < attempts => {
                warn!("⚠️ {} failed (attempt {}/{}): {}", what, attempt, attempts, e);
                tokio::time::sleep(backoff * attempt as u32).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
