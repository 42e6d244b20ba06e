//! Lottery period and order records

use super::ticket::{LotteryKind, Ticket};
use crate::common::types::{current_timestamp_ms, round_money};
use chrono::{Datelike, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Periods per day before the sequence would overflow its four digits
const PERIOD_SEQ_BASE: u64 = 10_000;

/// Calendar day of a ms timestamp as `yyyymmdd`
pub fn day_stamp(now_ms: i64) -> u64 {
    let date = Utc
        .timestamp_millis_opt(now_ms)
        .single()
        .unwrap_or_else(Utc::now)
        .date_naive();
    date.year() as u64 * 10_000 + date.month() as u64 * 100 + date.day() as u64
}

/// Id following `last`: `yyyymmdd * 10^4 + seq`, seq restarting each day
pub fn next_period_id(last: Option<u64>, now_ms: i64) -> u64 {
    let day = day_stamp(now_ms);
    match last {
        Some(last) if last / PERIOD_SEQ_BASE == day && last % PERIOD_SEQ_BASE < PERIOD_SEQ_BASE - 1 => last + 1,
        Some(last) if last / PERIOD_SEQ_BASE >= day => last + 1,
        _ => day * PERIOD_SEQ_BASE + 1,
    }
}

/// One lottery draw in one room
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Period {
    pub period_id: u64,
    pub bet_type: u32,
    pub kind: LotteryKind,
    /// Admin override for the draw, -1 when unset
    pub preset_number: i32,
    /// Drawn number, -1 until settled
    pub number: i32,
    pub price: f64,
    /// Aggregate stake per encoded ticket
    pub stakes: BTreeMap<String, f64>,
    pub order_count: u64,
    pub bet_amount: f64,
    pub fee: f64,
    pub reward_amount: f64,
    /// House result: stakes minus rewards
    pub profit: f64,
    /// Fee per mille frozen at open
    pub fee_rate: u32,
    pub start_time: i64,
    pub end_time: i64,
    pub settled: bool,
}

impl Period {
    pub fn open(period_id: u64, bet_type: u32, kind: LotteryKind, fee_rate: u32) -> Self {
        Self {
            period_id,
            bet_type,
            kind,
            preset_number: -1,
            number: -1,
            price: 0.0,
            stakes: BTreeMap::new(),
            order_count: 0,
            bet_amount: 0.0,
            fee: 0.0,
            reward_amount: 0.0,
            profit: 0.0,
            fee_rate,
            start_time: current_timestamp_ms(),
            end_time: 0,
            settled: false,
        }
    }

    /// Fold an accepted order into the running totals
    pub fn record_order(&mut self, order: &LotteryOrder) {
        *self.stakes.entry(order.ticket.clone()).or_insert(0.0) += order.amount;
        self.order_count += 1;
        self.bet_amount = round_money(self.bet_amount + order.amount);
        self.fee = round_money(self.fee + order.fee);
    }

    pub fn color(&self) -> Option<&'static str> {
        u8::try_from(self.number).ok().map(|n| self.kind.color(n))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LotteryOrderStatus {
    Pending,
    Win,
    Lose,
}

/// A single lottery ticket purchase
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LotteryOrder {
    pub order_id: String,
    pub uid: String,
    pub period_id: u64,
    pub bet_type: u32,
    pub kind: LotteryKind,
    /// Encoded ticket
    pub ticket: String,
    pub amount: f64,
    pub fee: f64,
    /// Stake net of fee, the payout base
    pub delivery: f64,
    pub odds: f64,
    pub reward_amount: f64,
    pub status: LotteryOrderStatus,
    pub created_at: i64,
    pub settled_at: i64,
}

impl LotteryOrder {
    pub fn new(uid: &str, period: &Period, ticket: &Ticket, amount: f64) -> Self {
        let fee = round_money(amount * period.fee_rate as f64 / 1000.0);
        Self {
            order_id: uuid::Uuid::new_v4().to_string(),
            uid: uid.to_string(),
            period_id: period.period_id,
            bet_type: period.bet_type,
            kind: period.kind,
            ticket: period.kind.encode(ticket),
            amount,
            fee,
            delivery: round_money(amount - fee),
            odds: 0.0,
            reward_amount: 0.0,
            status: LotteryOrderStatus::Pending,
            created_at: current_timestamp_ms(),
            settled_at: 0,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.status != LotteryOrderStatus::Pending
    }
}
