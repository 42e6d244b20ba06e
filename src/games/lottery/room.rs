//! One lottery room: its active period, the period's orders and history
//!
//! All mutation goes through the room's own mutex, so concurrent orders on a
//! room serialize while different rooms never contend.

use super::fsm::Phase;
use super::period::{next_period_id, LotteryOrder, Period};
use super::ticket::LotteryKind;
use super::PriceFeed;
use crate::cache::{BoundedHistory, UserOrderCache, HISTORY_CAPACITY, USER_ORDER_CAPACITY};
use crate::common::types::{current_timestamp_ms, round_money};
use crate::config::LotterySettings;
use crate::errors::{ConflictError, StorageResult, ValidationError, WagerResult};
use crate::metrics::EngineMetrics;
use crate::notify::{room_channel, user_channel, Event, Notifier};
use crate::settlement::{self, persist_with_retry, SettlementPlan};
use crate::storage::LotteryStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

const SETTLE_ATTEMPTS: usize = 3;
const SETTLE_BACKOFF: Duration = Duration::from_millis(200);

/// Orders a user placed in the active period
#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    orders: usize,
    wildcards: usize,
}

struct RoomState {
    phase: Phase,
    period: Option<Period>,
    orders: Vec<LotteryOrder>,
    tallies: HashMap<String, Tally>,
    last_period_id: Option<u64>,
    /// A settlement failed and stored periods need a sweep
    needs_sweep: bool,
}

/// Everything a room borrows from its engine
#[derive(Clone)]
pub struct RoomContext {
    pub engine: &'static str,
    pub kind: LotteryKind,
    pub settings: Arc<RwLock<LotterySettings>>,
    pub store: Arc<dyn LotteryStore>,
    pub notifier: Arc<dyn Notifier>,
    pub price: Arc<dyn PriceFeed>,
    pub metrics: Arc<EngineMetrics>,
}

pub struct Room {
    bet_type: u32,
    channel: String,
    ctx: RoomContext,
    state: Mutex<RoomState>,
    history: BoundedHistory<Period>,
    user_orders: UserOrderCache<LotteryOrder>,
}

impl Room {
    /// Settle periods left open by a previous run and preload history
    pub async fn recover(bet_type: u32, ctx: RoomContext) -> WagerResult<Self> {
        let store = ctx.store.clone();
        let swept = sweep_unsettled(store.as_ref(), ctx.price.as_ref(), bet_type, u64::MAX).await?;
        if swept > 0 {
            warn!(engine = ctx.engine, bet_type, periods = swept, "Settled periods left open by a previous run");
        }

        let last_period_id = store.latest_period(bet_type).await?.map(|p| p.period_id);
        let history = BoundedHistory::new();
        let recent = store.recent_periods(bet_type, HISTORY_CAPACITY).await?;
        history.reload(recent.into_iter().rev().collect());

        Ok(Self {
            bet_type,
            channel: room_channel(format!("{}-{}", ctx.engine, bet_type)),
            ctx,
            state: Mutex::new(RoomState {
                phase: Phase::Init,
                period: None,
                orders: Vec::new(),
                tallies: HashMap::new(),
                last_period_id,
                needs_sweep: false,
            }),
            history,
            user_orders: UserOrderCache::new(),
        })
    }

    pub fn bet_type(&self) -> u32 {
        self.bet_type
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub async fn phase(&self) -> Phase {
        self.state.lock().await.phase
    }

    pub async fn current_period(&self) -> Option<Period> {
        self.state.lock().await.period.clone()
    }

    /// Run the entry effect of `phase`
    pub async fn enter(&self, phase: Phase) {
        let mut state = self.state.lock().await;
        state.phase = phase;
        match phase {
            Phase::Init => {}
            Phase::Betting => self.open_period(&mut state).await,
            Phase::Waiting => {
                if let Some(period) = &state.period {
                    debug!(engine = self.ctx.engine, bet_type = self.bet_type, period_id = period.period_id, "Betting closed");
                    self.publish_period(Phase::Waiting, period.clone());
                }
            }
            Phase::Settle => self.settle_period(&mut state).await,
        }
    }

    /// Accept a ticket for the active period
    pub async fn create_order(&self, uid: &str, period_id: u64, ticket: &str, amount: f64) -> WagerResult<LotteryOrder> {
        let mut state = self.state.lock().await;
        let (order, wildcard) = self.validate_order(&state, uid, period_id, ticket, amount)?;
        self.ctx.store.save_order(&order).await?;

        let tally = state.tallies.entry(uid.to_string()).or_default();
        tally.orders += 1;
        if wildcard {
            tally.wildcards += 1;
        }
        if let Some(period) = state.period.as_mut() {
            period.record_order(&order);
        }
        state.orders.push(order.clone());
        drop(state);

        self.ctx.metrics.record_bet(order.amount);
        self.user_orders.push(uid, order.clone());
        let event = Event::LotteryOrder { order: order.clone() };
        self.ctx.notifier.send(&self.channel, &event);
        self.ctx.notifier.send(&user_channel(uid), &event);
        debug!(bet_type = self.bet_type, period_id, uid, ticket = %order.ticket, amount, "Lottery order placed");
        Ok(order)
    }

    fn validate_order(&self, state: &RoomState, uid: &str, period_id: u64, ticket: &str, amount: f64) -> WagerResult<(LotteryOrder, bool)> {
        let period = match (&state.period, state.phase.accepts_orders()) {
            (Some(period), true) => period,
            _ => {
                return Err(ConflictError::WrongPhase {
                    expected: "betting",
                    actual: state.phase.to_string(),
                }
                .into())
            }
        };
        if period.period_id != period_id {
            return Err(ConflictError::StalePeriod {
                active: period.period_id,
                requested: period_id,
            }
            .into());
        }

        let (max_bet, max_orders, max_wildcards) = {
            let settings = self.ctx.settings.read();
            (settings.max_bet, settings.max_orders_per_period, settings.max_wildcards_per_period)
        };
        if !amount.is_finite() || amount <= 0.0 || amount > max_bet {
            return Err(ValidationError::InvalidAmount {
                amount,
                min: 0.0,
                max: max_bet,
            }
            .into());
        }
        let ticket = self.ctx.kind.parse_ticket(ticket)?;

        let tally = state.tallies.get(uid).copied().unwrap_or_default();
        if tally.orders >= max_orders {
            return Err(ConflictError::OrderLimit { limit: max_orders }.into());
        }
        if self.ctx.kind == LotteryKind::Nine && ticket.is_wildcard() && tally.wildcards >= max_wildcards {
            return Err(ConflictError::WildcardLimit { limit: max_wildcards }.into());
        }
        Ok((LotteryOrder::new(uid, period, &ticket, amount), ticket.is_wildcard()))
    }

    /// Fix the number the active period will draw
    pub async fn preset_number(&self, period_id: u64, number: i32) -> WagerResult<Period> {
        let mut state = self.state.lock().await;
        let phase = state.phase;
        let period = match state.period.as_mut() {
            Some(period) if matches!(phase, Phase::Betting | Phase::Waiting) => period,
            _ => {
                return Err(ConflictError::WrongPhase {
                    expected: "betting or waiting",
                    actual: phase.to_string(),
                }
                .into())
            }
        };
        if period.period_id != period_id {
            return Err(ConflictError::StalePeriod {
                active: period.period_id,
                requested: period_id,
            }
            .into());
        }
        if !self.ctx.kind.contains(number) {
            return Err(ValidationError::InvalidNumber(number).into());
        }

        let mut preset = period.clone();
        preset.preset_number = number;
        self.ctx.store.save_period(&preset).await?;
        *period = preset.clone();
        info!(engine = self.ctx.engine, bet_type = self.bet_type, period_id, number, "🎯 Period number preset");
        Ok(preset)
    }

    /// Settled periods, newest first
    pub async fn period_history(&self, page: usize, size: usize) -> WagerResult<Vec<Period>> {
        if let Some(periods) = self.history.page(page, size) {
            return Ok(periods);
        }
        let page = page.max(1);
        let newest_first = self
            .ctx
            .store
            .recent_periods(self.bet_type, page * size)
            .await?;
        if self.history.is_empty() {
            self.history.reload(
                newest_first
                    .iter()
                    .take(HISTORY_CAPACITY)
                    .rev()
                    .cloned()
                    .collect(),
            );
        }
        Ok(newest_first
            .into_iter()
            .skip((page - 1) * size)
            .take(size)
            .collect())
    }

    /// A user's orders in this room, newest first
    pub async fn user_orders(&self, uid: &str, page: usize, size: usize) -> WagerResult<Vec<LotteryOrder>> {
        if let Some(orders) = self.user_orders.page(uid, page, size) {
            return Ok(orders);
        }
        let page = page.max(1);
        let limit = (page * size).max(USER_ORDER_CAPACITY);
        let newest_first = self
            .ctx
            .store
            .user_orders(self.bet_type, uid, limit)
            .await?;
        self.user_orders
            .seed(uid, newest_first.iter().rev().cloned().collect());
        Ok(newest_first
            .into_iter()
            .skip((page - 1) * size)
            .take(size)
            .collect())
    }

    async fn open_period(&self, state: &mut RoomState) {
        if state.needs_sweep {
            match sweep_unsettled(self.ctx.store.as_ref(), self.ctx.price.as_ref(), self.bet_type, u64::MAX).await {
                Ok(swept) => {
                    state.needs_sweep = false;
                    info!(bet_type = self.bet_type, periods = swept, "Swept unsettled periods");
                }
                Err(e) => error!(bet_type = self.bet_type, "Period sweep failed: {}", e),
            }
        }

        let fee_rate = self.ctx.settings.read().fee_rate;
        let period_id = next_period_id(state.last_period_id, current_timestamp_ms());
        let period = Period::open(period_id, self.bet_type, self.ctx.kind, fee_rate);

        state.orders.clear();
        state.tallies.clear();
        if let Err(e) = self.ctx.store.save_period(&period).await {
            error!(bet_type = self.bet_type, period_id, "Could not open period, room skips this round: {}", e);
            state.period = None;
            return;
        }
        state.last_period_id = Some(period_id);
        state.period = Some(period.clone());

        info!(engine = self.ctx.engine, bet_type = self.bet_type, period_id, "🎲 Betting open");
        self.publish_period(Phase::Betting, period);
    }

    /// Draw, score every order and persist the finished period
    ///
    /// Memory is only updated after the batch is stored. A failed write
    /// leaves the period open in storage for the next sweep.
    async fn settle_period(&self, state: &mut RoomState) {
        let Some(period) = state.period.clone() else {
            return;
        };
        if period.settled {
            return;
        }

        let number = draw_number(&period);
        let plan = settlement::plan_lottery(&period, number, state.orders.clone());
        let settled = finish_period(period, number, &plan, self.ctx.price.as_ref());

        let store = self.ctx.store.as_ref();
        let result = persist_with_retry("period settlement", SETTLE_ATTEMPTS, SETTLE_BACKOFF, || {
            store.settle_period(&settled, &plan.orders)
        })
        .await;
        if let Err(e) = result {
            error!(bet_type = self.bet_type, period_id = settled.period_id, "Period settlement failed: {}", e);
            state.needs_sweep = true;
            return;
        }

        state.orders = plan.orders.clone();
        state.period = Some(settled.clone());
        self.history.push(settled.clone());
        self.ctx
            .metrics
            .record_round_settled(plan.orders.len(), plan.total_reward);

        for order in &plan.orders {
            self.user_orders
                .update(&order.uid, |o| o.order_id == order.order_id, order.clone());
            self.ctx.notifier.send(
                &user_channel(&order.uid),
                &Event::LotteryOrder { order: order.clone() },
            );
        }
        info!(
            engine = self.ctx.engine,
            bet_type = self.bet_type,
            period_id = settled.period_id,
            number,
            orders = plan.orders.len(),
            profit = settled.profit,
            "✅ Period settled"
        );
        self.publish_period(Phase::Settle, settled);
    }

    fn publish_period(&self, phase: Phase, period: Period) {
        self.ctx.notifier.send(
            &self.channel,
            &Event::Period {
                state: phase.to_string(),
                period,
            },
        );
    }
}

/// Preset number when one is set, otherwise a uniform draw
fn draw_number(period: &Period) -> u8 {
    match u8::try_from(period.preset_number) {
        Ok(number) if period.kind.contains(period.preset_number) => number,
        _ => period.kind.draw(&mut rand::thread_rng()),
    }
}

/// Period totals once `plan` is applied
fn finish_period(mut period: Period, number: u8, plan: &SettlementPlan<LotteryOrder>, price: &dyn PriceFeed) -> Period {
    period.number = number as i32;
    period.price = price.price_for(period.bet_type, number);
    period.reward_amount = round_money(plan.total_reward);
    period.profit = round_money(period.bet_amount - period.reward_amount);
    period.end_time = current_timestamp_ms();
    period.settled = true;
    period
}

/// Settle every stored period of a room that never finished
async fn sweep_unsettled(
    store: &dyn LotteryStore,
    price: &dyn PriceFeed,
    bet_type: u32,
    before: u64,
) -> StorageResult<usize> {
    let stale = store.unsettled_periods(bet_type, before).await?;
    for period in &stale {
        let orders = store.period_orders(bet_type, period.period_id).await?;
        let number = draw_number(period);
        let plan = settlement::plan_lottery(period, number, orders);
        let settled = finish_period(period.clone(), number, &plan, price);
        store.settle_period(&settled, &plan.orders).await?;
        info!(bet_type, period_id = period.period_id, number, orders = plan.orders.len(), "Stale period settled");
    }
    Ok(stale.len())
}
