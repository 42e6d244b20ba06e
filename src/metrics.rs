//! Engine counters for wagering activity

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Shared counters updated by every engine
pub struct EngineMetrics {
    start_time: Instant,
    bets_accepted: AtomicU64,
    bets_rejected: AtomicU64,
    bets_rolled_back: AtomicU64,
    rounds_settled: AtomicU64,
    orders_settled: AtomicU64,
    wagered_cents: AtomicU64,
    paid_cents: AtomicU64,
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub bets_accepted: u64,
    pub bets_rejected: u64,
    pub bets_rolled_back: u64,
    pub rounds_settled: u64,
    pub orders_settled: u64,
    pub total_wagered: f64,
    pub total_paid: f64,
}

fn to_cents(amount: f64) -> u64 {
    (amount.max(0.0) * 100.0).round() as u64
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            bets_accepted: AtomicU64::new(0),
            bets_rejected: AtomicU64::new(0),
            bets_rolled_back: AtomicU64::new(0),
            rounds_settled: AtomicU64::new(0),
            orders_settled: AtomicU64::new(0),
            wagered_cents: AtomicU64::new(0),
            paid_cents: AtomicU64::new(0),
        }
    }

    pub fn record_bet(&self, amount: f64) {
        self.bets_accepted.fetch_add(1, Ordering::SeqCst);
        self.wagered_cents.fetch_add(to_cents(amount), Ordering::SeqCst);
    }

    pub fn record_rejection(&self) {
        self.bets_rejected.fetch_add(1, Ordering::SeqCst);
    }

    /// Undo an optimistic bet whose persistence failed
    pub fn record_rollback(&self, amount: f64) {
        self.bets_rolled_back.fetch_add(1, Ordering::SeqCst);
        let cents = to_cents(amount);
        let _ = self
            .wagered_cents
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some(v.saturating_sub(cents)));
    }

    pub fn record_round_settled(&self, orders: usize, paid: f64) {
        self.rounds_settled.fetch_add(1, Ordering::SeqCst);
        self.orders_settled.fetch_add(orders as u64, Ordering::SeqCst);
        self.paid_cents.fetch_add(to_cents(paid), Ordering::SeqCst);
    }

    pub fn record_order_settled(&self, paid: f64) {
        self.orders_settled.fetch_add(1, Ordering::SeqCst);
        self.paid_cents.fetch_add(to_cents(paid), Ordering::SeqCst);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime().as_secs(),
            bets_accepted: self.bets_accepted.load(Ordering::SeqCst),
            bets_rejected: self.bets_rejected.load(Ordering::SeqCst),
            bets_rolled_back: self.bets_rolled_back.load(Ordering::SeqCst),
            rounds_settled: self.rounds_settled.load(Ordering::SeqCst),
            orders_settled: self.orders_settled.load(Ordering::SeqCst),
            total_wagered: self.wagered_cents.load(Ordering::SeqCst) as f64 / 100.0,
            total_paid: self.paid_cents.load(Ordering::SeqCst) as f64 / 100.0,
        }
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bet_and_rollback() {
        let metrics = EngineMetrics::new();
        metrics.record_bet(10.5);
        metrics.record_bet(2.0);
        metrics.record_rollback(2.0);
        metrics.record_rejection();

        let snap = metrics.snapshot();
        assert_eq!(snap.bets_accepted, 2);
        assert_eq!(snap.bets_rolled_back, 1);
        assert_eq!(snap.bets_rejected, 1);
        assert_eq!(snap.total_wagered, 10.5);
    }

    #[test]
    fn test_settlement_counters() {
        let metrics = EngineMetrics::new();
        metrics.record_round_settled(3, 25.25);
        metrics.record_order_settled(1.0);

        let snap = metrics.snapshot();
        assert_eq!(snap.rounds_settled, 1);
        assert_eq!(snap.orders_settled, 4);
        assert_eq!(snap.total_paid, 26.25);
    }
}
