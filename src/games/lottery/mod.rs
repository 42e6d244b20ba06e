//! Periodic lotteries: Wingo, Nine and lockstep MultiWingo
//!
//! Every room cycles Betting -> Waiting -> Settle -> Betting. Each phase entry
//! arms a timer for the next event; nothing polls.

pub mod engine;
pub mod fsm;
pub mod period;
pub mod room;
pub mod ticket;

pub use engine::{LotteryEngine, LotteryGame, Pacing};
pub use fsm::{Phase, PhaseEvent};
pub use period::{LotteryOrder, LotteryOrderStatus, Period};
pub use room::Room;
pub use ticket::{LotteryKind, Ticket};

use crate::common::types::round_to;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;

/// Source of the price displayed next to a drawn number
pub trait PriceFeed: Send + Sync {
    fn price_for(&self, bet_type: u32, number: u8) -> f64;
}

const SYNTHETIC_START: f64 = 30_000.0;
const SYNTHETIC_STEP: f64 = 25.0;

/// Random walk per room whose last cent digit is the drawn number
pub struct SyntheticPrice {
    last: Mutex<HashMap<u32, f64>>,
}

impl SyntheticPrice {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for SyntheticPrice {
    fn default() -> Self {
        Self::new()
    }
}

impl PriceFeed for SyntheticPrice {
    fn price_for(&self, bet_type: u32, number: u8) -> f64 {
        let mut last = self.last.lock();
        let previous = last.get(&bet_type).copied().unwrap_or(SYNTHETIC_START);
        let step = rand::thread_rng().gen_range(-SYNTHETIC_STEP..=SYNTHETIC_STEP);
        let cents = ((previous + step).max(1.0) * 100.0).round() as u64;
        let price = round_to((cents - cents % 10 + number as u64) as f64 / 100.0, 2);
        last.insert(bet_type, price);
        price
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_price_ends_in_number() {
        let feed = SyntheticPrice::new();
        for number in 0..10u8 {
            let price = feed.price_for(1, number);
            let cents = (price * 100.0).round() as u64;
            assert_eq!(cents % 10, number as u64);
            assert!((price - SYNTHETIC_START).abs() < 1_000.0);
        }
    }
}
