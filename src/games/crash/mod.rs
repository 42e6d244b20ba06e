//! Crash: one continuously recycling round with a multiplier that climbs until
//! it crashes
//!
//! Bets placed while the current round is in Waiting or Countdown join it;
//! anything later joins the pre-built next round.

pub mod engine;
pub mod round;
mod scheduler;

pub use engine::{CrashEngine, PlaceBet};
pub use round::{LiveRound, Order, OrderStatus, Round, RoundLimits, RoundStatus, RoundTimings, RoundView, Schedule, TopOrders};

use crate::common::types::random_seed_hex;

/// Seeds for new rounds
pub trait EntropySource: Send + Sync {
    /// Secret half of the outcome, revealed after settlement
    fn server_seed(&self) -> String;

    /// Public half of the outcome
    fn block_hash(&self) -> String;
}

/// 32 random bytes for both seeds
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomEntropy;

impl EntropySource for RandomEntropy {
    fn server_seed(&self) -> String {
        random_seed_hex(32)
    }

    fn block_hash(&self) -> String {
        random_seed_hex(32)
    }
}
