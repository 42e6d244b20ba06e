//! Game engines
//!
//! - `crash`: one shared round on a polled deadline schedule
//! - `lottery`: Wingo/Nine rooms on timer-chained periods
//! - `session`: per-user Dice, Limbo and Mine rounds

pub mod crash;
pub mod lottery;
pub mod session;

pub use crash::{CrashEngine, PlaceBet};
pub use lottery::{LotteryEngine, LotteryGame, Pacing};
pub use session::{DiceEngine, LimboEngine, MineEngine};
