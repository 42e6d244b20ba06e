//! WagerHub - provably fair wagering engines
//!
//! Crash rounds, periodic Wingo/Nine lotteries and per-user Dice, Limbo and
//! Mine sessions, built on:
//! - HMAC-SHA256 outcomes that anyone can recompute ([`fairness`])
//! - concurrent order ledgers with insert-if-absent ([`ledger`])
//! - pluggable persistence ([`storage`]) and notification ([`notify`]) seams

pub mod cache;
pub mod common;
pub mod config;
pub mod errors;
pub mod fairness;
pub mod games;
pub mod hex_solver;
pub mod ledger;
pub mod metrics;
pub mod notify;
pub mod settlement;
pub mod storage;

pub use common::config::ConfigLoader;
pub use common::types::GameType;
pub use config::{CrashSettings, LotterySettings, SessionSettings, WagerConfig};
pub use errors::{WagerError, WagerResult};
pub use fairness::FairnessVerifier;
pub use games::crash::{CrashEngine, PlaceBet, RandomEntropy};
pub use games::lottery::{LotteryEngine, LotteryGame, SyntheticPrice};
pub use games::session::{DiceEngine, LimboEngine, MineEngine};
pub use metrics::EngineMetrics;
pub use notify::{BroadcastNotifier, Notifier};
