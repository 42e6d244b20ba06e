//! Engine settings with documented defaults
//!
//! Each engine copies its section at construction. Rounds and periods take a
//! snapshot of the values that affect their cost basis, so later updates only
//! apply to rounds created afterwards.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete wagering platform configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WagerConfig {
    pub crash: CrashSettings,
    pub dice: SessionSettings,
    pub limbo: SessionSettings,
    pub mine: SessionSettings,
    pub wingo: LotterySettings,
    pub nine: LotterySettings,
    pub multi_wingo: LotterySettings,
    pub logging: LoggingConfig,
}

impl WagerConfig {
    /// Short intervals for local runs and tests
    pub fn fast() -> Self {
        let lottery = LotterySettings {
            betting_interval_ms: 400,
            stop_betting_interval_ms: 200,
            settle_interval_ms: 100,
            ..LotterySettings::default()
        };
        Self {
            crash: CrashSettings {
                waiting_interval_ms: 50,
                countdown_interval_ms: 150,
                takeoff_interval_ms: 50,
                crashed_interval_ms: 50,
                result_interval_ms: 100,
                tick_interval_ms: 10,
                flight_time_scale: 200.0,
                ..CrashSettings::default()
            },
            wingo: lottery.clone(),
            nine: LotterySettings { bet_types: vec![1], ..lottery.clone() },
            multi_wingo: LotterySettings { bet_types: vec![1, 2, 3], ..lottery },
            ..Self::default()
        }
    }
}

/// Crash round constants
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CrashSettings {
    /// Rake in per mille, deducted from the stake to form the delivery
    pub rake: u32,
    pub min_bet: f64,
    pub max_bet: f64,
    pub max_reward: f64,
    pub waiting_interval_ms: u64,
    pub countdown_interval_ms: u64,
    pub takeoff_interval_ms: u64,
    pub crashed_interval_ms: u64,
    pub result_interval_ms: u64,
    /// Deadline polling period
    pub tick_interval_ms: u64,
    /// Curve seconds per wall-clock second
    pub flight_time_scale: f64,
    /// Size of the display-only top orders set
    pub top_orders: usize,
}

impl Default for CrashSettings {
    fn default() -> Self {
        Self {
            rake: 0,
            min_bet: 1.0,
            max_bet: 10_000.0,
            max_reward: 1_000_000.0,
            waiting_interval_ms: 1_000,
            countdown_interval_ms: 7_000,
            takeoff_interval_ms: 1_500,
            crashed_interval_ms: 1_000,
            result_interval_ms: 6_000,
            tick_interval_ms: 500,
            flight_time_scale: 1.0,
            top_orders: 20,
        }
    }
}

impl CrashSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Dice, Limbo and Mine constants
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionSettings {
    /// Rake in per mille applied to the odds
    pub rake: u32,
    pub min_bet: f64,
    pub max_bet: f64,
    pub max_reward: f64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            rake: 10,
            min_bet: 0.01,
            max_bet: 10_000.0,
            max_reward: 1_000_000.0,
        }
    }
}

/// Wingo / Nine room constants
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LotterySettings {
    /// Room ids driven by this engine
    pub bet_types: Vec<u32>,
    /// Fee in per mille taken from each stake
    pub fee_rate: u32,
    pub max_bet: f64,
    pub betting_interval_ms: u64,
    pub stop_betting_interval_ms: u64,
    pub settle_interval_ms: u64,
    pub max_orders_per_period: usize,
    pub max_wildcards_per_period: usize,
}

impl Default for LotterySettings {
    fn default() -> Self {
        Self {
            bet_types: vec![1, 3, 5],
            fee_rate: 20,
            max_bet: 10_000.0,
            betting_interval_ms: 55_000,
            stop_betting_interval_ms: 5_000,
            settle_interval_ms: 2_000,
            max_orders_per_period: 20,
            max_wildcards_per_period: 5,
        }
    }
}

impl LotterySettings {
    pub fn betting_interval(&self) -> Duration {
        Duration::from_millis(self.betting_interval_ms)
    }

    /// Time spent in Waiting before settlement starts
    pub fn waiting_interval(&self) -> Duration {
        Duration::from_millis(
            self.stop_betting_interval_ms
                .saturating_sub(self.settle_interval_ms),
        )
    }

    pub fn settle_interval(&self) -> Duration {
        Duration::from_millis(self.settle_interval_ms)
    }
}

/// Log output settings
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}
