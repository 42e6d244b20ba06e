//! Shared primitives used by every game engine
//!
//! Money is carried as `f64` and normalised to two decimals at every
//! boundary where it is stored or paid out.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Supported game types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GameType {
    Crash,
    Dice,
    Limbo,
    Mine,
    Wingo,
    Nine,
}

impl fmt::Display for GameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameType::Crash => write!(f, "crash"),
            GameType::Dice => write!(f, "dice"),
            GameType::Limbo => write!(f, "limbo"),
            GameType::Mine => write!(f, "mine"),
            GameType::Wingo => write!(f, "wingo"),
            GameType::Nine => write!(f, "nine"),
        }
    }
}

/// Unix timestamp in milliseconds
pub fn current_timestamp_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Round half away from zero to `decimals` places
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Truncate toward zero to `decimals` places
pub fn floor_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).floor() / factor
}

/// Round to `digits` significant digits
pub fn round_significant(value: f64, digits: usize) -> f64 {
    if value == 0.0 || !value.is_finite() {
        return value;
    }
    let formatted = format!("{:.*e}", digits.saturating_sub(1), value);
    formatted.parse().unwrap_or(value)
}

/// Money amounts are kept to cents
pub fn round_money(value: f64) -> f64 {
    round_to(value, 2)
}

/// Amount net of a per-mille rake
pub fn net_of_rake(amount: f64, rake_per_mille: u32) -> f64 {
    round_money(amount * (1000.0 - rake_per_mille as f64) / 1000.0)
}

/// Random hex seed of `bytes` bytes
pub fn random_seed_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Lowercase hex SHA-256 of the concatenated parts
pub fn sha256_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}
