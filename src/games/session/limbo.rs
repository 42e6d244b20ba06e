//! Limbo: the mirror of Dice
//!
//! For the same target and direction flag Limbo wins on the opposite side of
//! the roll, so `is_above = 1` wins below the target.

use super::roll::{RollEngine, RollRules};
use crate::common::types::GameType;
use crate::fairness;

pub struct Limbo;

pub type LimboEngine = RollEngine<Limbo>;

impl RollRules for Limbo {
    const GAME: GameType = GameType::Limbo;

    fn roll(client_seed: &str, server_seed: &str) -> f64 {
        fairness::dice_result(client_seed, server_seed)
    }

    fn win_chance(is_above: u8, target: f64) -> f64 {
        if is_above == 1 {
            target
        } else {
            100.0 - target
        }
    }

    fn is_win(is_above: u8, result: f64, target: f64) -> bool {
        if is_above == 1 {
            result < target
        } else {
            result > target
        }
    }
}
