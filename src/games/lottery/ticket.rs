//! Ticket encodings and odds for Wingo and Nine rooms
//!
//! Wingo draws 0-9. Tickets `0`-`9` pick a number, `10` green, `11` violet,
//! `12` red, `13` big (5-9), `14` small (0-4).
//!
//! Nine draws 1-9. A ticket is a string of distinct digits; one digit is an
//! exact pick, several digits form a wildcard that splits the odds.

use crate::errors::ValidationError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

const WINGO_NUMBER_ODDS: f64 = 9.0;
const WINGO_COLOR_ODDS: f64 = 2.0;
const WINGO_SPLIT_COLOR_ODDS: f64 = 1.5;
const WINGO_VIOLET_ODDS: f64 = 4.5;
const WINGO_SIZE_ODDS: f64 = 2.0;
const NINE_NUMBER_ODDS: f64 = 8.8;
const NINE_MAX_DIGITS: usize = 8;

/// Which lottery variant a room runs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LotteryKind {
    Wingo,
    Nine,
}

impl fmt::Display for LotteryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LotteryKind::Wingo => write!(f, "wingo"),
            LotteryKind::Nine => write!(f, "nine"),
        }
    }
}

/// Parsed bet selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ticket {
    Number(u8),
    Green,
    Violet,
    Red,
    Big,
    Small,
    /// Nine selection; more than one digit is a wildcard
    Digits(Vec<u8>),
}

impl Ticket {
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Ticket::Digits(d) if d.len() > 1)
    }
}

impl LotteryKind {
    pub fn min_number(self) -> u8 {
        match self {
            LotteryKind::Wingo => 0,
            LotteryKind::Nine => 1,
        }
    }

    pub fn max_number(self) -> u8 {
        9
    }

    pub fn contains(self, number: i32) -> bool {
        number >= self.min_number() as i32 && number <= self.max_number() as i32
    }

    pub fn draw<R: Rng>(self, rng: &mut R) -> u8 {
        rng.gen_range(self.min_number()..=self.max_number())
    }

    pub fn parse_ticket(self, raw: &str) -> Result<Ticket, ValidationError> {
        let invalid = || ValidationError::InvalidTicket(raw.to_string());
        match self {
            LotteryKind::Wingo => {
                let code: u8 = raw.trim().parse().map_err(|_| invalid())?;
                match code {
                    0..=9 => Ok(Ticket::Number(code)),
                    10 => Ok(Ticket::Green),
                    11 => Ok(Ticket::Violet),
                    12 => Ok(Ticket::Red),
                    13 => Ok(Ticket::Big),
                    14 => Ok(Ticket::Small),
                    _ => Err(invalid()),
                }
            }
            LotteryKind::Nine => {
                let raw = raw.trim();
                if raw.is_empty() || raw.len() > NINE_MAX_DIGITS {
                    return Err(invalid());
                }
                let mut digits = Vec::with_capacity(raw.len());
                for c in raw.chars() {
                    let d = c.to_digit(10).ok_or_else(invalid)? as u8;
                    if d == 0 || digits.contains(&d) {
                        return Err(invalid());
                    }
                    digits.push(d);
                }
                digits.sort_unstable();
                Ok(Ticket::Digits(digits))
            }
        }
    }

    /// Canonical text form used as the stake-map key
    pub fn encode(self, ticket: &Ticket) -> String {
        match ticket {
            Ticket::Number(n) => n.to_string(),
            Ticket::Green => "10".to_string(),
            Ticket::Violet => "11".to_string(),
            Ticket::Red => "12".to_string(),
            Ticket::Big => "13".to_string(),
            Ticket::Small => "14".to_string(),
            Ticket::Digits(d) => d.iter().map(|n| n.to_string()).collect(),
        }
    }

    /// Payout odds for `ticket` when `number` is drawn; 0 means a loss
    pub fn odds(self, ticket: &Ticket, number: u8) -> f64 {
        match (self, ticket) {
            (LotteryKind::Wingo, Ticket::Number(n)) if *n == number => WINGO_NUMBER_ODDS,
            (LotteryKind::Wingo, Ticket::Green) => match number {
                5 => WINGO_SPLIT_COLOR_ODDS,
                1 | 3 | 7 | 9 => WINGO_COLOR_ODDS,
                _ => 0.0,
            },
            (LotteryKind::Wingo, Ticket::Red) => match number {
                0 => WINGO_SPLIT_COLOR_ODDS,
                2 | 4 | 6 | 8 => WINGO_COLOR_ODDS,
                _ => 0.0,
            },
            (LotteryKind::Wingo, Ticket::Violet) if number == 0 || number == 5 => WINGO_VIOLET_ODDS,
            (LotteryKind::Wingo, Ticket::Big) if number >= 5 => WINGO_SIZE_ODDS,
            (LotteryKind::Wingo, Ticket::Small) if number <= 4 => WINGO_SIZE_ODDS,
            (LotteryKind::Nine, Ticket::Digits(d)) if d.contains(&number) => NINE_NUMBER_ODDS / d.len() as f64,
            _ => 0.0,
        }
    }

    /// Display colour of a drawn number
    pub fn color(self, number: u8) -> &'static str {
        match (self, number) {
            (LotteryKind::Wingo, 0) => "red+violet",
            (LotteryKind::Wingo, 5) => "green+violet",
            (LotteryKind::Wingo, n) if n % 2 == 0 => "red",
            (LotteryKind::Wingo, _) => "green",
            (LotteryKind::Nine, n) if n % 2 == 0 => "red",
            (LotteryKind::Nine, _) => "green",
        }
    }
}
