//! Period state machine shared by every lottery room
//!
//! Transitions are an explicit table. Entering a phase schedules exactly one
//! follow-up event on a timer, so a room advances by timer chaining and no
//! poller is involved.

use crate::config::LotterySettings;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Init,
    Betting,
    Waiting,
    Settle,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::Betting => "betting",
            Phase::Waiting => "waiting",
            Phase::Settle => "settle",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    Start,
    StopBetting,
    Settle,
    NextRound,
}

impl Phase {
    /// Phase reached by applying `event`, `None` when the table has no entry
    pub fn on(self, event: PhaseEvent) -> Option<Phase> {
        match (self, event) {
            (Phase::Init, PhaseEvent::Start) => Some(Phase::Betting),
            (Phase::Betting, PhaseEvent::StopBetting) => Some(Phase::Waiting),
            (Phase::Waiting, PhaseEvent::Settle) => Some(Phase::Settle),
            (Phase::Settle, PhaseEvent::NextRound) => Some(Phase::Betting),
            _ => None,
        }
    }

    /// Event to fire, and after how long, once this phase has been entered
    pub fn follow_up(self, settings: &LotterySettings) -> Option<(PhaseEvent, Duration)> {
        match self {
            Phase::Init => None,
            Phase::Betting => Some((PhaseEvent::StopBetting, settings.betting_interval())),
            Phase::Waiting => Some((PhaseEvent::Settle, settings.waiting_interval())),
            Phase::Settle => Some((PhaseEvent::NextRound, settings.settle_interval())),
        }
    }

    pub fn accepts_orders(self) -> bool {
        self == Phase::Betting
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        let mut phase = Phase::Init;
        let events = [
            PhaseEvent::Start,
            PhaseEvent::StopBetting,
            PhaseEvent::Settle,
            PhaseEvent::NextRound,
            PhaseEvent::StopBetting,
        ];
        let mut seen = Vec::new();
        for event in events {
            phase = phase.on(event).unwrap();
            seen.push(phase);
        }
        assert_eq!(
            seen,
            vec![Phase::Betting, Phase::Waiting, Phase::Settle, Phase::Betting, Phase::Waiting]
        );
    }

    #[test]
    fn test_out_of_order_events_rejected() {
        assert_eq!(Phase::Init.on(PhaseEvent::Settle), None);
        assert_eq!(Phase::Betting.on(PhaseEvent::Start), None);
        assert_eq!(Phase::Waiting.on(PhaseEvent::NextRound), None);
        assert!(Phase::Betting.accepts_orders());
        assert!(!Phase::Waiting.accepts_orders());
    }

    #[test]
    fn test_follow_up_timers() {
        let settings = LotterySettings::default();
        assert_eq!(
            Phase::Betting.follow_up(&settings),
            Some((PhaseEvent::StopBetting, Duration::from_millis(55_000)))
        );
        assert_eq!(
            Phase::Waiting.follow_up(&settings),
            Some((PhaseEvent::Settle, Duration::from_millis(3_000)))
        );
        assert_eq!(
            Phase::Settle.follow_up(&settings),
            Some((PhaseEvent::NextRound, Duration::from_millis(2_000)))
        );
        assert_eq!(Phase::Init.follow_up(&settings), None);
    }
}
