//! Outbound event notifications
//!
//! Engines push events through a [`Notifier`] after state changes. Delivery is
//! fire-and-forget: a send never fails the operation that produced it.
//!
//! Channels:
//! - `all` - every round or period update
//! - `room:{name}` - one crash feed or lottery room
//! - `user:{uid}` - a single player's orders

use crate::games::crash::{Order, RoundView};
use crate::games::lottery::{LotteryOrder, Period};
use crate::games::session::SessionOrder;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

pub const CHANNEL_ALL: &str = "all";

pub fn room_channel(room: impl std::fmt::Display) -> String {
    format!("room:{}", room)
}

pub fn user_channel(uid: &str) -> String {
    format!("user:{}", uid)
}

/// What a crash order event reports
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderAction {
    Placed,
    Cancelled,
    Escaped,
    AutoEscaped,
    Settled,
    RolledBack,
}

/// Notification payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "round")]
    Round { round: RoundView },

    #[serde(rename = "crash_order")]
    CrashOrder { action: OrderAction, order: Order },

    #[serde(rename = "period")]
    Period { state: String, period: Period },

    #[serde(rename = "lottery_order")]
    LotteryOrder { order: LotteryOrder },

    #[serde(rename = "session_order")]
    SessionOrder { order: SessionOrder },
}

/// Sink for engine events
pub trait Notifier: Send + Sync {
    fn send(&self, channel: &str, event: &Event);
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn send(&self, _channel: &str, _event: &Event) {}
}

/// A serialized event addressed to a channel
#[derive(Debug, Clone)]
pub struct Notification {
    pub channel: String,
    pub payload: String,
}

/// Fans events out to any number of in-process subscribers
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Notifier for BroadcastNotifier {
    fn send(&self, channel: &str, event: &Event) {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                debug!("Dropping unserializable event for {}: {}", channel, e);
                return;
            }
        };
        let notification = Notification {
            channel: channel.to_string(),
            payload,
        };
        if let Err(e) = self.tx.send(notification) {
            debug!("No subscribers for {}: {}", channel, e);
        }
    }
}
