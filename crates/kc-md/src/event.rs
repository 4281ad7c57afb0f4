//! Notifications published by the session to its subscribers.
//!
//! Any number of consumers can call
//! [`KucoinSession::events`](crate::kucoin::KucoinSession::events) and receive
//! every event from that point on. Slow consumers may observe
//! `RecvError::Lagged` and skip ahead.

use kc_core::types::{Candle, SubscriptionKey, Ticker};

/// Capacity of the session broadcast channel.
pub const EVENT_CAPACITY: usize = 1024;

/// A typed event emitted by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Bootstrap, handshake, transport, or send failure.
    Error(String),

    /// An unexpected disconnect is being recovered.
    Reconnect {
        /// How many subscriptions will be restored.
        subscriptions: usize,
    },

    /// A subscribe or replay was deferred because the socket was not writable.
    SocketNotReady(String),

    /// Registry membership changed; carries the full current set.
    Subscriptions(Vec<SubscriptionKey>),

    /// Ticker push.
    Ticker(Ticker),

    /// Candle push (live update or closed bar).
    Candle(Candle),
}

/// Sender half of the session event channel.
pub type SessionEventSender = tokio::sync::broadcast::Sender<SessionEvent>;

/// Receiver half of the session event channel.
pub type SessionEventReceiver = tokio::sync::broadcast::Receiver<SessionEvent>;

/// Create a new session event channel.
pub fn channel() -> SessionEventSender {
    tokio::sync::broadcast::channel(EVENT_CAPACITY).0
}
