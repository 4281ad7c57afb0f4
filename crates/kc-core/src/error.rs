//! Typed error definitions for the KuCoin feed client.
//!
//! Provides [`KcError`] for the failures a caller can react to (bootstrap,
//! handshake, session guards). All variants implement `std::error::Error` via
//! `thiserror`, so they integrate seamlessly with `anyhow::Result`.

use thiserror::Error;

/// Domain-specific errors for the KuCoin feed client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KcError {
    /// The bullet (token) exchange did not yield a usable token or endpoint.
    #[error("bootstrap error: {0}")]
    Bootstrap(String),

    /// The socket opened but the protocol-level welcome never arrived.
    #[error("no welcome message from KuCoin received")]
    NoWelcome,

    /// An operation that needs an open session was attempted without one.
    #[error("session is not open, call connect before subscribing")]
    RequireOpen,

    /// Candle interval outside the supported set.
    #[error("invalid candle interval {got:?}, expected one of: {expected}")]
    InvalidInterval { got: String, expected: String },

    /// Close attempted while subscriptions are still registered.
    #[error("cannot close with {0} active subscription(s)")]
    ActiveSubscriptions(usize),

    /// WebSocket connection, handshake, or write error.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// Inbound frame parsing error.
    #[error("parse error: {0}")]
    Parse(String),
}
