//! # kc-core
//!
//! Core crate for the KuCoin feed client, providing:
//!
//! - **Types** (`types`): channel kinds, candle intervals, subscription keys, market data records
//! - **Configuration** (`config`): JSON config deserialization
//! - **Error types** (`error`): domain-specific `KcError` via thiserror
//! - **WebSocket** (`ws`): transport link and the tungstenite connector
//! - **Time utilities** (`time_util`): wall-clock timestamps
//! - **Logging** (`logging`): tracing-based structured logging

pub mod config;
pub mod error;
pub mod logging;
pub mod time_util;
pub mod types;
pub mod ws;

// Re-export types at crate root for convenience.
pub use error::KcError;
pub use types::*;
