//! # kc-md
//!
//! KuCoin public market-data module.
//!
//! ## Architecture
//!
//! ```text
//! caller ──► KucoinSession ──► SendQueue ──► transport link ──► KuCoin
//!                 │    ▲                                          │
//!                 ▼    │ ack outcome                              │
//!      SubscriptionRegistry ◄── ProtocolDecoder ◄─────────────────┘
//! ```
//!
//! Subscriptions are applied to the registry optimistically and compensated
//! when the acknowledgment is negative, times out, or the send fails.
//!
//! ## Shared infrastructure
//!
//! - [`send_queue`]: strictly serial, time-boxed outbound task lane
//! - [`registry`]: ordered set of active subscriptions with change notifications
//! - [`event`]: typed session notifications over a broadcast channel
//! - [`json_util`]: JSON parsing helpers

pub mod event;
pub mod json_util;
pub mod kucoin;
pub mod registry;
pub mod send_queue;

use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use async_trait::async_trait;

/// Trait implemented by market data modules.
///
/// Only `Send` is required (not `Sync`) because modules are driven
/// sequentially by the runner, never concurrently.
#[async_trait]
pub trait MdModule: Send {
    /// Human-readable module name.
    fn name(&self) -> &str;
    /// Connect and begin processing market data.
    async fn start(&mut self) -> Result<()>;
    /// Gracefully release subscriptions and close the connection.
    async fn stop(&mut self) -> Result<()>;
}

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
