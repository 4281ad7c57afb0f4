//! KuCoin public market data.
//!
//! [`KucoinSession`] is the reusable client. [`KucoinMd`] wraps it as an
//! [`MdModule`](crate::MdModule) that subscribes a configured set of tickers
//! and candles on start and drains them on stop.

pub mod bootstrap;
pub mod config;
pub mod decoder;
pub mod frame;
pub mod session;

#[cfg(test)]
pub(crate) mod mock;

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use kc_core::types::ChannelKind;

pub use self::config::SessionConfig;
pub use self::session::KucoinSession;

pub struct KucoinMd {
    name: String,
    session: KucoinSession,
}

impl KucoinMd {
    /// Nothing is opened until [`MdModule::start`](crate::MdModule::start).
    pub fn new(name: impl Into<String>, config: SessionConfig) -> Self {
        Self::with_session(name, KucoinSession::new(config))
    }

    pub fn with_session(name: impl Into<String>, session: KucoinSession) -> Self {
        Self { name: name.into(), session }
    }

    pub fn session(&self) -> &KucoinSession {
        &self.session
    }
}

#[async_trait]
impl crate::MdModule for KucoinMd {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&mut self) -> Result<()> {
        self.session.connect().await.context("kucoin connect failed")?;

        let cfg = self.session.config();
        for symbol in &cfg.tickers {
            self.session
                .subscribe_ticker(symbol)
                .with_context(|| format!("subscribe ticker {symbol}"))?;
        }
        for (symbol, interval) in &cfg.candles {
            self.session
                .subscribe_candle(symbol, interval.as_str())
                .with_context(|| format!("subscribe candle {symbol} {interval}"))?;
        }

        info!(
            "[{}] started, tickers: {}, candles: {}",
            self.name,
            cfg.tickers.len(),
            cfg.candles.len()
        );
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if self.session.is_socket_open() {
            for key in self.session.subscriptions() {
                let result = match (key.kind, key.interval) {
                    (ChannelKind::Candle, Some(interval)) => {
                        self.session.unsubscribe_candle(&key.symbol, interval.as_str())
                    }
                    _ => self.session.unsubscribe_ticker(&key.symbol),
                };
                if let Err(e) = result {
                    warn!("[{}] unsubscribe {key} failed: {e}", self.name);
                }
            }
            drain(&self.session, self.session.config().retry_timeout).await;
        }

        match self.session.close_connection() {
            Ok(()) => info!("[{}] stopped", self.name),
            Err(e) => warn!("[{}] close refused: {e}", self.name),
        }
        Ok(())
    }
}

/// Wait until no acknowledgment is outstanding, bounded by `limit`.
async fn drain(session: &KucoinSession, limit: Duration) {
    let deadline = tokio::time::Instant::now() + limit;
    while session.pending_acks() > 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
