//! KuCoin session settings.
//!
//! Built from the generic [`FeedConfig`] with defaults applied. All timeouts
//! here are per-session, never per-call.

use std::time::Duration;

use anyhow::Result;
use kc_core::KcError;
use kc_core::config::FeedConfig;
use kc_core::types::CandleInterval;

pub const DEFAULT_BULLET_URL: &str = "https://openapi-v2.kucoin.com/api/v1/bullet-public";
pub const DEFAULT_REST_HOST: &str = "openapi-v2.kucoin.com";
pub const DEFAULT_RETRY_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 250;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Bullet (token) endpoint.
    pub bullet_url: String,
    /// `host` header sent with the bullet request.
    pub rest_host: String,
    /// Reconnect backoff, and the deferral delay while the socket is not writable.
    pub retry_timeout: Duration,
    /// Lane time each send-queue task is given.
    pub send_timeout: Duration,
    /// Time allowed for the socket handshake and, separately, the welcome message.
    pub handshake_timeout: Duration,
    /// Bound on acknowledgment waits; `None` waits until the link closes.
    pub ack_timeout: Option<Duration>,
    /// Tickers subscribed by the module on start.
    pub tickers: Vec<String>,
    /// Candles subscribed by the module on start.
    pub candles: Vec<(String, CandleInterval)>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let retry = Duration::from_millis(DEFAULT_RETRY_TIMEOUT_MS);
        Self {
            bullet_url: DEFAULT_BULLET_URL.to_string(),
            rest_host: DEFAULT_REST_HOST.to_string(),
            retry_timeout: retry,
            send_timeout: Duration::from_millis(DEFAULT_SEND_TIMEOUT_MS),
            handshake_timeout: retry,
            ack_timeout: None,
            tickers: Vec::new(),
            candles: Vec::new(),
        }
    }
}

impl SessionConfig {
    /// Apply defaults and validate candle intervals.
    pub fn from_feed(feed: &FeedConfig) -> Result<Self> {
        let retry_timeout =
            Duration::from_millis(feed.retry_timeout_ms.unwrap_or(DEFAULT_RETRY_TIMEOUT_MS));

        let mut candles = Vec::with_capacity(feed.candles.len());
        for c in &feed.candles {
            let interval: CandleInterval = c.interval.parse().map_err(|e: KcError| {
                KcError::Config(format!("candle {} {}: {e}", c.symbol, c.interval))
            })?;
            candles.push((c.symbol.clone(), interval));
        }

        Ok(Self {
            bullet_url: feed.bullet_url.clone().unwrap_or_else(|| DEFAULT_BULLET_URL.to_string()),
            rest_host: feed.rest_host.clone().unwrap_or_else(|| DEFAULT_REST_HOST.to_string()),
            retry_timeout,
            send_timeout: Duration::from_millis(
                feed.send_timeout_ms.unwrap_or(DEFAULT_SEND_TIMEOUT_MS),
            ),
            handshake_timeout: feed
                .handshake_timeout_ms
                .map_or(retry_timeout, Duration::from_millis),
            ack_timeout: feed.ack_timeout_ms.map(Duration::from_millis),
            tickers: feed.tickers.clone(),
            candles,
        })
    }
}
