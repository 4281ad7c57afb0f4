//! Configuration parsing for the KuCoin feed runner.
//!
//! Settings come from a single JSON file. The top-level structure carries
//! logging metadata and a `feed` block describing the session timings and the
//! topics to subscribe at startup. Every field is optional; the market-data
//! module applies the production defaults.
//!
//! # Example config
//!
//! ```json
//! {
//!   "module": { "module_name": "kucoin_md", "log_path": "/tmp/log" },
//!   "feed": {
//!     "retry_timeout_ms": 5000,
//!     "tickers": ["BTC/USDT"],
//!     "candles": [{ "symbol": "ETH/USDT", "interval": "1m" }]
//!   }
//! }
//! ```

use anyhow::Context;
use serde::Deserialize;

/// Top-level application config, deserialized from a JSON file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Module metadata (name, log path).
    pub module: Option<ModuleMeta>,

    /// Feed session settings and startup subscriptions.
    #[serde(default)]
    pub feed: FeedConfig,
}

impl AppConfig {
    /// Returns the configured module name, defaulting to `"kucoin_md"`.
    pub fn module_name(&self) -> String {
        self.module
            .as_ref()
            .and_then(|m| m.module_name.clone())
            .unwrap_or_else(|| "kucoin_md".to_string())
    }

    /// Returns the log path.
    pub fn log_path(&self) -> Option<String> {
        self.module.as_ref().and_then(|m| m.log_path.clone())
    }
}

/// Module metadata block.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleMeta {
    pub module_name: Option<String>,
    pub log_path: Option<String>,
}

/// Feed session configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedConfig {
    /// Public bullet endpoint that hands out the session token.
    pub bullet_url: Option<String>,

    /// Value of the `host` header sent with the bullet request.
    pub rest_host: Option<String>,

    /// Fixed delay before reconnecting and between "not ready" retries.
    pub retry_timeout_ms: Option<u64>,

    /// Per-task timeout of the outbound send queue.
    pub send_timeout_ms: Option<u64>,

    /// Transport handshake + welcome timeout (defaults to the retry delay).
    pub handshake_timeout_ms: Option<u64>,

    /// Upper bound on an acknowledgment wait. Unset means wait indefinitely.
    pub ack_timeout_ms: Option<u64>,

    /// Ticker symbols to subscribe at startup (e.g. `"BTC/USDT"`).
    #[serde(default)]
    pub tickers: Vec<String>,

    /// Candle streams to subscribe at startup.
    #[serde(default)]
    pub candles: Vec<CandleSubscription>,
}

/// One configured candle stream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CandleSubscription {
    pub symbol: String,
    pub interval: String,
}

/// Load and parse a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: AppConfig = serde_json::from_str(&content).context("invalid config JSON")?;
    Ok(config)
}
