//! Bullet token bootstrap.
//!
//! KuCoin hands out public WebSocket sessions through a REST "bullet" call:
//!
//! ```text
//! POST /api/v1/bullet-public
//! { "code": "200000",
//!   "data": { "token": "...",
//!             "instanceServers": [ { "endpoint": "wss://ws-api-spot.kucoin.com/",
//!                                    "pingInterval": 18000, "pingTimeout": 10000,
//!                                    "protocol": "websocket", "encrypt": true } ] } }
//! ```

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use kc_core::KcError;

/// Heartbeat used when the exchange reports no usable ping interval.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_millis(18_000);

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceServer {
    pub endpoint: String,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub encrypt: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BulletData {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    instance_servers: Vec<InstanceServer>,
}

/// Session token plus the endpoint it is valid for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulletToken {
    pub token: String,
    pub endpoint: String,
    pub ping_interval: Duration,
}

impl BulletToken {
    /// `endpoint?token=<token>&connectId=<id>`
    pub fn ws_url(&self, connect_id: &str) -> Result<String, KcError> {
        let mut url = url::Url::parse(&self.endpoint).map_err(|e| {
            KcError::Bootstrap(format!("invalid endpoint {}: {e}", self.endpoint))
        })?;
        url.query_pairs_mut()
            .append_pair("token", &self.token)
            .append_pair("connectId", connect_id);
        Ok(url.into())
    }
}

/// Extract a [`BulletToken`] from a bullet response body.
pub fn parse_bullet_response(body: &serde_json::Value) -> Result<BulletToken, KcError> {
    let data = body
        .get("data")
        .ok_or_else(|| KcError::Bootstrap("no data in bullet response".into()))?;
    let data: BulletData = serde_json::from_value(data.clone())
        .map_err(|e| KcError::Bootstrap(format!("malformed bullet data: {e}")))?;

    let token = data
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| KcError::Bootstrap("no token received".into()))?;
    let server = data
        .instance_servers
        .into_iter()
        .next()
        .ok_or_else(|| KcError::Bootstrap("no instance server received".into()))?;

    let ping_interval = match server.ping_interval {
        0 => DEFAULT_PING_INTERVAL,
        ms => Duration::from_millis(ms),
    };
    Ok(BulletToken { token, endpoint: server.endpoint, ping_interval })
}

/// Source of session tokens. The session only depends on this trait.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn fetch_token(&self) -> Result<BulletToken, KcError>;
}

/// Production provider: the public bullet endpoint.
pub struct BulletClient {
    http: reqwest::Client,
    url: String,
    host: String,
}

impl BulletClient {
    pub fn new(url: impl Into<String>, host: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), url: url.into(), host: host.into() }
    }

    async fn post_bullet(&self) -> anyhow::Result<serde_json::Value> {
        let resp = self
            .http
            .post(&self.url)
            .header(reqwest::header::HOST, &self.host)
            .send()
            .await
            .context("bullet request failed")?;

        let body = resp
            .error_for_status()
            .context("bullet HTTP error")?
            .json()
            .await
            .context("bullet response is not JSON")?;
        Ok(body)
    }
}

#[async_trait]
impl TokenProvider for BulletClient {
    async fn fetch_token(&self) -> Result<BulletToken, KcError> {
        let body = self.post_bullet().await.map_err(|e| KcError::Bootstrap(format!("{e:#}")))?;
        let token = parse_bullet_response(&body)?;
        info!("[kucoin] bullet token received, endpoint {}", token.endpoint);
        Ok(token)
    }
}
