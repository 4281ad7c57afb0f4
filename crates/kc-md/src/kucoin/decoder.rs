//! Inbound frame classification and reply correlation.
//!
//! Every text frame from the socket goes through [`ProtocolDecoder::process_message`],
//! which routes on the `type` field:
//!
//! - `welcome` → resolves the waiter registered for that connect id
//! - `ack`     → resolves the matching pending operation as [`AckOutcome::Confirmed`]
//! - `error`   → resolves it as [`AckOutcome::Rejected`] (or is published if unmatched)
//! - `pong`    → heartbeat reply, nothing to do
//! - `message` → ticker / candle push, published as a [`SessionEvent`]
//!
//! Candle pushes repeat the forming bar many times per second. A last-bar
//! cache per subscription drops exact repeats and turns a bar roll into a
//! `closed` copy of the previous bar followed by the new live bar.

use std::sync::Mutex;

use ahash::AHashMap;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use kc_core::KcError;
use kc_core::time_util;
use kc_core::types::{Candle, ChannelKind, SubscriptionKey, Ticker, from_wire_symbol};

use super::frame::PendingOperation;
use crate::event::{SessionEvent, SessionEventSender};
use crate::json_util::{id_string, parse_str_f64, parse_str_u64};
use crate::lock;

/// How a pending subscribe/unsubscribe ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The exchange acknowledged the request.
    Confirmed,
    /// The exchange answered with an error frame for this id.
    Rejected,
    /// No reply within the configured acknowledgment timeout.
    TimedOut,
    /// The link closed before any reply arrived.
    Abandoned,
}

/// Classification of one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundKind {
    Welcome,
    Ack,
    Error,
    Pong,
    Message,
    Other,
}

struct PendingAck {
    op: PendingOperation,
    tx: oneshot::Sender<AckOutcome>,
}

pub struct ProtocolDecoder {
    events: SessionEventSender,
    welcomes: Mutex<AHashMap<String, oneshot::Sender<()>>>,
    pending: Mutex<AHashMap<String, PendingAck>>,
    candles: Mutex<AHashMap<SubscriptionKey, Candle>>,
}

impl ProtocolDecoder {
    pub fn new(events: SessionEventSender) -> Self {
        Self {
            events,
            welcomes: Mutex::new(AHashMap::new()),
            pending: Mutex::new(AHashMap::new()),
            candles: Mutex::new(AHashMap::new()),
        }
    }

    /// Classify one raw frame and act on it.
    pub fn process_message(&self, raw: &str) -> Result<InboundKind, KcError> {
        let v: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| KcError::Parse(format!("{e}: {raw}")))?;
        let id = id_string(v.get("id"));

        let kind = match v.get("type").and_then(|t| t.as_str()) {
            Some("welcome") => {
                if let Some(id) = id {
                    self.on_welcome(&id);
                }
                InboundKind::Welcome
            }
            Some("ack") => {
                if let Some(id) = id {
                    self.resolve(&id, AckOutcome::Confirmed);
                }
                InboundKind::Ack
            }
            Some("error") => {
                self.on_error(id, &v);
                InboundKind::Error
            }
            Some("pong") => InboundKind::Pong,
            Some("message") => {
                self.on_push(&v);
                InboundKind::Message
            }
            other => {
                debug!("[decoder] ignoring frame type {other:?}");
                InboundKind::Other
            }
        };
        Ok(kind)
    }

    // -----------------------------------------------------------------------
    // Waiters
    // -----------------------------------------------------------------------

    /// Waiter resolved when a welcome for `connect_id` arrives.
    pub fn wait_for_welcome(&self, connect_id: &str) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        lock(&self.welcomes).insert(connect_id.to_string(), tx);
        rx
    }

    pub fn cancel_welcome(&self, connect_id: &str) {
        lock(&self.welcomes).remove(connect_id);
    }

    pub fn cancel_welcomes(&self) {
        lock(&self.welcomes).clear();
    }

    /// Register `op` before its frame is sent; the receiver yields the outcome.
    pub fn register_ack(&self, op: PendingOperation) -> oneshot::Receiver<AckOutcome> {
        let (tx, rx) = oneshot::channel();
        let id = op.correlation_id.clone();
        lock(&self.pending).insert(id, PendingAck { op, tx });
        rx
    }

    /// Drop the pending entry for `correlation_id` without resolving it.
    pub fn cancel(&self, correlation_id: &str) -> Option<PendingOperation> {
        lock(&self.pending).remove(correlation_id).map(|p| p.op)
    }

    /// Resolve every outstanding wait as [`AckOutcome::Abandoned`].
    pub fn abandon_pending(&self) -> usize {
        let drained: Vec<PendingAck> = lock(&self.pending).drain().map(|(_, p)| p).collect();
        let n = drained.len();
        for p in drained {
            let _ = p.tx.send(AckOutcome::Abandoned);
        }
        n
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    // -----------------------------------------------------------------------
    // Candle cache
    // -----------------------------------------------------------------------

    pub fn clear_candle_cache(&self) {
        lock(&self.candles).clear();
    }

    pub fn delete_candle_cache(&self, key: &SubscriptionKey) -> bool {
        lock(&self.candles).remove(key).is_some()
    }

    pub fn cached_candles(&self) -> usize {
        lock(&self.candles).len()
    }

    // -----------------------------------------------------------------------
    // Handlers
    // -----------------------------------------------------------------------

    fn on_welcome(&self, id: &str) {
        match lock(&self.welcomes).remove(id) {
            Some(tx) => {
                let _ = tx.send(());
            }
            None => debug!("[decoder] welcome for unknown connect id {id}"),
        }
    }

    fn resolve(&self, id: &str, outcome: AckOutcome) -> bool {
        let Some(p) = lock(&self.pending).remove(id) else {
            return false;
        };
        debug!("[decoder] {} {:?}", p.op.key, outcome);
        let _ = p.tx.send(outcome);
        true
    }

    fn on_error(&self, id: Option<String>, v: &serde_json::Value) {
        let code = v.get("code").map(|c| c.to_string()).unwrap_or_default();
        let detail = v.get("data").and_then(|d| d.as_str()).unwrap_or_default();
        if let Some(id) = id.as_deref()
            && self.resolve(id, AckOutcome::Rejected)
        {
            warn!("[decoder] request {id} rejected: {code} {detail}");
            return;
        }
        warn!("[decoder] error frame: {code} {detail}");
        let _ = self.events.send(SessionEvent::Error(format!("exchange error {code}: {detail}")));
    }

    fn on_push(&self, v: &serde_json::Value) {
        let Some(topic) = v.get("topic").and_then(|t| t.as_str()) else {
            return;
        };
        let Some(key) = SubscriptionKey::from_topic(topic) else {
            debug!("[decoder] push on unhandled topic {topic}");
            return;
        };
        let Some(data) = v.get("data") else {
            return;
        };

        match key.kind {
            ChannelKind::Ticker => match parse_ticker(data, &key.symbol) {
                Some(t) => {
                    let _ = self.events.send(SessionEvent::Ticker(t));
                }
                None => warn!("[decoder] malformed ticker on {topic}"),
            },
            ChannelKind::Candle => match parse_candle(data, &key) {
                Some(c) => self.on_candle(key, c),
                None => warn!("[decoder] malformed candle on {topic}"),
            },
        }
    }

    fn on_candle(&self, key: SubscriptionKey, candle: Candle) {
        let mut cache = lock(&self.candles);
        let emit = |c: Candle| {
            let _ = self.events.send(SessionEvent::Candle(c));
        };

        match cache.get(&key) {
            None => {
                cache.insert(key, candle.clone());
                emit(candle);
            }
            Some(last) if candle.start_time < last.start_time => {
                debug!("[decoder] stale bar {} on {key}", candle.start_time);
            }
            Some(last) if candle.start_time == last.start_time => {
                if !candle.same_bar(last) {
                    cache.insert(key, candle.clone());
                    emit(candle);
                }
            }
            Some(last) => {
                let mut closed = last.clone();
                closed.closed = true;
                cache.insert(key, candle.clone());
                emit(closed);
                emit(candle);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Push parsers
// ---------------------------------------------------------------------------

/// `{"sequence":"...","price":"...","size":"...","bestAsk":"...", ... ,"time":1704873323416}`
fn parse_ticker(data: &serde_json::Value, symbol: &str) -> Option<Ticker> {
    Some(Ticker {
        symbol: symbol.to_string(),
        sequence: parse_str_u64(data.get("sequence")).unwrap_or(0),
        price: parse_str_f64(data.get("price"))?,
        size: parse_str_f64(data.get("size")).unwrap_or(0.0),
        best_ask: parse_str_f64(data.get("bestAsk"))?,
        best_ask_size: parse_str_f64(data.get("bestAskSize")).unwrap_or(0.0),
        best_bid: parse_str_f64(data.get("bestBid"))?,
        best_bid_size: parse_str_f64(data.get("bestBidSize")).unwrap_or(0.0),
        time_ms: parse_str_u64(data.get("time")).unwrap_or(0),
        local_time_us: time_util::now_us(),
    })
}

/// `{"symbol":"BTC-USDT","candles":[start, open, close, high, low, volume, turnover],"time":...}`
fn parse_candle(data: &serde_json::Value, key: &SubscriptionKey) -> Option<Candle> {
    let bar = data.get("candles")?.as_array()?;
    let symbol = match data.get("symbol").and_then(|s| s.as_str()) {
        Some(s) => from_wire_symbol(s),
        None => key.symbol.clone(),
    };
    Some(Candle {
        symbol,
        interval: key.interval?,
        start_time: parse_str_u64(bar.first())?,
        open: parse_str_f64(bar.get(1))?,
        close: parse_str_f64(bar.get(2))?,
        high: parse_str_f64(bar.get(3))?,
        low: parse_str_f64(bar.get(4))?,
        volume: parse_str_f64(bar.get(5))?,
        turnover: parse_str_f64(bar.get(6))?,
        closed: false,
        local_time_us: time_util::now_us(),
    })
}
