//! Subscription identity.
//!
//! A [`SubscriptionKey`] names one public stream: the channel family, the
//! caller-form symbol, and (for candles) the interval. Keys are what the
//! session registry stores and what the decoder uses for its candle cache.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::enums::{CandleInterval, ChannelKind};
use super::symbol::{from_wire_symbol, to_wire_symbol};

const TICKER_TOPIC_PREFIX: &str = "/market/ticker:";
const CANDLE_TOPIC_PREFIX: &str = "/market/candles:";

/// Composite key of a topic subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionKey {
    pub kind: ChannelKind,
    /// Caller-form symbol, e.g. `BTC/USDT`.
    pub symbol: String,
    /// Present for candle subscriptions only.
    pub interval: Option<CandleInterval>,
}

impl SubscriptionKey {
    pub fn ticker(symbol: &str) -> Self {
        Self { kind: ChannelKind::Ticker, symbol: symbol.to_string(), interval: None }
    }

    pub fn candle(symbol: &str, interval: CandleInterval) -> Self {
        Self { kind: ChannelKind::Candle, symbol: symbol.to_string(), interval: Some(interval) }
    }

    /// KuCoin topic string for this key.
    pub fn topic(&self) -> String {
        let symbol = to_wire_symbol(&self.symbol);
        match (self.kind, self.interval) {
            (ChannelKind::Candle, Some(interval)) => {
                format!("{CANDLE_TOPIC_PREFIX}{symbol}_{}", interval.wire_code())
            }
            _ => format!("{TICKER_TOPIC_PREFIX}{symbol}"),
        }
    }

    /// Parse a data-push topic back into a key.
    ///
    /// Returns `None` for topics outside the ticker/candle families or with an
    /// unknown candle code.
    pub fn from_topic(topic: &str) -> Option<Self> {
        if let Some(symbol) = topic.strip_prefix(TICKER_TOPIC_PREFIX) {
            return Some(Self::ticker(&from_wire_symbol(symbol)));
        }
        let rest = topic.strip_prefix(CANDLE_TOPIC_PREFIX)?;
        let (symbol, code) = rest.rsplit_once('_')?;
        let interval = CandleInterval::from_wire_code(code)?;
        Some(Self::candle(&from_wire_symbol(symbol), interval))
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.interval {
            Some(interval) => write!(f, "{}-{}-{}", self.kind, self.symbol, interval),
            None => write!(f, "{}-{}", self.kind, self.symbol),
        }
    }
}
