//! Market data records delivered to session subscribers.
//!
//! KuCoin encodes numbers as JSON strings; the decoder parses them into the
//! `f64` fields here. Symbols are in caller form (`BTC/USDT`).

use super::enums::CandleInterval;

/// Level-1 ticker snapshot from `/market/ticker:<symbol>`.
#[derive(Debug, Clone, PartialEq)]
pub struct Ticker {
    pub symbol: String,
    pub sequence: u64,
    pub price: f64,
    pub size: f64,
    pub best_ask: f64,
    pub best_ask_size: f64,
    pub best_bid: f64,
    pub best_bid_size: f64,
    /// Exchange timestamp in milliseconds.
    pub time_ms: u64,
    pub local_time_us: u64,
}

/// One OHLCV bar from `/market/candles:<symbol>_<interval>`.
///
/// `closed` is `false` while the bar is still forming and `true` once a bar
/// with a later start time has been observed.
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub symbol: String,
    pub interval: CandleInterval,
    /// Bar open time in seconds since Unix epoch.
    pub start_time: u64,
    pub open: f64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
    pub turnover: f64,
    pub closed: bool,
    pub local_time_us: u64,
}

impl Candle {
    /// Compare the bar contents, ignoring local receive time and close flag.
    pub fn same_bar(&self, other: &Candle) -> bool {
        self.start_time == other.start_time
            && self.open == other.open
            && self.close == other.close
            && self.high == other.high
            && self.low == other.low
            && self.volume == other.volume
            && self.turnover == other.turnover
    }
}
