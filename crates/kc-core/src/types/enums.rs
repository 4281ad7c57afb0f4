//! Enumerations used throughout the feed client.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::KcError;

// ---------------------------------------------------------------------------
// Channel kinds
// ---------------------------------------------------------------------------

/// Public market-data channel family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Ticker,
    Candle,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::Candle => "candle",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Candle intervals
// ---------------------------------------------------------------------------

/// Supported candle granularities.
///
/// The caller-facing form is the short one (`"1m"`, `"4h"`); KuCoin expects
/// its own codes (`"1min"`, `"4hour"`) in topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CandleInterval {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "3m")]
    M3,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "6h")]
    H6,
    #[serde(rename = "8h")]
    H8,
    #[serde(rename = "12h")]
    H12,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "1w")]
    W1,
}

impl CandleInterval {
    /// Every supported interval, shortest first.
    pub const ALL: [CandleInterval; 13] = [
        Self::M1,
        Self::M3,
        Self::M5,
        Self::M15,
        Self::M30,
        Self::H1,
        Self::H2,
        Self::H4,
        Self::H6,
        Self::H8,
        Self::H12,
        Self::D1,
        Self::W1,
    ];

    /// Caller-facing short form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M3 => "3m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H2 => "2h",
            Self::H4 => "4h",
            Self::H6 => "6h",
            Self::H8 => "8h",
            Self::H12 => "12h",
            Self::D1 => "1d",
            Self::W1 => "1w",
        }
    }

    /// KuCoin topic code.
    pub fn wire_code(&self) -> &'static str {
        match self {
            Self::M1 => "1min",
            Self::M3 => "3min",
            Self::M5 => "5min",
            Self::M15 => "15min",
            Self::M30 => "30min",
            Self::H1 => "1hour",
            Self::H2 => "2hour",
            Self::H4 => "4hour",
            Self::H6 => "6hour",
            Self::H8 => "8hour",
            Self::H12 => "12hour",
            Self::D1 => "1day",
            Self::W1 => "1week",
        }
    }

    /// Reverse of [`wire_code`](Self::wire_code).
    pub fn from_wire_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|i| i.wire_code() == code)
    }

    /// Comma-separated list of accepted short forms, for error messages.
    pub fn expected_list() -> String {
        Self::ALL.iter().map(|i| i.as_str()).collect::<Vec<_>>().join(", ")
    }
}

impl fmt::Display for CandleInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CandleInterval {
    type Err = KcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|i| i.as_str() == s).ok_or_else(|| KcError::InvalidInterval {
            got: s.to_string(),
            expected: Self::expected_list(),
        })
    }
}

// ---------------------------------------------------------------------------
// Session status
// ---------------------------------------------------------------------------

/// Readiness of the feed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionStatus {
    #[default]
    Disconnected,
    Connecting,
    Open,
}
