//! Shared JSON parsing helpers.
//!
//! KuCoin sends most numbers as JSON strings (`"30000.5"`) but a few as native
//! numbers (`time`). These helpers accept either encoding.

/// Parse a JSON value (string or number) as `f64`.
#[inline]
pub fn parse_str_f64(v: Option<&serde_json::Value>) -> Option<f64> {
    let v = v?;
    if let Some(s) = v.as_str() {
        fast_float2::parse(s).ok()
    } else {
        v.as_f64()
    }
}

/// Parse a JSON value (string or number) as `u64`.
#[inline]
pub fn parse_str_u64(v: Option<&serde_json::Value>) -> Option<u64> {
    let v = v?;
    if let Some(s) = v.as_str() {
        s.parse().ok()
    } else {
        v.as_u64()
    }
}

/// Render a JSON id (string or number) as a string.
#[inline]
pub fn id_string(v: Option<&serde_json::Value>) -> Option<String> {
    let v = v?;
    match v.as_str() {
        Some(s) => Some(s.to_string()),
        None => v.as_u64().map(|n| n.to_string()),
    }
}
