//! Symbol format conversion.
//!
//! Callers name markets as `BASE/QUOTE` (`BTC/USDT`); KuCoin topics and data
//! pushes use `BASE-QUOTE` (`BTC-USDT`).

/// Convert a caller symbol (`BTC/USDT`) to KuCoin's wire form (`BTC-USDT`).
pub fn to_wire_symbol(symbol: &str) -> String {
    symbol.replacen('/', "-", 1)
}

/// Convert a KuCoin wire symbol (`BTC-USDT`) back to caller form (`BTC/USDT`).
pub fn from_wire_symbol(symbol: &str) -> String {
    symbol.replacen('-', "/", 1)
}
