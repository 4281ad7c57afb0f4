//! Core data types: channel kinds, candle intervals, subscription keys, and
//! the market data records produced by the decoder.

pub mod enums;
pub mod market_data;
pub mod subscription;
pub mod symbol;

pub use enums::*;
pub use market_data::*;
pub use subscription::*;
pub use symbol::*;
