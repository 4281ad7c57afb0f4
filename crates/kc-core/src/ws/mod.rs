//! WebSocket transport: the in-process link and the tungstenite connector.

pub mod client;
pub mod link;

pub use client::{Connector, TungsteniteConnector};
pub use link::{OutboundFrame, TransportEvent, WsCloser, WsLink, WsRemote, WsSender, link_pair};
