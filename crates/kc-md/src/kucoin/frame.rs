//! Outbound control frames and correlation ids.

use serde::Serialize;

use kc_core::time_util::now_ms;
use kc_core::types::{ChannelKind, SubscriptionKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameType {
    Subscribe,
    Unsubscribe,
    Ping,
}

/// One JSON control frame. Ping frames carry only `id` and `type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlFrame {
    pub id: String,
    #[serde(rename = "type")]
    pub frame_type: FrameType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_channel: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<bool>,
}

impl ControlFrame {
    pub fn subscribe(id: String, topic: String) -> Self {
        Self::topic_frame(id, FrameType::Subscribe, topic)
    }

    pub fn unsubscribe(id: String, topic: String) -> Self {
        Self::topic_frame(id, FrameType::Unsubscribe, topic)
    }

    pub fn ping(id: String) -> Self {
        Self { id, frame_type: FrameType::Ping, topic: None, private_channel: None, response: None }
    }

    /// Frame that carries out `op` on the wire.
    pub fn for_operation(op: &PendingOperation) -> Self {
        let topic = op.key.topic();
        match op.kind {
            OpKind::Subscribe => Self::subscribe(op.correlation_id.clone(), topic),
            OpKind::Unsubscribe => Self::unsubscribe(op.correlation_id.clone(), topic),
        }
    }

    fn topic_frame(id: String, frame_type: FrameType, topic: String) -> Self {
        Self {
            id,
            frame_type,
            topic: Some(topic),
            private_channel: Some(false),
            response: Some(true),
        }
    }

    pub fn to_json(&self) -> String {
        // Plain strings and bools only; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Subscribe,
    Unsubscribe,
}

impl OpKind {
    /// Compensating change to apply to the registry if this operation fails.
    pub fn inverse(self) -> Self {
        match self {
            Self::Subscribe => Self::Unsubscribe,
            Self::Unsubscribe => Self::Subscribe,
        }
    }

    fn id_prefix(self) -> &'static str {
        match self {
            Self::Subscribe => "sub",
            Self::Unsubscribe => "unsub",
        }
    }
}

/// An optimistic registry change awaiting the exchange's reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOperation {
    pub kind: OpKind,
    pub key: SubscriptionKey,
    pub correlation_id: String,
}

impl PendingOperation {
    pub fn new(kind: OpKind, key: SubscriptionKey, seq: u64) -> Self {
        let correlation_id = correlation_id(kind, key.kind, seq);
        Self { kind, key, correlation_id }
    }
}

/// `sub-ticker-<ms>-<seq>`, `unsub-candle-<ms>-<seq>`, ...
pub fn correlation_id(kind: OpKind, channel: ChannelKind, seq: u64) -> String {
    format!("{}-{}-{}-{}", kind.id_prefix(), channel, now_ms(), seq)
}
