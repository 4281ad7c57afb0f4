//! In-process KuCoin feed for session tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Notify;
use tokio::sync::mpsc::UnboundedSender;

use kc_core::KcError;
use kc_core::ws::{Connector, TransportEvent, WsLink, WsRemote, link_pair};

use super::bootstrap::{BulletToken, TokenProvider, parse_bullet_response};

pub const MOCK_ENDPOINT: &str = "wss://mock.kucoin.test/endpoint";

/// Token provider answering with a fixed bullet body.
pub struct StaticTokens {
    body: Value,
}

impl StaticTokens {
    pub fn new(ping_interval_ms: u64) -> Self {
        Self {
            body: json!({
                "code": "200000",
                "data": {
                    "token": "mock-token",
                    "instanceServers": [{
                        "endpoint": MOCK_ENDPOINT,
                        "pingInterval": ping_interval_ms,
                        "pingTimeout": 10000,
                        "protocol": "websocket",
                        "encrypt": true
                    }]
                }
            }),
        }
    }

    pub fn without_token() -> Self {
        Self { body: json!({ "code": "200000", "data": { "instanceServers": [] } }) }
    }
}

#[async_trait]
impl TokenProvider for StaticTokens {
    async fn fetch_token(&self) -> Result<BulletToken, KcError> {
        parse_bullet_response(&self.body)
    }
}

/// How the feed answers a subscribe/unsubscribe on a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Ack,
    Reject,
    Silent,
}

struct LiveLink {
    events: UnboundedSender<TransportEvent>,
    writable: Arc<AtomicBool>,
    kill: Arc<Notify>,
}

struct FeedState {
    welcome: AtomicBool,
    start_unwritable: AtomicBool,
    fail_writes: AtomicBool,
    connections: AtomicUsize,
    frames: Mutex<Vec<Value>>,
    urls: Mutex<Vec<String>>,
    replies: Mutex<HashMap<String, Reply>>,
    live: Mutex<Option<LiveLink>>,
}

/// Connector whose far end is a scripted feed.
#[derive(Clone)]
pub struct MockFeed {
    state: Arc<FeedState>,
}

impl MockFeed {
    pub fn new() -> Self {
        Self {
            state: Arc::new(FeedState {
                welcome: AtomicBool::new(true),
                start_unwritable: AtomicBool::new(false),
                fail_writes: AtomicBool::new(false),
                connections: AtomicUsize::new(0),
                frames: Mutex::new(Vec::new()),
                urls: Mutex::new(Vec::new()),
                replies: Mutex::new(HashMap::new()),
                live: Mutex::new(None),
            }),
        }
    }

    pub fn set_welcome(&self, on: bool) {
        self.state.welcome.store(on, Ordering::SeqCst);
    }

    /// Links opened from now on start with a full write buffer.
    pub fn start_unwritable(&self, on: bool) {
        self.state.start_unwritable.store(on, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, on: bool) {
        self.state.fail_writes.store(on, Ordering::SeqCst);
    }

    pub fn reply_to(&self, topic: &str, reply: Reply) {
        self.state.replies.lock().unwrap().insert(topic.to_string(), reply);
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.state.urls.lock().unwrap().clone()
    }

    /// Every frame the session has written, in order.
    pub fn frames(&self) -> Vec<Value> {
        self.state.frames.lock().unwrap().clone()
    }

    /// Written frames of one `type`.
    pub fn frames_of(&self, frame_type: &str) -> Vec<Value> {
        self.frames().into_iter().filter(|f| f["type"] == frame_type).collect()
    }

    pub fn set_writable(&self, on: bool) {
        if let Some(link) = self.state.live.lock().unwrap().as_ref() {
            link.writable.store(on, Ordering::SeqCst);
        }
    }

    /// Push a raw frame to the session on the current link.
    pub fn push(&self, text: &str) {
        if let Some(link) = self.state.live.lock().unwrap().as_ref() {
            let _ = link.events.send(TransportEvent::Text(text.to_string()));
        }
    }

    /// Report a transport error on the current link without closing it.
    pub fn push_error(&self, message: &str) {
        if let Some(link) = self.state.live.lock().unwrap().as_ref() {
            let _ = link.events.send(TransportEvent::Error(message.to_string()));
        }
    }

    /// Drop the current link as if the network failed.
    pub fn drop_connection(&self) {
        if let Some(link) = self.state.live.lock().unwrap().take() {
            link.kill.notify_one();
        }
    }
}

#[async_trait]
impl Connector for MockFeed {
    async fn open(&self, url: &str, _handshake_timeout: Duration) -> Result<WsLink, KcError> {
        let parsed = url::Url::parse(url).map_err(|e| KcError::WebSocket(e.to_string()))?;
        let connect_id = parsed
            .query_pairs()
            .find(|(k, _)| k == "connectId")
            .map(|(_, v)| v.into_owned())
            .ok_or_else(|| KcError::WebSocket("no connectId".into()))?;

        self.state.connections.fetch_add(1, Ordering::SeqCst);
        self.state.urls.lock().unwrap().push(url.to_string());

        let (link, remote) = link_pair();
        if self.state.start_unwritable.load(Ordering::SeqCst) {
            remote.set_writable(false);
        }
        if self.state.welcome.load(Ordering::SeqCst) {
            let welcome = json!({ "id": connect_id, "type": "welcome" });
            remote.emit(TransportEvent::Text(welcome.to_string()));
        }
        let kill = Arc::new(Notify::new());
        *self.state.live.lock().unwrap() = Some(LiveLink {
            events: remote.events.clone(),
            writable: Arc::clone(&remote.writable),
            kill: Arc::clone(&kill),
        });
        tokio::spawn(serve(Arc::clone(&self.state), remote, kill));
        Ok(link)
    }
}

async fn serve(state: Arc<FeedState>, mut remote: WsRemote, kill: Arc<Notify>) {
    loop {
        tokio::select! {
            _ = remote.shutdown.changed() => break,
            _ = kill.notified() => break,
            frame = remote.outbound.recv() => {
                let Some(frame) = frame else { break };
                if state.fail_writes.load(Ordering::SeqCst) {
                    let _ = frame.done.send(Err("broken pipe".into()));
                    continue;
                }
                let _ = frame.done.send(Ok(()));
                let Ok(v) = serde_json::from_str::<Value>(&frame.text) else { continue };
                state.frames.lock().unwrap().push(v.clone());
                if let Some(reply) = answer(&state, &v) {
                    remote.emit(TransportEvent::Text(reply));
                }
            }
        }
    }
    remote.set_writable(false);
    remote.emit(TransportEvent::Closed);
}

fn answer(state: &FeedState, frame: &Value) -> Option<String> {
    let id = frame["id"].as_str()?;
    match frame["type"].as_str()? {
        "ping" => Some(json!({ "id": id, "type": "pong" }).to_string()),
        "subscribe" | "unsubscribe" => {
            let topic = frame["topic"].as_str()?;
            let reply = state.replies.lock().unwrap().get(topic).copied().unwrap_or(Reply::Ack);
            match reply {
                Reply::Ack => Some(json!({ "id": id, "type": "ack" }).to_string()),
                Reply::Reject => {
                    let data = format!("topic {topic} is not found");
                    let error = json!({ "id": id, "type": "error", "code": 404, "data": data });
                    Some(error.to_string())
                }
                Reply::Silent => None,
            }
        }
        _ => None,
    }
}

/// Poll `cond` for up to two seconds.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
