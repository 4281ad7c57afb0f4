//! In-process transport link between a session and a socket task.
//!
//! A link has two ends built together by [`link_pair`]:
//!
//! ```text
//! session side (WsLink)                    socket side (WsRemote)
//!   WsSender ── OutboundFrame ──────────►   outbound   (write + confirm)
//!   events   ◄─ TransportEvent ──────────   events     (Text / Error / Closed)
//!   WsCloser ── shutdown ────────────────►  shutdown
//!                writable flag (shared)
//! ```
//!
//! The socket side is driven by the tungstenite task in production and by
//! an in-memory feed in tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, oneshot, watch};

use crate::error::KcError;

/// Signal emitted by the socket side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame arrived.
    Text(String),
    /// A read or write error; the socket may still close afterwards.
    Error(String),
    /// The socket is gone. Emitted exactly once, last.
    Closed,
}

/// One outbound text frame plus its write confirmation.
#[derive(Debug)]
pub struct OutboundFrame {
    pub text: String,
    pub done: oneshot::Sender<Result<(), String>>,
}

/// Cloneable writer handle.
#[derive(Debug, Clone)]
pub struct WsSender {
    tx: mpsc::UnboundedSender<OutboundFrame>,
    writable: Arc<AtomicBool>,
}

impl WsSender {
    /// Whether the socket currently accepts frames.
    pub fn is_writable(&self) -> bool {
        self.writable.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Queue a frame and wait until the socket task has written it.
    pub async fn send(&self, text: String) -> Result<(), KcError> {
        let (done, written) = oneshot::channel();
        self.tx
            .send(OutboundFrame { text, done })
            .map_err(|_| KcError::WebSocket("transport closed".into()))?;
        match written.await {
            Ok(result) => result.map_err(KcError::WebSocket),
            Err(_) => Err(KcError::WebSocket("frame dropped before write".into())),
        }
    }

    /// Queue a frame without waiting for the write. Returns `false` if the
    /// socket task is gone.
    pub fn send_detached(&self, text: String) -> bool {
        let (done, _) = oneshot::channel();
        self.tx.send(OutboundFrame { text, done }).is_ok()
    }
}

/// Requests an orderly close of the socket.
#[derive(Debug, Clone)]
pub struct WsCloser {
    tx: Arc<watch::Sender<bool>>,
}

impl WsCloser {
    pub fn close(&self) {
        let _ = self.tx.send(true);
    }
}

/// Session-side end of a link.
#[derive(Debug)]
pub struct WsLink {
    pub sender: WsSender,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
    pub closer: WsCloser,
}

/// Socket-side end of a link.
#[derive(Debug)]
pub struct WsRemote {
    pub outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    pub events: mpsc::UnboundedSender<TransportEvent>,
    pub writable: Arc<AtomicBool>,
    pub shutdown: watch::Receiver<bool>,
}

impl WsRemote {
    /// Forward an event to the session. Returns `false` once the session
    /// side has been dropped.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn set_writable(&self, writable: bool) {
        self.writable.store(writable, Ordering::Release);
    }
}

/// Build both ends of a link. The link starts writable.
pub fn link_pair() -> (WsLink, WsRemote) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (ev_tx, ev_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let writable = Arc::new(AtomicBool::new(true));

    let link = WsLink {
        sender: WsSender { tx: out_tx, writable: Arc::clone(&writable) },
        events: ev_rx,
        closer: WsCloser { tx: Arc::new(shutdown_tx) },
    };
    let remote = WsRemote { outbound: out_rx, events: ev_tx, writable, shutdown: shutdown_rx };
    (link, remote)
}
