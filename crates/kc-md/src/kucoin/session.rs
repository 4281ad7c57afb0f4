//! KuCoin public-feed session.
//!
//! One [`KucoinSession`] owns at most one transport link at a time and keeps
//! the subscription registry convergent with what the exchange acknowledged.
//!
//! Subscribe and unsubscribe apply their registry change immediately, then
//! send the control frame through the per-link [`SendQueue`]. The reply is
//! matched by correlation id in the [`ProtocolDecoder`]; a failed send, a
//! rejection, or an acknowledgment timeout applies the inverse change.
//!
//! Lifecycle:
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──socket + welcome──► Open
//!      ▲                          │                              │
//!      └──── bootstrap / handshake failure ◄─────────────────────┤
//!      └──── close_connection() (no reconnect) ◄─────────────────┤
//!      └──── unexpected close ──► retry delay ──► connect() ─────┘
//! ```
//!
//! A ping frame goes out every `pingInterval` while the session is open.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use kc_core::KcError;
use kc_core::time_util::now_ms;
use kc_core::types::{CandleInterval, ChannelKind, SessionStatus, SubscriptionKey};
use kc_core::ws::{Connector, TransportEvent, TungsteniteConnector, WsCloser, WsLink, WsSender};

use super::bootstrap::{BulletClient, BulletToken, DEFAULT_PING_INTERVAL, TokenProvider};
use super::config::SessionConfig;
use super::decoder::{AckOutcome, ProtocolDecoder};
use super::frame::{ControlFrame, OpKind, PendingOperation};
use crate::event::{self, SessionEvent, SessionEventReceiver, SessionEventSender};
use crate::lock;
use crate::registry::SubscriptionRegistry;
use crate::send_queue::{SendQueue, SendQueueHandle};

/// Cloneable handle to one logical session.
#[derive(Clone)]
pub struct KucoinSession {
    inner: Arc<Inner>,
}

struct Inner {
    config: SessionConfig,
    tokens: Arc<dyn TokenProvider>,
    connector: Arc<dyn Connector>,
    decoder: ProtocolDecoder,
    registry: Mutex<SubscriptionRegistry>,
    state: Mutex<SessionState>,
    events: SessionEventSender,
    seq: AtomicU64,
}

/// Everything tied to the current link. Cleared by [`SessionState::teardown`].
#[derive(Default)]
struct SessionState {
    status: SessionStatus,
    /// Set by `close_connection`; suppresses reconnect.
    asking_close: bool,
    connect_id: Option<String>,
    ping_interval: Duration,
    sender: Option<WsSender>,
    closer: Option<WsCloser>,
    queue: Option<SendQueue>,
    ping_task: Option<JoinHandle<()>>,
    /// Bumped per link so signals from a replaced link are ignored.
    epoch: u64,
}

impl SessionState {
    fn teardown(&mut self) {
        self.epoch += 1;
        self.status = SessionStatus::Disconnected;
        self.connect_id = None;
        if let Some(queue) = self.queue.take() {
            queue.end();
        }
        if let Some(ping) = self.ping_task.take() {
            ping.abort();
        }
        self.sender = None;
        if let Some(closer) = self.closer.take() {
            closer.close();
        }
    }
}

/// Writer, send lane and epoch of the open link.
struct Lane {
    sender: WsSender,
    queue: SendQueueHandle,
    epoch: u64,
}

impl KucoinSession {
    /// Session against the live KuCoin endpoints.
    pub fn new(config: SessionConfig) -> Self {
        let tokens = Arc::new(BulletClient::new(&config.bullet_url, &config.rest_host));
        Self::with_transport(config, tokens, Arc::new(TungsteniteConnector))
    }

    /// Session with explicit token and socket providers.
    pub fn with_transport(
        config: SessionConfig,
        tokens: Arc<dyn TokenProvider>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let events = event::channel();
        let inner = Inner {
            config,
            tokens,
            connector,
            decoder: ProtocolDecoder::new(events.clone()),
            registry: Mutex::new(SubscriptionRegistry::new(events.clone())),
            state: Mutex::new(SessionState::default()),
            events,
            seq: AtomicU64::new(0),
        };
        Self { inner: Arc::new(inner) }
    }

    /// Receiver for session notifications and market data.
    pub fn events(&self) -> SessionEventReceiver {
        self.inner.events.subscribe()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Bootstrap a token, open the socket, wait for the welcome, and replay
    /// any subscriptions that survived a previous link.
    ///
    /// Returns immediately if the session is already open or connecting.
    pub async fn connect(&self) -> Result<(), KcError> {
        self.inner.establish(true).await
    }

    pub fn subscribe_ticker(&self, symbol: &str) -> Result<(), KcError> {
        self.inner.require_open()?;
        self.inner.subscribe_key(SubscriptionKey::ticker(symbol))
    }

    pub fn unsubscribe_ticker(&self, symbol: &str) -> Result<(), KcError> {
        self.inner.require_open()?;
        self.inner.unsubscribe_key(SubscriptionKey::ticker(symbol))
    }

    /// `interval` is the short form: `1m`, `4h`, `1w`, ...
    pub fn subscribe_candle(&self, symbol: &str, interval: &str) -> Result<(), KcError> {
        self.inner.require_open()?;
        let interval: CandleInterval = interval.parse()?;
        self.inner.subscribe_key(SubscriptionKey::candle(symbol, interval))
    }

    pub fn unsubscribe_candle(&self, symbol: &str, interval: &str) -> Result<(), KcError> {
        self.inner.require_open()?;
        let interval: CandleInterval = interval.parse()?;
        self.inner.unsubscribe_key(SubscriptionKey::candle(symbol, interval))
    }

    /// Close the link on purpose. Refused while any subscription is registered.
    pub fn close_connection(&self) -> Result<(), KcError> {
        let active = lock(&self.inner.registry).count();
        if active > 0 {
            return Err(KcError::ActiveSubscriptions(active));
        }
        lock(&self.inner.state).asking_close = true;
        if self.inner.shut_link(None).is_some() {
            info!("[kucoin] connection closed");
        }
        Ok(())
    }

    pub fn is_socket_open(&self) -> bool {
        self.status() == SessionStatus::Open
    }

    pub fn is_socket_connecting(&self) -> bool {
        self.status() == SessionStatus::Connecting
    }

    pub fn status(&self) -> SessionStatus {
        lock(&self.inner.state).status
    }

    pub fn subscription_count(&self) -> usize {
        lock(&self.inner.registry).count()
    }

    pub fn subscriptions(&self) -> Vec<SubscriptionKey> {
        lock(&self.inner.registry).snapshot()
    }

    /// Requests still waiting for the exchange's reply.
    pub fn pending_acks(&self) -> usize {
        self.inner.decoder.pending_count()
    }

    /// Connect id of the current link, if one is up.
    pub fn connect_id(&self) -> Option<String> {
        lock(&self.inner.state).connect_id.clone()
    }
}

impl Inner {
    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn require_open(&self) -> Result<(), KcError> {
        match lock(&self.state).status {
            SessionStatus::Open => Ok(()),
            _ => Err(KcError::RequireOpen),
        }
    }

    fn open_lane(&self) -> Result<Lane, KcError> {
        let st = lock(&self.state);
        match (st.status, &st.sender, &st.queue) {
            (SessionStatus::Open, Some(sender), Some(queue)) => Ok(Lane {
                sender: sender.clone(),
                queue: queue.handle(),
                epoch: st.epoch,
            }),
            _ => Err(KcError::RequireOpen),
        }
    }

    fn is_current_link(&self, epoch: u64) -> bool {
        let st = lock(&self.state);
        st.epoch == epoch && st.status == SessionStatus::Open
    }

    // -----------------------------------------------------------------------
    // Connect / handshake
    // -----------------------------------------------------------------------

    async fn establish(self: &Arc<Self>, caller: bool) -> Result<(), KcError> {
        {
            let mut st = lock(&self.state);
            if st.status != SessionStatus::Disconnected {
                debug!("[kucoin] connect skipped, session is {:?}", st.status);
                return Ok(());
            }
            if caller {
                st.asking_close = false;
            } else if st.asking_close {
                return Ok(());
            }
            st.status = SessionStatus::Connecting;
        }

        let token = match self.tokens.fetch_token().await {
            Ok(token) => token,
            Err(e) => {
                self.abort_connecting();
                warn!("[kucoin] bootstrap failed: {e}");
                self.emit(SessionEvent::Error(e.to_string()));
                return Err(e);
            }
        };

        let connect_id = Uuid::new_v4().simple().to_string();
        self.decoder.clear_candle_cache();

        let epoch = match self.open_transport(&token, &connect_id).await {
            Ok(epoch) => epoch,
            Err(e) => {
                warn!("[kucoin] connect failed: {e}");
                self.emit(SessionEvent::Error(e.to_string()));
                return Err(e);
            }
        };
        info!("[kucoin] session open, connect id {connect_id}");

        if !lock(&self.registry).is_empty() {
            self.restart_previous_subscriptions(epoch);
        }
        Ok(())
    }

    /// Open the socket and wait for the welcome. Returns the epoch of the new link.
    async fn open_transport(
        self: &Arc<Self>,
        token: &BulletToken,
        connect_id: &str,
    ) -> Result<u64, KcError> {
        // Registered first so a welcome that beats `open` returning is not lost.
        let welcome = self.decoder.wait_for_welcome(connect_id);

        let opened = match token.ws_url(connect_id) {
            Ok(url) => self.connector.open(&url, self.config.handshake_timeout).await,
            Err(e) => Err(e),
        };
        let WsLink { sender, events, closer } = match opened {
            Ok(link) => link,
            Err(e) => {
                self.decoder.cancel_welcome(connect_id);
                self.abort_connecting();
                return Err(e);
            }
        };

        let epoch = {
            let mut st = lock(&self.state);
            if st.status != SessionStatus::Connecting {
                closer.close();
                self.decoder.cancel_welcome(connect_id);
                return Err(KcError::WebSocket("connect aborted".into()));
            }
            st.epoch += 1;
            st.connect_id = Some(connect_id.to_string());
            st.ping_interval = token.ping_interval;
            st.sender = Some(sender.clone());
            st.closer = Some(closer);
            st.epoch
        };
        tokio::spawn(Arc::clone(self).read_loop(events, epoch));

        let welcomed = tokio::time::timeout(self.config.handshake_timeout, welcome).await;
        if !matches!(welcomed, Ok(Ok(()))) {
            self.decoder.cancel_welcome(connect_id);
            self.shut_link(Some(epoch));
            return Err(KcError::NoWelcome);
        }

        let mut st = lock(&self.state);
        if st.epoch != epoch || st.status != SessionStatus::Connecting {
            return Err(KcError::WebSocket("link closed during handshake".into()));
        }
        st.status = SessionStatus::Open;
        st.queue = Some(SendQueue::start("send-queue", self.config.send_timeout));
        st.ping_task = Some(spawn_heartbeat(sender, st.ping_interval));
        Ok(epoch)
    }

    fn abort_connecting(&self) {
        let mut st = lock(&self.state);
        if st.status == SessionStatus::Connecting {
            st.status = SessionStatus::Disconnected;
        }
    }

    async fn read_loop(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        epoch: u64,
    ) {
        while let Some(ev) = events.recv().await {
            match ev {
                TransportEvent::Text(raw) => {
                    if let Err(e) = self.decoder.process_message(&raw) {
                        warn!("[kucoin] undecodable frame: {e}");
                    }
                }
                TransportEvent::Error(e) => {
                    warn!("[kucoin] transport error: {e}");
                    self.emit(SessionEvent::Error(e));
                }
                TransportEvent::Closed => break,
            }
        }
        self.on_transport_closed(epoch);
    }

    // -----------------------------------------------------------------------
    // Close / reconnect
    // -----------------------------------------------------------------------

    /// Tear down the current link (only if it is still `epoch`, when given).
    ///
    /// Returns `None` if there was nothing to tear down, otherwise whether the
    /// link was open and the close was not asked for.
    fn shut_link(&self, epoch: Option<u64>) -> Option<bool> {
        let unexpected = {
            let mut st = lock(&self.state);
            if epoch.is_some_and(|e| e != st.epoch) {
                return None;
            }
            if st.status == SessionStatus::Disconnected && st.closer.is_none() {
                return None;
            }
            let unexpected = st.status == SessionStatus::Open && !st.asking_close;
            st.teardown();
            unexpected
        };
        let abandoned = self.decoder.abandon_pending();
        if abandoned > 0 {
            debug!("[kucoin] abandoned {abandoned} pending acknowledgments");
        }
        self.decoder.cancel_welcomes();
        Some(unexpected)
    }

    fn on_transport_closed(self: &Arc<Self>, epoch: u64) {
        match self.shut_link(Some(epoch)) {
            Some(true) => {
                let retry = self.config.retry_timeout;
                warn!("[kucoin] connection lost, reconnecting in {retry:?}");
                self.spawn_reconnect();
            }
            Some(false) => info!("[kucoin] connection closed"),
            None => debug!("[kucoin] stale link closed"),
        }
    }

    fn spawn_reconnect(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.reconnect_loop().await });
    }

    async fn reconnect_loop(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.config.retry_timeout).await;
            if lock(&self.state).asking_close {
                info!("[kucoin] reconnect cancelled by close");
                return;
            }
            let subscriptions = lock(&self.registry).count();
            info!("[kucoin] reconnecting with {subscriptions} subscriptions");
            self.emit(SessionEvent::Reconnect { subscriptions });
            match self.establish(false).await {
                Ok(()) => return,
                Err(e) => {
                    let retry = self.config.retry_timeout;
                    warn!("[kucoin] reconnect failed: {e}, retrying in {retry:?}");
                }
            }
        }
    }

    /// Re-issue every registered subscription on link `epoch`.
    ///
    /// Does nothing once that link has been replaced; the next link runs its
    /// own replay.
    fn restart_previous_subscriptions(self: &Arc<Self>, epoch: u64) {
        let lane = match self.open_lane() {
            Ok(lane) if lane.epoch == epoch => lane,
            _ => {
                debug!("[kucoin] replay for link {epoch} skipped, link is gone");
                return;
            }
        };
        if !lane.sender.is_writable() {
            let retry = self.config.retry_timeout;
            self.emit(SessionEvent::SocketNotReady(format!(
                "retry in {retry:?} to restart previous subscriptions"
            )));
            let inner = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(retry).await;
                inner.restart_previous_subscriptions(epoch);
            });
            return;
        }

        let previous = lock(&self.registry).take_all();
        info!("[kucoin] restoring {} subscriptions", previous.len());
        for key in previous {
            if let Err(e) = self.subscribe_key(key.clone()) {
                // Link went away mid-replay; keep the key for the next one.
                warn!("[kucoin] restore {key} failed: {e}");
                lock(&self.registry).add(key);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Subscribe / unsubscribe
    // -----------------------------------------------------------------------

    fn subscribe_key(self: &Arc<Self>, key: SubscriptionKey) -> Result<(), KcError> {
        let lane = self.open_lane()?;
        if lock(&self.registry).contains(&key) {
            return Ok(());
        }
        if !lane.sender.is_writable() {
            self.defer_subscribe(key);
            return Ok(());
        }
        if !lock(&self.registry).add(key.clone()) {
            return Ok(());
        }
        let op = PendingOperation::new(OpKind::Subscribe, key, self.next_seq());
        self.dispatch(op, lane);
        Ok(())
    }

    fn defer_subscribe(self: &Arc<Self>, key: SubscriptionKey) {
        let retry = self.config.retry_timeout;
        self.emit(SessionEvent::SocketNotReady(format!(
            "socket not ready to subscribe {key}, retrying in {retry:?}"
        )));
        self.retry_subscribe(key);
    }

    /// Try `key` again after the retry delay, waiting out any reconnect.
    ///
    /// Stops on an intentional close, or once the key is registered.
    fn retry_subscribe(self: &Arc<Self>, key: SubscriptionKey) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(inner.config.retry_timeout).await;
            if lock(&inner.state).asking_close {
                debug!("[kucoin] deferred subscribe {key} cancelled by close");
                return;
            }
            match inner.subscribe_key(key.clone()) {
                Ok(()) => {}
                Err(KcError::RequireOpen) => inner.retry_subscribe(key),
                Err(e) => warn!("[kucoin] deferred subscribe {key} dropped: {e}"),
            }
        });
    }

    fn unsubscribe_key(self: &Arc<Self>, key: SubscriptionKey) -> Result<(), KcError> {
        let lane = self.open_lane()?;
        if !lock(&self.registry).remove(&key) {
            return Ok(());
        }
        let op = PendingOperation::new(OpKind::Unsubscribe, key, self.next_seq());
        self.dispatch(op, lane);
        Ok(())
    }

    /// Queue the frame for `op` and settle the registry once the reply is in.
    fn dispatch(self: &Arc<Self>, op: PendingOperation, lane: Lane) {
        let Lane { sender, queue, epoch } = lane;
        let outcome = self.decoder.register_ack(op.clone());
        // Teardown abandons only what was registered before it ran.
        if !self.is_current_link(epoch) {
            debug!("[kucoin] link {epoch} gone, {} left to replay", op.correlation_id);
            self.decoder.cancel(&op.correlation_id);
            return;
        }
        let frame = ControlFrame::for_operation(&op).to_json();
        let correlation_id = op.correlation_id.clone();
        let inner = Arc::clone(self);

        let queued = queue.push(async move {
            match sender.send(frame).await {
                Ok(()) => {
                    // The lane is released once the frame is written.
                    tokio::spawn(async move {
                        let result = inner.await_ack(&op, outcome).await;
                        inner.settle(&op, result);
                    });
                }
                Err(e) => {
                    inner.decoder.cancel(&op.correlation_id);
                    warn!("[kucoin] send {} failed: {e}", op.key);
                    inner.emit(SessionEvent::Error(e.to_string()));
                    inner.compensate(&op);
                }
            }
        });
        if !queued {
            debug!("[kucoin] send lane closed, {correlation_id} left to replay");
            self.decoder.cancel(&correlation_id);
        }
    }

    async fn await_ack(
        &self,
        op: &PendingOperation,
        outcome: oneshot::Receiver<AckOutcome>,
    ) -> AckOutcome {
        let received = match self.config.ack_timeout {
            Some(limit) => match tokio::time::timeout(limit, outcome).await {
                Ok(received) => received,
                Err(_) => {
                    self.decoder.cancel(&op.correlation_id);
                    return AckOutcome::TimedOut;
                }
            },
            None => outcome.await,
        };
        received.unwrap_or(AckOutcome::Abandoned)
    }

    fn settle(&self, op: &PendingOperation, outcome: AckOutcome) {
        match outcome {
            AckOutcome::Confirmed => {
                debug!("[kucoin] {:?} {} confirmed", op.kind, op.key);
                if op.kind == OpKind::Unsubscribe && op.key.kind == ChannelKind::Candle {
                    self.decoder.delete_candle_cache(&op.key);
                }
            }
            AckOutcome::Rejected | AckOutcome::TimedOut => {
                warn!("[kucoin] {:?} {} {:?}, rolling back", op.kind, op.key, outcome);
                self.compensate(op);
            }
            AckOutcome::Abandoned => debug!("[kucoin] {:?} {} abandoned", op.kind, op.key),
        }
    }

    /// Apply the inverse of `op` to the registry.
    fn compensate(&self, op: &PendingOperation) {
        let mut registry = lock(&self.registry);
        match op.kind.inverse() {
            OpKind::Subscribe => registry.add(op.key.clone()),
            OpKind::Unsubscribe => registry.remove(&op.key),
        };
    }
}

/// Ping every `interval`, skipping the immediate first tick. Pings bypass the
/// send queue.
fn spawn_heartbeat(sender: WsSender, interval: Duration) -> JoinHandle<()> {
    let interval = if interval.is_zero() { DEFAULT_PING_INTERVAL } else { interval };
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let ping = ControlFrame::ping(now_ms().to_string()).to_json();
            if !sender.send_detached(ping) {
                debug!("[kucoin] heartbeat stopped, link gone");
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kucoin::mock::{MockFeed, Reply, StaticTokens, eventually};
    use serde_json::Value;

    const BTC_TOPIC: &str = "/market/ticker:BTC-USDT";

    fn test_config() -> SessionConfig {
        SessionConfig {
            retry_timeout: Duration::from_millis(30),
            handshake_timeout: Duration::from_millis(300),
            ..SessionConfig::default()
        }
    }

    fn session_with(config: SessionConfig, tokens: StaticTokens) -> (KucoinSession, MockFeed) {
        let feed = MockFeed::new();
        let session =
            KucoinSession::with_transport(config, Arc::new(tokens), Arc::new(feed.clone()));
        (session, feed)
    }

    fn session() -> (KucoinSession, MockFeed) {
        session_with(test_config(), StaticTokens::new(18_000))
    }

    async fn open_session() -> (KucoinSession, MockFeed) {
        let (session, feed) = session();
        session.connect().await.unwrap();
        (session, feed)
    }

    /// Wait up to two seconds for an event matching `pred`.
    async fn wait_for(
        rx: &mut SessionEventReceiver,
        pred: impl Fn(&SessionEvent) -> bool,
    ) -> Option<SessionEvent> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Ok(ev)) if pred(&ev) => return Some(ev),
                Ok(Ok(_)) | Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(_))) => {}
                _ => return None,
            }
        }
    }

    fn topics(frames: &[Value]) -> Vec<String> {
        frames.iter().map(|f| f["topic"].as_str().unwrap_or_default().to_string()).collect()
    }

    #[tokio::test]
    async fn operations_require_an_open_session() {
        let (session, _feed) = session();
        assert_eq!(session.subscribe_ticker("BTC/USDT"), Err(KcError::RequireOpen));
        assert_eq!(session.unsubscribe_ticker("BTC/USDT"), Err(KcError::RequireOpen));
        // Open check comes before interval validation.
        assert_eq!(session.subscribe_candle("BTC/USDT", "7x"), Err(KcError::RequireOpen));
        assert_eq!(session.subscription_count(), 0);
    }

    #[tokio::test]
    async fn bootstrap_without_token_fails_connect() {
        let (session, feed) = session_with(test_config(), StaticTokens::without_token());
        let mut rx = session.events();

        let err = session.connect().await.unwrap_err();
        assert!(matches!(err, KcError::Bootstrap(_)));
        assert_eq!(session.status(), SessionStatus::Disconnected);
        assert_eq!(feed.connections(), 0);
        assert!(wait_for(&mut rx, |e| matches!(e, SessionEvent::Error(_))).await.is_some());
    }

    #[tokio::test]
    async fn missing_welcome_fails_connect() {
        let (session, feed) = session();
        feed.set_welcome(false);

        assert_eq!(session.connect().await, Err(KcError::NoWelcome));
        assert_eq!(session.status(), SessionStatus::Disconnected);
        assert!(!session.is_socket_connecting());
        assert!(session.connect_id().is_none());
    }

    #[tokio::test]
    async fn connect_opens_once() {
        let (session, feed) = open_session().await;
        assert!(session.is_socket_open());
        assert!(!session.is_socket_connecting());

        let connect_id = session.connect_id().unwrap();
        assert_eq!(connect_id.len(), 32);
        let url = &feed.urls()[0];
        assert!(url.starts_with("wss://mock.kucoin.test/endpoint?token=mock-token&connectId="));
        assert!(url.ends_with(&connect_id));

        session.connect().await.unwrap();
        assert_eq!(feed.connections(), 1);
    }

    #[tokio::test]
    async fn subscribe_is_optimistic_then_confirmed() {
        let (session, feed) = open_session().await;

        session.subscribe_ticker("BTC/USDT").unwrap();
        assert_eq!(session.subscriptions(), vec![SubscriptionKey::ticker("BTC/USDT")]);

        assert!(
            eventually(|| session.pending_acks() == 0 && feed.frames_of("subscribe").len() == 1)
                .await
        );
        let frame = &feed.frames_of("subscribe")[0];
        assert!(frame["id"].as_str().unwrap().starts_with("sub-ticker-"));
        assert_eq!(frame["topic"], BTC_TOPIC);
        assert_eq!(frame["privateChannel"], false);
        assert_eq!(frame["response"], true);
        assert_eq!(session.subscription_count(), 1);
    }

    #[tokio::test]
    async fn duplicate_subscribe_sends_one_frame() {
        let (session, feed) = open_session().await;

        session.subscribe_ticker("BTC/USDT").unwrap();
        session.subscribe_ticker("BTC/USDT").unwrap();
        assert!(eventually(|| session.pending_acks() == 0).await);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(feed.frames_of("subscribe").len(), 1);
        assert_eq!(session.subscription_count(), 1);
    }

    #[tokio::test]
    async fn rejected_subscribe_is_rolled_back() {
        let (session, feed) = open_session().await;
        feed.reply_to(BTC_TOPIC, Reply::Reject);
        let mut rx = session.events();

        session.subscribe_ticker("BTC/USDT").unwrap();
        assert_eq!(session.subscription_count(), 1);
        assert!(eventually(|| session.subscription_count() == 0).await);

        let btc = SubscriptionKey::ticker("BTC/USDT");
        assert_eq!(
            wait_for(&mut rx, |e| matches!(e, SessionEvent::Subscriptions(_))).await,
            Some(SessionEvent::Subscriptions(vec![btc]))
        );
        assert_eq!(
            wait_for(&mut rx, |e| matches!(e, SessionEvent::Subscriptions(_))).await,
            Some(SessionEvent::Subscriptions(vec![]))
        );
    }

    #[tokio::test]
    async fn rejected_unsubscribe_restores_key() {
        let (session, feed) = open_session().await;
        session.subscribe_ticker("BTC/USDT").unwrap();
        assert!(eventually(|| session.pending_acks() == 0).await);

        feed.reply_to(BTC_TOPIC, Reply::Reject);
        session.unsubscribe_ticker("BTC/USDT").unwrap();
        assert_eq!(session.subscription_count(), 0);
        assert!(
            eventually(|| session.pending_acks() == 0 && session.subscription_count() == 1).await
        );
    }

    #[tokio::test]
    async fn unsubscribe_of_unknown_key_is_a_no_op() {
        let (session, feed) = open_session().await;
        session.unsubscribe_ticker("BTC/USDT").unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(feed.frames_of("unsubscribe").is_empty());
    }

    #[tokio::test]
    async fn frames_follow_call_order() {
        let (session, feed) = open_session().await;

        session.subscribe_ticker("BTC/USDT").unwrap();
        session.subscribe_candle("ETH/USDT", "1m").unwrap();
        session.unsubscribe_ticker("BTC/USDT").unwrap();
        assert!(eventually(|| session.pending_acks() == 0 && feed.frames().len() >= 3).await);

        let frames = feed.frames();
        let types: Vec<&str> = frames.iter().map(|f| f["type"].as_str().unwrap()).collect();
        assert_eq!(types, vec!["subscribe", "subscribe", "unsubscribe"]);
        assert_eq!(topics(&frames), vec![BTC_TOPIC, "/market/candles:ETH-USDT_1min", BTC_TOPIC]);
        assert_eq!(
            session.subscriptions(),
            vec![SubscriptionKey::candle("ETH/USDT", CandleInterval::M1)]
        );
    }

    #[tokio::test]
    async fn invalid_interval_has_no_side_effect() {
        let (session, feed) = open_session().await;

        let err = session.subscribe_candle("BTC/USDT", "7x").unwrap_err();
        assert!(matches!(err, KcError::InvalidInterval { ref got, .. } if got == "7x"));
        assert_eq!(session.subscription_count(), 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(feed.frames_of("subscribe").is_empty());
    }

    #[tokio::test]
    async fn close_refused_with_active_subscriptions() {
        let (session, _feed) = open_session().await;
        session.subscribe_ticker("BTC/USDT").unwrap();

        assert_eq!(session.close_connection(), Err(KcError::ActiveSubscriptions(1)));
        assert!(session.is_socket_open());
    }

    #[tokio::test]
    async fn intentional_close_does_not_reconnect() {
        let (session, feed) = open_session().await;
        let mut rx = session.events();

        session.close_connection().unwrap();
        assert_eq!(session.status(), SessionStatus::Disconnected);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(feed.connections(), 1);
        assert!(!session.is_socket_open());
        while let Ok(ev) = rx.try_recv() {
            assert!(!matches!(ev, SessionEvent::Reconnect { .. }), "unexpected {ev:?}");
        }
    }

    #[tokio::test]
    async fn unexpected_close_reconnects_and_replays() {
        let (session, feed) = open_session().await;
        let mut rx = session.events();
        session.subscribe_ticker("BTC/USDT").unwrap();
        session.subscribe_candle("ETH/USDT", "1m").unwrap();
        assert!(eventually(|| session.pending_acks() == 0).await);
        let first_id = session.connect_id();

        feed.drop_connection();

        assert_eq!(
            wait_for(&mut rx, |e| matches!(e, SessionEvent::Reconnect { .. })).await,
            Some(SessionEvent::Reconnect { subscriptions: 2 })
        );
        assert!(
            eventually(|| feed.connections() == 2
                && session.is_socket_open()
                && feed.frames_of("subscribe").len() == 4
                && session.pending_acks() == 0)
            .await
        );
        assert_ne!(session.connect_id(), first_id);
        assert_eq!(
            session.subscriptions(),
            vec![
                SubscriptionKey::ticker("BTC/USDT"),
                SubscriptionKey::candle("ETH/USDT", CandleInterval::M1)
            ]
        );
        let replayed = feed.frames_of("subscribe");
        assert_eq!(topics(&replayed[2..]), vec![BTC_TOPIC, "/market/candles:ETH-USDT_1min"]);
    }

    #[tokio::test]
    async fn unanswered_subscribe_survives_link_loss() {
        let (session, feed) = open_session().await;
        feed.reply_to(BTC_TOPIC, Reply::Silent);

        session.subscribe_ticker("BTC/USDT").unwrap();
        assert!(eventually(|| feed.frames_of("subscribe").len() == 1).await);
        assert_eq!(session.pending_acks(), 1);

        feed.reply_to(BTC_TOPIC, Reply::Ack);
        feed.drop_connection();

        assert!(
            eventually(|| feed.connections() == 2
                && feed.frames_of("subscribe").len() == 2
                && session.pending_acks() == 0)
            .await
        );
        assert_eq!(session.subscriptions(), vec![SubscriptionKey::ticker("BTC/USDT")]);
    }

    #[tokio::test]
    async fn subscribe_waits_for_writable_socket() {
        let (session, feed) = open_session().await;
        let mut rx = session.events();
        feed.set_writable(false);

        session.subscribe_ticker("BTC/USDT").unwrap();
        assert_eq!(session.subscription_count(), 0);
        let not_ready = wait_for(&mut rx, |e| matches!(e, SessionEvent::SocketNotReady(_))).await;
        assert!(not_ready.is_some());

        feed.set_writable(true);
        assert!(
            eventually(|| session.subscription_count() == 1 && session.pending_acks() == 0).await
        );
        assert_eq!(feed.frames_of("subscribe").len(), 1);
    }

    #[tokio::test]
    async fn deferred_subscribe_survives_reconnect() {
        let (session, feed) = open_session().await;
        let mut rx = session.events();
        feed.set_writable(false);

        session.subscribe_ticker("BTC/USDT").unwrap();
        let not_ready = wait_for(&mut rx, |e| matches!(e, SessionEvent::SocketNotReady(_))).await;
        assert!(not_ready.is_some());

        // Reconnect attempts fail until the welcome comes back.
        feed.set_welcome(false);
        feed.drop_connection();
        assert!(eventually(|| !session.is_socket_open()).await);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(session.subscription_count(), 0);
        feed.set_welcome(true);

        assert!(
            eventually(|| session.is_socket_open()
                && session.subscription_count() == 1
                && session.pending_acks() == 0)
            .await
        );
        assert_eq!(session.subscriptions(), vec![SubscriptionKey::ticker("BTC/USDT")]);
        assert_eq!(topics(&feed.frames_of("subscribe")), vec![BTC_TOPIC]);
    }

    #[tokio::test]
    async fn deferred_subscribe_stops_on_close() {
        let (session, feed) = open_session().await;
        feed.set_writable(false);

        session.subscribe_ticker("BTC/USDT").unwrap();
        session.close_connection().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        session.connect().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(session.subscription_count(), 0);
        assert!(feed.frames_of("subscribe").is_empty());
    }

    #[tokio::test]
    async fn replay_waits_for_writable_link() {
        let (session, feed) = open_session().await;
        let mut rx = session.events();
        let btc = SubscriptionKey::ticker("BTC/USDT");
        session.subscribe_ticker("BTC/USDT").unwrap();
        assert!(eventually(|| session.pending_acks() == 0).await);

        feed.start_unwritable(true);
        feed.drop_connection();
        let restart = wait_for(&mut rx, |e| {
            matches!(e, SessionEvent::SocketNotReady(msg) if msg.contains("restart"))
        })
        .await;
        assert!(restart.is_some());
        assert!(session.is_socket_open());
        assert_eq!(session.subscriptions(), vec![btc.clone()]);
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(feed.frames_of("subscribe").len(), 1);

        feed.start_unwritable(false);
        feed.set_writable(true);
        assert!(
            eventually(|| feed.frames_of("subscribe").len() == 2 && session.pending_acks() == 0)
                .await
        );
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(feed.frames_of("subscribe").len(), 2);
        assert_eq!(session.subscriptions(), vec![btc]);
    }

    #[tokio::test]
    async fn replay_for_replaced_link_is_skipped() {
        let (session, feed) = open_session().await;
        session.subscribe_ticker("BTC/USDT").unwrap();
        assert!(eventually(|| session.pending_acks() == 0).await);

        let stale = lock(&session.inner.state).epoch - 1;
        session.inner.restart_previous_subscriptions(stale);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(feed.frames_of("subscribe").len(), 1);
        assert_eq!(session.subscriptions(), vec![SubscriptionKey::ticker("BTC/USDT")]);
    }

    #[tokio::test]
    async fn dispatch_on_replaced_link_leaves_no_pending_ack() {
        let (session, feed) = open_session().await;
        let lane = session.inner.open_lane().unwrap();

        feed.drop_connection();
        assert!(eventually(|| feed.connections() == 2 && session.is_socket_open()).await);

        // A live lane on the old link's writer: only the epoch marks it stale.
        let queue = SendQueue::start("test", Duration::from_secs(1));
        let stale = Lane { queue: queue.handle(), ..lane };
        let op = PendingOperation::new(OpKind::Subscribe, SubscriptionKey::ticker("BTC/USDT"), 1);
        session.inner.dispatch(op, stale);

        assert_eq!(session.pending_acks(), 0);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(session.pending_acks(), 0);
        assert!(feed.frames_of("subscribe").is_empty());
    }

    #[tokio::test]
    async fn transport_error_is_reported_without_closing() {
        let (session, feed) = open_session().await;
        let mut rx = session.events();

        feed.push_error("connection reset by peer");
        assert_eq!(
            wait_for(&mut rx, |e| matches!(e, SessionEvent::Error(_))).await,
            Some(SessionEvent::Error("connection reset by peer".into()))
        );
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(session.is_socket_open());
        assert_eq!(feed.connections(), 1);
    }

    #[tokio::test]
    async fn send_failure_rolls_back_and_reports() {
        let (session, feed) = open_session().await;
        let mut rx = session.events();
        feed.fail_writes(true);

        session.subscribe_ticker("BTC/USDT").unwrap();
        assert!(eventually(|| session.subscription_count() == 0).await);
        assert_eq!(session.pending_acks(), 0);
        assert!(wait_for(&mut rx, |e| matches!(e, SessionEvent::Error(_))).await.is_some());
    }

    #[tokio::test]
    async fn ack_timeout_rolls_back() {
        let config = SessionConfig {
            ack_timeout: Some(Duration::from_millis(50)),
            ..test_config()
        };
        let (session, feed) = session_with(config, StaticTokens::new(18_000));
        session.connect().await.unwrap();
        feed.reply_to(BTC_TOPIC, Reply::Silent);

        session.subscribe_ticker("BTC/USDT").unwrap();
        assert_eq!(session.subscription_count(), 1);
        assert!(eventually(|| session.subscription_count() == 0).await);
        assert_eq!(session.pending_acks(), 0);
    }

    #[tokio::test]
    async fn candle_push_and_confirmed_unsubscribe_clears_cache() {
        let (session, feed) = open_session().await;
        let mut rx = session.events();
        session.subscribe_candle("ETH/USDT", "1m").unwrap();
        assert!(eventually(|| session.pending_acks() == 0).await);

        feed.push(
            r#"{"type":"message","topic":"/market/candles:ETH-USDT_1min","subject":"trade.candles.update",
                "data":{"symbol":"ETH-USDT","candles":["1589968800","2000","2005","2010","1990","12.5","25000"],
                "time":1589970010253893337}}"#,
        );
        match wait_for(&mut rx, |e| matches!(e, SessionEvent::Candle(_))).await {
            Some(SessionEvent::Candle(c)) => {
                assert_eq!(c.symbol, "ETH/USDT");
                assert_eq!(c.close, 2005.0);
                assert!(!c.closed);
            }
            other => panic!("expected candle, got {other:?}"),
        }
        assert_eq!(session.inner.decoder.cached_candles(), 1);

        session.unsubscribe_candle("ETH/USDT", "1m").unwrap();
        assert!(eventually(|| session.inner.decoder.cached_candles() == 0).await);
        assert_eq!(session.subscription_count(), 0);
    }

    #[tokio::test]
    async fn ticker_push_is_published() {
        let (session, feed) = open_session().await;
        let mut rx = session.events();

        feed.push(
            r#"{"type":"message","topic":"/market/ticker:BTC-USDT","subject":"trade.ticker",
                "data":{"sequence":"7","price":"30000.5","size":"0.1","bestAsk":"30001",
                "bestAskSize":"1","bestBid":"30000","bestBidSize":"2","time":1704873323416}}"#,
        );
        match wait_for(&mut rx, |e| matches!(e, SessionEvent::Ticker(_))).await {
            Some(SessionEvent::Ticker(t)) => {
                assert_eq!(t.symbol, "BTC/USDT");
                assert_eq!(t.price, 30000.5);
                assert_eq!(t.sequence, 7);
            }
            other => panic!("expected ticker, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn heartbeat_pings_while_open() {
        let (session, feed) = session_with(test_config(), StaticTokens::new(40));
        session.connect().await.unwrap();

        assert!(eventually(|| feed.frames_of("ping").len() >= 2).await);
        let ping = &feed.frames_of("ping")[0];
        assert!(ping["id"].as_str().unwrap().parse::<u64>().is_ok());
        assert!(ping.get("topic").is_none());

        session.close_connection().unwrap();
        let sent = feed.frames_of("ping").len();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(feed.frames_of("ping").len(), sent);
    }
}
