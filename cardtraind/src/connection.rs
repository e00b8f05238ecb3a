//! Training-socket connection manager.
//!
//! Owns exactly one logical WebSocket to the training endpoint:
//! - `connect()` tears down any live socket before dialing a new one and
//!   resolves once, with the handshake bounded by a timeout.
//! - Inbound text is decoded into [`Frame`]s and delivered synchronously, in
//!   transport order, to every subscriber in registration order.
//! - An unexpected close synthesizes a `disconnected` status frame and
//!   schedules a reconnect after a fixed delay; a successful reconnect
//!   synthesizes `connected`. Failed connects and reconnects keep retrying at
//!   the same delay. Clean closes never reconnect.
//! - Every `connect()`, `disconnect()` and drop starts a new generation. A
//!   handshake or retry from an older generation never installs a socket.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use async_trait::async_trait;
use cardtrain::config::TrainingConfig;
use cardtrain::frame::{
    encode_action, start_training_payload, Frame, StatusKind, ACTION_START_TRAINING,
    ACTION_STOP_TRAINING,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde_json::{Map, Value};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::error::ClientError;

const MSG_DISCONNECTED: &str = "Kết nối WebSocket đã đóng";
const MSG_RECONNECTED: &str = "Đã kết nối lại WebSocket";

// ═══════════════════════════════════════════════════════════════════════════
// Transport seam
// ═══════════════════════════════════════════════════════════════════════════

/// What the transport reports to the reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    /// `clean` is true when the close handshake completed.
    Closed { clean: bool, reason: String },
}

pub type FrameSink = Pin<Box<dyn Sink<String, Error = ClientError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = TransportEvent> + Send>>;

/// Dials the training endpoint and hands back the two halves of a socket.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream), ClientError>;
}

/// Production connector over `tokio-tungstenite`.
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream), ClientError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| ClientError::Connection {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        let (sink, stream) = ws.split();

        let sink = sink
            .sink_map_err(|e| ClientError::Transport(e.to_string()))
            .with(|text: String| futures_util::future::ready(Ok::<_, ClientError>(Message::text(text))));

        let stream = stream.filter_map(|msg| {
            futures_util::future::ready(match msg {
                Ok(Message::Text(text)) => Some(TransportEvent::Text(text.to_string())),
                Ok(Message::Binary(bytes)) => {
                    Some(TransportEvent::Text(String::from_utf8_lossy(&bytes).into_owned()))
                }
                Ok(Message::Close(frame)) => Some(TransportEvent::Closed {
                    clean: true,
                    reason: frame
                        .map(|f| format!("{} {}", u16::from(f.code), f.reason))
                        .unwrap_or_default(),
                }),
                Ok(_) => None,
                Err(e) => Some(TransportEvent::Closed {
                    clean: false,
                    reason: e.to_string(),
                }),
            })
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Manager
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub url: String,
    pub handshake_timeout: Duration,
    pub reconnect_delay: Duration,
}

type Handler = Arc<dyn Fn(&Frame) + Send + Sync>;

struct Link {
    id: u64,
    sink: Arc<AsyncMutex<FrameSink>>,
    reader: JoinHandle<()>,
}

#[derive(Default)]
struct LinkState {
    link: Option<Link>,
    next_id: u64,
    generation: u64,
    connected: bool,
    reconnect: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    handlers: Vec<(u64, Handler)>,
}

struct Shared {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    state: Mutex<LinkState>,
    subscribers: Mutex<Subscribers>,
}

/// Recover the data from a poisoned lock; a panicking subscriber must not
/// wedge the socket.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct ConnectionManager {
    shared: Arc<Shared>,
}

/// Handle returned by [`ConnectionManager::subscribe`].
pub struct Subscription {
    id: u64,
    shared: Weak<Shared>,
}

impl Subscription {
    /// Remove exactly the handler this subscription registered.
    pub fn unsubscribe(self) {
        if let Some(shared) = self.shared.upgrade() {
            lock(&shared.subscribers)
                .handlers
                .retain(|(id, _)| *id != self.id);
        }
    }
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                connector,
                state: Mutex::new(LinkState::default()),
                subscribers: Mutex::new(Subscribers::default()),
            }),
        }
    }

    pub fn with_websocket(config: ConnectionConfig) -> Self {
        Self::new(config, Arc::new(WsConnector))
    }

    pub fn url(&self) -> &str {
        &self.shared.config.url
    }

    /// Dial the endpoint, replacing any live socket and any pending
    /// reconnect. On failure, retries continue until [`disconnect`].
    ///
    /// [`disconnect`]: ConnectionManager::disconnect
    pub async fn connect(&self) -> bool {
        let generation = self.shared.next_generation();
        if self.shared.connect(generation).await {
            return true;
        }
        if self.shared.is_current(generation) {
            self.shared.schedule_reconnect(generation);
        }
        false
    }

    /// Close the socket on purpose. No reconnect follows, including one whose
    /// handshake is already in flight.
    pub fn disconnect(&self) {
        self.shared.next_generation();
        self.shared.teardown(true);
    }

    /// Disconnect and drop every subscriber.
    pub fn shutdown(&self) {
        self.disconnect();
        lock(&self.shared.subscribers).handlers.clear();
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.shared.state).connected
    }

    pub fn subscribe(&self, handler: impl Fn(&Frame) + Send + Sync + 'static) -> Subscription {
        let mut subs = lock(&self.shared.subscribers);
        subs.next_id += 1;
        let id = subs.next_id;
        subs.handlers.push((id, Arc::new(handler)));
        Subscription {
            id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.shared.subscribers).handlers.len()
    }

    /// Write `{action, ...payload}` to the socket. Nothing is queued.
    pub async fn send(&self, action: &str, payload: Map<String, Value>) -> Result<(), ClientError> {
        let sink = {
            let st = lock(&self.shared.state);
            match &st.link {
                Some(link) if st.connected => Arc::clone(&link.sink),
                _ => return Err(ClientError::NotConnected),
            }
        };
        let text = encode_action(action, payload);
        debug!(action, "sending frame");
        let mut sink = sink.lock().await;
        sink.send(text).await
    }

    pub async fn start_training(&self, config: &TrainingConfig) -> Result<(), ClientError> {
        let config = serde_json::to_value(config)?;
        self.send(ACTION_START_TRAINING, start_training_payload(config))
            .await
    }

    pub async fn stop_training(&self) -> Result<(), ClientError> {
        self.send(ACTION_STOP_TRAINING, Map::new()).await
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shared.next_generation();
        self.shared.teardown(false);
    }
}

impl Shared {
    /// Supersede every in-flight connect and cancel the retry task.
    fn next_generation(&self) -> u64 {
        let mut st = lock(&self.state);
        st.generation += 1;
        if let Some(pending) = st.reconnect.take() {
            pending.abort();
        }
        st.generation
    }

    fn is_current(&self, generation: u64) -> bool {
        lock(&self.state).generation == generation
    }

    async fn connect(self: &Arc<Self>, generation: u64) -> bool {
        self.teardown(true);

        let url = self.config.url.as_str();
        let attempt =
            tokio::time::timeout(self.config.handshake_timeout, self.connector.connect(url)).await;
        let (sink, stream) = match attempt {
            Ok(Ok(halves)) => halves,
            Ok(Err(e)) => {
                warn!("training socket connect failed: {}", e);
                return false;
            }
            Err(_) => {
                warn!(
                    "training socket handshake timed out after {:?}",
                    self.config.handshake_timeout
                );
                return false;
            }
        };

        let mut st = lock(&self.state);
        if st.generation != generation {
            drop(st);
            debug!("discarding training socket from a superseded connect");
            close_sink(Arc::new(AsyncMutex::new(sink)), self.config.handshake_timeout);
            return false;
        }
        if let Some(raced) = st.link.take() {
            close_link(raced, self.config.handshake_timeout);
        }
        st.next_id += 1;
        let id = st.next_id;
        let reader = tokio::spawn(Arc::clone(self).read_loop(id, stream));
        st.link = Some(Link {
            id,
            sink: Arc::new(AsyncMutex::new(sink)),
            reader,
        });
        st.connected = true;
        info!("training socket connected to {}", url);
        true
    }

    /// Drop the live link, if any. With `notify`, subscribers learn that a
    /// live socket went away.
    fn teardown(&self, notify: bool) {
        let old = {
            let mut st = lock(&self.state);
            st.connected = false;
            st.link.take()
        };
        if let Some(link) = old {
            info!("closing training socket");
            close_link(link, self.config.handshake_timeout);
            if notify {
                self.dispatch(&Frame::status(StatusKind::Disconnected, MSG_DISCONNECTED));
            }
        }
    }

    async fn read_loop(self: Arc<Self>, id: u64, mut stream: FrameStream) {
        let (clean, reason) = loop {
            match stream.next().await {
                Some(TransportEvent::Text(text)) => match Frame::parse(&text) {
                    Ok(frame) => self.dispatch(&frame),
                    Err(e) => warn!("dropping malformed frame: {}", e),
                },
                Some(TransportEvent::Closed { clean, reason }) => break (clean, reason),
                None => break (false, "stream ended".to_string()),
            }
        };
        self.on_closed(id, clean, reason);
    }

    fn on_closed(self: &Arc<Self>, id: u64, clean: bool, reason: String) {
        let generation = {
            let mut st = lock(&self.state);
            match &st.link {
                Some(link) if link.id == id => {}
                // Torn down or replaced by the caller; nothing to report.
                _ => return,
            }
            st.link = None;
            st.connected = false;
            st.generation
        };

        if clean {
            info!("training socket closed: {}", reason);
        } else {
            warn!("training socket dropped: {}", reason);
        }
        self.dispatch(&Frame::status(StatusKind::Disconnected, MSG_DISCONNECTED));
        if !clean {
            self.schedule_reconnect(generation);
        }
    }

    /// Retry every `reconnect_delay` until a connect succeeds or `generation`
    /// is superseded. The task stays abortable for its whole life.
    fn schedule_reconnect(self: &Arc<Self>, generation: u64) {
        let weak = Arc::downgrade(self);
        let delay = self.config.reconnect_delay;
        info!("reconnecting in {:?}", delay);

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(delay).await;
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                if shared.connect(generation).await {
                    info!("training socket reconnected");
                    shared.dispatch(&Frame::status(StatusKind::Connected, MSG_RECONNECTED));
                    return;
                }
                if !shared.is_current(generation) {
                    return;
                }
                warn!("reconnect failed; retrying in {:?}", delay);
            }
        });

        let mut st = lock(&self.state);
        if st.generation != generation {
            handle.abort();
        } else if let Some(previous) = st.reconnect.replace(handle) {
            previous.abort();
        }
    }

    fn dispatch(&self, frame: &Frame) {
        let handlers: Vec<Handler> = lock(&self.subscribers)
            .handlers
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(frame))).is_err() {
                error!("subscriber panicked handling '{}' frame", frame.kind());
            }
        }
    }
}

fn close_link(link: Link, grace: Duration) {
    link.reader.abort();
    close_sink(link.sink, grace);
}

fn close_sink(sink: Arc<AsyncMutex<FrameSink>>, grace: Duration) {
    // Outside a runtime (process teardown) the socket is simply dropped.
    if let Ok(rt) = tokio::runtime::Handle::try_current() {
        rt.spawn(async move {
            let mut sink = sink.lock().await;
            let _ = tokio::time::timeout(grace, sink.close()).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Server side of one fake socket.
    struct FakeLink {
        events: mpsc::UnboundedSender<TransportEvent>,
        sent: mpsc::UnboundedReceiver<String>,
    }

    #[derive(Default)]
    struct FakeConnector {
        attempts: AtomicUsize,
        fail: AtomicBool,
        hang: AtomicBool,
        /// Handshake latency in milliseconds.
        delay_ms: AtomicU64,
        links: Mutex<Vec<FakeLink>>,
    }

    impl FakeConnector {
        fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }

        fn push(&self, link: usize, event: TransportEvent) {
            let links = lock(&self.links);
            let _ = links[link].events.send(event);
        }

        fn text(&self, link: usize, json: &str) {
            self.push(link, TransportEvent::Text(json.to_string()));
        }

        fn close(&self, link: usize, clean: bool) {
            self.push(
                link,
                TransportEvent::Closed {
                    clean,
                    reason: "test".to_string(),
                },
            );
        }

        fn try_sent(&self, link: usize) -> Option<String> {
            lock(&self.links)[link].sent.try_recv().ok()
        }

        fn open_links(&self) -> usize {
            lock(&self.links)
                .iter()
                .filter(|l| !l.events.is_closed())
                .count()
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream), ClientError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            let delay = self.delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(ClientError::Connection {
                    url: url.to_string(),
                    reason: "refused".to_string(),
                });
            }

            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let (sent_tx, sent_rx) = mpsc::unbounded_channel::<String>();
            lock(&self.links).push(FakeLink {
                events: events_tx,
                sent: sent_rx,
            });

            let stream = futures_util::stream::unfold(events_rx, |mut rx| async move {
                rx.recv().await.map(|ev| (ev, rx))
            });
            let sink = futures_util::sink::unfold(sent_tx, |tx, text: String| async move {
                tx.send(text)
                    .map_err(|_| ClientError::Transport("peer gone".to_string()))?;
                Ok::<_, ClientError>(tx)
            });
            Ok((Box::pin(sink), Box::pin(stream)))
        }
    }

    fn manager(connector: &Arc<FakeConnector>) -> ConnectionManager {
        let connector: Arc<dyn Connector> = connector.clone();
        ConnectionManager::new(
            ConnectionConfig {
                url: "ws://test/ws".to_string(),
                handshake_timeout: Duration::from_secs(5),
                reconnect_delay: Duration::from_secs(5),
            },
            connector,
        )
    }

    fn collect(mgr: &ConnectionManager) -> (Subscription, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = mgr.subscribe(move |f| {
            let _ = tx.send(f.clone());
        });
        (sub, rx)
    }

    fn is_status(frame: &Frame, want: StatusKind) -> bool {
        matches!(frame, Frame::Status { status: Some(s), .. } if *s == want)
    }

    #[tokio::test(start_paused = true)]
    async fn delivers_frames_in_order_and_skips_malformed() {
        let fake = Arc::new(FakeConnector::default());
        let mgr = manager(&fake);
        let (_sub, mut rx) = collect(&mgr);

        assert!(mgr.connect().await);
        assert!(mgr.is_connected());

        fake.text(0, r#"{"type":"status","status":"started"}"#);
        fake.text(0, "{{ not json");
        fake.text(0, r#"{"type":"raw_log","content":"Epoch 1/3"}"#);

        let first = rx.recv().await.unwrap();
        assert!(is_status(&first, StatusKind::Started));
        let second = rx.recv().await.unwrap();
        assert_eq!(
            second,
            Frame::RawLog {
                content: Some("Epoch 1/3".to_string())
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn handshake_timeout_resolves_false() {
        let fake = Arc::new(FakeConnector::default());
        fake.hang.store(true, Ordering::SeqCst);
        let mgr = manager(&fake);

        let started = tokio::time::Instant::now();
        assert!(!mgr.connect().await);
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(5) && waited < Duration::from_secs(6));
        assert!(!mgr.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_error_resolves_false() {
        let fake = Arc::new(FakeConnector::default());
        fake.fail.store(true, Ordering::SeqCst);
        let mgr = manager(&fake);
        assert!(!mgr.connect().await);
        assert_eq!(fake.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_replaces_live_socket() {
        let fake = Arc::new(FakeConnector::default());
        let mgr = manager(&fake);
        let (_sub, mut rx) = collect(&mgr);

        assert!(mgr.connect().await);
        assert!(mgr.connect().await);
        assert_eq!(fake.attempts(), 2);
        assert!(is_status(&rx.recv().await.unwrap(), StatusKind::Disconnected));

        // The first socket is gone; its frames are not delivered.
        fake.text(0, r#"{"type":"raw_log","content":"stale"}"#);
        fake.text(1, r#"{"type":"raw_log","content":"fresh"}"#);
        assert_eq!(
            rx.recv().await.unwrap(),
            Frame::RawLog {
                content: Some("fresh".to_string())
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_close_reconnects_once_after_delay() {
        let fake = Arc::new(FakeConnector::default());
        let mgr = manager(&fake);
        let (_sub, mut rx) = collect(&mgr);
        assert!(mgr.connect().await);

        fake.close(0, false);
        assert!(is_status(&rx.recv().await.unwrap(), StatusKind::Disconnected));
        assert!(!mgr.is_connected());
        assert_eq!(fake.attempts(), 1);

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(fake.attempts(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fake.attempts(), 2);
        assert!(is_status(&rx.recv().await.unwrap(), StatusKind::Connected));
        assert!(mgr.is_connected());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fake.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reconnect_keeps_retrying() {
        let fake = Arc::new(FakeConnector::default());
        let mgr = manager(&fake);
        assert!(mgr.connect().await);

        fake.fail.store(true, Ordering::SeqCst);
        fake.close(0, false);
        tokio::time::sleep(Duration::from_millis(10_100)).await;
        assert_eq!(fake.attempts(), 3);

        fake.fail.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fake.attempts(), 4);
        assert!(mgr.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn clean_close_does_not_reconnect() {
        let fake = Arc::new(FakeConnector::default());
        let mgr = manager(&fake);
        let (_sub, mut rx) = collect(&mgr);
        assert!(mgr.connect().await);

        fake.close(0, true);
        assert!(is_status(&rx.recv().await.unwrap(), StatusKind::Disconnected));
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fake.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_then_close_event_does_not_reconnect() {
        let fake = Arc::new(FakeConnector::default());
        let mgr = manager(&fake);
        assert!(mgr.connect().await);

        mgr.disconnect();
        assert!(!mgr.is_connected());
        fake.close(0, false);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fake.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_reconnect() {
        let fake = Arc::new(FakeConnector::default());
        let mgr = manager(&fake);
        assert!(mgr.connect().await);

        fake.close(0, false);
        tokio::time::sleep(Duration::from_secs(1)).await;
        mgr.disconnect();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fake.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_during_reconnect_handshake_stays_closed() {
        let fake = Arc::new(FakeConnector::default());
        let mgr = manager(&fake);
        let (_sub, mut rx) = collect(&mgr);
        assert!(mgr.connect().await);

        fake.delay_ms.store(1_000, Ordering::SeqCst);
        fake.close(0, false);
        assert!(is_status(&rx.recv().await.unwrap(), StatusKind::Disconnected));

        // The retry fired at 5 s and is mid-handshake.
        tokio::time::sleep(Duration::from_millis(5_500)).await;
        assert_eq!(fake.attempts(), 2);
        mgr.disconnect();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!mgr.is_connected());
        assert_eq!(fake.open_links(), 0);
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fake.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_manager_leaves_no_socket_behind() {
        let fake = Arc::new(FakeConnector::default());
        let mgr = manager(&fake);
        let (_sub, mut rx) = collect(&mgr);
        assert!(mgr.connect().await);

        fake.delay_ms.store(1_000, Ordering::SeqCst);
        fake.close(0, false);
        assert!(is_status(&rx.recv().await.unwrap(), StatusKind::Disconnected));

        tokio::time::sleep(Duration::from_millis(5_500)).await;
        drop(mgr);
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(fake.attempts(), 2);
        assert_eq!(fake.open_links(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_connects_keep_only_the_latest() {
        let fake = Arc::new(FakeConnector::default());
        fake.delay_ms.store(1_000, Ordering::SeqCst);
        let mgr = manager(&fake);

        let (first, second) = tokio::join!(mgr.connect(), mgr.connect());
        assert!(!first);
        assert!(second);
        assert!(mgr.is_connected());
        assert_eq!(fake.open_links(), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fake.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn initial_connect_failure_retries_after_delay() {
        let fake = Arc::new(FakeConnector::default());
        fake.fail.store(true, Ordering::SeqCst);
        let mgr = manager(&fake);
        let (_sub, mut rx) = collect(&mgr);

        assert!(!mgr.connect().await);
        fake.fail.store(false, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(fake.attempts(), 1);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(fake.attempts(), 2);
        assert!(mgr.is_connected());
        assert!(is_status(&rx.recv().await.unwrap(), StatusKind::Connected));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_manual_connect_keeps_retrying() {
        let fake = Arc::new(FakeConnector::default());
        let mgr = manager(&fake);
        assert!(mgr.connect().await);

        fake.fail.store(true, Ordering::SeqCst);
        fake.close(0, false);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!mgr.connect().await);
        assert_eq!(fake.attempts(), 2);

        fake.fail.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fake.attempts(), 3);
        assert!(mgr.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_after_failed_connect_stops_retrying() {
        let fake = Arc::new(FakeConnector::default());
        fake.fail.store(true, Ordering::SeqCst);
        let mgr = manager(&fake);

        assert!(!mgr.connect().await);
        mgr.disconnect();
        fake.fail.store(false, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(fake.attempts(), 1);
        assert!(!mgr.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn send_requires_open_socket() {
        let fake = Arc::new(FakeConnector::default());
        let mgr = manager(&fake);

        let err = mgr.stop_training().await.unwrap_err();
        assert!(matches!(err, ClientError::NotConnected));

        assert!(mgr.connect().await);
        mgr.stop_training().await.unwrap();
        assert_eq!(fake.try_sent(0).as_deref(), Some(r#"{"action":"stop_training"}"#));

        let cfg = TrainingConfig {
            epochs: 4,
            ..TrainingConfig::default()
        };
        mgr.start_training(&cfg).await.unwrap();
        let sent: Value = serde_json::from_str(&fake.try_sent(0).unwrap()).unwrap();
        assert_eq!(sent["action"], "start_training");
        assert_eq!(sent["config"]["epochs"], 4);

        mgr.disconnect();
        assert!(matches!(
            mgr.stop_training().await,
            Err(ClientError::NotConnected)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_run_in_order_and_survive_panics() {
        let fake = Arc::new(FakeConnector::default());
        let mgr = manager(&fake);
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = Arc::clone(&order);
        let _a = mgr.subscribe(move |_| lock(&o).push("a"));
        let _boom = mgr.subscribe(|_| panic!("handler bug"));
        let o = Arc::clone(&order);
        let b = mgr.subscribe(move |_| lock(&o).push("b"));
        let (_c, mut rx) = collect(&mgr);

        assert!(mgr.connect().await);
        fake.text(0, r#"{"type":"raw_log","content":"x"}"#);
        rx.recv().await.unwrap();
        assert_eq!(*lock(&order), vec!["a", "b"]);

        b.unsubscribe();
        assert_eq!(mgr.subscriber_count(), 3);
        fake.text(0, r#"{"type":"raw_log","content":"y"}"#);
        rx.recv().await.unwrap();
        assert_eq!(*lock(&order), vec!["a", "b", "a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_drops_subscribers() {
        let fake = Arc::new(FakeConnector::default());
        let mgr = manager(&fake);
        let (_sub, _rx) = collect(&mgr);
        assert!(mgr.connect().await);

        mgr.shutdown();
        assert_eq!(mgr.subscriber_count(), 0);
        assert!(!mgr.is_connected());
    }
}
