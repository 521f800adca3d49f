//! The connection manager: owns the single upstream socket.
//!
//! One worker task runs per connection attempt. It opens the socket,
//! announces this instance with a `hello` envelope, and then feeds every
//! inbound frame to an [`InboundHandler`] until the socket goes away.
//! Everything the worker does is expressed as a [`ConnectionEvent`] and
//! handled in one place.
//!
//! Lifecycle operations (`start`, `stop`, `reconnect`) are serialized by
//! one async mutex that also owns the worker's `JoinHandle`, so at most
//! one worker/socket pair exists at any time. Sends run on the caller's
//! task and only ever see the socket through the shared slot.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use grunichat_protocol::{Codec, Envelope, JsonCodec};
use grunichat_state::{ConnectionState, StatsTracker, Transition};
use grunichat_transport::{Connection, ConnectionId, Connector, TransportError};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::BridgeError;

/// How long `stop()` waits for a connected worker to finish the close
/// handshake before aborting it.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Receives the payload of every inbound frame.
///
/// Called on the worker task, one frame at a time, in arrival order.
pub trait InboundHandler: Send + Sync + 'static {
    /// Handles one raw inbound frame.
    fn on_frame(&self, data: &[u8]);
}

/// Where to connect and who to say we are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Bus URL.
    pub url: String,
    /// Identity announced in the `hello` envelope.
    pub plugin_id: String,
}

/// Everything that can happen to a worker's connection.
pub enum ConnectionEvent<T> {
    /// The socket finished opening.
    Opened(Arc<T>),
    /// A text frame arrived.
    Frame(Vec<u8>),
    /// Opening or reading the socket failed.
    Failed(TransportError),
    /// The peer closed the socket cleanly.
    Closed,
}

// ---------------------------------------------------------------------------
// Shared slot
// ---------------------------------------------------------------------------

struct Slot<T> {
    state: ConnectionState,
    /// Bumped on every start and stop. A worker only touches the slot
    /// while its own generation is current.
    generation: u64,
    conn: Option<Arc<T>>,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    state_tx: watch::Sender<ConnectionState>,
    stats: Arc<StatsTracker>,
}

impl<T: Connection> Shared<T> {
    fn new(stats: Arc<StatsTracker>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        stats.set_connection_state(ConnectionState::Disconnected);
        Self {
            slot: Mutex::new(Slot {
                state: ConnectionState::Disconnected,
                generation: 0,
                conn: None,
            }),
            state_tx,
            stats,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `transition` and publishes the result. Must be called with
    /// the slot locked so observers see transitions in order.
    fn apply(&self, slot: &mut Slot<T>, transition: Transition) {
        let Some(next) = slot.state.apply(transition) else {
            tracing::debug!(
                state = %slot.state,
                ?transition,
                "ignoring transition"
            );
            return;
        };
        if next != slot.state {
            tracing::debug!(from = %slot.state, to = %next, "connection state");
        }
        slot.state = next;
        self.stats.set_connection_state(next);
        self.state_tx.send_replace(next);
    }

    /// Opens a new generation in `Connecting` and returns it.
    fn begin(&self) -> u64 {
        let mut slot = self.lock();
        slot.generation += 1;
        slot.conn = None;
        self.apply(&mut slot, Transition::Start);
        slot.generation
    }

    /// Retires the current generation, moves to `Closing` and hands back
    /// the socket (if any) so the caller can close it outside the lock.
    fn begin_close(&self) -> (ConnectionState, Option<Arc<T>>) {
        let mut slot = self.lock();
        slot.generation += 1;
        let previous = slot.state;
        self.apply(&mut slot, Transition::Stop);
        (previous, slot.conn.take())
    }

    fn finish_close(&self) {
        let mut slot = self.lock();
        slot.conn = None;
        self.apply(&mut slot, Transition::Closed);
    }

    /// Installs an opened socket. Returns `false` if the worker was
    /// superseded while connecting.
    fn opened(&self, generation: u64, conn: Arc<T>) -> bool {
        let mut slot = self.lock();
        if slot.generation != generation {
            return false;
        }
        slot.conn = Some(conn);
        self.apply(&mut slot, Transition::Opened);
        true
    }

    /// Records that the worker of `generation` is done.
    fn ended(&self, generation: u64, transition: Transition) {
        let mut slot = self.lock();
        if slot.generation != generation {
            return;
        }
        slot.conn = None;
        self.apply(&mut slot, transition);
    }

    fn connected(&self) -> Option<Arc<T>> {
        let slot = self.lock();
        if slot.state.is_connected() {
            slot.conn.clone()
        } else {
            None
        }
    }

    fn state(&self) -> ConnectionState {
        self.lock().state
    }

    fn connection_id(&self) -> Option<ConnectionId> {
        self.lock().conn.as_ref().map(|conn| conn.id())
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// State owned by one worker task.
///
/// Dropping the worker (normal exit, abort, or a panic in the inbound
/// handler) always releases its generation, so the manager can be
/// started again.
struct Worker<C: Connector, D: InboundHandler> {
    shared: Arc<Shared<C::Connection>>,
    inbound: Arc<D>,
    endpoint: Endpoint,
    generation: u64,
    codec: JsonCodec,
    conn: Option<Arc<C::Connection>>,
    ending: Transition,
}

impl<C: Connector, D: InboundHandler> Drop for Worker<C, D> {
    fn drop(&mut self) {
        self.shared.ended(self.generation, self.ending);
    }
}

impl<C: Connector, D: InboundHandler> Worker<C, D> {
    async fn run(mut self, connector: Arc<C>) {
        tracing::info!(
            url = %self.endpoint.url,
            plugin_id = %self.endpoint.plugin_id,
            "connecting to message bus"
        );

        let event = match connector.connect(&self.endpoint.url).await {
            Ok(conn) => ConnectionEvent::Opened(Arc::new(conn)),
            Err(e) => ConnectionEvent::Failed(e),
        };
        if !self.handle(event).await {
            return;
        }
        let Some(conn) = self.conn.clone() else {
            return;
        };

        loop {
            let event = match conn.recv().await {
                Ok(Some(data)) => ConnectionEvent::Frame(data),
                Ok(None) => ConnectionEvent::Closed,
                Err(e) => ConnectionEvent::Failed(e),
            };
            if !self.handle(event).await {
                break;
            }
        }
    }

    /// Handles one event. Returns `false` when the worker should exit.
    async fn handle(&mut self, event: ConnectionEvent<C::Connection>) -> bool {
        match event {
            ConnectionEvent::Opened(conn) => {
                let conn_id = conn.id();
                // The hello must precede anything a caller sends, so the
                // socket is published only after it is out.
                self.send_hello(&conn).await;
                if !self.shared.opened(self.generation, Arc::clone(&conn)) {
                    tracing::debug!(%conn_id, "superseded while connecting, closing");
                    let _ = conn.close().await;
                    return false;
                }
                tracing::info!(%conn_id, url = %self.endpoint.url, "connected to message bus");
                self.conn = Some(conn);
                true
            }
            ConnectionEvent::Frame(data) => {
                self.inbound.on_frame(&data);
                true
            }
            ConnectionEvent::Failed(e) => {
                tracing::warn!(url = %self.endpoint.url, error = %e, "connection failed");
                self.ending = Transition::Failed;
                false
            }
            ConnectionEvent::Closed => {
                tracing::info!(url = %self.endpoint.url, "connection closed by peer");
                self.ending = Transition::Closed;
                false
            }
        }
    }

    async fn send_hello(&self, conn: &C::Connection) {
        let hello = Envelope::hello(&self.endpoint.plugin_id);
        let text = match self.codec.encode(&hello) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode hello");
                return;
            }
        };
        if let Err(e) = conn.send(&text).await {
            tracing::warn!(conn_id = %conn.id(), error = %e, "failed to send hello");
        }
    }
}

// ---------------------------------------------------------------------------
// ConnectionManager
// ---------------------------------------------------------------------------

/// Owns the socket lifecycle: open, run, close, replace.
pub struct ConnectionManager<C: Connector, D: InboundHandler> {
    connector: Arc<C>,
    inbound: Arc<D>,
    shared: Arc<Shared<C::Connection>>,
    codec: JsonCodec,
    /// Lifecycle lock. Holding it is the right to create or destroy the
    /// worker.
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<C: Connector, D: InboundHandler> ConnectionManager<C, D> {
    /// Creates a disconnected manager.
    pub fn new(connector: C, inbound: Arc<D>, stats: Arc<StatsTracker>) -> Self {
        Self {
            connector: Arc::new(connector),
            inbound,
            shared: Arc::new(Shared::new(stats)),
            codec: JsonCodec,
            worker: tokio::sync::Mutex::new(None),
        }
    }

    /// Starts a connection to `endpoint`, first tearing down any existing
    /// one.
    ///
    /// Returns once the worker is spawned; the socket opens in the
    /// background. Use [`wait_for_state`](Self::wait_for_state) to wait
    /// for it.
    pub async fn start(&self, endpoint: Endpoint) {
        let mut worker = self.worker.lock().await;
        self.shutdown(&mut worker).await;

        let generation = self.shared.begin();
        let task = Worker::<C, D> {
            shared: Arc::clone(&self.shared),
            inbound: Arc::clone(&self.inbound),
            endpoint,
            generation,
            codec: self.codec,
            conn: None,
            ending: Transition::Failed,
        };
        *worker = Some(tokio::spawn(task.run(Arc::clone(&self.connector))));
    }

    /// Closes the connection and releases the worker. Safe to call when
    /// already disconnected.
    pub async fn stop(&self) {
        let mut worker = self.worker.lock().await;
        self.shutdown(&mut worker).await;
    }

    /// `stop()` followed by `start(endpoint)`, atomically with respect to
    /// other lifecycle calls.
    pub async fn reconnect(&self, endpoint: Endpoint) {
        tracing::info!(url = %endpoint.url, "reconnecting");
        self.start(endpoint).await;
    }

    async fn shutdown(&self, worker: &mut Option<JoinHandle<()>>) {
        let (previous, conn) = self.shared.begin_close();

        if let Some(conn) = conn {
            let conn_id = conn.id();
            if let Err(e) = conn.close().await {
                tracing::debug!(%conn_id, error = %e, "close request failed");
            }
        }

        if let Some(mut handle) = worker.take() {
            // A connected worker exits once the close handshake finishes;
            // a connecting one is stuck in the dial, so abort it.
            let finished = previous.is_connected()
                && tokio::time::timeout(CLOSE_GRACE, &mut handle).await.is_ok();
            if !finished {
                handle.abort();
                let _ = handle.await;
            }
        }

        self.shared.finish_close();
        if previous.is_active() {
            tracing::info!("disconnected from message bus");
        }
    }

    /// Sends one envelope.
    ///
    /// Returns `false` without touching the socket when not `Connected`,
    /// and `false` when the transport rejects the frame. `true` means the
    /// frame was handed to the transport, not that the peer received it.
    pub async fn send(&self, envelope: &Envelope) -> bool {
        match self.try_send(envelope).await {
            Ok(()) => true,
            Err(e) if !self.is_connected() => {
                tracing::debug!(kind = %envelope.kind, error = %e, "envelope dropped");
                false
            }
            Err(e) => {
                tracing::warn!(kind = %envelope.kind, error = %e, "send failed");
                false
            }
        }
    }

    /// Like [`send`](Self::send), but says why the envelope did not go
    /// out.
    ///
    /// - [`BridgeError::Transport`] with `ConnectionClosed` when not
    ///   `Connected` (no socket I/O happens), or the transport's own error
    ///   when the socket rejects the frame.
    /// - [`BridgeError::Protocol`] when the envelope does not encode.
    pub async fn try_send(&self, envelope: &Envelope) -> Result<(), BridgeError> {
        let conn = self.shared.connected().ok_or_else(|| {
            TransportError::ConnectionClosed(format!("not connected ({})", self.state()))
        })?;
        let text = self.codec.encode(envelope)?;
        conn.send(&text).await?;
        tracing::trace!(
            conn_id = %conn.id(),
            total_id = %envelope.total_id,
            "envelope sent"
        );
        Ok(())
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// `true` only while `Connected`.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Id of the open socket, if any.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.shared.connection_id()
    }

    /// Waits until the state equals `target`. Returns `false` on timeout.
    pub async fn wait_for_state(&self, target: ConnectionState, limit: Duration) -> bool {
        let mut rx = self.shared.state_tx.subscribe();
        tokio::time::timeout(limit, rx.wait_for(|state| *state == target))
            .await
            .is_ok_and(|seen| seen.is_ok())
    }
}

impl<C: Connector, D: InboundHandler> Drop for ConnectionManager<C, D> {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.get_mut().take() {
            handle.abort();
        }
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Lifecycle tests against an in-memory connector.
    //!
    //! The mock counts how many connections are alive at once, which is
    //! what the single-socket rule is about.

    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    use grunichat_protocol::{Body, MessageKind};
    use tokio::sync::{Notify, mpsc};

    use super::*;

    const WAIT: Duration = Duration::from_secs(2);

    // -- Mock transport ---------------------------------------------------

    #[derive(Default)]
    struct Probe {
        live: AtomicUsize,
        max_live: AtomicUsize,
        opened: AtomicUsize,
        closes: AtomicUsize,
        next_id: AtomicU64,
        sent: Mutex<Vec<(ConnectionId, String)>>,
        inject: Mutex<Option<mpsc::UnboundedSender<Vec<u8>>>>,
        hangup: Mutex<Option<watch::Sender<bool>>>,
        /// When set, every send waits for one notification first.
        gate: Mutex<Option<Arc<Notify>>>,
    }

    impl Probe {
        fn sent(&self) -> Vec<(ConnectionId, String)> {
            self.sent.lock().unwrap().clone()
        }

        fn sent_envelopes(&self) -> Vec<Envelope> {
            self.sent()
                .iter()
                .map(|(_, text)| JsonCodec.decode(text.as_bytes()).unwrap())
                .collect()
        }

        fn inject(&self, frame: &str) {
            let inject = self.inject.lock().unwrap();
            inject
                .as_ref()
                .expect("a connection is open")
                .send(frame.as_bytes().to_vec())
                .unwrap();
        }

        /// Simulates the peer closing the current socket.
        fn peer_close(&self) {
            if let Some(tx) = self.hangup.lock().unwrap().as_ref() {
                tx.send_replace(true);
            }
        }
    }

    struct MockConnector {
        probe: Arc<Probe>,
        fail: bool,
        delay: Duration,
    }

    impl MockConnector {
        fn new(probe: &Arc<Probe>) -> Self {
            Self {
                probe: Arc::clone(probe),
                fail: false,
                delay: Duration::ZERO,
            }
        }
    }

    impl Connector for MockConnector {
        type Connection = MockConnection;

        async fn connect(&self, _url: &str) -> Result<MockConnection, TransportError> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(TransportError::ConnectFailed(std::io::Error::other(
                    "refused",
                )));
            }
            Ok(MockConnection::new(&self.probe))
        }
    }

    struct MockConnection {
        id: ConnectionId,
        probe: Arc<Probe>,
        frames: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
        closed_tx: watch::Sender<bool>,
        closed_rx: watch::Receiver<bool>,
    }

    impl MockConnection {
        fn new(probe: &Arc<Probe>) -> Self {
            let live = probe.live.fetch_add(1, Ordering::SeqCst) + 1;
            probe.max_live.fetch_max(live, Ordering::SeqCst);
            probe.opened.fetch_add(1, Ordering::SeqCst);

            let (tx, rx) = mpsc::unbounded_channel();
            let (closed_tx, closed_rx) = watch::channel(false);
            *probe.inject.lock().unwrap() = Some(tx);
            *probe.hangup.lock().unwrap() = Some(closed_tx.clone());

            Self {
                id: ConnectionId::new(probe.next_id.fetch_add(1, Ordering::SeqCst) + 1),
                probe: Arc::clone(probe),
                frames: tokio::sync::Mutex::new(rx),
                closed_tx,
                closed_rx,
            }
        }
    }

    impl Drop for MockConnection {
        fn drop(&mut self) {
            self.probe.live.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl Connection for MockConnection {
        async fn send(&self, text: &str) -> Result<(), TransportError> {
            let gate = self.probe.gate.lock().unwrap().clone();
            if let Some(gate) = gate {
                gate.notified().await;
            }
            if *self.closed_rx.borrow() {
                return Err(TransportError::ConnectionClosed("closed".into()));
            }
            self.probe.sent.lock().unwrap().push((self.id, text.to_owned()));
            Ok(())
        }

        async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
            let mut closed = self.closed_rx.clone();
            let mut frames = self.frames.lock().await;
            tokio::select! {
                frame = frames.recv() => Ok(frame),
                _ = closed.changed() => Ok(None),
            }
        }

        async fn close(&self) -> Result<(), TransportError> {
            self.probe.closes.fetch_add(1, Ordering::SeqCst);
            self.closed_tx.send_replace(true);
            Ok(())
        }

        fn id(&self) -> ConnectionId {
            self.id
        }
    }

    /// Records frames; panics on a frame equal to `"boom"`.
    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<Vec<u8>>>,
    }

    impl InboundHandler for Recorder {
        fn on_frame(&self, data: &[u8]) {
            if data == b"boom" {
                panic!("handler blew up");
            }
            self.frames.lock().unwrap().push(data.to_vec());
        }
    }

    // -- Helpers ----------------------------------------------------------

    fn endpoint(id: &str) -> Endpoint {
        Endpoint {
            url: "ws://bus.test/ws".into(),
            plugin_id: id.into(),
        }
    }

    fn manager(
        connector: MockConnector,
    ) -> (ConnectionManager<MockConnector, Recorder>, Arc<Recorder>, Arc<StatsTracker>) {
        let recorder = Arc::new(Recorder::default());
        let stats = Arc::new(StatsTracker::new());
        let mgr = ConnectionManager::new(connector, Arc::clone(&recorder), Arc::clone(&stats));
        (mgr, recorder, stats)
    }

    fn event_envelope() -> Envelope {
        Envelope::compose(
            MessageKind::Event,
            Body {
                event_detail: "x".into(),
                ..Body::default()
            },
            "a",
        )
    }

    // =====================================================================
    // send()
    // =====================================================================

    #[tokio::test]
    async fn test_send_while_disconnected_returns_false_without_io() {
        let probe = Arc::new(Probe::default());
        let (mgr, _, _) = manager(MockConnector::new(&probe));

        assert!(!mgr.send(&event_envelope()).await);
        assert!(probe.sent().is_empty());
        assert_eq!(probe.opened.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_try_send_while_disconnected_is_transport_error() {
        let probe = Arc::new(Probe::default());
        let (mgr, _, _) = manager(MockConnector::new(&probe));

        let err = mgr.try_send(&event_envelope()).await.unwrap_err();

        assert!(matches!(
            err,
            BridgeError::Transport(TransportError::ConnectionClosed(_))
        ));
        assert!(err.to_string().contains("Disconnected"));
        assert!(probe.sent().is_empty());
    }

    #[tokio::test]
    async fn test_try_send_while_connected_succeeds() {
        let probe = Arc::new(Probe::default());
        let (mgr, _, _) = manager(MockConnector::new(&probe));
        mgr.start(endpoint("a")).await;
        assert!(mgr.wait_for_state(ConnectionState::Connected, WAIT).await);

        mgr.try_send(&event_envelope()).await.unwrap();

        assert_eq!(probe.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_send_while_connected_reaches_transport() {
        let probe = Arc::new(Probe::default());
        let (mgr, _, _) = manager(MockConnector::new(&probe));
        mgr.start(endpoint("a")).await;
        assert!(mgr.wait_for_state(ConnectionState::Connected, WAIT).await);

        assert!(mgr.send(&event_envelope()).await);

        let sent = probe.sent_envelopes();
        assert_eq!(sent.len(), 2, "hello + event");
        assert_eq!(sent[1].body.event_detail, "x");
    }

    #[tokio::test]
    async fn test_send_while_connecting_returns_false() {
        let probe = Arc::new(Probe::default());
        let connector = MockConnector {
            delay: Duration::from_secs(30),
            ..MockConnector::new(&probe)
        };
        let (mgr, _, _) = manager(connector);
        mgr.start(endpoint("a")).await;

        assert_eq!(mgr.state(), ConnectionState::Connecting);
        assert!(!mgr.send(&event_envelope()).await);
    }

    // =====================================================================
    // start() / hello
    // =====================================================================

    #[tokio::test]
    async fn test_start_sends_hello_first() {
        let probe = Arc::new(Probe::default());
        let (mgr, _, stats) = manager(MockConnector::new(&probe));

        mgr.start(endpoint("bridgeA")).await;
        assert!(mgr.wait_for_state(ConnectionState::Connected, WAIT).await);

        let sent = probe.sent_envelopes();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, MessageKind::Hello);
        assert_eq!(sent[0].from, "bridgeA");
        assert_eq!(sent[0].body.event_detail, "[bridgeA] Plugin bridgeA connected");
        assert!(stats.snapshot().is_connected);
        assert!(mgr.connection_id().is_some());
    }

    #[tokio::test]
    async fn test_start_publishes_connected_only_after_hello() {
        let probe = Arc::new(Probe::default());
        let gate = Arc::new(Notify::new());
        *probe.gate.lock().unwrap() = Some(Arc::clone(&gate));
        let (mgr, _, _) = manager(MockConnector::new(&probe));

        mgr.start(endpoint("a")).await;
        tokio::time::timeout(WAIT, async {
            while probe.opened.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("dial should finish");

        // Socket is open but the hello is held back.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(mgr.state(), ConnectionState::Connecting);
        assert!(!mgr.send(&event_envelope()).await);

        *probe.gate.lock().unwrap() = None;
        gate.notify_one();
        assert!(mgr.wait_for_state(ConnectionState::Connected, WAIT).await);

        assert!(mgr.send(&event_envelope()).await);
        let sent = probe.sent_envelopes();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].kind, MessageKind::Hello);
        assert_eq!(sent[1].kind, MessageKind::Event);
    }

    #[tokio::test]
    async fn test_start_failure_returns_to_disconnected_and_can_restart() {
        let probe = Arc::new(Probe::default());
        let connector = MockConnector {
            fail: true,
            ..MockConnector::new(&probe)
        };
        let (mgr, _, stats) = manager(connector);

        mgr.start(endpoint("a")).await;
        assert!(mgr.wait_for_state(ConnectionState::Disconnected, WAIT).await);
        assert!(!stats.snapshot().is_connected);

        // Recovery is just another start.
        mgr.start(endpoint("a")).await;
        assert!(mgr.wait_for_state(ConnectionState::Disconnected, WAIT).await);
    }

    // =====================================================================
    // stop()
    // =====================================================================

    #[tokio::test]
    async fn test_stop_closes_socket_and_is_idempotent() {
        let probe = Arc::new(Probe::default());
        let (mgr, _, _) = manager(MockConnector::new(&probe));
        mgr.start(endpoint("a")).await;
        assert!(mgr.wait_for_state(ConnectionState::Connected, WAIT).await);

        mgr.stop().await;
        assert_eq!(mgr.state(), ConnectionState::Disconnected);
        assert_eq!(probe.live.load(Ordering::SeqCst), 0);
        assert_eq!(probe.closes.load(Ordering::SeqCst), 1);

        mgr.stop().await;
        assert_eq!(mgr.state(), ConnectionState::Disconnected);
        assert!(!mgr.send(&event_envelope()).await);
    }

    #[tokio::test]
    async fn test_stop_while_connecting_aborts_dial() {
        let probe = Arc::new(Probe::default());
        let connector = MockConnector {
            delay: Duration::from_secs(30),
            ..MockConnector::new(&probe)
        };
        let (mgr, _, _) = manager(connector);
        mgr.start(endpoint("a")).await;

        tokio::time::timeout(WAIT, mgr.stop())
            .await
            .expect("stop must not wait for the dial");
        assert_eq!(mgr.state(), ConnectionState::Disconnected);
        assert_eq!(probe.opened.load(Ordering::SeqCst), 0);
    }

    // =====================================================================
    // reconnect()
    // =====================================================================

    #[tokio::test]
    async fn test_reconnect_replaces_socket_and_announces_new_identity() {
        let probe = Arc::new(Probe::default());
        let (mgr, _, _) = manager(MockConnector::new(&probe));
        mgr.start(endpoint("oldId")).await;
        assert!(mgr.wait_for_state(ConnectionState::Connected, WAIT).await);
        let first = mgr.connection_id().unwrap();

        mgr.reconnect(endpoint("newId")).await;
        assert!(mgr.wait_for_state(ConnectionState::Connected, WAIT).await);
        let second = mgr.connection_id().unwrap();

        assert_ne!(first, second);
        assert_eq!(probe.opened.load(Ordering::SeqCst), 2);
        assert_eq!(probe.live.load(Ordering::SeqCst), 1);
        assert_eq!(probe.max_live.load(Ordering::SeqCst), 1);

        let sent = probe.sent();
        let (last_conn, last_text) = sent.last().unwrap();
        let hello = JsonCodec.decode(last_text.as_bytes()).unwrap();
        assert_eq!(*last_conn, second);
        assert_eq!(hello.kind, MessageKind::Hello);
        assert_eq!(hello.from, "newId");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_lifecycle_calls_never_open_two_sockets() {
        let probe = Arc::new(Probe::default());
        let (mgr, _, _) = manager(MockConnector {
            delay: Duration::from_millis(1),
            ..MockConnector::new(&probe)
        });
        let mgr = Arc::new(mgr);

        let tasks: Vec<_> = (0..24)
            .map(|i| {
                let mgr = Arc::clone(&mgr);
                tokio::spawn(async move {
                    match i % 3 {
                        0 => mgr.start(endpoint("a")).await,
                        1 => mgr.stop().await,
                        _ => mgr.reconnect(endpoint("b")).await,
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        mgr.stop().await;
        assert!(probe.max_live.load(Ordering::SeqCst) <= 1);
        assert_eq!(probe.live.load(Ordering::SeqCst), 0);
        assert_eq!(mgr.state(), ConnectionState::Disconnected);
    }

    // =====================================================================
    // Inbound path
    // =====================================================================

    #[tokio::test]
    async fn test_inbound_frames_reach_handler_in_order() {
        let probe = Arc::new(Probe::default());
        let (mgr, recorder, _) = manager(MockConnector::new(&probe));
        mgr.start(endpoint("a")).await;
        assert!(mgr.wait_for_state(ConnectionState::Connected, WAIT).await);

        probe.inject("one");
        probe.inject("two");

        tokio::time::timeout(WAIT, async {
            while recorder.frames.lock().unwrap().len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("frames should arrive");
        let frames = recorder.frames.lock().unwrap().clone();
        assert_eq!(frames, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[tokio::test]
    async fn test_peer_close_returns_to_disconnected_without_retry() {
        let probe = Arc::new(Probe::default());
        let (mgr, _, _) = manager(MockConnector::new(&probe));
        mgr.start(endpoint("a")).await;
        assert!(mgr.wait_for_state(ConnectionState::Connected, WAIT).await);

        probe.peer_close();

        assert!(mgr.wait_for_state(ConnectionState::Disconnected, WAIT).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(probe.opened.load(Ordering::SeqCst), 1, "no automatic retry");
        assert_eq!(probe.live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_handler_panic_leaves_manager_restartable() {
        let probe = Arc::new(Probe::default());
        let (mgr, _, _) = manager(MockConnector::new(&probe));
        mgr.start(endpoint("a")).await;
        assert!(mgr.wait_for_state(ConnectionState::Connected, WAIT).await);

        probe.inject("boom");
        assert!(mgr.wait_for_state(ConnectionState::Disconnected, WAIT).await);

        mgr.start(endpoint("a")).await;
        assert!(mgr.wait_for_state(ConnectionState::Connected, WAIT).await);
        assert_eq!(probe.live.load(Ordering::SeqCst), 1);
    }
}
