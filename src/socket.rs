//! Real-time socket connection carrying channel subscriptions.
//!
//! A [`Socket`] owns at most one background driver task. The driver connects
//! with `tokio-tungstenite`, keeps the connection alive with heartbeats,
//! reconnects after the connection is lost, and routes inbound frames to the
//! channels that joined them.

use crate::channel::{Channel, ChannelState, Membership};
use crate::error::Error;
use crate::protocol::{self, Frame, Reply, events};
use futures_util::{Sink, SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};
use url::Url;


/// Path appended to the websocket host.
pub const SOCKET_PATH: &str = "/ws/v1";

/// Transport segment appended to the endpoint when connecting.
const TRANSPORT_PATH: &str = "/websocket";

/// Reconnect delays in milliseconds; the last step repeats as 5 s.
const RECONNECT_STEPS_MS: [u64; 9] = [10, 50, 100, 150, 200, 250, 500, 1000, 2000];

/// Derives the socket endpoint from an API host.
///
/// The first `http` in the host becomes `ws`, so `https://` maps to `wss://`.
#[must_use]
pub fn socket_endpoint(host: &str) -> String {
    format!(
        "{}{}",
        host.trim_end_matches('/').replacen("http", "ws", 1),
        SOCKET_PATH
    )
}

/// Delay before reconnect attempt `tries` (1-based).
#[must_use]
pub fn reconnect_after(tries: u32) -> Duration {
    let index = tries.saturating_sub(1) as usize;
    Duration::from_millis(RECONNECT_STEPS_MS.get(index).copied().unwrap_or(5000))
}

/// Socket tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketOptions {
    /// Interval between heartbeats.
    pub heartbeat_interval: Duration,
    /// How long a push waits for its reply.
    pub push_timeout: Duration,
    /// Whether to reconnect after the connection is lost.
    pub reconnect: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            push_timeout: Duration::from_secs(10),
            reconnect: true,
        }
    }
}

/// Observable connection state of the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and none in progress.
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// The connection is open.
    Connected,
}

/// Completes once the socket opens after the signal was created.
#[derive(Debug)]
pub struct OpenSignal {
    rx: watch::Receiver<u64>,
}

impl OpenSignal {
    /// Waits for the next successful open.
    ///
    /// Returns `false` if the socket was dropped first.
    pub async fn opened(mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}

/// Reply waiter registered under a message ref.
pub(crate) enum PendingReply {
    /// A caller awaiting the reply.
    Caller(oneshot::Sender<Reply>),
    /// A background rejoin after reconnect.
    Rejoin(Arc<Membership>),
}

/// State shared between socket handles and the driver task.
pub(crate) struct Shared {
    state: Mutex<ConnectionState>,
    refs: AtomicU64,
    channel_ids: AtomicU64,
    routes: Mutex<HashMap<u64, Arc<Membership>>>,
    pending: Mutex<HashMap<String, PendingReply>>,
    opened: watch::Sender<u64>,
    outbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Frame>>,
}

struct DriverHandle {
    shutdown: oneshot::Sender<()>,
}

struct Inner {
    endpoint: String,
    transport_url: Url,
    options: SocketOptions,
    outbound: mpsc::UnboundedSender<Frame>,
    driver: Mutex<Option<DriverHandle>>,
    shared: Arc<Shared>,
}

/// Handle to the socket connection. Clones share the same connection.
#[derive(Clone)]
pub struct Socket {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("endpoint", &self.inner.endpoint)
            .field("state", &self.connection_state())
            .finish()
    }
}

impl Socket {
    /// Creates a socket for `endpoint` with connection parameters. Nothing is
    /// connected until [`Socket::connect`] is called.
    ///
    /// # Errors
    /// Returns error if the endpoint or parameters do not form a valid URL.
    pub fn new(
        endpoint: impl Into<String>,
        params: &[(&str, &str)],
        options: SocketOptions,
    ) -> Result<Self, Error> {
        let endpoint = endpoint.into();
        let mut query: Vec<(&str, &str)> = params.to_vec();
        query.push(("vsn", protocol::VSN));
        let transport_url = Url::parse(&format!(
            "{}{}?{}",
            endpoint,
            TRANSPORT_PATH,
            serde_urlencoded::to_string(&query)?
        ))?;

        let (tx, rx) = mpsc::unbounded_channel();
        let (opened, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            state: Mutex::new(ConnectionState::Disconnected),
            refs: AtomicU64::new(0),
            channel_ids: AtomicU64::new(0),
            routes: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            opened,
            outbound: tokio::sync::Mutex::new(rx),
        });

        Ok(Self {
            inner: Arc::new(Inner {
                endpoint,
                transport_url,
                options,
                outbound: tx,
                driver: Mutex::new(None),
                shared,
            }),
        })
    }

    /// Endpoint the socket connects to, without transport path or query.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Full URL used for the websocket handshake.
    #[must_use]
    pub fn transport_url(&self) -> &Url {
        &self.inner.transport_url
    }

    /// Socket options.
    #[must_use]
    pub fn options(&self) -> &SocketOptions {
        &self.inner.options
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.shared.state.lock()
    }

    /// Returns true while the connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Returns a signal completing on the next successful open.
    #[must_use]
    pub fn on_open(&self) -> OpenSignal {
        OpenSignal {
            rx: self.inner.shared.opened.subscribe(),
        }
    }

    /// Starts the connection driver. Returns immediately; a no-op while a
    /// driver is already running.
    ///
    /// # Errors
    /// Returns `Error::NoRuntime` outside a Tokio runtime.
    pub fn connect(&self) -> Result<(), Error> {
        let mut driver = self.inner.driver.lock();
        if driver.as_ref().is_some_and(|d| !d.shutdown.is_closed()) {
            return Ok(());
        }
        let handle = tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime)?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        *self.inner.shared.state.lock() = ConnectionState::Connecting;
        handle.spawn(run_driver(
            Arc::clone(&self.inner.shared),
            self.inner.transport_url.clone(),
            self.inner.options,
            shutdown_rx,
        ));
        *driver = Some(DriverHandle {
            shutdown: shutdown_tx,
        });
        debug!(endpoint = %self.inner.endpoint, "socket driver started");
        Ok(())
    }

    /// Asks the driver to close the connection and stop. Returns immediately.
    pub fn disconnect(&self) {
        if let Some(driver) = self.inner.driver.lock().take() {
            let _ = driver.shutdown.send(());
        }
    }

    /// Creates a channel handle for `topic`.
    #[must_use]
    pub fn channel(&self, topic: impl Into<String>, params: Option<Value>) -> Channel {
        let id = self.inner.shared.channel_ids.fetch_add(1, Ordering::Relaxed) + 1;
        Channel::new(
            self.clone(),
            id,
            topic.into(),
            params.unwrap_or_else(|| Value::Object(Default::default())),
        )
    }

    pub(crate) fn make_ref(&self) -> String {
        self.inner.shared.make_ref()
    }

    pub(crate) fn register(&self, membership: Arc<Membership>) {
        self.inner
            .shared
            .routes
            .lock()
            .insert(membership.id(), membership);
    }

    pub(crate) fn unregister(&self, id: u64) {
        self.inner.shared.routes.lock().remove(&id);
    }

    #[cfg(test)]
    pub(crate) fn is_registered(&self, id: u64) -> bool {
        self.inner.shared.routes.lock().contains_key(&id)
    }

    /// Queues `frame` and waits for its reply. The pending entry is removed
    /// however the wait ends, including when the caller drops the future.
    pub(crate) async fn request(&self, frame: Frame) -> Result<Reply, Error> {
        let reference = frame.reference.clone().unwrap_or_else(|| self.make_ref());
        let frame = Frame {
            reference: Some(reference.clone()),
            ..frame
        };
        let topic = frame.topic.clone();
        let event = frame.event.clone();

        let (tx, rx) = oneshot::channel();
        let pending = PendingGuard::register(&self.inner.shared, reference, tx);

        if self.inner.outbound.send(frame).is_err() {
            return Err(Error::ConnectionClosed);
        }

        let result = match tokio::time::timeout(self.inner.options.push_timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::ConnectionClosed),
            Err(_) => Err(Error::Timeout { topic, event }),
        };
        drop(pending);
        result
    }
}

/// Removes a caller's pending reply entry when dropped.
struct PendingGuard<'a> {
    shared: &'a Shared,
    reference: String,
}

impl<'a> PendingGuard<'a> {
    fn register(shared: &'a Shared, reference: String, tx: oneshot::Sender<Reply>) -> Self {
        shared
            .pending
            .lock()
            .insert(reference.clone(), PendingReply::Caller(tx));
        Self { shared, reference }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.pending.lock().remove(&self.reference);
    }
}

impl Shared {
    fn make_ref(&self) -> String {
        (self.refs.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    fn memberships(&self) -> Vec<Arc<Membership>> {
        self.routes.lock().values().cloned().collect()
    }

    /// Routes an inbound frame to its reply waiter or to member channels.
    fn dispatch(&self, frame: Frame) {
        if frame.event == events::REPLY {
            let pending = frame
                .reference
                .as_ref()
                .and_then(|r| self.pending.lock().remove(r));
            match pending {
                Some(PendingReply::Caller(tx)) => {
                    let reply = frame.reply().unwrap_or_else(malformed_reply);
                    let _ = tx.send(reply);
                }
                Some(PendingReply::Rejoin(membership)) => {
                    let reply = frame.reply().unwrap_or_else(malformed_reply);
                    membership.rejoined(&reply);
                }
                None => debug!(topic = %frame.topic, "unmatched reply"),
            }
            return;
        }

        for membership in self.memberships() {
            if membership.is_member(&frame) {
                membership.deliver(&frame);
            }
        }
    }

    /// Builds join frames for channels that errored while the connection was
    /// down.
    fn rejoin_frames(&self) -> Vec<Frame> {
        let errored: Vec<Arc<Membership>> = self
            .memberships()
            .into_iter()
            .filter(|m| m.state() == ChannelState::Errored)
            .collect();

        let mut frames = Vec::with_capacity(errored.len());
        for membership in errored {
            let reference = self.make_ref();
            membership.begin_join(reference.clone());
            frames.push(membership.join_frame(reference.clone()));
            self.pending
                .lock()
                .insert(reference, PendingReply::Rejoin(membership));
        }
        frames
    }

    /// Marks joined channels errored and fails outstanding replies.
    fn connection_lost(&self) {
        for membership in self.memberships() {
            membership.connection_lost();
        }
        self.pending.lock().clear();
    }

    fn is_stale_join(&self, frame: &Frame) -> bool {
        frame.event == events::JOIN
            && frame
                .reference
                .as_ref()
                .is_none_or(|r| !self.pending.lock().contains_key(r))
    }
}

fn malformed_reply() -> Reply {
    Reply {
        status: "error".to_string(),
        response: Value::String("malformed reply".to_string()),
    }
}

enum SessionEnd {
    Shutdown,
    Lost,
}

async fn run_driver(
    shared: Arc<Shared>,
    url: Url,
    options: SocketOptions,
    mut shutdown: oneshot::Receiver<()>,
) {
    // A previous driver may still be closing; it releases the queue on exit.
    let mut outbound = tokio::select! {
        _ = &mut shutdown => {
            shared.set_state(ConnectionState::Disconnected);
            return;
        }
        guard = shared.outbound.lock() => guard,
    };

    let mut tries = 0u32;
    loop {
        shared.set_state(ConnectionState::Connecting);
        let connected = tokio::select! {
            _ = &mut shutdown => break,
            result = connect_async(url.as_str()) => result,
        };

        match connected {
            Ok((stream, _)) => {
                tries = 0;
                shared.set_state(ConnectionState::Connected);
                info!(host = ?url.host_str(), "socket connected");
                shared.opened.send_modify(|opens| *opens += 1);

                let end =
                    run_session(&shared, stream, &mut outbound, &mut shutdown, &options).await;
                shared.connection_lost();
                match end {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Lost => warn!("socket connection lost"),
                }
            }
            Err(err) => warn!(error = %err, "socket connection failed"),
        }

        shared.set_state(ConnectionState::Disconnected);
        if !options.reconnect {
            break;
        }
        tries += 1;
        let delay = reconnect_after(tries);
        debug!(tries, ?delay, "scheduling socket reconnect");
        tokio::select! {
            _ = &mut shutdown => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    shared.connection_lost();
    shared.set_state(ConnectionState::Disconnected);
    info!("socket disconnected");
}

async fn run_session<S>(
    shared: &Shared,
    stream: S,
    outbound: &mut mpsc::UnboundedReceiver<Frame>,
    shutdown: &mut oneshot::Receiver<()>,
    options: &SocketOptions,
) -> SessionEnd
where
    S: Sink<Message, Error = tungstenite::Error>
        + futures_util::Stream<Item = Result<Message, tungstenite::Error>>
        + Unpin,
{
    let (mut write, mut read) = stream.split();

    for frame in shared.rejoin_frames() {
        if send_frame(&mut write, &frame).await.is_err() {
            return SessionEnd::Lost;
        }
    }

    let mut heartbeat = tokio::time::interval_at(
        tokio::time::Instant::now() + options.heartbeat_interval,
        options.heartbeat_interval,
    );
    let mut pending_heartbeat: Option<String> = None;

    loop {
        tokio::select! {
            _ = &mut *shutdown => {
                let _ = write.send(Message::Close(None)).await;
                return SessionEnd::Shutdown;
            }
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if shared.is_stale_join(&frame) {
                        debug!(topic = %frame.topic, "dropping stale join");
                        continue;
                    }
                    if send_frame(&mut write, &frame).await.is_err() {
                        return SessionEnd::Lost;
                    }
                }
                None => return SessionEnd::Shutdown,
            },
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let frame = match Frame::decode(text.as_str()) {
                        Ok(frame) => frame,
                        Err(err) => {
                            warn!(error = %err, "discarding undecodable frame");
                            continue;
                        }
                    };
                    if frame.topic == protocol::PHOENIX_TOPIC
                        && frame.event == events::REPLY
                        && frame.reference.is_some()
                        && frame.reference == pending_heartbeat
                    {
                        pending_heartbeat = None;
                        continue;
                    }
                    shared.dispatch(frame);
                }
                Some(Ok(Message::Close(close))) => {
                    info!(?close, "socket closed by server");
                    return SessionEnd::Lost;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(error = %err, "socket read failed");
                    return SessionEnd::Lost;
                }
                None => return SessionEnd::Lost,
            },
            _ = heartbeat.tick() => {
                if pending_heartbeat.take().is_some() {
                    warn!("heartbeat timeout, closing connection");
                    let _ = write.send(Message::Close(None)).await;
                    return SessionEnd::Lost;
                }
                let reference = shared.make_ref();
                pending_heartbeat = Some(reference.clone());
                if send_frame(&mut write, &Frame::heartbeat(reference)).await.is_err() {
                    return SessionEnd::Lost;
                }
            }
        }
    }
}

async fn send_frame<W>(write: &mut W, frame: &Frame) -> Result<(), Error>
where
    W: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let text = match frame.encode() {
        Ok(text) => text,
        Err(err) => {
            warn!(
                topic = %frame.topic,
                event = %frame.event,
                error = %err,
                "dropping unencodable frame"
            );
            return Ok(());
        }
    };
    debug!(topic = %frame.topic, event = %frame.event, "sending frame");
    write
        .send(Message::Text(text.into()))
        .await
        .map_err(|e| Error::from(Box::new(e)))
}
