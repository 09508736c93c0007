//! Local stand-in for the Knock service.
//!
//! REST requests hit a fallback handler that records them and answers from a
//! queue of scripted responses. The websocket at `/ws/v1/websocket` speaks the
//! channel protocol: it answers heartbeats, joins, leaves and pushes, and
//! relays broadcasts to joined topics.

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use knock_client::protocol::{Frame, PHOENIX_TOPIC, events};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Topics with this prefix refuse joins.
pub const FORBIDDEN_PREFIX: &str = "private:";

/// Push event echoed back in the reply.
pub const ECHO_EVENT: &str = "ping";

/// Push event that never gets a reply.
pub const SILENT_EVENT: &str = "silent";

/// A REST request as seen by the mock.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Raw query string.
    pub query: Option<String>,
    /// Request headers, lowercased names.
    pub headers: HashMap<String, String>,
    /// Body parsed as JSON, if any.
    pub body: Option<Value>,
}

/// Scripted REST answer.
#[derive(Debug, Clone)]
pub enum Scripted {
    /// JSON body with status.
    Json(u16, Value),
    /// Plain text body with status.
    Text(u16, String),
    /// Empty body with status.
    Empty(u16),
}

#[derive(Default)]
struct MockState {
    responses: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<RecordedRequest>>,
    socket_connects: AtomicUsize,
    socket_queries: Mutex<Vec<HashMap<String, String>>>,
    frames: Mutex<Vec<Frame>>,
    broadcasts: Mutex<Option<broadcast::Sender<Frame>>>,
    kill: Mutex<Option<broadcast::Sender<()>>>,
}

impl MockState {
    fn broadcasts(&self) -> broadcast::Sender<Frame> {
        self.broadcasts
            .lock()
            .get_or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }

    fn kill(&self) -> broadcast::Sender<()> {
        self.kill
            .lock()
            .get_or_insert_with(|| broadcast::channel(4).0)
            .clone()
    }
}

/// Running mock service bound to a local port.
pub struct MockServer {
    addr: SocketAddr,
    state: Arc<MockState>,
}

impl MockServer {
    /// Binds to an ephemeral port and starts serving.
    ///
    /// # Errors
    /// Returns error if the listener cannot be bound.
    pub async fn start() -> anyhow::Result<Self> {
        let state = Arc::new(MockState::default());
        let app = Router::new()
            .route("/ws/v1/websocket", get(ws_handler))
            .fallback(record_request)
            .with_state(Arc::clone(&state))
            .layer(TraceLayer::new_for_http());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        info!(%addr, "mock service listening");

        Ok(Self { addr, state })
    }

    /// Base URL to configure the client with.
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Queues a JSON response.
    pub fn respond_json(&self, status: u16, body: Value) {
        self.state
            .responses
            .lock()
            .push_back(Scripted::Json(status, body));
    }

    /// Queues a scripted response.
    pub fn respond(&self, scripted: Scripted) {
        self.state.responses.lock().push_back(scripted);
    }

    /// Queues the same status `count` times.
    pub fn respond_status_times(&self, status: u16, count: usize) {
        let mut responses = self.state.responses.lock();
        for _ in 0..count {
            responses.push_back(Scripted::Json(status, json!({"code": status})));
        }
    }

    /// REST requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().clone()
    }

    /// Number of REST requests received.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.state.requests.lock().len()
    }

    /// Number of websocket upgrades accepted.
    #[must_use]
    pub fn socket_connects(&self) -> usize {
        self.state.socket_connects.load(Ordering::SeqCst)
    }

    /// Query parameters of every websocket upgrade.
    #[must_use]
    pub fn socket_queries(&self) -> Vec<HashMap<String, String>> {
        self.state.socket_queries.lock().clone()
    }

    /// Channel frames received from clients.
    #[must_use]
    pub fn received_frames(&self) -> Vec<Frame> {
        self.state.frames.lock().clone()
    }

    /// Sends an event to every connection that joined `topic`.
    pub fn broadcast(&self, topic: &str, event: &str, payload: Value) {
        let _ = self
            .state
            .broadcasts()
            .send(Frame::new(None, None, topic, event, payload));
    }

    /// Drops every open websocket without a close handshake.
    pub fn drop_sockets(&self) {
        let _ = self.state.kill().send(());
    }
}

async fn record_request(
    State(state): State<Arc<MockState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let recorded = RecordedRequest {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers: headers
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect(),
        body: serde_json::from_slice(&body).ok(),
    };
    debug!(method = %recorded.method, path = %recorded.path, "mock request");
    state.requests.lock().push(recorded);

    let scripted = state
        .responses
        .lock()
        .pop_front()
        .unwrap_or_else(|| Scripted::Json(200, json!({"ok": true})));

    match scripted {
        Scripted::Json(status, body) => (status_code(status), Json(body)).into_response(),
        Scripted::Text(status, text) => (status_code(status), text).into_response(),
        Scripted::Empty(status) => status_code(status).into_response(),
    }
}

fn status_code(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<MockState>>,
) -> impl IntoResponse {
    state.socket_connects.fetch_add(1, Ordering::SeqCst);
    state.socket_queries.lock().push(params);
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<MockState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut broadcasts = state.broadcasts().subscribe();
    let mut kill = state.kill().subscribe();
    let mut joined: HashMap<String, Option<String>> = HashMap::new();

    loop {
        tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let Ok(frame) = Frame::decode(text.as_str()) else {
                        continue;
                    };
                    state.frames.lock().push(frame.clone());
                    if let Some(reply) = respond(&frame, &mut joined)
                        && let Ok(json) = reply.encode()
                        && sender.send(Message::Text(json.into())).await.is_err()
                    {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            frame = broadcasts.recv() => match frame {
                Ok(frame) => {
                    if joined.contains_key(&frame.topic)
                        && let Ok(json) = frame.encode()
                        && sender.send(Message::Text(json.into())).await.is_err()
                    {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = kill.recv() => {
                debug!("mock dropping socket");
                return;
            }
        }
    }
    debug!("mock socket closed");
}

fn respond(frame: &Frame, joined: &mut HashMap<String, Option<String>>) -> Option<Frame> {
    let reply = |status: &str, response: Value| {
        Some(Frame::new(
            frame.join_ref.clone(),
            frame.reference.clone(),
            frame.topic.clone(),
            events::REPLY,
            json!({"status": status, "response": response}),
        ))
    };

    if frame.topic == PHOENIX_TOPIC && frame.event == events::HEARTBEAT {
        return reply("ok", json!({}));
    }

    match frame.event.as_str() {
        events::JOIN if frame.topic.starts_with(FORBIDDEN_PREFIX) => {
            reply("error", json!({"reason": "unauthorized"}))
        }
        events::JOIN => {
            joined.insert(frame.topic.clone(), frame.join_ref.clone());
            reply("ok", json!({"topic": frame.topic}))
        }
        events::LEAVE => {
            joined.remove(&frame.topic);
            reply("ok", json!({}))
        }
        ECHO_EVENT => reply("ok", frame.payload.clone()),
        SILENT_EVENT => None,
        _ => reply("ok", json!({})),
    }
}
