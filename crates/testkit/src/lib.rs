//! Shared test fixtures: sample trace builders and an in-process mock
//! gateway exposing the history route and the trace push stream.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{TimeZone, Utc};
use gatescope_core::model;
use gatescope_core::model::span::Span;
use gatescope_core::model::trace::Trace;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

pub fn unique_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// A two-span trace: core root fanning out to one Postgres call.
pub fn sample_trace(id: &str) -> Trace {
    let base = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
    let start = base.timestamp_millis();

    let child = Span {
        id: format!("{id}-1"),
        name: "query users".to_string(),
        kind: model::KIND_TOOL.to_string(),
        service_name: Some("Postgres".to_string()),
        start_time: start + 5,
        end_time: start + 17,
        status: "success".to_string(),
        input: None,
        output: None,
        error_message: None,
        children: Vec::new(),
    };
    let root = Span {
        id: format!("{id}-0"),
        name: "handle request".to_string(),
        kind: model::KIND_CORE.to_string(),
        service_name: None,
        start_time: start,
        end_time: start + 30,
        status: "success".to_string(),
        input: None,
        output: None,
        error_message: None,
        children: vec![child],
    };

    Trace {
        id: id.to_string(),
        timestamp: base,
        total_duration: 30,
        status: "success".to_string(),
        trigger: "webhook".to_string(),
        root_span: root,
    }
}

/// `sample_trace` with the aggregate and root status overridden, for
/// exercising replace-in-place on status transitions.
pub fn trace_with_status(id: &str, status: &str) -> Trace {
    let mut trace = sample_trace(id);
    trace.status = status.to_string();
    trace.root_span.status = status.to_string();
    trace
}

#[derive(Clone)]
struct GatewayState {
    history: Arc<Mutex<Vec<Trace>>>,
    push_tx: broadcast::Sender<String>,
    connections: Arc<AtomicUsize>,
    close_immediately: Arc<AtomicBool>,
}

/// In-process stand-in for the gateway backend: `GET /api/traces` serves the
/// configured history and `/api/traces/ws` pushes one JSON trace per text
/// frame. Supports a close-immediately mode for reconnect tests and counts
/// accepted stream connections.
pub struct MockGateway {
    addr: SocketAddr,
    state: GatewayState,
    server: JoinHandle<()>,
}

impl MockGateway {
    pub async fn start() -> Self {
        let (push_tx, _) = broadcast::channel(64);
        let state = GatewayState {
            history: Arc::new(Mutex::new(Vec::new())),
            push_tx,
            connections: Arc::new(AtomicUsize::new(0)),
            close_immediately: Arc::new(AtomicBool::new(false)),
        };

        let app = Router::new()
            .route("/api/traces", get(list_traces))
            .route("/api/traces/ws", get(traces_ws))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock gateway listener");
        let addr = listener.local_addr().expect("mock gateway local addr");
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            addr,
            state,
            server,
        }
    }

    pub fn history_url(&self) -> String {
        format!("http://{}/api/traces", self.addr)
    }

    pub fn stream_url(&self) -> String {
        format!("ws://{}/api/traces/ws", self.addr)
    }

    pub fn set_history(&self, traces: Vec<Trace>) {
        *self.state.history.lock().expect("history lock") = traces;
    }

    /// Pushes one trace to every connected stream client.
    pub fn push(&self, trace: Trace) {
        let payload = serde_json::to_string(&trace).expect("encode trace");
        let _ = self.state.push_tx.send(payload);
    }

    /// Pushes an arbitrary text frame, for malformed-payload scenarios.
    pub fn push_raw(&self, payload: impl Into<String>) {
        let _ = self.state.push_tx.send(payload.into());
    }

    /// Total stream connections accepted so far.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// When set, every accepted stream connection is dropped right away.
    pub fn set_close_immediately(&self, close: bool) {
        self.state
            .close_immediately
            .store(close, Ordering::SeqCst);
    }
}

impl Drop for MockGateway {
    fn drop(&mut self) {
        self.server.abort();
    }
}

#[derive(serde::Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
}

async fn list_traces(
    Query(params): Query<HistoryParams>,
    State(state): State<GatewayState>,
) -> Json<Vec<Trace>> {
    let mut traces = state.history.lock().expect("history lock").clone();
    if let Some(limit) = params.limit {
        traces.truncate(limit);
    }
    Json(traces)
}

async fn traces_ws(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> impl IntoResponse {
    // Subscribe before the handshake completes so a push immediately after
    // the client connects is not missed.
    let rx = state.push_tx.subscribe();
    state.connections.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| stream_traces(socket, state, rx))
}

async fn stream_traces(
    mut socket: WebSocket,
    state: GatewayState,
    mut rx: broadcast::Receiver<String>,
) {
    if state.close_immediately.load(Ordering::SeqCst) {
        return;
    }

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
            pushed = rx.recv() => match pushed {
                Ok(payload) => {
                    if socket.send(Message::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}
