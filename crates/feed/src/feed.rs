//! The trace feed: one owning actor per gateway session that fetches the
//! historical trace collection, keeps a reconnecting WebSocket stream alive,
//! and reconciles pushed records into the collection keyed by trace id.

use std::pin::Pin;
use std::time::Duration;

use futures::StreamExt;
use gatescope_core::config::Config;
use gatescope_core::error::{GatescopeError, Result};
use gatescope_core::model::trace::Trace;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Sleep};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct FeedOptions {
    pub history_url: String,
    pub stream_url: String,
    /// Start with incoming live messages parsed but not applied.
    pub initial_paused: bool,
    /// Perform the one-shot REST fetch alongside opening the stream.
    pub fetch_history: bool,
    /// Fixed delay between reconnect attempts. No backoff, no retry cap;
    /// the feed keeps dialing until shut down.
    pub reconnect_delay: Duration,
    pub request_timeout: Duration,
}

impl FeedOptions {
    pub fn new(history_url: impl Into<String>, stream_url: impl Into<String>) -> Self {
        Self {
            history_url: history_url.into(),
            stream_url: stream_url.into(),
            initial_paused: false,
            fetch_history: true,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            request_timeout: Duration::from_secs(10),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self {
            history_url: cfg.history_url.clone(),
            stream_url: cfg.stream_url.clone(),
            initial_paused: cfg.initial_paused,
            fetch_history: cfg.fetch_history,
            reconnect_delay: cfg.reconnect_delay,
            request_timeout: cfg.request_timeout,
        }
    }
}

/// Point-in-time view of the feed, published through a watch channel on
/// every mutation.
#[derive(Debug, Clone, Default)]
pub struct FeedSnapshot {
    /// Newest streamed traces first; history order preserved as fetched.
    pub traces: Vec<Trace>,
    pub loading: bool,
    pub connected: bool,
    pub paused: bool,
}

/// Discrete feed notifications, for consumers that want a live tail rather
/// than snapshot diffing.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Connected,
    Disconnected,
    HistoryLoaded(usize),
    Merged(Trace),
    Cleared,
}

enum Command {
    SetPaused(bool),
    Clear,
    Refresh,
    Shutdown,
}

/// Connection lifecycle. Teardown is terminal: once `TornDown`, the actor
/// stops processing events, so no late callback can mutate state.
enum ConnState {
    Idle,
    Connecting(JoinHandle<std::result::Result<WsStream, String>>),
    Open(WsStream),
    ClosedPendingReconnect(Pin<Box<Sleep>>),
    TornDown,
}

enum ConnEvent {
    Connected(WsStream),
    ConnectFailed(String),
    Text(String),
    StreamClosed(Option<String>),
    ReconnectDue,
}

pub struct TraceFeed;

impl TraceFeed {
    /// Spawns the owning actor and returns a cloneable handle plus an event
    /// receiver that predates the actor, so startup events such as
    /// `HistoryLoaded` cannot race past the caller. The actor tears down when
    /// `shutdown` is called or every handle is dropped.
    pub fn spawn(opts: FeedOptions) -> Result<(FeedHandle, broadcast::Receiver<FeedEvent>)> {
        let http = reqwest::Client::builder()
            .timeout(opts.request_timeout)
            .build()
            .map_err(|e| GatescopeError::Internal(format!("building http client: {e}")))?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = broadcast::channel(256);
        let snapshot = FeedSnapshot {
            paused: opts.initial_paused,
            ..FeedSnapshot::default()
        };
        let (state_tx, state_rx) = watch::channel(snapshot.clone());

        let actor = FeedActor {
            opts,
            http,
            cmd_rx,
            state_tx,
            events_tx: events_tx.clone(),
            snapshot,
            conn: ConnState::Idle,
            history: None,
        };
        tokio::spawn(actor.run());

        let handle = FeedHandle {
            cmd_tx,
            state_rx,
            events_tx,
        };
        Ok((handle, events_rx))
    }
}

#[derive(Clone)]
pub struct FeedHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<FeedSnapshot>,
    events_tx: broadcast::Sender<FeedEvent>,
}

impl FeedHandle {
    pub fn snapshot(&self) -> FeedSnapshot {
        self.state_rx.borrow().clone()
    }

    pub fn traces(&self) -> Vec<Trace> {
        self.state_rx.borrow().traces.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state_rx.borrow().loading
    }

    pub fn is_connected(&self) -> bool {
        self.state_rx.borrow().connected
    }

    pub fn is_paused(&self) -> bool {
        self.state_rx.borrow().paused
    }

    /// Change notification for snapshot consumers (list/detail views).
    pub fn watch(&self) -> watch::Receiver<FeedSnapshot> {
        self.state_rx.clone()
    }

    /// Discrete event stream for live-tail consumers.
    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.events_tx.subscribe()
    }

    /// Toggles application of incoming messages without touching the
    /// connection.
    pub fn set_paused(&self, paused: bool) {
        let _ = self.cmd_tx.send(Command::SetPaused(paused));
    }

    /// Empties the collection; the connection and any pending history fetch
    /// are unaffected.
    pub fn clear(&self) {
        let _ = self.cmd_tx.send(Command::Clear);
    }

    /// Clears the collection and re-runs the history fetch. Each call
    /// supersedes a prior in-flight fetch.
    pub fn refresh(&self) {
        let _ = self.cmd_tx.send(Command::Refresh);
    }

    /// Terminal: closes the stream, cancels any pending reconnect, and stops
    /// the actor.
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }
}

struct FeedActor {
    opts: FeedOptions,
    http: reqwest::Client,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<FeedSnapshot>,
    events_tx: broadcast::Sender<FeedEvent>,
    snapshot: FeedSnapshot,
    conn: ConnState,
    history: Option<JoinHandle<Result<Vec<Trace>>>>,
}

impl FeedActor {
    async fn run(mut self) {
        if self.opts.fetch_history {
            self.snapshot.loading = true;
            self.start_history_fetch();
        }
        self.start_connect();
        self.publish();

        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::SetPaused(paused)) => {
                        self.snapshot.paused = paused;
                        self.publish();
                    }
                    Some(Command::Clear) => {
                        self.snapshot.traces.clear();
                        self.publish();
                        self.emit(FeedEvent::Cleared);
                    }
                    Some(Command::Refresh) => self.handle_refresh(),
                    // A closed command channel means every handle is gone.
                    Some(Command::Shutdown) | None => {
                        self.teardown().await;
                        return;
                    }
                },
                result = history_done(&mut self.history) => self.handle_history(result),
                event = conn_event(&mut self.conn) => self.handle_conn_event(event),
            }
        }
    }

    fn handle_refresh(&mut self) {
        self.snapshot.loading = true;
        self.snapshot.traces.clear();
        self.start_history_fetch();
        self.publish();
    }

    fn handle_history(&mut self, result: Result<Vec<Trace>>) {
        match result {
            Ok(traces) => {
                // History is authoritative for the view: full replace, never
                // a merge.
                let count = traces.len();
                self.snapshot.traces = traces;
                self.emit(FeedEvent::HistoryLoaded(count));
            }
            Err(err) => {
                // Keep whatever we already have; only the loading flag moves.
                warn!(error = %err, "history fetch failed");
                self.snapshot.loading = false;
            }
        }

        match self.conn {
            ConnState::Open(_) => self.snapshot.loading = false,
            ConnState::Idle | ConnState::ClosedPendingReconnect(_) => self.start_connect(),
            ConnState::Connecting(_) | ConnState::TornDown => {}
        }
        self.publish();
    }

    fn handle_conn_event(&mut self, event: ConnEvent) {
        match event {
            ConnEvent::Connected(ws) => {
                debug!("trace stream open");
                self.conn = ConnState::Open(ws);
                self.snapshot.connected = true;
                // Stream liveness is a readiness signal whether or not a
                // history fetch was requested.
                self.snapshot.loading = false;
                self.publish();
                self.emit(FeedEvent::Connected);
            }
            ConnEvent::ConnectFailed(reason) => {
                warn!(%reason, "trace stream connect failed");
                self.schedule_reconnect();
            }
            ConnEvent::Text(text) => self.handle_text(text),
            ConnEvent::StreamClosed(reason) => {
                match reason {
                    Some(reason) => warn!(%reason, "trace stream lost"),
                    None => debug!("trace stream closed by server"),
                }
                self.snapshot.connected = false;
                self.publish();
                self.emit(FeedEvent::Disconnected);
                self.schedule_reconnect();
            }
            ConnEvent::ReconnectDue => self.start_connect(),
        }
    }

    fn handle_text(&mut self, text: String) {
        let trace = match serde_json::from_str::<Trace>(&text) {
            Ok(trace) => trace,
            Err(err) => {
                warn!(error = %err, "skipping malformed trace message");
                return;
            }
        };

        // Parse-then-discard while paused: the connection keeps flowing and
        // resume is instantaneous, with no backlog to replay.
        if self.snapshot.paused {
            return;
        }

        merge_trace(&mut self.snapshot.traces, trace.clone());
        self.publish();
        self.emit(FeedEvent::Merged(trace));
    }

    fn start_history_fetch(&mut self) {
        if let Some(previous) = self.history.take() {
            previous.abort();
        }
        let client = self.http.clone();
        let url = self.opts.history_url.clone();
        self.history = Some(tokio::spawn(fetch_history(client, url)));
    }

    fn start_connect(&mut self) {
        if matches!(self.conn, ConnState::TornDown) {
            return;
        }
        let url = self.opts.stream_url.clone();
        let task = tokio::spawn(async move {
            connect_async(url.as_str())
                .await
                .map(|(ws, _)| ws)
                .map_err(|e| e.to_string())
        });
        // Replacing the state drops any pending reconnect timer, so at most
        // one timer is ever outstanding.
        self.conn = ConnState::Connecting(task);
    }

    fn schedule_reconnect(&mut self) {
        self.conn =
            ConnState::ClosedPendingReconnect(Box::pin(time::sleep(self.opts.reconnect_delay)));
    }

    async fn teardown(&mut self) {
        if let Some(handle) = self.history.take() {
            handle.abort();
        }
        match std::mem::replace(&mut self.conn, ConnState::TornDown) {
            ConnState::Open(mut ws) => {
                let _ = ws.close(None).await;
            }
            ConnState::Connecting(task) => task.abort(),
            _ => {}
        }
        self.snapshot.connected = false;
        self.publish();
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.snapshot.clone());
    }

    fn emit(&self, event: FeedEvent) {
        // No receivers is fine; events are best-effort notifications.
        let _ = self.events_tx.send(event);
    }
}

/// Reconciles one pushed record into the collection. Same id replaces the
/// existing entry in place (a trace can be re-pushed with updated status);
/// an unseen id is prepended so freshly streamed items render newest-first.
fn merge_trace(traces: &mut Vec<Trace>, incoming: Trace) {
    if let Some(existing) = traces.iter_mut().find(|t| t.id == incoming.id) {
        *existing = incoming;
    } else {
        traces.insert(0, incoming);
    }
}

async fn fetch_history(client: reqwest::Client, url: String) -> Result<Vec<Trace>> {
    let response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| GatescopeError::Http(format!("history request failed: {e}")))?;
    let status = response.status();
    if !status.is_success() {
        return Err(GatescopeError::Http(format!(
            "history request returned {status}"
        )));
    }
    response
        .json::<Vec<Trace>>()
        .await
        .map_err(|e| GatescopeError::Parse(format!("history payload invalid: {e}")))
}

async fn history_done(task: &mut Option<JoinHandle<Result<Vec<Trace>>>>) -> Result<Vec<Trace>> {
    match task {
        Some(handle) => {
            let result = match handle.await {
                Ok(result) => result,
                Err(e) => Err(GatescopeError::Internal(format!(
                    "history fetch task failed: {e}"
                ))),
            };
            *task = None;
            result
        }
        None => std::future::pending().await,
    }
}

async fn conn_event(conn: &mut ConnState) -> ConnEvent {
    match conn {
        ConnState::Open(ws) => loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return ConnEvent::Text(text),
                Some(Ok(Message::Close(_))) => return ConnEvent::StreamClosed(None),
                // Ping/pong keepalives and anything non-text are transport
                // noise for this channel.
                Some(Ok(_)) => continue,
                Some(Err(e)) => return ConnEvent::StreamClosed(Some(e.to_string())),
                None => return ConnEvent::StreamClosed(None),
            }
        },
        ConnState::Connecting(task) => match task.await {
            Ok(Ok(ws)) => ConnEvent::Connected(ws),
            Ok(Err(reason)) => ConnEvent::ConnectFailed(reason),
            Err(e) => ConnEvent::ConnectFailed(e.to_string()),
        },
        ConnState::ClosedPendingReconnect(sleep) => {
            sleep.as_mut().await;
            ConnEvent::ReconnectDue
        }
        ConnState::Idle | ConnState::TornDown => std::future::pending().await,
    }
}
