//! Realtime connection manager.
//!
//! Exactly one [`RealtimeClient`] should exist per application; the root
//! constructs it and hands out clones of the `Arc`. The socket is opened by
//! [`RealtimeClient::connect`] only. Subscribing never connects and removing
//! the last listener never disconnects.
//!
//! After an unexpected drop the manager reconnects with exponential backoff
//! and then emits [`CONNECTION_RESTORED`] so consumers refetch. Events missed
//! while disconnected are not replayed.

use super::{ClientError, ClientResult};
use crate::websocket::events::{EventFrame, CONNECTION_RESTORED};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Something a listener can observe.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// A frame pushed by the server.
    Ledger(EventFrame),
    /// The socket came back after a drop. Refetch anything on screen.
    ConnectionRestored,
}

impl ClientEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::Ledger(frame) => frame.event.event_type(),
            ClientEvent::ConnectionRestored => CONNECTION_RESTORED,
        }
    }
}

pub type Listener = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Default)]
struct Listeners {
    by_event: DashMap<String, Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
}

impl Listeners {
    fn dispatch(&self, event: &ClientEvent) {
        // Clone out so a listener may (un)subscribe without deadlocking.
        let targets: Vec<Listener> = match self.by_event.get(event.event_type()) {
            Some(entry) => entry.iter().map(|(_, l)| l.clone()).collect(),
            None => return,
        };
        for listener in targets {
            listener(event);
        }
    }
}

struct Connection {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct RealtimeClient {
    url: Url,
    token: String,
    policy: ReconnectPolicy,
    listeners: Arc<Listeners>,
    connected: Arc<AtomicBool>,
    connection: Mutex<Option<Connection>>,
}

impl RealtimeClient {
    /// `url` is the websocket endpoint, e.g. `ws://host/communication/ws`.
    pub fn new(url: &str, token: impl Into<String>) -> ClientResult<Self> {
        let url = Url::parse(url).map_err(|e| ClientError::InvalidUrl(format!("{url}: {e}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ClientError::InvalidUrl(format!(
                "{url}: expected a ws:// or wss:// url"
            )));
        }
        Ok(Self {
            url,
            token: token.into(),
            policy: ReconnectPolicy::default(),
            listeners: Arc::new(Listeners::default()),
            connected: Arc::new(AtomicBool::new(false)),
            connection: Mutex::new(None),
        })
    }

    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Register `listener` for `event` (`message.appended`,
    /// `connection.restored`, ...). Does not open the socket.
    pub fn subscribe<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.listeners.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .by_event
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Returns whether the listener was registered.
    pub fn unsubscribe(&self, event: &str, id: ListenerId) -> bool {
        let mut removed = false;
        if let Some(mut entry) = self.listeners.by_event.get_mut(event) {
            let before = entry.len();
            entry.retain(|(lid, _)| *lid != id);
            removed = entry.len() != before;
        }
        self.listeners
            .by_event
            .remove_if(event, |_, listeners| listeners.is_empty());
        removed
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners
            .by_event
            .get(event)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }

    /// Open the socket. The first handshake error is returned; later drops
    /// are retried in the background. Calling this while connected is a no-op.
    pub async fn connect(&self) -> ClientResult<()> {
        let mut slot = self.connection.lock().await;
        if let Some(existing) = slot.as_ref() {
            if !existing.task.is_finished() {
                return Ok(());
            }
        }

        let socket = handshake(&self.url, &self.token).await?;
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(url = %self.url, "realtime connected");

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_connection(
            socket,
            self.url.clone(),
            self.token.clone(),
            self.policy.clone(),
            self.listeners.clone(),
            self.connected.clone(),
            shutdown_rx,
        ));
        *slot = Some(Connection { shutdown, task });
        Ok(())
    }

    /// Close the socket and stop reconnecting. Listeners stay registered.
    pub async fn disconnect(&self) {
        let connection = self.connection.lock().await.take();
        if let Some(connection) = connection {
            let _ = connection.shutdown.send(true);
            if let Err(e) = connection.task.await {
                tracing::debug!(error = %e, "realtime task ended abnormally");
            }
        }
        self.connected.store(false, Ordering::SeqCst);
    }
}

async fn handshake(url: &Url, token: &str) -> ClientResult<Socket> {
    let mut request = url.as_str().into_client_request()?;
    let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
        .map_err(|e| ClientError::WebSocket(format!("invalid token header: {e}")))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);
    let (socket, _response) = connect_async(request).await?;
    Ok(socket)
}

enum Ended {
    Shutdown,
    Dropped,
}

async fn pump(socket: Socket, listeners: &Listeners, shutdown: &mut watch::Receiver<bool>) -> Ended {
    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return Ended::Shutdown;
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<EventFrame>(&text) {
                        Ok(frame) => listeners.dispatch(&ClientEvent::Ledger(frame)),
                        Err(_) => tracing::trace!(frame = %text, "ignoring non-event frame"),
                    },
                    Some(Ok(WsMessage::Close(reason))) => {
                        tracing::debug!(?reason, "server closed realtime connection");
                        return Ended::Dropped;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "realtime connection error");
                        return Ended::Dropped;
                    }
                    None => return Ended::Dropped,
                }
            }
        }
    }
}

async fn run_connection(
    mut socket: Socket,
    url: Url,
    token: String,
    policy: ReconnectPolicy,
    listeners: Arc<Listeners>,
    connected: Arc<AtomicBool>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let ended = pump(socket, &listeners, &mut shutdown).await;
        connected.store(false, Ordering::SeqCst);
        if matches!(ended, Ended::Shutdown) {
            tracing::info!("realtime disconnected");
            return;
        }

        let mut attempt = 0u32;
        socket = loop {
            attempt += 1;
            if policy.max_attempts.is_some_and(|max| attempt > max) {
                tracing::error!(attempts = attempt - 1, "realtime reconnect gave up");
                return;
            }

            let delay = policy.delay(attempt);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }

            match handshake(&url, &token).await {
                Ok(socket) => break socket,
                Err(e) => tracing::warn!(attempt, error = %e, "realtime reconnect failed"),
            }
        };

        connected.store(true, Ordering::SeqCst);
        tracing::info!(attempt, "realtime connection restored");
        listeners.dispatch(&ClientEvent::ConnectionRestored);
    }
}
