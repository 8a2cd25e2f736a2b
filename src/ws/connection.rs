//! One supervised streaming connection.
//!
//! A background task owns the dial/read/reconnect cycle. Subscribers register
//! a listener (event-type filter plus bounded queue) and the subscription is
//! tracked so it can be replayed on every reconnect, before any event of the
//! new session is forwarded.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use backoff::backoff::Backoff as _;
use futures::stream::SplitSink;
use futures::{SinkExt as _, StreamExt as _};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::error::WebSocket;
use crate::ws::types::{ConnectionState, SubscriptionRequest};
use crate::ws::{PING, PONG, StreamConfig};

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Sink = Arc<AsyncMutex<SplitSink<Stream, Message>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Receiving end of a listener. Dropping it closes the subscriber's queue.
trait EventSink: Send + Sync {
    /// Delivers without blocking; a full queue drops the event.
    fn offer(&self, event: &Value);

    fn is_closed(&self) -> bool;
}

struct QueueSink<T> {
    tx: mpsc::Sender<T>,
    _event: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned + Send + 'static> EventSink for QueueSink<T> {
    fn offer(&self, event: &Value) {
        let event = match T::deserialize(event) {
            Ok(event) => event,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %e, "skipping undecodable event");
                #[cfg(not(feature = "tracing"))]
                let _ = e;
                return;
            }
        };

        if let Err(mpsc::error::TrySendError::Full(_)) = self.tx.try_send(event) {
            #[cfg(feature = "tracing")]
            tracing::warn!("subscriber queue full, dropping event");
        }
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

struct Listener {
    id: u64,
    event_type: Option<String>,
    sink: Box<dyn EventSink>,
}

#[derive(Default)]
struct Listeners {
    entries: Vec<Listener>,
    closed: bool,
}

/// Live socket of the current session.
struct Session {
    sink: Sink,
    token: CancellationToken,
}

struct Shared {
    url: String,
    config: StreamConfig,
    lifecycle: CancellationToken,
    session: Mutex<Option<Session>>,
    /// Tracked for replay, keyed by the owning listener's id.
    subscriptions: Mutex<Vec<(u64, SubscriptionRequest)>>,
    listeners: Mutex<Listeners>,
    last_pong: Mutex<Instant>,
    next_id: AtomicU64,
    state: watch::Sender<ConnectionState>,
}

/// Handle to a connection; clones share the same socket and listeners.
#[derive(Clone)]
pub(crate) struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    /// Starts the connection task. Must be called within a Tokio runtime.
    pub(crate) fn spawn(url: String, config: StreamConfig) -> Self {
        let lifecycle = config.cancellation.child_token();
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        let shared = Arc::new(Shared {
            url,
            config,
            lifecycle,
            session: Mutex::new(None),
            subscriptions: Mutex::new(Vec::new()),
            listeners: Mutex::new(Listeners::default()),
            last_pong: Mutex::new(Instant::now()),
            next_id: AtomicU64::new(0),
            state,
        });

        tokio::spawn(Arc::clone(&shared).run());

        Self { shared }
    }

    /// Registers a listener, tracks `request` for replay and sends it if a
    /// session is live.
    ///
    /// The returned queue closes when `scope` is cancelled or the connection
    /// is closed.
    pub(crate) async fn subscribe<T>(
        &self,
        request: SubscriptionRequest,
        event_type: Option<&str>,
        scope: &CancellationToken,
    ) -> mpsc::Receiver<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let shared = &self.shared;
        let (tx, rx) = mpsc::channel(shared.config.buffer);
        let id = shared.next_id.fetch_add(1, Ordering::Relaxed);

        {
            let mut listeners = lock(&shared.listeners);
            if listeners.closed {
                return rx;
            }
            listeners.entries.push(Listener {
                id,
                event_type: event_type
                    .filter(|wanted| !wanted.is_empty())
                    .map(str::to_owned),
                sink: Box::new(QueueSink {
                    tx,
                    _event: PhantomData,
                }),
            });
        }
        lock(&shared.subscriptions).push((id, request.clone()));

        if let Err(e) = shared.send(&request).await {
            #[cfg(feature = "tracing")]
            tracing::debug!(url = %shared.url, error = %e, "subscription deferred until connected");
            #[cfg(not(feature = "tracing"))]
            let _ = e;
        }

        let shared = Arc::clone(shared);
        let scope = scope.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = scope.cancelled() => shared.remove_listener(id),
                () = shared.lifecycle.cancelled() => {}
            }
        });

        rx
    }

    /// Stops replaying matching subscriptions and asks the server to stop
    /// sending them.
    pub(crate) async fn unsubscribe(&self, request: &SubscriptionRequest) -> Result<()> {
        lock(&self.shared.subscriptions).retain(|(_, tracked)| !tracked.is_covered_by(request));
        self.shared.send(request).await
    }

    pub(crate) fn close(&self) {
        self.shared.close();
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub(crate) fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        lock(&self.shared.subscriptions).len()
    }

    #[cfg(test)]
    fn listener_count(&self) -> usize {
        lock(&self.shared.listeners).entries.len()
    }
}

impl Shared {
    async fn run(self: Arc<Self>) {
        let mut backoff = self.config.reconnect_backoff();

        loop {
            if self.lifecycle.is_cancelled() {
                break;
            }
            self.publish(ConnectionState::Connecting);

            let dialed = tokio::select! {
                biased;
                () = self.lifecycle.cancelled() => break,
                dialed = connect_async(self.url.as_str()) => dialed,
            };

            match dialed {
                Ok((stream, _)) => {
                    backoff.reset();
                    #[cfg(feature = "tracing")]
                    tracing::info!(url = %self.url, "websocket connected");

                    self.run_session(stream).await;

                    #[cfg(feature = "tracing")]
                    tracing::info!(url = %self.url, "websocket session ended");
                }
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(url = %self.url, error = %e, "websocket dial failed");
                    #[cfg(not(feature = "tracing"))]
                    let _ = e;
                }
            }

            if self.lifecycle.is_cancelled() {
                break;
            }
            // The backoff wait is part of reconnecting.
            self.publish(ConnectionState::Connecting);

            let delay = backoff
                .next_backoff()
                .unwrap_or(self.config.reconnect_max_delay);
            #[cfg(feature = "tracing")]
            tracing::info!(url = %self.url, delay_ms = delay.as_millis(), "reconnecting");

            tokio::select! {
                biased;
                () = self.lifecycle.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.close();
        self.state.send_replace(ConnectionState::Closed);
    }

    /// Notifies watchers only on an actual transition.
    fn publish(&self, next: ConnectionState) {
        self.state.send_if_modified(|state| {
            let changed = *state != next;
            *state = next;
            changed
        });
    }

    async fn run_session(self: &Arc<Self>, stream: Stream) {
        let (sink, mut read) = stream.split();
        let sink: Sink = Arc::new(AsyncMutex::new(sink));
        let token = self.lifecycle.child_token();

        *lock(&self.last_pong) = Instant::now();
        *lock(&self.session) = Some(Session {
            sink: Arc::clone(&sink),
            token: token.clone(),
        });
        self.state.send_replace(ConnectionState::Connected);

        self.resubscribe().await;
        tokio::spawn(Arc::clone(self).heartbeat(Arc::clone(&sink), token.clone()));

        loop {
            let frame = tokio::select! {
                biased;
                () = token.cancelled() => break,
                frame = read.next() => frame,
            };

            match frame {
                Some(Ok(Message::Text(text))) => self.handle_text(text.as_str()),
                Some(Ok(Message::Binary(bytes))) => {
                    if let Ok(text) = std::str::from_utf8(&bytes) {
                        self.handle_text(text);
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    if sink.lock().await.send(Message::Pong(payload)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(url = %self.url, ?frame, "websocket closed by server");
                    #[cfg(not(feature = "tracing"))]
                    let _ = frame;
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(url = %self.url, error = %e, "websocket read failed");
                    #[cfg(not(feature = "tracing"))]
                    let _ = e;
                    break;
                }
                None => break,
            }
        }

        token.cancel();
        {
            let mut session = lock(&self.session);
            if session.as_ref().is_some_and(|s| Arc::ptr_eq(&s.sink, &sink)) {
                *session = None;
            }
        }
        // Best effort; the peer may already be gone.
        let _close = sink.lock().await.close().await;
    }

    /// Sends `PING` every interval and ends the session once no `PONG` has
    /// arrived within the timeout.
    async fn heartbeat(self: Arc<Self>, sink: Sink, session: CancellationToken) {
        let period = self.config.ping_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                biased;
                () = session.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let silent_for = lock(&self.last_pong).elapsed();
            if silent_for > self.config.pong_timeout {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    url = %self.url,
                    silent_ms = silent_for.as_millis(),
                    "heartbeat timed out, dropping session"
                );
                session.cancel();
                return;
            }

            if sink.lock().await.send(Message::text(PING)).await.is_err() {
                session.cancel();
                return;
            }
        }
    }

    fn handle_text(&self, text: &str) {
        let text = text.trim();
        if text == PONG {
            *lock(&self.last_pong) = Instant::now();
            return;
        }

        match serde_json::from_str::<Value>(text) {
            Ok(Value::Array(events)) => {
                for event in &events {
                    self.dispatch(event);
                }
            }
            Ok(event) => self.dispatch(&event),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(url = %self.url, error = %e, "ignoring non-json frame");
                #[cfg(not(feature = "tracing"))]
                let _ = e;
            }
        }
    }

    fn dispatch(&self, event: &Value) {
        let Some(object) = event.as_object() else {
            return;
        };
        let event_type = object
            .get("event_type")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let mut abandoned = Vec::new();
        {
            let mut listeners = lock(&self.listeners);
            if listeners.closed {
                return;
            }
            listeners.entries.retain(|listener| {
                let closed = listener.sink.is_closed();
                if closed {
                    abandoned.push(listener.id);
                }
                !closed
            });

            for listener in &listeners.entries {
                if listener
                    .event_type
                    .as_deref()
                    .is_none_or(|wanted| wanted == event_type)
                {
                    listener.sink.offer(event);
                }
            }
        }

        if !abandoned.is_empty() {
            lock(&self.subscriptions).retain(|(id, _)| !abandoned.contains(id));
        }
    }

    async fn resubscribe(&self) {
        let subscriptions: Vec<SubscriptionRequest> = lock(&self.subscriptions)
            .iter()
            .map(|(_, request)| request.clone())
            .collect();

        #[cfg(feature = "tracing")]
        if !subscriptions.is_empty() {
            tracing::info!(url = %self.url, count = subscriptions.len(), "replaying subscriptions");
        }

        for request in &subscriptions {
            if let Err(e) = self.send(request).await {
                #[cfg(feature = "tracing")]
                tracing::warn!(url = %self.url, error = %e, "subscription replay failed");
                #[cfg(not(feature = "tracing"))]
                let _ = e;
                return;
            }
        }
    }

    async fn send(&self, request: &SubscriptionRequest) -> Result<()> {
        if self.lifecycle.is_cancelled() {
            return Err(WebSocket::Closed.into());
        }
        let text = serde_json::to_string(request)?;
        let sink = lock(&self.session)
            .as_ref()
            .map(|session| Arc::clone(&session.sink))
            .ok_or(WebSocket::NotConnected)?;

        sink.lock().await.send(Message::text(text)).await?;
        Ok(())
    }

    /// Untracks the listener's subscription before closing its queue, so a
    /// closed queue is never replayed.
    fn remove_listener(&self, id: u64) {
        lock(&self.subscriptions).retain(|(owner, _)| *owner != id);

        let mut listeners = lock(&self.listeners);
        if listeners.closed {
            return;
        }
        listeners.entries.retain(|listener| listener.id != id);
    }

    /// Idempotent. Queues are closed by dropping their senders, exactly once.
    fn close(&self) {
        self.lifecycle.cancel();
        if let Some(session) = lock(&self.session).take() {
            session.token.cancel();
        }

        let mut listeners = lock(&self.listeners);
        if listeners.closed {
            return;
        }
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Closed {
                return false;
            }
            *state = ConnectionState::Closing;
            true
        });
        listeners.closed = true;
        listeners.entries.clear();
    }
}
