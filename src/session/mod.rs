//! Client session.
//!
//! A [`Session`] owns one connection to a clipboard sync peer at a time and
//! everything around it: the worker that serializes outbound operations,
//! the dispatcher fed by the receive loop, the content cache served to sync
//! requests, the auth token, heartbeats, and reconnect supervision.
//!
//! Every public operation returns an [`AsyncTask`] queued on the session's
//! worker, so operations run one at a time in submission order. Operations
//! that wait for a reply hold the worker until the reply arrives or the
//! connection drops.
//!
//! # Example
//!
//! ```ignore
//! use clipwire::{Credentials, Session};
//!
//! #[tokio::main]
//! async fn main() -> clipwire::Result<()> {
//!     let session = Session::builder().host("10.0.0.5").port(6000).build()?;
//!     session.on_content_available(|item| println!("peer has {}", item.content_id));
//!
//!     let ready = session
//!         .start(Credentials::from_phrases("alice", "laptop", "s3cret"))
//!         .get()
//!         .await?;
//!     if ready {
//!         session.wake();
//!         session
//!             .notify_available(42, vec!["text/plain".into()], "hello")
//!             .get()
//!             .await?;
//!     }
//!     Ok(())
//! }
//! ```

mod builder;
mod events;
mod reconnect;
mod responder;

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::{broadcast, oneshot, watch};
use tracing::{debug, info, trace, warn};

use crate::cache::ContentCache;
use crate::config::SessionConfig;
use crate::credentials::Credentials;
use crate::error::{Error, Result};
use crate::handler::{Dispatcher, HandlerResult};
use crate::protocol::{
    AuthenticateResponse, Frame, Message, MessageType, NotifyAvailable, Ping,
    RefreshIndexRequest, RefreshIndexResponse, SyncRequest, SyncResponse, SYNC_FOUND,
};
use crate::receiver::receive_loop;
use crate::task::{AsyncTask, Periodic, Reactor, Worker};
use crate::transport::{self, Connection, Endpoint};
use crate::writer::{OutboundFrame, WriterConfig};

pub use builder::SessionBuilder;
pub use events::{ContentNotification, Disconnect, SessionEvent};

use events::EventBus;
use reconnect::Reconnector;

/// Connection lifecycle as seen by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Authenticating,
    Authenticated,
}

impl SessionState {
    /// Whether a connection is open.
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            SessionState::Connected | SessionState::Authenticating | SessionState::Authenticated
        )
    }
}

/// An open connection and the dispatcher its receive loop feeds.
///
/// The dispatcher shares the session's broadcast handlers but owns its
/// waiter queues.
#[derive(Clone)]
struct Link {
    connection: Connection,
    dispatcher: Dispatcher,
}

struct SessionInner {
    config: SessionConfig,
    writer_config: WriterConfig,
    worker: Worker,
    dispatcher: Dispatcher,
    cache: ContentCache,
    token: AtomicI64,
    state: watch::Sender<SessionState>,
    endpoint: Mutex<Endpoint>,
    connection: Mutex<Option<Link>>,
    /// Bumped by every explicit disconnect; connects started under an older
    /// value are abandoned.
    generation: AtomicU64,
    credentials: Mutex<Option<Credentials>>,
    events: EventBus,
    heartbeat: Mutex<Option<Periodic>>,
    reconnector: Reconnector,
    disposed: AtomicBool,
}

/// Handle to a client session. Clones share the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &*self.inner.endpoint.lock())
            .field("state", &self.state())
            .field("token", &self.token())
            .finish()
    }
}

impl Session {
    /// Start configuring a session.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Create a session from `config` with default writer settings.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: SessionConfig) -> Result<Self> {
        Self::assemble(config, WriterConfig::default(), Dispatcher::new())
    }

    fn assemble(
        config: SessionConfig,
        writer_config: WriterConfig,
        dispatcher: Dispatcher,
    ) -> Result<Self> {
        config.validate()?;

        let (state, _) = watch::channel(SessionState::Disconnected);
        let inner = Arc::new(SessionInner {
            endpoint: Mutex::new(config.endpoint()),
            cache: ContentCache::with_capacity(config.cache_capacity),
            events: EventBus::new(config.event_capacity),
            reconnector: Reconnector::new(config.reconnect_delay()),
            worker: Worker::spawn("session"),
            token: AtomicI64::new(0),
            connection: Mutex::new(None),
            generation: AtomicU64::new(0),
            credentials: Mutex::new(None),
            heartbeat: Mutex::new(None),
            disposed: AtomicBool::new(false),
            state,
            dispatcher,
            writer_config,
            config,
        });
        responder::install(&inner);

        Ok(Self { inner })
    }

    /// Connect to the configured endpoint.
    ///
    /// Completes with `true` once connected (immediately if already
    /// connected) and `false` if the attempt failed. A failed attempt is
    /// reported to disconnect observers. Fails with [`Error::Cancelled`] if
    /// the session is disconnected or disposed before the attempt finishes.
    pub fn connect(&self) -> AsyncTask<bool> {
        let inner = self.inner.clone();
        let generation = self.inner.generation();
        self.inner
            .worker
            .submit(move || async move { inner.open(None, generation).await })
    }

    /// Connect to `endpoint`, which also becomes the reconnect target.
    ///
    /// Ignored (with the task completing `true`) while a connection is open.
    pub fn connect_to(&self, endpoint: Endpoint) -> AsyncTask<bool> {
        let inner = self.inner.clone();
        let generation = self.inner.generation();
        self.inner
            .worker
            .submit(move || async move { inner.open(Some(endpoint), generation).await })
    }

    /// Authenticate on the open connection.
    ///
    /// The credentials are kept for reconnects. Completes with `true` when
    /// the peer issued a non-zero token. Fails with [`Error::NotConnected`]
    /// without a connection, with [`Error::ConnectionClosed`] if the
    /// connection drops before the reply, and with [`Error::AuthTimeout`]
    /// if an auth timeout is configured and expires.
    pub fn authenticate(&self, credentials: Credentials) -> AsyncTask<bool> {
        let inner = self.inner.clone();
        self.inner
            .worker
            .submit(move || async move { inner.login(credentials).await })
    }

    /// Connect, then authenticate if the connection succeeded.
    pub fn start(&self, credentials: Credentials) -> AsyncTask<bool> {
        let connecting = self.clone();
        let authenticating = self.clone();

        Reactor::stage("connect", move |_: ()| Ok(connecting.connect()))
            .and_then(Reactor::stage("authenticate", move |connected: bool| {
                Ok(if connected {
                    authenticating.authenticate(credentials)
                } else {
                    AsyncTask::completed(false)
                })
            }))
            .initiate(())
    }

    /// Announce a content item whose bytes are its description.
    ///
    /// The description is cached under `content_id` for the sync responder
    /// before the announcement is sent. Completes with whether the send
    /// succeeded.
    pub fn notify_available(
        &self,
        content_id: i64,
        content_types: Vec<String>,
        description: impl Into<String>,
    ) -> AsyncTask<bool> {
        let description = description.into();
        let payload = Bytes::from(description.clone().into_bytes());
        self.notify_available_with_payload(content_id, content_types, description, payload)
    }

    /// Announce a content item, caching `payload` as its bytes.
    pub fn notify_available_with_payload(
        &self,
        content_id: i64,
        content_types: Vec<String>,
        description: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> AsyncTask<bool> {
        let inner = self.inner.clone();
        let description = description.into();
        let payload = payload.into();
        self.inner.worker.submit(move || async move {
            inner
                .announce(content_id, content_types, description, payload)
                .await
        })
    }

    /// Ask the peer for a content item's bytes.
    ///
    /// Completes with `None` if the peer does not have the item.
    pub fn request_sync(&self, content_id: i64) -> AsyncTask<Option<Bytes>> {
        let inner = self.inner.clone();
        self.inner
            .worker
            .submit(move || async move { inner.sync(content_id).await })
    }

    /// Ask the peer for every item it can provide in this dataset.
    pub fn refresh_index(&self) -> AsyncTask<Vec<ContentNotification>> {
        let inner = self.inner.clone();
        self.inner
            .worker
            .submit(move || async move { inner.refresh().await })
    }

    /// Send a ping every `period`, starting after `initial_delay`.
    ///
    /// Replaces any running heartbeat. A failed ping tears the connection
    /// down with the failure as the reason.
    pub fn heartbeat(&self, initial_delay: Duration, period: Duration) {
        let weak = Arc::downgrade(&self.inner);
        let periodic = self
            .inner
            .worker
            .schedule_at_fixed_rate(initial_delay, period, move || {
                let weak = weak.clone();
                async move {
                    match weak.upgrade() {
                        Some(inner) => inner.ping().await,
                        None => Ok(()),
                    }
                }
            });

        if let Some(previous) = self.inner.heartbeat.lock().replace(periodic) {
            previous.cancel();
        }
    }

    /// Start the heartbeat with the configured delay and period.
    pub fn wake(&self) {
        self.heartbeat(
            self.inner.config.heartbeat_delay(),
            self.inner.config.heartbeat_period(),
        );
    }

    /// Stop the heartbeat.
    pub fn sleep(&self) {
        if let Some(periodic) = self.inner.heartbeat.lock().take() {
            periodic.cancel();
            debug!("Heartbeat stopped");
        }
    }

    /// Close the connection from this side.
    ///
    /// Disconnect observers see [`Error::ConnectionClosed`] flagged as
    /// local, and no reconnect is scheduled. A pending reconnect is
    /// cancelled, and connects already under way are abandoned. Returns
    /// `false` if there was no connection.
    pub fn disconnect(&self) -> bool {
        self.inner.reconnector.cancel_pending();
        let link = {
            let mut slot = self.inner.connection.lock();
            self.inner.generation.fetch_add(1, Ordering::AcqRel);
            slot.take()
        };
        match link {
            Some(link) => {
                link.connection.close();
                self.inner.set_state(SessionState::Disconnected);
                info!("Disconnected from {}", link.connection.peer());
                true
            }
            None => false,
        }
    }

    /// Disconnect and stop the worker. Queued operations are cancelled and
    /// later ones are rejected.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.sleep();
        self.disconnect();
        self.inner.worker.shutdown_now();
        debug!("Session disposed");
    }

    /// Register a broadcast handler for inbound frames of `message_type`.
    pub fn on_message<F>(&self, message_type: MessageType, handler: F)
    where
        F: Fn(&Frame) -> HandlerResult + Send + Sync + 'static,
    {
        self.inner
            .dispatcher
            .handlers()
            .register(message_type, handler);
    }

    /// Observe content announcements from the peer.
    pub fn on_content_available<F>(&self, observer: F)
    where
        F: Fn(&ContentNotification) + Send + Sync + 'static,
    {
        self.inner.events.on_content_available(observer);
    }

    /// Observe dropped connections, including failed connect attempts.
    pub fn on_disconnect<F>(&self, observer: F)
    where
        F: Fn(&Disconnect) + Send + Sync + 'static,
    {
        self.inner.events.on_disconnect(observer);
    }

    /// Receive session events on a channel.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Watch state changes.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Current auth token (0 when not authenticated).
    pub fn token(&self) -> i64 {
        self.inner.token()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connection().is_some()
    }

    /// Whether a reconnect attempt is scheduled or running.
    pub fn is_reconnecting(&self) -> bool {
        self.inner.reconnector.is_pending()
    }

    pub fn endpoint(&self) -> Endpoint {
        self.inner.endpoint.lock().clone()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Items this side can serve to sync requests.
    pub fn content_cache(&self) -> &ContentCache {
        &self.inner.cache
    }

    /// Worker running this session's operations.
    pub fn worker(&self) -> &Worker {
        &self.inner.worker
    }
}

impl SessionInner {
    fn token(&self) -> i64 {
        self.token.load(Ordering::Acquire)
    }

    fn dataset(&self) -> u16 {
        self.config.dataset_id.into()
    }

    fn set_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!("Session state {:?} -> {:?}", previous, next);
        }
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Whether work started under `generation` has been overtaken by a
    /// disconnect or dispose.
    fn is_stale(&self, generation: u64) -> bool {
        self.disposed.load(Ordering::Acquire) || self.generation() != generation
    }

    /// The open connection and its dispatcher, if any.
    fn link(&self) -> Option<Link> {
        self.connection
            .lock()
            .as_ref()
            .filter(|link| !link.connection.is_closed())
            .cloned()
    }

    /// The open connection, if any.
    fn connection(&self) -> Option<Connection> {
        self.link().map(|link| link.connection)
    }

    async fn open(self: &Arc<Self>, target: Option<Endpoint>, generation: u64) -> Result<bool> {
        if self.is_stale(generation) {
            debug!("Connect abandoned before it started");
            return Err(Error::Cancelled);
        }
        if self.connection().is_some() {
            debug!("Already connected");
            return Ok(true);
        }
        if let Some(target) = target {
            *self.endpoint.lock() = target;
        }
        let endpoint = self.endpoint.lock().clone();

        self.set_state(SessionState::Connecting);
        let opened = transport::connect(&endpoint, self.config.connect_timeout())
            .await
            .and_then(|stream| Connection::open(stream, self.writer_config.clone()));

        match opened {
            Ok((connection, reader)) => {
                let link = Link {
                    connection,
                    dispatcher: self.dispatcher.fork(),
                };
                // `disconnect` bumps the generation under this lock.
                let installed = {
                    let mut slot = self.connection.lock();
                    let current = !self.is_stale(generation);
                    if current {
                        *slot = Some(link.clone());
                    }
                    current
                };
                if !installed {
                    link.connection.close();
                    self.set_state(SessionState::Disconnected);
                    debug!("Connect to {} abandoned after disconnect", endpoint);
                    return Err(Error::Cancelled);
                }

                info!("Connected to {}", endpoint);
                self.set_state(SessionState::Connected);
                self.spawn_receiver(link, reader);
                Ok(true)
            }
            Err(_) if self.is_stale(generation) => {
                self.set_state(SessionState::Disconnected);
                debug!("Connect to {} abandoned after disconnect", endpoint);
                Err(Error::Cancelled)
            }
            Err(e) => {
                warn!("Connect to {} failed: {}", endpoint, e);
                self.set_state(SessionState::Disconnected);
                self.connection_lost(Disconnect {
                    reason: Arc::new(e),
                    local: false,
                });
                Ok(false)
            }
        }
    }

    fn spawn_receiver(self: &Arc<Self>, link: Link, reader: OwnedReadHalf) {
        let weak = Arc::downgrade(self);
        let signal = link.connection.signal().clone();
        let policy = self.config.malformed_frames;
        let max_payload = self.config.max_payload_bytes;
        let id = link.connection.id();
        let dispatcher = link.dispatcher;

        tokio::spawn(async move {
            let exit = receive_loop(reader, dispatcher, signal, policy, max_payload).await;
            if let Some(inner) = weak.upgrade() {
                inner.connection_ended(
                    id,
                    Disconnect {
                        reason: exit.reason,
                        local: exit.local,
                    },
                );
            }
        });
    }

    fn connection_ended(self: &Arc<Self>, id: u64, disconnect: Disconnect) {
        let was_current = {
            let mut slot = self.connection.lock();
            if slot.as_ref().map(|link| link.connection.id()) == Some(id) {
                slot.take();
                true
            } else {
                false
            }
        };
        if was_current {
            self.set_state(SessionState::Disconnected);
        }
        self.connection_lost(disconnect);
    }

    fn connection_lost(self: &Arc<Self>, disconnect: Disconnect) {
        if disconnect.local {
            debug!("Connection closed locally");
        } else {
            warn!("Connection lost: {}", disconnect.reason);
        }
        let reconnect = !disconnect.local
            && self.config.auto_reconnect
            && !self.disposed.load(Ordering::Acquire);

        // Scheduled first so observers already see the attempt pending.
        if reconnect {
            let weak = Arc::downgrade(self);
            let generation = self.generation();
            self.reconnector.schedule(&self.worker, move || async move {
                match weak.upgrade() {
                    Some(inner) => inner.reconnect(generation).await,
                    None => Ok(false),
                }
            });
        }

        self.events.publish_disconnect(disconnect);
    }

    /// One reconnect attempt: drop whatever is left of the old connection,
    /// forget the token and cached content, connect, and re-authenticate
    /// with the stored credentials.
    async fn reconnect(self: Arc<Self>, generation: u64) -> Result<bool> {
        if self.is_stale(generation) {
            return Err(Error::Cancelled);
        }
        let stale = self.connection.lock().take();
        if let Some(stale) = stale {
            stale.connection.close();
        }
        self.token.store(0, Ordering::Release);
        self.cache.clear();

        if !self.open(None, generation).await? {
            return Ok(false);
        }
        let credentials = *self.credentials.lock();
        match credentials {
            Some(credentials) => self.login(credentials).await,
            None => Ok(true),
        }
    }

    async fn login(self: &Arc<Self>, credentials: Credentials) -> Result<bool> {
        *self.credentials.lock() = Some(credentials);
        let Link {
            connection,
            dispatcher,
        } = self.link().ok_or(Error::NotConnected)?;
        let request = OutboundFrame::encode(&credentials.to_request().to_frame()?)?;

        self.token.store(0, Ordering::Release);
        let (tx, rx) = oneshot::channel();
        let weak = Arc::downgrade(self);
        dispatcher
            .pending()
            .push(MessageType::AuthenticateResponse, move |frame| {
                let reply: AuthenticateResponse = frame.parse()?;
                if let Some(inner) = weak.upgrade() {
                    inner.token.store(reply.token, Ordering::Release);
                }
                let _ = tx.send(reply.token);
                Ok(())
            });

        self.set_state(SessionState::Authenticating);
        connection.send_encoded(request).await?;

        let token = match self.config.auth_timeout() {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(reply) => reply.map_err(|_| Error::ConnectionClosed)?,
                Err(_) => {
                    warn!("No authenticate reply within {:?}", limit);
                    connection.abort(Error::AuthTimeout);
                    return Err(Error::AuthTimeout);
                }
            },
            None => rx.await.map_err(|_| Error::ConnectionClosed)?,
        };

        let accepted = token != 0;
        if !connection.is_closed() {
            self.set_state(if accepted {
                SessionState::Authenticated
            } else {
                SessionState::Connected
            });
        }
        if accepted {
            info!("Authenticated");
        } else {
            warn!("Authentication rejected");
        }
        Ok(accepted)
    }

    async fn announce(
        &self,
        content_id: i64,
        content_types: Vec<String>,
        description: String,
        payload: Bytes,
    ) -> Result<bool> {
        self.cache.insert(content_id, payload);

        let notify = NotifyAvailable {
            token: self.token(),
            dataset_id: self.dataset(),
            content_id,
            content_type: content_types,
            description,
        };
        let frame = OutboundFrame::encode(&notify.to_frame()?)?;

        let Some(connection) = self.connection() else {
            warn!("Cannot announce {}: not connected", content_id);
            return Ok(false);
        };
        match connection.send_encoded(frame).await {
            Ok(()) => {
                debug!("Announced {}", content_id);
                Ok(true)
            }
            Err(e) => {
                warn!("Announce of {} failed: {}", content_id, e);
                Ok(false)
            }
        }
    }

    /// Send `request` and wait for the next frame of type `reply`.
    ///
    /// The frame is encoded before the waiter is queued, so a request that
    /// cannot be encoded never leaves a waiter behind.
    async fn call(&self, request: Frame, reply: MessageType) -> Result<Frame> {
        let Link {
            connection,
            dispatcher,
        } = self.link().ok_or(Error::NotConnected)?;
        let request = OutboundFrame::encode(&request)?;
        let rx = dispatcher.pending().expect(reply);
        connection.send_encoded(request).await?;
        rx.await.map_err(|_| Error::ConnectionClosed)
    }

    async fn sync(&self, content_id: i64) -> Result<Option<Bytes>> {
        let request = SyncRequest {
            token: self.token(),
            dataset_id: self.dataset(),
            content_id,
        };
        let frame = self
            .call(request.to_frame()?, MessageType::SyncResponse)
            .await?;

        let response: SyncResponse = frame.parse()?;
        if response.message != SYNC_FOUND {
            debug!("Peer does not have {}", content_id);
            return Ok(None);
        }
        Ok(Some(frame.payload.unwrap_or_default()))
    }

    async fn refresh(&self) -> Result<Vec<ContentNotification>> {
        let request = RefreshIndexRequest {
            token: self.token(),
            dataset_id: self.dataset(),
        };
        let frame = self
            .call(request.to_frame()?, MessageType::RefreshIndexResponse)
            .await?;

        let response: RefreshIndexResponse = frame.parse()?;
        Ok(response
            .contents
            .into_iter()
            .map(ContentNotification::from)
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        let Some(connection) = self.connection() else {
            trace!("Not connected, heartbeat skipped");
            return Ok(());
        };
        let frame = Ping {
            token: self.token(),
        }
        .to_frame()?;
        if let Err(e) = connection.send(&frame).await {
            warn!("Heartbeat failed: {}", e);
            connection.abort(e);
        }
        Ok(())
    }
}
