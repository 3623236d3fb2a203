//! Session orchestration: connect with retry, auto-reconnect, subscription
//! replay and the public client surface.

use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError, Weak,
    atomic::{AtomicU64, Ordering},
};

use async_trait::async_trait;
use futures::stream::BoxStream;
use hublink_core::{
    ClientError, CloseReceiver, ConnectionBuilder, ConnectionOptions, ConnectionOptionsPatch,
    ConnectionState, Handler, RealtimeClient, TransportConnection, TransportError, Unsubscribe,
    url::host_of,
};
use serde_json::Value;
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};

use crate::{RetryPolicy, StateMachine, SubscriptionRegistry, Transition};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Url and options of the current or last session.
#[derive(Default)]
struct Session {
    url: Option<String>,
    options: ConnectionOptions,
}

/// The transport of the latest connect attempt.
struct LiveConnection {
    transport: Arc<dyn TransportConnection>,
    close_watch: JoinHandle<()>,
}

impl Drop for LiveConnection {
    fn drop(&mut self) {
        self.close_watch.abort();
    }
}

struct Inner {
    builder: Arc<dyn ConnectionBuilder>,
    machine: StateMachine,
    registry: Mutex<SubscriptionRegistry>,
    session: Mutex<Session>,
    live: Mutex<Option<LiveConnection>>,
    // Bumped per built transport; close events from older transports are stale.
    generation: AtomicU64,
    // Bumped by every accepted stop; connects started before it give up.
    stops: AtomicU64,
}

/// Owns one logical hub session.
///
/// Drives the state machine through connect, retry and stop, keeps the
/// subscription registry wired onto whichever transport is live, and runs
/// a background task that reconnects after the session falls into `Error`.
pub struct ConnectionOrchestrator {
    inner: Arc<Inner>,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionOrchestrator {
    /// Create a stopped orchestrator building transports with `builder`.
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime.
    #[must_use]
    pub fn new(builder: Arc<dyn ConnectionBuilder>) -> Self {
        let inner = Arc::new(Inner {
            builder,
            machine: StateMachine::new(),
            registry: Mutex::new(SubscriptionRegistry::new()),
            session: Mutex::new(Session::default()),
            live: Mutex::new(None),
            generation: AtomicU64::new(0),
            stops: AtomicU64::new(0),
        });

        let entries = inner.machine.subscribe_entries();
        let task = tokio::spawn(auto_reconnect(Arc::downgrade(&inner), entries));

        Self {
            inner,
            reconnect_task: Mutex::new(Some(task)),
        }
    }

    /// Error held since the last transition into `Error` or `RetryBackoff`.
    #[must_use]
    pub fn last_error(&self) -> Option<ClientError> {
        self.inner.machine.last_error()
    }

    /// Url of the current or last session.
    #[must_use]
    pub fn url(&self) -> Option<String> {
        lock(&self.inner.session).url.clone()
    }

    /// Effective options of the current or last session.
    #[must_use]
    pub fn options(&self) -> ConnectionOptions {
        self.inner.options()
    }

    /// Number of registered event handlers.
    #[must_use]
    pub fn subscriptions(&self) -> usize {
        lock(&self.inner.registry).len()
    }

    /// Detach the auto-reconnect task and release the live transport.
    /// Safe to call more than once.
    pub fn dispose(&self) {
        if let Some(task) = lock(&self.reconnect_task).take() {
            task.abort();
        }
        lock(&self.inner.live).take();
    }

    async fn start_with(&self, url: String, options: ConnectionOptions) -> Result<(), ClientError> {
        options.validate()?;
        self.inner.machine.request(Transition::Starting)?;
        self.inner.machine.set_tracing(options.enable_tracing);
        {
            let mut session = lock(&self.inner.session);
            session.url = Some(url);
            session.options = options;
        }
        self.inner.trace("Starting session");
        self.inner.connect().await
    }
}

impl Drop for ConnectionOrchestrator {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl Inner {
    fn options(&self) -> ConnectionOptions {
        lock(&self.session).options.clone()
    }

    fn live_transport(&self) -> Option<Arc<dyn TransportConnection>> {
        lock(&self.live)
            .as_ref()
            .map(|live| Arc::clone(&live.transport))
    }

    fn trace(&self, message: &str) {
        let session = lock(&self.session);
        if session.options.enable_tracing {
            let host = session.url.as_deref().map_or("", host_of);
            tracing::debug!(host, state = %self.machine.state(), "{message}");
        }
    }

    /// One full connect: a fresh transport per attempt, bounded by the
    /// retry policy.
    async fn connect(self: &Arc<Self>) -> Result<(), ClientError> {
        let stops = self.stops.load(Ordering::SeqCst);
        let (url, options) = {
            let session = lock(&self.session);
            let url = session
                .url
                .clone()
                .ok_or_else(|| ClientError::Internal("no session url".into()))?;
            (url, session.options.clone())
        };

        let result = RetryPolicy::from_options(&options)
            .run(
                |attempt| self.attempt(&url, &options, attempt, stops),
                |err| self.should_retry(&url, err, stops),
            )
            .await;
        if self.stopped_since(stops) {
            self.trace("Connect cancelled by stop");
            return Err(ClientError::Cancelled);
        }

        match result {
            Ok(()) => {
                self.machine.request(Transition::Connected)?;
                self.trace("Connected");
                Ok(())
            }
            Err(ClientError::Transport(source)) => {
                let error = ClientError::UnrecoverableTimeout { url, source };
                tracing::warn!(%error, "Giving up connecting");
                self.machine.request(Transition::Error(error.clone()))?;
                Err(error)
            }
            Err(err) => Err(err),
        }
    }

    async fn attempt(
        self: &Arc<Self>,
        url: &str,
        options: &ConnectionOptions,
        attempt: u32,
        stops: u64,
    ) -> Result<(), ClientError> {
        if self.stopped_since(stops) {
            return Err(ClientError::Cancelled);
        }
        self.machine.clear_error();
        let transport = self.install_transport(url, options);
        self.machine.request(Transition::Connecting)?;
        self.trace(&format!("Connecting, attempt {}", attempt + 1));
        transport.start().await.map_err(ClientError::from)
    }

    /// Build a transport, watch it for close events and replay the registry
    /// onto it. Replaces the previous live transport.
    fn install_transport(
        self: &Arc<Self>,
        url: &str,
        options: &ConnectionOptions,
    ) -> Arc<dyn TransportConnection> {
        let transport = self.builder.build(url, options);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let close_watch = tokio::spawn(watch_close(
            Arc::downgrade(self),
            transport.closed(),
            generation,
        ));

        let registry = lock(&self.registry);
        registry.replay(transport.as_ref());
        *lock(&self.live) = Some(LiveConnection {
            transport: Arc::clone(&transport),
            close_watch,
        });
        drop(registry);

        transport
    }

    fn stopped_since(&self, stops: u64) -> bool {
        self.stops.load(Ordering::SeqCst) != stops
    }

    fn should_retry(&self, url: &str, err: &ClientError, stops: u64) -> bool {
        let ClientError::Transport(source) = err else {
            return false;
        };
        if !self.options().auto_reconnect || self.stopped_since(stops) {
            return false;
        }
        let error = ClientError::TransportIo {
            url: url.to_string(),
            source: source.clone(),
        };
        tracing::warn!(%error, "Transport start failed");
        self.machine.request(Transition::RetryBackoff(error)).is_ok()
    }

    fn on_closed(&self, generation: u64, event: Option<TransportError>) {
        if self.generation.load(Ordering::SeqCst) != generation
            || self.machine.state() != ConnectionState::Connected
        {
            self.trace("Ignoring close of an inactive connection");
            return;
        }

        let url = lock(&self.session).url.clone().unwrap_or_default();
        let error = match event {
            Some(source) => ClientError::TransportIo { url, source },
            None => ClientError::Internal("connection closed without an error".into()),
        };
        tracing::warn!(%error, "Connection lost");
        if let Err(err) = self.machine.request(Transition::Error(error)) {
            tracing::debug!(%err, "Close event arrived during a transition");
        }
    }

    async fn reconnect(self: &Arc<Self>) -> Result<(), ClientError> {
        if !self.options().auto_reconnect {
            return Ok(());
        }
        self.machine.request(Transition::Reconnecting)?;
        self.trace("Reconnecting");
        self.connect().await
    }
}

async fn watch_close(inner: Weak<Inner>, mut closed: CloseReceiver, generation: u64) {
    let Ok(event) = closed.recv().await else {
        return;
    };
    if let Some(inner) = inner.upgrade() {
        inner.on_closed(generation, event);
    }
}

/// Wait for the next entry into `Error`. False once the machine is gone.
async fn next_error(entries: &mut broadcast::Receiver<ConnectionState>) -> bool {
    loop {
        match entries.recv().await {
            Ok(ConnectionState::Error) => return true,
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => return false,
        }
    }
}

/// Reconnect `reconnect_delay` after every entry into `Error`. A new error
/// during the wait restarts it. Failures are already published by the
/// state machine and are dropped here.
async fn auto_reconnect(inner: Weak<Inner>, mut entries: broadcast::Receiver<ConnectionState>) {
    'errors: while next_error(&mut entries).await {
        loop {
            let delay = match inner.upgrade() {
                Some(inner) => {
                    let options = inner.options();
                    if !options.auto_reconnect {
                        continue 'errors;
                    }
                    options.reconnect_delay
                }
                None => return,
            };
            tokio::select! {
                () = tokio::time::sleep(delay) => break,
                more = next_error(&mut entries) => {
                    if !more {
                        return;
                    }
                }
            }
        }

        let Some(inner) = inner.upgrade() else {
            return;
        };
        if let Err(err) = inner.reconnect().await {
            tracing::debug!(%err, "Reconnect attempt failed");
        }
    }
}

#[async_trait]
impl RealtimeClient for ConnectionOrchestrator {
    fn state(&self) -> ConnectionState {
        self.inner.machine.state()
    }

    fn state_changes(&self) -> BoxStream<'static, ConnectionState> {
        self.inner.machine.state_changes()
    }

    fn entered(&self, state: ConnectionState) -> BoxStream<'static, ConnectionState> {
        self.inner.machine.entered(state)
    }

    fn errors(&self) -> BoxStream<'static, ClientError> {
        self.inner.machine.errors()
    }

    async fn wait_connected(&self) {
        let mut state = self.inner.machine.subscribe_state();
        // The sender lives as long as `self`.
        let _ = state.wait_for(|s| s.is_connected()).await;
    }

    async fn start(
        &self,
        url: &str,
        options: Option<ConnectionOptionsPatch>,
    ) -> Result<(), ClientError> {
        if url.is_empty() {
            return Err(ClientError::Argument("url"));
        }
        self.start_with(url.to_string(), ConnectionOptions::merged(options.as_ref()))
            .await
    }

    async fn restart(
        &self,
        url: Option<&str>,
        options: Option<ConnectionOptionsPatch>,
    ) -> Result<(), ClientError> {
        let (held_url, held_options) = {
            let session = lock(&self.inner.session);
            (session.url.clone(), session.options.clone())
        };
        let url = match url.filter(|url| !url.is_empty()) {
            Some(url) => url.to_string(),
            None => held_url.ok_or(ClientError::Argument("url"))?,
        };
        let options = match options {
            Some(patch) => ConnectionOptions::merged(Some(&patch)),
            None => held_options,
        };

        self.stop().await?;
        self.start_with(url, options).await
    }

    async fn stop(&self) -> Result<(), ClientError> {
        if self.inner.machine.state().is_stopped() {
            return Ok(());
        }
        self.inner.machine.request(Transition::Stopping)?;
        self.inner.stops.fetch_add(1, Ordering::SeqCst);
        self.inner.trace("Stopping session");

        let result = match self.inner.live_transport() {
            Some(transport) => transport.stop().await.map_err(ClientError::from),
            None => Ok(()),
        };
        if let Err(err) = &result {
            tracing::warn!(%err, "Transport stop failed");
        }

        self.inner.machine.request(Transition::Stopped)?;
        result
    }

    async fn send(&self, method: &str, args: Vec<Value>) -> Result<(), ClientError> {
        if method.is_empty() {
            return Err(ClientError::Argument("method"));
        }
        self.wait_connected().await;
        let transport = self
            .inner
            .live_transport()
            .ok_or_else(|| ClientError::Internal("no live connection".into()))?;
        Ok(transport.send(method, args).await?)
    }

    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, ClientError> {
        if method.is_empty() {
            return Err(ClientError::Argument("method"));
        }
        self.wait_connected().await;
        let transport = self
            .inner
            .live_transport()
            .ok_or_else(|| ClientError::Internal("no live connection".into()))?;
        Ok(transport.invoke(method, args).await?)
    }

    fn on(&self, method: &str, handler: Handler) -> Result<(), ClientError> {
        let mut registry = lock(&self.inner.registry);
        let live = self.inner.live_transport();
        registry.add(method, handler, live.as_deref())
    }

    fn off(&self, target: Unsubscribe) {
        let mut registry = lock(&self.inner.registry);
        let live = self.inner.live_transport();
        registry.remove(&target, live.as_deref());
    }
}
