//! In-process hub.
//!
//! Every connection built by a [`MemoryHub`] talks to the same in-memory
//! server: hub methods are plain closures, events are delivered with
//! [`MemoryHub::publish`], and faults are injected from the test side.
//! Data is lost when the hub is dropped.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use hublink_core::{
    CloseReceiver, ConnectionBuilder, ConnectionOptions, Handler, TransportConnection,
    TransportError,
};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

/// Server-side implementation of a hub method.
pub type MethodFn = dyn Fn(&[Value]) -> Result<Value, TransportError> + Send + Sync;

/// Journal entry for one call a connection received.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Build { connection: u64, url: String },
    Start { connection: u64 },
    Stop { connection: u64 },
    Send { connection: u64, method: String, args: Vec<Value> },
    Invoke { connection: u64, method: String, args: Vec<Value> },
    On { connection: u64, method: String },
    Off { connection: u64, method: String },
}

#[derive(Default)]
struct HubState {
    next_id: u64,
    connections: Vec<Weak<MemoryConnection>>,
    methods: HashMap<String, Arc<MethodFn>>,
    calls: Vec<Call>,
    builds: Vec<(String, ConnectionOptions)>,
    start_count: usize,
    fail_next_starts: u32,
    fail_all_starts: bool,
    start_delay: Duration,
}

impl HubState {
    fn live(&mut self) -> Vec<Arc<MemoryConnection>> {
        self.connections.retain(|c| c.strong_count() > 0);
        self.connections.iter().filter_map(Weak::upgrade).collect()
    }
}

fn lock(state: &Mutex<HubState>) -> MutexGuard<'_, HubState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory hub and connection builder.
///
/// Cheap to clone; clones share the same server.
#[derive(Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `method` with `f`. Replaces any previous implementation.
    pub fn handle<F>(&self, method: &str, f: F)
    where
        F: Fn(&[Value]) -> Result<Value, TransportError> + Send + Sync + 'static,
    {
        lock(&self.state).methods.insert(method.to_string(), Arc::new(f));
    }

    /// Deliver an event to every started connection. Returns the number of
    /// handlers called.
    pub fn publish(&self, method: &str, args: &[Value]) -> usize {
        let connections = lock(&self.state).live();
        let mut delivered = 0;
        for connection in connections.iter().filter(|c| c.is_started()) {
            for handler in connection.handlers_for(method) {
                handler.call(args);
                delivered += 1;
            }
        }
        debug!(method, delivered, "Published event");
        delivered
    }

    /// Fail the next `n` transport starts.
    pub fn fail_next_starts(&self, n: u32) {
        lock(&self.state).fail_next_starts = n;
    }

    /// Fail every transport start until switched off.
    pub fn fail_all_starts(&self, fail: bool) {
        lock(&self.state).fail_all_starts = fail;
    }

    /// Make every transport start take `delay`.
    pub fn set_start_delay(&self, delay: Duration) {
        lock(&self.state).start_delay = delay;
    }

    /// Close every started connection from the server side. Returns the
    /// number of connections closed.
    pub fn drop_connections(&self, error: Option<TransportError>) -> usize {
        let connections = lock(&self.state).live();
        let mut dropped = 0;
        for connection in connections {
            if connection.close(error.clone()) {
                dropped += 1;
            }
        }
        debug!(dropped, ?error, "Dropped connections");
        dropped
    }

    /// Number of transport starts attempted, failed ones included.
    #[must_use]
    pub fn start_count(&self) -> usize {
        lock(&self.state).start_count
    }

    /// Urls and options of every connection built so far.
    #[must_use]
    pub fn builds(&self) -> Vec<(String, ConnectionOptions)> {
        lock(&self.state).builds.clone()
    }

    /// Journal of calls received by all connections.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        lock(&self.state).calls.clone()
    }

    /// Handlers attached under `method` across connections still alive.
    #[must_use]
    pub fn handlers(&self, method: &str) -> usize {
        let connections = lock(&self.state).live();
        connections.iter().map(|c| c.handlers_for(method).len()).sum()
    }

    /// Number of started connections.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        let connections = lock(&self.state).live();
        connections.iter().filter(|c| c.is_started()).count()
    }

    fn record(&self, call: Call) {
        lock(&self.state).calls.push(call);
    }
}

impl ConnectionBuilder for MemoryHub {
    fn build(&self, url: &str, options: &ConnectionOptions) -> Arc<dyn TransportConnection> {
        let mut state = lock(&self.state);
        state.next_id += 1;
        let id = state.next_id;

        let (close_tx, _) = broadcast::channel(4);
        let connection = Arc::new(MemoryConnection {
            id,
            hub: self.clone(),
            started: AtomicBool::new(false),
            handlers: Mutex::new(HashMap::new()),
            close_tx,
        });

        state.connections.push(Arc::downgrade(&connection));
        state.builds.push((url.to_string(), options.clone()));
        state.calls.push(Call::Build {
            connection: id,
            url: url.to_string(),
        });
        connection
    }
}

/// Connection to a [`MemoryHub`].
pub struct MemoryConnection {
    id: u64,
    hub: MemoryHub,
    started: AtomicBool,
    handlers: Mutex<HashMap<String, Vec<Handler>>>,
    close_tx: broadcast::Sender<Option<TransportError>>,
}

impl MemoryConnection {
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn handlers_for(&self, method: &str) -> Vec<Handler> {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(method)
            .cloned()
            .unwrap_or_default()
    }

    /// Mark closed and notify. False if the connection was not open.
    fn close(&self, error: Option<TransportError>) -> bool {
        if !self.started.swap(false, Ordering::SeqCst) {
            return false;
        }
        let _ = self.close_tx.send(error);
        true
    }

    fn ensure_started(&self) -> Result<(), TransportError> {
        if self.is_started() {
            Ok(())
        } else {
            Err(TransportError::NotStarted)
        }
    }
}

#[async_trait]
impl TransportConnection for MemoryConnection {
    async fn start(&self) -> Result<(), TransportError> {
        let (fail, delay) = {
            let mut state = lock(&self.hub.state);
            state.start_count += 1;
            state.calls.push(Call::Start { connection: self.id });
            let fail = state.fail_all_starts || state.fail_next_starts > 0;
            state.fail_next_starts = state.fail_next_starts.saturating_sub(1);
            (fail, state.start_delay)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fail {
            debug!(connection = self.id, "Start refused");
            return Err(TransportError::Io("connection refused".into()));
        }

        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<(), TransportError> {
        self.hub.record(Call::Stop { connection: self.id });
        self.close(None);
        Ok(())
    }

    async fn send(&self, method: &str, args: Vec<Value>) -> Result<(), TransportError> {
        self.ensure_started()?;
        let target = lock(&self.hub.state).methods.get(method).cloned();
        if let Some(target) = target {
            let _ = target(&args);
        }
        self.hub.record(Call::Send {
            connection: self.id,
            method: method.to_string(),
            args,
        });
        Ok(())
    }

    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, TransportError> {
        self.ensure_started()?;
        let target = lock(&self.hub.state).methods.get(method).cloned();
        let result = match target {
            Some(target) => target(&args),
            None => Err(TransportError::Remote(format!(
                "Method '{method}' does not exist"
            ))),
        };
        self.hub.record(Call::Invoke {
            connection: self.id,
            method: method.to_string(),
            args,
        });
        result
    }

    fn on(&self, method: &str, handler: Handler) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(method.to_string())
            .or_default()
            .push(handler);
        self.hub.record(Call::On {
            connection: self.id,
            method: method.to_string(),
        });
    }

    fn off(&self, method: &str, handler: &Handler) {
        {
            let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(list) = handlers.get_mut(method) {
                list.retain(|h| h != handler);
                if list.is_empty() {
                    handlers.remove(method);
                }
            }
        }
        self.hub.record(Call::Off {
            connection: self.id,
            method: method.to_string(),
        });
    }

    fn closed(&self) -> CloseReceiver {
        self.close_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    use super::*;

    fn build(hub: &MemoryHub) -> Arc<dyn TransportConnection> {
        hub.build("memory://hub/signalr", &ConnectionOptions::default())
    }

    #[tokio::test]
    async fn test_invoke_routes_to_method() {
        let hub = MemoryHub::new();
        hub.handle("add", |args| {
            let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
            Ok(json!(sum))
        });

        let conn = build(&hub);
        assert_ok!(conn.start().await);
        assert_eq!(assert_ok!(conn.invoke("add", vec![json!(2), json!(3)]).await), json!(5));
        assert!(matches!(
            conn.invoke("missing", vec![]).await,
            Err(TransportError::Remote(_))
        ));
    }

    #[tokio::test]
    async fn test_calls_require_started_connection() {
        let hub = MemoryHub::new();
        let conn = build(&hub);
        assert_eq!(conn.send("x", vec![]).await, Err(TransportError::NotStarted));
        assert_eq!(conn.invoke("x", vec![]).await, Err(TransportError::NotStarted));
    }

    #[tokio::test]
    async fn test_fail_next_starts() {
        let hub = MemoryHub::new();
        hub.fail_next_starts(2);

        assert_err!(build(&hub).start().await);
        assert_err!(build(&hub).start().await);
        let conn = build(&hub);
        assert_ok!(conn.start().await);

        assert_eq!(hub.start_count(), 3);
        assert_eq!(hub.open_connections(), 1);
        assert_eq!(hub.builds().len(), 3);
    }

    #[tokio::test]
    async fn test_publish_reaches_started_connections() {
        let hub = MemoryHub::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let handler = Handler::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let idle = build(&hub);
        idle.on("tick", handler.clone());
        let conn = build(&hub);
        conn.on("tick", handler.clone());
        conn.start().await.unwrap();

        assert_eq!(hub.publish("tick", &[json!(1)]), 1);
        conn.off("tick", &handler);
        assert_eq!(hub.publish("tick", &[json!(2)]), 0);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_and_stop_notify_close() {
        let hub = MemoryHub::new();
        let conn = build(&hub);
        let mut closed = conn.closed();
        conn.start().await.unwrap();

        let error = TransportError::Closed("server going away".into());
        assert_eq!(hub.drop_connections(Some(error.clone())), 1);
        assert_eq!(closed.recv().await.unwrap(), Some(error));
        // Already closed.
        assert_eq!(hub.drop_connections(None), 0);

        let conn = build(&hub);
        let mut closed = conn.closed();
        conn.start().await.unwrap();
        conn.stop().await.unwrap();
        assert_eq!(closed.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_dropped_connections_are_forgotten() {
        let hub = MemoryHub::new();
        let conn = build(&hub);
        conn.on("tick", Handler::new(|_| {}));
        assert_eq!(hub.handlers("tick"), 1);
        drop(conn);
        assert_eq!(hub.handlers("tick"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_delay() {
        let hub = MemoryHub::new();
        hub.set_start_delay(Duration::from_millis(100));
        let started = tokio::time::Instant::now();
        build(&hub).start().await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_millis(100));
    }
}
