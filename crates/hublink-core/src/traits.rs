//! Core traits for transports and realtime clients.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::{ClientError, ConnectionOptions, ConnectionOptionsPatch, ConnectionState, TransportError};

/// Callback invoked with the arguments of a hub event.
pub type HandlerFn = dyn Fn(&[Value]) + Send + Sync;

/// Shared event handler.
///
/// Identity is by reference: clones compare equal, two handlers built from
/// separate closures never do.
#[derive(Clone)]
pub struct Handler(Arc<HandlerFn>);

impl Handler {
    pub fn new(f: impl Fn(&[Value]) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Invoke the handler.
    pub fn call(&self, args: &[Value]) {
        (self.0)(args);
    }
}

impl PartialEq for Handler {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Handler {}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler({:p})", Arc::as_ptr(&self.0).cast::<()>())
    }
}

/// Receiver of close notifications. `None` means the transport closed
/// without reporting an error.
pub type CloseReceiver = broadcast::Receiver<Option<TransportError>>;

/// One connection attempt's wire handle.
///
/// A connection is built fresh for every attempt and is never restarted
/// once it has been started.
#[async_trait]
pub trait TransportConnection: Send + Sync {
    /// Open the connection.
    async fn start(&self) -> Result<(), TransportError>;

    /// Close the connection.
    async fn stop(&self) -> Result<(), TransportError>;

    /// Fire-and-forget hub method call.
    async fn send(&self, method: &str, args: Vec<Value>) -> Result<(), TransportError>;

    /// Request/response hub method call.
    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, TransportError>;

    /// Attach an event handler.
    fn on(&self, method: &str, handler: Handler);

    /// Detach an event handler.
    fn off(&self, method: &str, handler: &Handler);

    /// Subscribe to close notifications.
    fn closed(&self) -> CloseReceiver;
}

/// Factory producing one transport connection per connect attempt.
pub trait ConnectionBuilder: Send + Sync {
    /// Build a connection for `url` configured by `options`.
    fn build(&self, url: &str, options: &ConnectionOptions) -> Arc<dyn TransportConnection>;
}

/// What `off` should detach.
#[derive(Debug, Clone)]
pub enum Unsubscribe {
    /// Every handler under every method.
    All,
    /// Every handler under one method.
    Method(String),
    /// One handler under one method.
    Handler(String, Handler),
}

/// Public contract of a realtime client.
///
/// Implemented by the connection orchestrator and by every interceptor
/// wrapped around it.
#[async_trait]
pub trait RealtimeClient: Send + Sync {
    /// Current state.
    fn state(&self) -> ConnectionState;

    /// State changes, starting with the current state.
    fn state_changes(&self) -> BoxStream<'static, ConnectionState>;

    /// Emits every time `state` is entered from now on.
    fn entered(&self, state: ConnectionState) -> BoxStream<'static, ConnectionState>;

    /// Errors raised by the session. Only non-empty values are emitted.
    fn errors(&self) -> BoxStream<'static, ClientError>;

    /// Resolves once the session is connected.
    async fn wait_connected(&self);

    /// Start a session.
    ///
    /// # Errors
    /// `Argument` on an empty url, `InvalidOperation` unless stopped,
    /// `UnrecoverableTimeout` when every connection attempt failed.
    async fn start(
        &self,
        url: &str,
        options: Option<ConnectionOptionsPatch>,
    ) -> Result<(), ClientError>;

    /// Stop, then start again with the given or the previous url/options.
    ///
    /// # Errors
    /// Same as `stop` and `start`.
    async fn restart(
        &self,
        url: Option<&str>,
        options: Option<ConnectionOptionsPatch>,
    ) -> Result<(), ClientError>;

    /// Stop the session. No-op when already stopped.
    ///
    /// # Errors
    /// `InvalidOperation` if the session cannot stop from its current state.
    async fn stop(&self) -> Result<(), ClientError>;

    /// Wait for the session to connect, then call a hub method without
    /// waiting for a result.
    ///
    /// # Errors
    /// Returns error if the transport rejects the call.
    async fn send(&self, method: &str, args: Vec<Value>) -> Result<(), ClientError>;

    /// Wait for the session to connect, then call a hub method and return
    /// its response.
    ///
    /// # Errors
    /// Returns error if the transport rejects the call.
    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, ClientError>;

    /// Register an event handler. Survives reconnects.
    ///
    /// # Errors
    /// `Argument` on an empty method name, `AlreadyExists` on a duplicate.
    fn on(&self, method: &str, handler: Handler) -> Result<(), ClientError>;

    /// Unregister event handlers.
    fn off(&self, target: Unsubscribe);

    fn starting(&self) -> BoxStream<'static, ConnectionState> {
        self.entered(ConnectionState::Starting)
    }

    fn stopping(&self) -> BoxStream<'static, ConnectionState> {
        self.entered(ConnectionState::Stopping)
    }

    fn stopped(&self) -> BoxStream<'static, ConnectionState> {
        self.entered(ConnectionState::Stopped)
    }

    fn connecting(&self) -> BoxStream<'static, ConnectionState> {
        self.entered(ConnectionState::Connecting)
    }

    fn reconnecting(&self) -> BoxStream<'static, ConnectionState> {
        self.entered(ConnectionState::Reconnecting)
    }

    fn connected(&self) -> BoxStream<'static, ConnectionState> {
        self.entered(ConnectionState::Connected)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_handler_identity() {
        let a = Handler::new(|_| {});
        let b = Handler::new(|_| {});
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn test_handler_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handler = Handler::new(move |args| {
            counter.fetch_add(args.len(), Ordering::SeqCst);
        });
        handler.call(&[Value::Null, Value::Bool(true)]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
