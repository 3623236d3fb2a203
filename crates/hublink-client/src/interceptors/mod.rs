//! Interceptors layered around a [`RealtimeClient`].
//!
//! An [`Interceptor`] only sees `send` and `invoke`; [`Intercepted`] wraps it
//! together with the next client so that every layer is a full
//! `RealtimeClient`. [`InterceptorChain`] composes layers innermost first.

mod authorization;
mod exception;
mod logging;
mod user_friendly;

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use hublink_core::{
    ClientError, ConnectionOptionsPatch, ConnectionState, Handler, RealtimeClient, Unsubscribe,
};
use serde_json::Value;

pub use authorization::{AuthorizationInterceptor, SessionExpiry, TracingSessionExpiry};
pub use exception::ExceptionUnwrapInterceptor;
pub use logging::LoggingInterceptor;
pub use user_friendly::{
    IdentityLocalizer, Localizer, Notifier, TracingNotifier, UserFriendlyInterceptor,
};

/// Cross-cutting behavior around hub calls.
///
/// Both methods default to forwarding to `next` untouched.
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn send(
        &self,
        next: &dyn RealtimeClient,
        method: &str,
        args: Vec<Value>,
    ) -> Result<(), ClientError> {
        next.send(method, args).await
    }

    async fn invoke(
        &self,
        next: &dyn RealtimeClient,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, ClientError> {
        next.invoke(method, args).await
    }
}

/// A client with one interceptor in front of it.
pub struct Intercepted {
    next: Arc<dyn RealtimeClient>,
    interceptor: Arc<dyn Interceptor>,
}

impl Intercepted {
    #[must_use]
    pub fn new(next: Arc<dyn RealtimeClient>, interceptor: Arc<dyn Interceptor>) -> Self {
        Self { next, interceptor }
    }
}

#[async_trait]
impl RealtimeClient for Intercepted {
    fn state(&self) -> ConnectionState {
        self.next.state()
    }

    fn state_changes(&self) -> BoxStream<'static, ConnectionState> {
        self.next.state_changes()
    }

    fn entered(&self, state: ConnectionState) -> BoxStream<'static, ConnectionState> {
        self.next.entered(state)
    }

    fn errors(&self) -> BoxStream<'static, ClientError> {
        self.next.errors()
    }

    async fn wait_connected(&self) {
        self.next.wait_connected().await;
    }

    async fn start(
        &self,
        url: &str,
        options: Option<ConnectionOptionsPatch>,
    ) -> Result<(), ClientError> {
        self.next.start(url, options).await
    }

    async fn restart(
        &self,
        url: Option<&str>,
        options: Option<ConnectionOptionsPatch>,
    ) -> Result<(), ClientError> {
        self.next.restart(url, options).await
    }

    async fn stop(&self) -> Result<(), ClientError> {
        self.next.stop().await
    }

    async fn send(&self, method: &str, args: Vec<Value>) -> Result<(), ClientError> {
        self.interceptor.send(self.next.as_ref(), method, args).await
    }

    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, ClientError> {
        self.interceptor.invoke(self.next.as_ref(), method, args).await
    }

    fn on(&self, method: &str, handler: Handler) -> Result<(), ClientError> {
        self.next.on(method, handler)
    }

    fn off(&self, target: Unsubscribe) {
        self.next.off(target);
    }
}

/// Ordered interceptor list. The first layer added sits closest to the
/// wrapped client.
#[derive(Default, Clone)]
pub struct InterceptorChain {
    layers: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a layer outside the ones already added.
    #[must_use]
    pub fn with(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.layers.push(Arc::new(interceptor));
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Wrap `client` in every layer.
    #[must_use]
    pub fn wrap(&self, client: Arc<dyn RealtimeClient>) -> Arc<dyn RealtimeClient> {
        self.layers.iter().fold(client, |next, layer| {
            Arc::new(Intercepted::new(next, Arc::clone(layer)))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use hublink_session::ConnectionOrchestrator;
    use hublink_transport::MemoryHub;
    use serde_json::json;

    use super::*;

    struct Tag {
        name: &'static str,
        seen: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Interceptor for Tag {
        async fn invoke(
            &self,
            next: &dyn RealtimeClient,
            method: &str,
            args: Vec<Value>,
        ) -> Result<Value, ClientError> {
            self.seen.lock().unwrap().push(self.name);
            next.invoke(method, args).await
        }
    }

    #[tokio::test]
    async fn test_outer_layers_run_first() {
        let hub = MemoryHub::new();
        hub.handle("ping", |_| Ok(json!("pong")));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let chain = InterceptorChain::new()
            .with(Tag { name: "inner", seen: Arc::clone(&seen) })
            .with(Tag { name: "outer", seen: Arc::clone(&seen) });
        let client = chain.wrap(Arc::new(ConnectionOrchestrator::new(Arc::new(hub))));

        client.start("memory://hub", None).await.unwrap();
        assert_eq!(client.invoke("ping", vec![]).await.unwrap(), json!("pong"));
        assert_eq!(*seen.lock().unwrap(), ["outer", "inner"]);
    }

    #[tokio::test]
    async fn test_layers_delegate_lifecycle() {
        let hub = MemoryHub::new();
        let client = InterceptorChain::new()
            .with(LoggingInterceptor)
            .wrap(Arc::new(ConnectionOrchestrator::new(Arc::new(hub.clone()))));

        client.on("tick", Handler::new(|_| {})).unwrap();
        client.start("memory://hub", None).await.unwrap();
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(hub.handlers("tick"), 1);

        client.off(Unsubscribe::Method("tick".into()));
        client.stop().await.unwrap();
        assert_eq!(hub.handlers("tick"), 0);
        assert_eq!(client.state(), ConnectionState::Stopped);
    }
}
