//! Client construction.

use std::sync::Arc;

use hublink_core::{ConnectionBuilder, RealtimeClient};
use hublink_session::ConnectionOrchestrator;

use crate::interceptors::{
    AuthorizationInterceptor, ExceptionUnwrapInterceptor, IdentityLocalizer, InterceptorChain,
    Localizer, LoggingInterceptor, Notifier, SessionExpiry, TracingNotifier, TracingSessionExpiry,
    UserFriendlyInterceptor,
};

/// Builds realtime clients wrapped in the standard interceptor chain:
/// logging, authorization, exception unwrapping, then user-facing errors
/// outermost.
#[derive(Clone)]
pub struct ClientFactory {
    builder: Arc<dyn ConnectionBuilder>,
    expiry: Arc<dyn SessionExpiry>,
    localizer: Arc<dyn Localizer>,
    notifier: Arc<dyn Notifier>,
}

impl ClientFactory {
    /// Factory with log-only collaborators.
    #[must_use]
    pub fn new(builder: Arc<dyn ConnectionBuilder>) -> Self {
        Self {
            builder,
            expiry: Arc::new(TracingSessionExpiry),
            localizer: Arc::new(IdentityLocalizer),
            notifier: Arc::new(TracingNotifier),
        }
    }

    #[must_use]
    pub fn with_session_expiry(mut self, expiry: Arc<dyn SessionExpiry>) -> Self {
        self.expiry = expiry;
        self
    }

    #[must_use]
    pub fn with_localizer(mut self, localizer: Arc<dyn Localizer>) -> Self {
        self.localizer = localizer;
        self
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// The chain `create` applies.
    #[must_use]
    pub fn chain(&self) -> InterceptorChain {
        InterceptorChain::new()
            .with(LoggingInterceptor)
            .with(AuthorizationInterceptor::new(Arc::clone(&self.expiry)))
            .with(ExceptionUnwrapInterceptor)
            .with(UserFriendlyInterceptor::new(
                Arc::clone(&self.localizer),
                Arc::clone(&self.notifier),
            ))
    }

    /// Create a stopped client.
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime.
    #[must_use]
    pub fn create(&self) -> Arc<dyn RealtimeClient> {
        let orchestrator = ConnectionOrchestrator::new(Arc::clone(&self.builder));
        self.chain().wrap(Arc::new(orchestrator))
    }
}
