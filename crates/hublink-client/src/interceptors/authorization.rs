use std::sync::Arc;

use async_trait::async_trait;
use hublink_core::{ClientError, RealtimeClient, RemoteException};
use serde_json::Value;

use super::Interceptor;

/// Reacts to the server reporting that the session lost its authorization.
pub trait SessionExpiry: Send + Sync {
    /// Clear local auth state and send the user back to login.
    fn on_session_expired(&self);
}

impl<F> SessionExpiry for F
where
    F: Fn() + Send + Sync,
{
    fn on_session_expired(&self) {
        self();
    }
}

/// Only logs the expiry.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSessionExpiry;

impl SessionExpiry for TracingSessionExpiry {
    fn on_session_expired(&self) {
        tracing::warn!("Hub session is no longer authorized");
    }
}

/// Withholds invoke responses carrying an authorization failure and fires
/// the [`SessionExpiry`] hook instead.
#[derive(Clone)]
pub struct AuthorizationInterceptor {
    expiry: Arc<dyn SessionExpiry>,
}

impl AuthorizationInterceptor {
    #[must_use]
    pub fn new(expiry: Arc<dyn SessionExpiry>) -> Self {
        Self { expiry }
    }
}

#[async_trait]
impl Interceptor for AuthorizationInterceptor {
    async fn invoke(
        &self,
        next: &dyn RealtimeClient,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, ClientError> {
        let response = next.invoke(method, args).await?;
        if RemoteException::from_response(&response)
            .is_some_and(|exception| exception.is_authorization_failure())
        {
            tracing::warn!(method, "Invocation rejected as unauthorized");
            self.expiry.on_session_expired();
            return Err(ClientError::Unauthorized {
                method: method.to_string(),
            });
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use hublink_session::ConnectionOrchestrator;
    use hublink_transport::MemoryHub;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::InterceptorChain;

    async fn client(hub: &MemoryHub, expired: Arc<AtomicUsize>) -> Arc<dyn RealtimeClient> {
        let expiry = move || {
            expired.fetch_add(1, Ordering::SeqCst);
        };
        let client = InterceptorChain::new()
            .with(AuthorizationInterceptor::new(Arc::new(expiry)))
            .wrap(Arc::new(ConnectionOrchestrator::new(Arc::new(hub.clone()))));
        client.start("memory://hub", None).await.unwrap();
        client
    }

    #[tokio::test]
    async fn test_token_expiry_is_suppressed() {
        let hub = MemoryHub::new();
        hub.handle("orders", |_| {
            Ok(json!({"exception": {"type": "AuthorizeTokenExpiredException"}}))
        });
        let expired = Arc::new(AtomicUsize::new(0));
        let client = client(&hub, Arc::clone(&expired)).await;

        let err = assert_err!(client.invoke("orders", vec![]).await);
        assert_eq!(
            err,
            ClientError::Unauthorized {
                method: "orders".into()
            }
        );
        assert_eq!(expired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_other_responses_pass() {
        let hub = MemoryHub::new();
        hub.handle("orders", |_| Ok(json!({"exception": {"type": "Exception"}})));
        hub.handle("count", |_| Ok(json!(3)));
        let expired = Arc::new(AtomicUsize::new(0));
        let client = client(&hub, Arc::clone(&expired)).await;

        assert_ok!(client.invoke("orders", vec![]).await);
        assert_eq!(assert_ok!(client.invoke("count", vec![]).await), json!(3));
        assert_eq!(expired.load(Ordering::SeqCst), 0);
    }
}
