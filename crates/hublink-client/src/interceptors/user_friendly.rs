use std::sync::Arc;

use async_trait::async_trait;
use hublink_core::{ClientError, RealtimeClient};
use serde_json::Value;

use super::Interceptor;

/// Translates server message keys for display.
pub trait Localizer: Send + Sync {
    fn localize(&self, message: &str, details: Option<&str>) -> String;
}

/// Shows error messages to the user.
pub trait Notifier: Send + Sync {
    fn error(&self, message: &str);
}

/// Returns messages untranslated.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityLocalizer;

impl Localizer for IdentityLocalizer {
    fn localize(&self, message: &str, details: Option<&str>) -> String {
        match details {
            Some(details) if !details.is_empty() => format!("{message} ({details})"),
            _ => message.to_string(),
        }
    }
}

/// Writes user-facing errors to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn error(&self, message: &str) {
        tracing::error!(target: "hublink::notify", "{message}");
    }
}

/// Presents user-friendly server exceptions and rethrows them.
#[derive(Clone)]
pub struct UserFriendlyInterceptor {
    localizer: Arc<dyn Localizer>,
    notifier: Arc<dyn Notifier>,
}

impl UserFriendlyInterceptor {
    #[must_use]
    pub fn new(localizer: Arc<dyn Localizer>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            localizer,
            notifier,
        }
    }
}

#[async_trait]
impl Interceptor for UserFriendlyInterceptor {
    async fn invoke(
        &self,
        next: &dyn RealtimeClient,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, ClientError> {
        next.invoke(method, args).await.inspect_err(|err| {
            if let Some(exception) = err.remote_exception().filter(|e| e.is_user_friendly()) {
                let message = self.localizer.localize(
                    exception.message.as_deref().unwrap_or_default(),
                    exception.details.as_deref(),
                );
                self.notifier.error(&message);
            }
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
    use crate::{ExceptionUnwrapInterceptor, InterceptorChain};

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl Notifier for Recorder {
        fn error(&self, message: &str) {
            self.0.lock().unwrap().push(message.to_string());
        }
    }

    struct Upper;

    impl Localizer for Upper {
        fn localize(&self, message: &str, _details: Option<&str>) -> String {
            message.to_uppercase()
        }
    }

    #[tokio::test]
    async fn test_notifies_and_rethrows() {
        let hub = MemoryHub::new();
        hub.handle("pay", |_| {
            Ok(json!({"exception": {
                "type": "UserFriendlyException",
                "message": "card.declined",
                "details": "insufficient funds"
            }}))
        });
        hub.handle("load", |_| Ok(json!({"exception": {"type": "Exception", "message": "x"}})));

        let notifier = Arc::new(Recorder::default());
        let client = InterceptorChain::new()
            .with(ExceptionUnwrapInterceptor)
            .with(UserFriendlyInterceptor::new(Arc::new(Upper), notifier.clone()))
            .wrap(Arc::new(ConnectionOrchestrator::new(Arc::new(hub))));
        client.start("memory://hub", None).await.unwrap();

        let err = client.invoke("pay", vec![]).await.unwrap_err();
        assert!(err.remote_exception().is_some_and(|e| e.is_user_friendly()));
        assert_eq!(*notifier.0.lock().unwrap(), ["CARD.DECLINED"]);

        // Other exceptions are rethrown without a notification.
        assert!(client.invoke("load", vec![]).await.is_err());
        assert_eq!(notifier.0.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_identity_localizer() {
        assert_eq!(IdentityLocalizer.localize("a", None), "a");
        assert_eq!(IdentityLocalizer.localize("a", Some("b")), "a (b)");
    }
}
