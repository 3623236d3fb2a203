use async_trait::async_trait;
use hublink_core::{ClientError, RealtimeClient, RemoteException};
use serde_json::Value;

use super::Interceptor;

/// Turns exceptions the server encoded in an invoke response into
/// `ClientError::TargetInvocation`, so callers see one failure shape.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExceptionUnwrapInterceptor;

#[async_trait]
impl Interceptor for ExceptionUnwrapInterceptor {
    async fn invoke(
        &self,
        next: &dyn RealtimeClient,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, ClientError> {
        let response = next.invoke(method, args.clone()).await?;
        match RemoteException::from_response(&response) {
            Some(exception) => Err(ClientError::TargetInvocation {
                method: method.to_string(),
                args,
                exception,
            }),
            None => Ok(response),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hublink_session::ConnectionOrchestrator;
    use hublink_transport::MemoryHub;
    use serde_json::json;

    use super::*;
    use crate::InterceptorChain;

    #[tokio::test]
    async fn test_embedded_exception_becomes_error() {
        let hub = MemoryHub::new();
        hub.handle("load", |_| {
            Ok(json!({"exception": {"type": "ValidationException", "message": "bad id"}}))
        });
        hub.handle("plain", |_| Ok(json!({"exception": null, "value": 7})));
        let client = InterceptorChain::new()
            .with(ExceptionUnwrapInterceptor)
            .wrap(Arc::new(ConnectionOrchestrator::new(Arc::new(hub))));
        client.start("memory://hub", None).await.unwrap();

        let err = client.invoke("load", vec![json!(42)]).await.unwrap_err();
        let ClientError::TargetInvocation {
            method,
            args,
            exception,
        } = err
        else {
            panic!("expected TargetInvocation, got {err}");
        };
        assert_eq!(method, "load");
        assert_eq!(args, vec![json!(42)]);
        assert_eq!(exception.kind, "ValidationException");
        assert_eq!(exception.message.as_deref(), Some("bad id"));

        assert_eq!(
            client.invoke("plain", vec![]).await.unwrap(),
            json!({"exception": null, "value": 7})
        );
    }
}
