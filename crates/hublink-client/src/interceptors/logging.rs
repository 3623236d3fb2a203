use async_trait::async_trait;
use hublink_core::{ClientError, RealtimeClient};
use serde_json::Value;
use uuid::Uuid;

use super::Interceptor;

/// Tags every call with an execution id and logs failures.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingInterceptor;

fn log_failure(method: &str, execution_id: Uuid, args: &[Value], err: &ClientError) {
    tracing::error!(method, %execution_id, ?args, %err, "Hub call failed");
}

#[async_trait]
impl Interceptor for LoggingInterceptor {
    async fn send(
        &self,
        next: &dyn RealtimeClient,
        method: &str,
        args: Vec<Value>,
    ) -> Result<(), ClientError> {
        let execution_id = Uuid::new_v4();
        tracing::trace!(method, %execution_id, ?args, "send");
        let logged = args.clone();
        next.send(method, args)
            .await
            .inspect_err(|err| log_failure(method, execution_id, &logged, err))
    }

    async fn invoke(
        &self,
        next: &dyn RealtimeClient,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, ClientError> {
        let execution_id = Uuid::new_v4();
        tracing::trace!(method, %execution_id, ?args, "invoke");
        let logged = args.clone();
        let result = next
            .invoke(method, args)
            .await
            .inspect_err(|err| log_failure(method, execution_id, &logged, err))?;
        tracing::trace!(method, %execution_id, response = %result, "invoke completed");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use hublink_core::TransportError;
    use hublink_session::ConnectionOrchestrator;
    use hublink_transport::MemoryHub;
    use serde_json::json;

    use super::*;
    use crate::InterceptorChain;

    #[tokio::test]
    async fn test_passes_results_and_errors_through() {
        let hub = MemoryHub::new();
        hub.handle("ok", |_| Ok(json!(1)));
        hub.handle("fail", |_| Err(TransportError::Remote("boom".into())));
        let client = InterceptorChain::new()
            .with(LoggingInterceptor)
            .wrap(Arc::new(ConnectionOrchestrator::new(Arc::new(hub))));
        client.start("memory://hub", None).await.unwrap();

        assert_eq!(client.invoke("ok", vec![]).await.unwrap(), json!(1));
        assert_eq!(
            client.invoke("fail", vec![json!("x")]).await.unwrap_err(),
            ClientError::Transport(TransportError::Remote("boom".into()))
        );
        client.send("ok", vec![]).await.unwrap();
    }
}
