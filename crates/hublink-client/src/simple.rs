//! Client that connects on first use.

use std::sync::Arc;

use hublink_core::{
    ClientError, ConnectionOptionsPatch, ConnectionState, Handler, RealtimeClient, Unsubscribe,
};
use serde_json::Value;
use tokio::sync::OnceCell;

/// Starts its session the first time a call needs it.
///
/// The start runs at most once successfully; a failed start is retried by
/// the next call. A session someone else already started is reused. Calls
/// then wait for `Connected` before being forwarded.
pub struct SimpleClient {
    client: Arc<dyn RealtimeClient>,
    url: String,
    options: Option<ConnectionOptionsPatch>,
    started: OnceCell<()>,
}

impl SimpleClient {
    #[must_use]
    pub fn new(
        client: Arc<dyn RealtimeClient>,
        url: impl Into<String>,
        options: Option<ConnectionOptionsPatch>,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            options,
            started: OnceCell::new(),
        }
    }

    /// The wrapped client.
    #[must_use]
    pub fn client(&self) -> &Arc<dyn RealtimeClient> {
        &self.client
    }

    async fn connection(&self) -> Result<&dyn RealtimeClient, ClientError> {
        self.started
            .get_or_try_init(|| async {
                if matches!(
                    self.client.state(),
                    ConnectionState::Stopped | ConnectionState::Error
                ) {
                    self.client.start(&self.url, self.options.clone()).await?;
                }
                Ok::<_, ClientError>(())
            })
            .await?;
        self.client.wait_connected().await;
        Ok(self.client.as_ref())
    }

    /// # Errors
    /// Returns error if the session cannot start or the call fails.
    pub async fn send(&self, method: &str, args: Vec<Value>) -> Result<(), ClientError> {
        self.connection().await?.send(method, args).await
    }

    /// # Errors
    /// Returns error if the session cannot start or the call fails.
    pub async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, ClientError> {
        self.connection().await?.invoke(method, args).await
    }

    /// # Errors
    /// `Argument` on an empty method name, `AlreadyExists` on a duplicate.
    pub fn on(&self, method: &str, handler: Handler) -> Result<(), ClientError> {
        self.client.on(method, handler)
    }

    pub fn off(&self, target: Unsubscribe) {
        self.client.off(target);
    }

    /// # Errors
    /// Returns error if the session cannot stop from its current state.
    pub async fn stop(&self) -> Result<(), ClientError> {
        self.client.stop().await
    }
}
