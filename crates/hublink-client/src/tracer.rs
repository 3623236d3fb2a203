//! Remote log streaming.
//!
//! [`LogTracer`] connects to a server's log hub, subscribes to the default
//! log group each time the session connects and re-emits every received
//! entry through `tracing`. The timestamp of the newest entry seen is kept
//! in an [`OffsetStore`] so that a reconnect only replays newer entries.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use chrono::{DateTime, Utc};
use futures::{StreamExt, stream::BoxStream};
use hublink_core::{
    ClientError, ConnectionOptionsPatch, ConnectionState, Handler, RealtimeClient,
    TransportKinds, Unsubscribe, url::origin_of,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;

/// Hub path serving log streams.
pub const LOG_HUB_PATH: &str = "/signalr-log";
/// Live entries.
pub const ON_EVENT: &str = "OnEvent";
/// Entries logged while this client was disconnected.
pub const ON_OFFLINE_EVENTS: &str = "OnOfflineEvents";
/// Group subscription request.
pub const SUBSCRIBE_METHOD: &str = "SubscribeToGroupWithMessageOffset";

const DEFAULT_GROUP: &str = "DefaultGroup";
const OFFLINE_LOG_LEVEL: &str = "Warn";

/// Log tracer error.
#[derive(Debug, thiserror::Error)]
pub enum TracerError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("Invalid log entry: {0}")]
    InvalidEntry(#[from] serde_json::Error),
}

/// Persists the newest received entry timestamp per tracer.
pub trait OffsetStore: Send + Sync {
    fn load(&self, key: &str) -> Option<DateTime<Utc>>;
    fn save(&self, key: &str, timestamp: DateTime<Utc>);
}

/// In-memory offset store. Offsets are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryOffsetStore {
    offsets: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemoryOffsetStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl OffsetStore for MemoryOffsetStore {
    fn load(&self, key: &str) -> Option<DateTime<Utc>> {
        self.offsets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
    }

    fn save(&self, key: &str, timestamp: DateTime<Utc>) {
        self.offsets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), timestamp);
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogEntry {
    formatted_event: String,
    logging_event: LoggingEvent,
}

#[derive(Debug, Deserialize)]
struct LoggingEvent {
    level: LogLevel,
    #[serde(rename = "timeStamp")]
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct LogLevel {
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeRequest<'a> {
    group_name: &'a str,
    offline_log_level: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_received_entry_timestamp: Option<DateTime<Utc>>,
}

/// Receiving side shared with the event handlers.
struct LogSink {
    name: String,
    key: String,
    store: Arc<dyn OffsetStore>,
}

impl LogSink {
    fn new(name: &str, store: Arc<dyn OffsetStore>) -> Self {
        Self {
            name: name.to_string(),
            key: format!("{}_lastReceivedLogEntryTimestamp", name.replace(' ', "_")),
            store,
        }
    }

    fn format(&self, message: &str) -> String {
        format!("[{}]: {message}", self.name)
    }

    fn subscribe_request(&self) -> Result<Value, TracerError> {
        let request = SubscribeRequest {
            group_name: DEFAULT_GROUP,
            offline_log_level: OFFLINE_LOG_LEVEL,
            last_received_entry_timestamp: self.store.load(&self.key),
        };
        Ok(serde_json::to_value(request)?)
    }

    /// Record `timestamp` if it is newer than the stored offset.
    fn advance(&self, timestamp: DateTime<Utc>) -> bool {
        if self
            .store
            .load(&self.key)
            .is_some_and(|current| current >= timestamp)
        {
            return false;
        }
        self.store.save(&self.key, timestamp);
        true
    }

    /// Emit one entry. Returns false if it was already seen.
    fn record(&self, raw: &Value, offline: bool) -> Result<bool, TracerError> {
        let entry = LogEntry::deserialize(raw)?;
        if !self.advance(entry.logging_event.timestamp) {
            return Ok(false);
        }

        let level = entry.logging_event.level.name.as_str();
        let message = if offline {
            self.format(&format!("OFFLINE {level}: {}", entry.formatted_event))
        } else {
            self.format(&format!("{level}: {}", entry.formatted_event))
        };
        match level {
            "ERROR" | "FATAL" => tracing::error!(target: "hublink::remote_log", "{message}"),
            "WARN" => tracing::warn!(target: "hublink::remote_log", "{message}"),
            "INFO" => tracing::info!(target: "hublink::remote_log", "{message}"),
            _ => tracing::debug!(target: "hublink::remote_log", "{message}"),
        }
        Ok(true)
    }

    fn on_event(&self, args: &[Value]) {
        for raw in args {
            if let Err(e) = self.record(raw, false) {
                tracing::warn!("{}", self.format(&format!("dropped log entry: {e}")));
            }
        }
    }

    fn on_offline_events(&self, args: &[Value]) {
        let entries = args.iter().filter_map(Value::as_array).flatten();
        for raw in entries {
            if let Err(e) = self.record(raw, true) {
                tracing::warn!("{}", self.format(&format!("dropped log entry: {e}")));
            }
        }
    }
}

/// Streams a server's log entries into local `tracing` output.
pub struct LogTracer {
    client: Arc<dyn RealtimeClient>,
    sink: Arc<LogSink>,
    handlers: [(&'static str, Handler); 2],
    subscription: Mutex<Option<JoinHandle<()>>>,
}

impl LogTracer {
    /// Register the log handlers on `client` and subscribe to the log group
    /// on every connect.
    ///
    /// # Errors
    /// Returns error if the log handlers cannot be registered.
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime.
    pub fn new(
        name: &str,
        client: Arc<dyn RealtimeClient>,
        store: Arc<dyn OffsetStore>,
    ) -> Result<Self, TracerError> {
        let sink = Arc::new(LogSink::new(name, store));

        let events = Arc::clone(&sink);
        let offline = Arc::clone(&sink);
        let handlers = [
            (ON_EVENT, Handler::new(move |args| events.on_event(args))),
            (
                ON_OFFLINE_EVENTS,
                Handler::new(move |args| offline.on_offline_events(args)),
            ),
        ];
        for (method, handler) in &handlers {
            client.on(method, handler.clone())?;
        }

        let subscription = tokio::spawn(subscribe_on_connect(
            client.connected(),
            Arc::clone(&client),
            Arc::clone(&sink),
        ));

        Ok(Self {
            client,
            sink,
            handlers,
            subscription: Mutex::new(Some(subscription)),
        })
    }

    /// Connect to the log hub of the server at `base_url`. Only the scheme
    /// and authority of `base_url` are used.
    ///
    /// # Errors
    /// `Argument` if `base_url` is not absolute, otherwise any start failure.
    pub async fn start(&self, base_url: &str) -> Result<(), TracerError> {
        let url = log_url(base_url)?;
        let options = ConnectionOptionsPatch::default()
            .transport(TransportKinds::WEB_SOCKETS)
            .skip_negotiation(true);
        self.client.start(&url, Some(options)).await?;
        Ok(())
    }

    /// # Errors
    /// Returns error if the session cannot stop from its current state.
    pub async fn stop(&self) -> Result<(), TracerError> {
        Ok(self.client.stop().await?)
    }

    /// Timestamp of the newest entry received so far.
    #[must_use]
    pub fn last_received(&self) -> Option<DateTime<Utc>> {
        self.sink.store.load(&self.sink.key)
    }

    /// Stop reacting to connects and drop the log handlers. Handlers other
    /// code registered on the shared client stay attached. Safe to call more
    /// than once.
    pub fn close(&self) {
        let task = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
            for (method, handler) in &self.handlers {
                self.client
                    .off(Unsubscribe::Handler((*method).to_string(), handler.clone()));
            }
        }
    }
}

impl Drop for LogTracer {
    fn drop(&mut self) {
        self.close();
    }
}

fn log_url(base_url: &str) -> Result<String, ClientError> {
    Ok(format!("{}{LOG_HUB_PATH}", origin_of(base_url)?))
}

async fn subscribe_on_connect(
    mut connected: BoxStream<'static, ConnectionState>,
    client: Arc<dyn RealtimeClient>,
    sink: Arc<LogSink>,
) {
    while connected.next().await.is_some() {
        tracing::info!("{}", sink.format("realtime log connected"));
        let result = match sink.subscribe_request() {
            Ok(request) => client
                .send(SUBSCRIBE_METHOD, vec![request])
                .await
                .map_err(TracerError::from),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => tracing::info!("{}", sink.format("realtime log started")),
            Err(e) => tracing::error!("{}", sink.format(&format!("realtime log start failed: {e}"))),
        }
    }
}
