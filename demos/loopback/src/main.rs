//! Loopback demo: a realtime client talking to an in-process hub.
//!
//! Run with: cargo run -p hublink-loopback
//!
//! Connection options can be overridden with a JSON patch in
//! `HUBLINK_OPTIONS`, e.g. `{"retryCount": 1, "reconnectDelayMs": 200}`.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use futures::StreamExt;
use hublink_client::{ClientFactory, LogTracer, MemoryOffsetStore, SimpleClient};
use hublink_core::{
    ConnectionOptionsPatch, Handler, RealtimeClient, TransportError, Unsubscribe,
};
use hublink_transport::MemoryHub;
use serde_json::{Value, json};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const HUB_URL: &str = "memory://demo.local/signalr";
const WAIT: Duration = Duration::from_secs(5);

fn options() -> Result<ConnectionOptionsPatch> {
    let defaults = ConnectionOptionsPatch::default()
        .retry_count(3)
        .reconnect_delay(Duration::from_millis(500))
        .enable_tracing(true);

    match std::env::var("HUBLINK_OPTIONS") {
        Ok(json) => serde_json::from_str(&json).context("Invalid HUBLINK_OPTIONS"),
        Err(_) => Ok(defaults),
    }
}

fn demo_hub() -> MemoryHub {
    let hub = MemoryHub::new();
    hub.handle("Echo", |args| Ok(json!(args)));
    hub.handle("Quote", |args| match args.first().and_then(Value::as_str) {
        Some(symbol) if !symbol.is_empty() => Ok(json!({"symbol": symbol, "price": 101.25})),
        _ => Ok(json!({"exception": {
            "type": "UserFriendlyException",
            "message": "Quote.UnknownSymbol"
        }})),
    });
    hub.handle("SubscribeToGroupWithMessageOffset", |_| Ok(Value::Null));
    hub
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,hublink_session=debug".into()),
        )
        .init();

    let hub = demo_hub();
    let factory = ClientFactory::new(Arc::new(hub.clone()));
    let client = factory.create();

    client.on(
        "Ticker",
        Handler::new(|args| tracing::info!(?args, "Ticker event")),
    )?;

    // Fail the first start to show a retry.
    hub.fail_next_starts(1);
    client.start(HUB_URL, Some(options()?)).await?;
    tracing::info!(state = %client.state(), "Client started");

    let echoed = client.invoke("Echo", vec![json!("hello")]).await?;
    tracing::info!(%echoed, "Echo returned");
    let quote = client.invoke("Quote", vec![json!("ACME")]).await?;
    tracing::info!(%quote, "Quote returned");
    if let Err(e) = client.invoke("Quote", vec![json!("")]).await {
        tracing::info!(%e, "Quote failed as expected");
    }
    hub.publish("Ticker", &[json!({"symbol": "ACME", "price": 101.5})]);

    // Simulate a server restart and wait for the auto-reconnect.
    let mut connected = client.connected();
    hub.drop_connections(Some(TransportError::Closed("server restart".into())));
    tokio::time::timeout(WAIT, connected.next())
        .await
        .context("Client did not reconnect")?;
    tracing::info!(state = %client.state(), starts = hub.start_count(), "Reconnected");
    hub.publish("Ticker", &[json!({"symbol": "ACME", "price": 99.0})]);

    // A lazily started client and a remote log tracer on their own sessions.
    let simple = SimpleClient::new(factory.create(), HUB_URL, None);
    let echoed = simple.invoke("Echo", vec![json!("lazy")]).await?;
    tracing::info!(%echoed, "Simple client echo returned");

    let tracer = LogTracer::new("demo", factory.create(), Arc::new(MemoryOffsetStore::new()))?;
    tracer.start("http://demo.local/app").await?;
    hub.publish(
        "OnEvent",
        &[json!({
            "formattedEvent": "Order 42 accepted",
            "loggingEvent": {"level": {"name": "INFO"}, "timeStamp": "2024-05-01T10:00:00Z"}
        })],
    );

    tracer.stop().await?;
    simple.stop().await?;
    client.off(Unsubscribe::All);
    client.stop().await?;
    tracing::info!(state = %client.state(), "Client stopped");

    Ok(())
}
