//! OKX Connector Binary
//!
//! Connects the three OKX streaming sessions, subscribes to the configured
//! topics and logs what arrives until shutdown.
//!
//! # Usage
//!
//! ```bash
//! OKX_SUBSCRIPTIONS="tickers:BTC-USDT,books5:BTC-USDT,candle1m:ETH-USDT" \
//!     cargo run --bin okx-connector
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `OKX_API_KEY`, `OKX_SECRET_KEY`, `OKX_PASSPHRASE`: API credentials
//!
//! ## Optional
//! - `OKX_SIMULATED`: Use the simulated-trading endpoints (default: false)
//! - `OKX_SUBSCRIPTIONS`: Comma-separated `channel:instId` list
//! - `CONNECTOR_METRICS_PORT`: Prometheus metrics port, 0 disables (default: 9090)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log filter (default: okx_connector=info)

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use okx_connector::infrastructure::okx::{ConnectionEvent, ControlEvent};
use okx_connector::infrastructure::rest::{GetInstruments, InstrumentType};
use okx_connector::{
    ConnectorConfig, ControlKind, InitialConnect, OkxClient, SessionClass, StreamEvent,
    init_telemetry, serve_metrics,
};
use tokio::signal;

/// Upper bound on closing the sessions at shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("failed to install rustls crypto provider");
    }

    load_dotenv();

    let _telemetry_guard = init_telemetry().context("telemetry initialization failed")?;

    tracing::info!("Starting OKX connector");

    let config = ConnectorConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    if config.server.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.server.metrics_port));
        serve_metrics(addr).context("failed to start metrics exporter")?;
        tracing::info!(%addr, "Metrics exporter listening");
    }

    let client = OkxClient::new(&config).context("failed to build client")?;

    match client
        .rest()
        .execute(&GetInstruments::new(InstrumentType::Spot))
        .await
    {
        Ok(instruments) => {
            let live = instruments.iter().filter(|i| i.is_live()).count();
            tracing::info!(total = instruments.len(), live, "Spot instruments loaded");
        }
        Err(e) => tracing::warn!(error = %e, "Instrument lookup failed"),
    }

    let streaming = client.streaming();
    for class in SessionClass::ALL {
        streaming.on_control(class, ControlKind::Connection, move |event| {
            if let StreamEvent::Control(ControlEvent::Connection(change)) = event {
                match change {
                    ConnectionEvent::ReconnectExhausted { attempts } => {
                        tracing::error!(session = %class, attempts, "Session gave up reconnecting");
                    }
                    other => tracing::info!(session = %class, event = ?other, "Session event"),
                }
            }
        });
        streaming.on_control(class, ControlKind::Error, move |event| {
            if let StreamEvent::Control(ControlEvent::Error { code, msg, .. }) = event {
                tracing::warn!(session = %class, code, msg, "Exchange error");
            }
        });
        streaming.on_control(class, ControlKind::Message, move |event| {
            if let StreamEvent::Control(ControlEvent::Message(payload)) = event {
                tracing::info!(session = %class, payload, "Unrouted push");
            }
        });
    }

    for topic in &config.subscriptions {
        if !topic.routes_to_listeners() {
            tracing::warn!(
                topic = %topic,
                "Topic has no instrument; its pushes are logged as unrouted messages"
            );
            continue;
        }
        let label = topic.to_string();
        streaming.on(topic, move |event| log_event(&label, event));
    }

    streaming.connect(InitialConnect::RetryInBackground).await?;

    if config.subscriptions.is_empty() {
        tracing::warn!("OKX_SUBSCRIPTIONS is empty; sessions idle");
    } else if let Err(e) = streaming.subscribe(config.subscriptions.clone()).await {
        tracing::error!(error = %e, "Some subscriptions failed");
    }

    tracing::info!("OKX connector ready");

    await_shutdown().await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, streaming.close())
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Sessions did not close in time"
        );
    }

    tracing::info!("OKX connector stopped");
    Ok(())
}

fn log_event(topic: &str, event: &StreamEvent) {
    match event {
        StreamEvent::Ticker(ticks) => {
            for t in ticks {
                tracing::info!(topic, last = %t.last, bid = ?t.bid_px, ask = ?t.ask_px, "ticker");
            }
        }
        StreamEvent::Trade(trades) => {
            for t in trades {
                tracing::info!(topic, px = %t.px, sz = %t.sz, side = ?t.side, "trade");
            }
        }
        StreamEvent::Candle(candles) => {
            for c in candles {
                tracing::info!(topic, close = %c.close, confirmed = c.confirmed, "candle");
            }
        }
        StreamEvent::OrderBook { action, books } => {
            for b in books {
                tracing::info!(
                    topic,
                    action = ?action,
                    bid = ?b.best_bid().map(|l| l.price),
                    ask = ?b.best_ask().map(|l| l.price),
                    "book"
                );
            }
        }
        StreamEvent::Raw { error: Some(e), .. } => tracing::warn!(topic, error = %e, "undecodable push"),
        StreamEvent::Raw { payload, .. } => tracing::debug!(topic, payload, "raw push"),
        StreamEvent::Control(control) => tracing::debug!(topic, ?control, "control"),
    }
}

fn log_config(config: &ConnectorConfig) {
    tracing::info!(
        simulated = config.credentials.is_simulated(),
        rest = %config.rest.base_url,
        metrics_port = config.server.metrics_port,
        subscriptions = config.subscriptions.len(),
        max_reconnect_attempts = config.connection.reconnect.max_attempts,
        "Configuration loaded"
    );
}

/// Load .env from the current directory or the nearest ancestor holding one.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for SIGINT or SIGTERM.
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}
