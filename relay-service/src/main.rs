//! CRM relay web server.
//!
//! Receives signed CRM webhooks and relays lead/purchase events to the
//! conversions API and the measurement endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::Client;
use tokio::{net::TcpListener, signal};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crmrelay::web::router;
use crmrelay::{
    AppState, Config, ConversionsApi, Dispatcher, JsonFileStore, MeasurementProtocol, Relay,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("relay_starting");

    // Missing secrets are fatal here rather than per request
    let config = Config::from_env().context("Invalid configuration")?;
    info!(
        port = config.port,
        signature_header = %config.signature_header,
        capi_base_url = %config.capi_base_url,
        ga4_endpoint = %config.ga4_endpoint,
        request_timeout_ms = config.request_timeout_ms,
        store_path = %config.store_path.display(),
        max_log_records = config.max_log_records,
        admin_auth_configured = config.admin_token.is_some(),
        "config_loaded"
    );

    // Per-call timeouts are enforced by the dispatcher
    let client = Client::builder()
        .build()
        .context("Failed to build HTTP client")?;

    let conversions = ConversionsApi::new(
        client.clone(),
        &config.capi_base_url,
        &config.capi_pixel_id,
        config.capi_access_token.clone(),
    )?;
    let measurement = MeasurementProtocol::new(
        client,
        &config.ga4_endpoint,
        &config.ga4_measurement_id,
        &config.ga4_api_secret,
        config.ga4_fallback_client_id.clone(),
    )?;
    let dispatcher = Dispatcher::new(
        Arc::new(conversions),
        Arc::new(measurement),
        config.request_timeout(),
    );

    let store = JsonFileStore::open(&config.store_path, config.max_log_records)
        .await
        .context("Failed to open relay store")?;

    let relay = Relay::new(&config.webhook_secret, Arc::new(store), dispatcher);
    let state = AppState::new(config.clone(), relay);
    let app = router(state);

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "relay_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("relay_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("relay_shutting_down");
}
