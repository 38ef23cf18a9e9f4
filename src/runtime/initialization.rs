//! # Initialization
//!
//! Managed operator startup: rustls setup, tracing, metrics, probe server and
//! Kubernetes client.

use crate::config::load_config;
use crate::constants::{DEFAULT_SERVER_POLL_INTERVAL_MS, DEFAULT_SERVER_STARTUP_TIMEOUT_SECS};
use crate::controller::reconciler::Reconciler;
use crate::observability;
use crate::runtime::server::{start_server, ServerState};
use anyhow::{anyhow, Context, Result};
use kube::Client;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Everything the watch loop needs
#[derive(Debug)]
pub struct InitializationResult {
    pub reconciler: Arc<Reconciler>,
    pub server_state: ServerState,
}

/// Install the tracing subscriber, `RUST_LOG` overrides `default_filter`
pub fn init_tracing(default_filter: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

/// Install ring as the rustls crypto provider
///
/// Required for rustls 0.23+ before any TLS connection is made. A provider already
/// installed by another component is kept.
pub fn install_crypto_provider() {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        info!("rustls crypto provider already installed");
    }
}

/// Initialize the managed operator runtime
pub async fn initialize() -> Result<InitializationResult> {
    install_crypto_provider();
    init_tracing("sf_operator=info");

    info!("Starting Software Factory operator v{}", env!("CARGO_PKG_VERSION"));
    let (controller_config, server_config) = load_config();
    info!(config = ?controller_config, "Loaded configuration");

    observability::metrics::register_metrics()?;

    let server_state = ServerState::default();
    let server_state_clone = server_state.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_config.metrics_port, server_state_clone).await {
            error!("HTTP server error: {:#}", e);
        }
    });
    wait_for_server_bound(&server_state, &server_handle).await?;

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let reconciler = Arc::new(Reconciler::new(client, controller_config));

    info!("Operator initialized, starting watch loop...");
    Ok(InitializationResult {
        reconciler,
        server_state,
    })
}

async fn wait_for_server_bound(
    server_state: &ServerState,
    server_handle: &tokio::task::JoinHandle<()>,
) -> Result<()> {
    let startup_timeout = Duration::from_secs(DEFAULT_SERVER_STARTUP_TIMEOUT_SECS);
    let poll_interval = Duration::from_millis(DEFAULT_SERVER_POLL_INTERVAL_MS);
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow!("HTTP server failed to start"));
        }
        if server_state.is_bound.load(Ordering::Relaxed) {
            info!("HTTP server is accepting connections");
            return Ok(());
        }
        if start_time.elapsed() > startup_timeout {
            return Err(anyhow!(
                "HTTP server failed to bind within {} seconds",
                startup_timeout.as_secs()
            ));
        }
        tokio::time::sleep(poll_interval).await;
    }
}
