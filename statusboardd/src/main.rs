mod api;
mod config;
mod probe;
mod publisher;
mod scheduler;
mod store;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use shared::types::ServiceDefinition;
use crate::config::Config;
use crate::probe::executor::ProbeExecutor;
use crate::probe::resolver::Resolver;
use crate::probe::transport::HttpTransport;
use crate::publisher::SnapshotPublisher;
use crate::scheduler::Scheduler;
use crate::store::StatusStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("statusboardd=info"))
        )
        .init();

    tracing::info!("Starting statusboardd");

    // Load config; any problem here is fatal before probing starts
    let config_path = std::env::args()
        .nth(1)
        .map(Into::into)
        .unwrap_or_else(config::default_path);

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let settings = &config.settings;
    tracing::info!(
        "Loaded {} services from {} (interval {}ms, timeout {}ms, slow above {}ms, {:?} sweeps)",
        config.services.len(),
        config_path.display(),
        settings.check_interval_ms,
        settings.timeout_ms,
        settings.slow_threshold_ms,
        settings.mode
    );

    let services: Arc<[ServiceDefinition]> = config.service_definitions().into();

    // Every service starts out unknown
    let store = StatusStore::new(services.iter().map(|s| s.name.as_str()));

    let transport = HttpTransport::new(settings.timeout())?;
    let resolver = Arc::new(Resolver::new(
        Arc::new(transport),
        settings.intermediaries.clone(),
        settings.timeout(),
    ));
    let executor = ProbeExecutor::new(resolver, store.clone(), settings.slow_threshold());

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Spawn scheduler task
    let (trigger, triggers) = scheduler::trigger_channel();
    let scheduler = Scheduler::new(
        services.clone(),
        executor,
        store.clone(),
        settings.check_interval(),
        settings.probe_spacing(),
        settings.mode,
    );
    let sched_cancel = cancel.clone();
    let sched_handle = tokio::spawn(async move {
        if let Err(e) = scheduler.run(triggers, sched_cancel).await {
            tracing::error!("Scheduler error: {}", e);
        }
    });

    // Build API router
    let app_state = api::routes::AppState {
        publisher: SnapshotPublisher::new(services.clone(), store.clone(), settings.check_interval_ms),
        hash_rx: store.subscribe_hash(),
        trigger,
        config: Arc::new(api::routes::ConfigResponse {
            settings: settings.clone(),
            services: services.to_vec(),
        }),
    };
    let app = api::routes::router(app_state);

    // Bind HTTP server
    let listener = tokio::net::TcpListener::bind(&config.api.listen)
        .await
        .with_context(|| format!("Failed to bind to {}", config.api.listen))?;

    tracing::info!("Status page server listening on {}", config.api.listen);

    // Run server with graceful shutdown
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    // Trigger cancellation
    cancel.cancel();

    // Wait for all tasks to complete
    let _ = tokio::join!(sched_handle, server_handle);

    tracing::info!("Shutdown complete");
    Ok(())
}
