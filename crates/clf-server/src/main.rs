//! Filter class predictor server
//!
//! Serves train and predict directives over TCP and exposes health and
//! Prometheus metrics over HTTP.

use anyhow::{Context, Result};
use clf_lib::{
    classifier::DecisionTreeTrainer,
    dataset::DatasetResolver,
    health::{components, HealthRegistry},
    listener::Listener,
    observability::{ClfMetrics, StructuredLogger},
    policy::RetrainPolicy,
    session::ServiceContext,
};
use clf_server::{api, config::ServerConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// How often the policy component of the health registry is refreshed
const POLICY_REPORT_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting filter class predictor");

    let config = ServerConfig::load()?;
    info!(
        node_name = %config.node_name,
        dataset_root = %config.dataset_root.display(),
        model_path = %config.policy_config().model_path().display(),
        drift_threshold = config.drift_threshold,
        bits_per_unit = config.bits_per_unit,
        "Server configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::LISTENER).await;
    health_registry.register(components::POLICY).await;

    let metrics = ClfMetrics::new();
    let logger = StructuredLogger::new(&config.node_name);

    let policy = RetrainPolicy::new(
        config.policy_config(),
        config.cost_model()?,
        DecisionTreeTrainer::default(),
    )
    .context("Failed to build retrain policy")?;

    if config.restore_on_start {
        match policy.restore_from_disk() {
            Ok(Some(generation)) => info!(generation, "Restored persisted model"),
            Ok(None) => info!("No persisted model to restore"),
            Err(e) => warn!(error = %e, "Failed to restore persisted model, starting without one"),
        }
    }
    health_registry.report_policy(&policy.stats()).await;

    let context = Arc::new(
        ServiceContext::new(
            policy,
            DatasetResolver::new(&config.dataset_root),
            logger.clone(),
        )
        .with_max_message_bytes(config.max_message_bytes),
    );

    let (shutdown_tx, _) = broadcast::channel(1);

    let listener = Listener::bind(config.listen_addr(), Arc::clone(&context))
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr()))?;
    let addr = listener.local_addr()?;
    logger.log_startup(SERVER_VERSION, &addr.to_string(), context.policy.generation());

    let app_state = Arc::new(api::AppState::new(health_registry.clone(), metrics));
    let api_handle = tokio::spawn(api::serve(
        config.api_port,
        app_state,
        shutdown_tx.subscribe(),
    ));

    let report_handle = {
        let context = Arc::clone(&context);
        let health_registry = health_registry.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(POLICY_REPORT_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        health_registry.report_policy(&context.policy.stats()).await;
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        })
    };

    let listener_handle = {
        let health_registry = health_registry.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let result = listener.serve(shutdown_rx).await;
            if let Err(e) = &result {
                error!(error = %e, "Listener stopped");
                health_registry
                    .set_unhealthy(components::LISTENER, e.to_string())
                    .await;
            }
            result
        })
    };

    // Mark server as ready once the listener is bound
    health_registry.set_ready(true).await;

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.set_ready(false).await;
    let _ = shutdown_tx.send(());

    if let Err(e) = listener_handle.await {
        warn!(error = %e, "Listener task panicked");
    }
    let _ = report_handle.await;
    match api_handle.await {
        Ok(Err(e)) => warn!(error = %e, "API server exited with error"),
        Err(e) => warn!(error = %e, "API server task panicked"),
        Ok(Ok(())) => {}
    }

    info!("Shutdown complete");
    Ok(())
}
