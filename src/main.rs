//! Object Cloner Kubernetes Operator
//!
//! Main entry point for the operator. Sets up the Kubernetes client, starts
//! the namespace watcher and the ClusterObject controller, and serves metrics.

use kube::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use object_cloner_operator::{
    config::OperatorConfig,
    controllers::{cluster_object_controller, namespace_watcher, Context},
    metrics,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting Object Cloner Operator");

    let config = OperatorConfig::from_env()?;
    info!(
        "Default update strategy {:?}, {} conflict retries every {:?}, {} allowed kind selectors",
        config.sync.default_update_strategy,
        config.sync.retry.attempts,
        config.sync.retry.delay,
        config.allowed_kinds.len()
    );

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let shutdown = CancellationToken::new();
    let context = Context::new(client.clone(), &config, shutdown.clone());

    let metrics_handle = tokio::spawn(metrics::serve(config.metrics_port));
    info!("Metrics server starting on port {}", config.metrics_port);

    let namespace_handle = tokio::spawn(namespace_watcher::run(
        client,
        context.dispatcher.clone(),
        shutdown.clone(),
    ));
    let controller_handle = tokio::spawn(cluster_object_controller::run(context));

    tokio::select! {
        _ = controller_handle => {
            error!("ClusterObject controller exited unexpectedly");
        }
        _ = namespace_handle => {
            error!("Namespace watcher exited unexpectedly");
        }
        _ = metrics_handle => {
            error!("Metrics server exited unexpectedly");
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal, stopping operator");
        }
    }

    shutdown.cancel();
    info!("Object Cloner Operator stopped");
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,object_cloner_operator=debug,kube=warn,hyper=warn")
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C handler");
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
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
