use std::sync::Arc;

use anyhow::Context;
use bitesize::cluster::Cluster;
use bitesize::reconciler::Reconciler;
use bitesize_api::{ApiConfig, Application};
use bitesize_config::OperatorConfig;
use kube::Client;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Starts the operator with the provided configuration.
///
/// Builds the Kubernetes client (the only fatal runtime dependency), spawns
/// the status API, then runs the reconcile loop until a termination signal
/// arrives. The signal is honored at the tick boundary.
pub async fn start_operator(config: OperatorConfig) -> anyhow::Result<()> {
    info!(
        "starting up environment operator version {}",
        env!("CARGO_PKG_VERSION")
    );

    log_config(&config);

    let client = Client::try_default()
        .await
        .context("error creating kubernetes client")?;
    let cluster = Arc::new(Cluster::new(client, config.clone()));

    let reconciler = Reconciler::new(config.clone(), cluster.clone());

    let api_config = ApiConfig {
        auth_token: load_auth_token(&config)?,
        ..ApiConfig::default()
    };
    let application = Application::build(api_config, reconciler.subscribe(), cluster)?;
    info!(port = application.port(), "status api listening");
    tokio::spawn(async move {
        if let Err(err) = application.run_until_stopped().await {
            error!("status api server terminated: {err}");
        }
    });

    // Translate process signals into a tick-boundary shutdown.
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let shutdown_handle = tokio::spawn(async move {
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("SIGINT (Ctrl+C) received, shutting down at the next tick boundary");
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down at the next tick boundary");
            }
        }

        let _ = shutdown_tx.send(());
    });

    reconciler.run(shutdown_rx).await;

    shutdown_handle.abort();
    let _ = shutdown_handle.await;

    info!("environment operator stopped");

    Ok(())
}

fn load_auth_token(config: &OperatorConfig) -> anyhow::Result<Option<String>> {
    if !config.use_auth {
        return Ok(None);
    }
    let path = config
        .auth_token_file
        .as_ref()
        .context("auth is enabled but no token file is configured")?;
    let token = std::fs::read_to_string(path)
        .with_context(|| format!("error reading auth token file {}", path.display()))?;
    Ok(Some(token.trim().to_string()))
}

fn log_config(config: &OperatorConfig) {
    debug!(
        remote = config.git.remote_repository,
        branch = config.git.branch,
        local_path = %config.git.local_path.display(),
        "git config"
    );
    debug!(
        environment = config.environment_name,
        namespace = config.namespace,
        manifest = config.bitesize_file,
        registry = config.docker_registry,
        interval_secs = config.reconcile_interval.as_secs(),
        "operator config"
    );
}
