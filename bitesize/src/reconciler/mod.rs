//! The reconcile loop.
//!
//! One tick runs: Git refresh, manifest load, cluster read, decide and apply
//! per service, reap orphans, publish a snapshot, sleep. The loop is single
//! threaded within the reconcile path and honors termination only between
//! ticks; nothing survives a tick except what Git and the Kubernetes API
//! hold.

use std::sync::Arc;

use bitesize_config::OperatorConfig;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info};

use crate::cluster::Cluster;
use crate::diff;
use crate::git::GitSync;
use crate::model::{Environment, load_environment};
use crate::reaper::Reaper;

/// Immutable view of the last completed tick, published for the status API.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// The environment last loaded from the manifest.
    pub desired: Option<Arc<Environment>>,
    /// The environment last read from the cluster.
    pub observed: Option<Arc<Environment>>,
}

pub struct Reconciler {
    config: OperatorConfig,
    cluster: Arc<Cluster>,
    git: GitSync,
    snapshot_tx: watch::Sender<Snapshot>,
}

impl Reconciler {
    pub fn new(config: OperatorConfig, cluster: Arc<Cluster>) -> Reconciler {
        let git = GitSync::new(config.git.clone());
        let (snapshot_tx, _) = watch::channel(Snapshot::default());
        Reconciler {
            config,
            cluster,
            git,
            snapshot_tx,
        }
    }

    /// A receiver over the published snapshots. The status API holds one and
    /// never takes locks shared with the reconcile path.
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Runs ticks until shutdown is signalled. The signal is honored at the
    /// tick boundary only; an in-flight tick completes first.
    pub async fn run(&self, mut shutdown: watch::Receiver<()>) {
        if let Err(err) = self.git.refresh().await {
            error!("git clone error: {err}");
        }

        loop {
            self.tick().await;

            tokio::select! {
                _ = sleep(self.config.reconcile_interval) => {}
                _ = shutdown.changed() => {
                    info!("shutdown requested, stopping reconcile loop");
                    return;
                }
            }
        }
    }

    /// One full reconcile pass.
    pub async fn tick(&self) {
        if let Err(err) = self.git.refresh().await {
            // Keep going with the last successful checkout on disk.
            error!("git refresh error: {err}");
        }

        let desired = match load_environment(
            &self.config.manifest_path(),
            &self.config.environment_name,
        ) {
            Ok(environment) => environment,
            Err(err) => {
                error!("error while loading environment config: {err}");
                return;
            }
        };

        let observation = match self.cluster.load_environment().await {
            Ok(observation) => observation,
            Err(err) => {
                error!("error while loading environment from cluster: {err}");
                return;
            }
        };
        let observed = observation.environment;

        let changes = diff::compare(&desired, &observed, &observation.degraded);
        if changes.is_empty() {
            debug!("no changes detected this tick");
        } else {
            for (service, description) in changes.iter() {
                info!(service, "detected changes: {description}");
            }
            self.cluster
                .apply_environment(&desired, &observed, &changes)
                .await;
        }

        Reaper::new(&self.cluster).cleanup(&desired).await;

        self.snapshot_tx.send_replace(Snapshot {
            desired: Some(Arc::new(desired)),
            observed: Some(Arc::new(observed)),
        });
    }
}
