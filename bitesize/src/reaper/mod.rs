//! Removal of objects whose declarations vanished from the manifest.
//!
//! The reaper sweeps every kind the operator manages, listing objects with
//! `creator=pipeline` and deleting those whose `name` label no longer maps
//! to a desired service. It runs after all applies within a tick; a failed
//! delete is logged and retried on the next tick.

use std::collections::BTreeMap;
use std::collections::HashSet;

use kube::ResourceExt;
use tracing::{error, info, warn};

use crate::cluster::Cluster;
use crate::labels;
use crate::model::Environment;

pub struct Reaper<'a> {
    cluster: &'a Cluster,
}

impl<'a> Reaper<'a> {
    pub fn new(cluster: &'a Cluster) -> Reaper<'a> {
        Reaper { cluster }
    }

    /// Deletes every managed object not owned by a service in `desired`.
    pub async fn cleanup(&self, desired: &Environment) {
        let desired_names: HashSet<&str> = desired.service_names().into_iter().collect();
        let clients = self.cluster.reapable();

        macro_rules! sweep {
            ($client:expr, $kind:literal) => {
                match $client.list().await {
                    Ok(items) => {
                        for item in items {
                            let object = item.name_any();
                            if !orphaned(item.labels(), &desired_names) {
                                continue;
                            }
                            info!(kind = $kind, object, "reaping object without declaration");
                            if let Err(err) = $client.destroy(&object).await {
                                error!(kind = $kind, object, "error reaping object: {err}");
                            }
                        }
                    }
                    Err(err) => error!(kind = $kind, "error listing objects for reaping: {err}"),
                }
            };
        }

        sweep!(clients.deployments, "deployment");
        sweep!(clients.services, "service");
        sweep!(clients.ingresses, "ingress");
        sweep!(clients.hpas, "horizontalpodautoscaler");
        sweep!(clients.stateful_sets, "statefulset");
        sweep!(clients.claims, "persistentvolumeclaim");
        sweep!(clients.secrets, "secret");

        for client in &clients.customs {
            match client.list().await {
                Ok(items) => {
                    for item in items {
                        let object = item.name_any();
                        if !orphaned(item.labels(), &desired_names) {
                            continue;
                        }
                        info!(
                            kind = client.kind(),
                            object, "reaping custom resource without declaration"
                        );
                        if let Err(err) = client.destroy(&object).await {
                            error!(
                                kind = client.kind(),
                                object, "error reaping custom resource: {err}"
                            );
                        }
                    }
                }
                Err(err) => error!(
                    kind = client.kind(),
                    "error listing custom resources for reaping: {err}"
                ),
            }
        }
    }
}

/// Whether a managed object's `name` label points at no desired service.
///
/// Objects without a `name` label are left alone and reported; the operator
/// never created them in that shape.
fn orphaned(object_labels: &BTreeMap<String, String>, desired: &HashSet<&str>) -> bool {
    match object_labels.get(labels::NAME) {
        Some(owner) => !desired.contains(owner.as_str()),
        None => {
            warn!("managed object carries no name label; leaving it alone");
            false
        }
    }
}
