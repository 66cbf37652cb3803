//! Desired-versus-observed comparison and the per-service apply decision.
//!
//! [`compare`] normalizes both sides before fingerprinting so that fields
//! the operator does not own (live replica counts under an HPA, server
//! resource versions, observed status) can never trigger an apply on their
//! own. [`should_deploy`] then applies the policy rules in a fixed order.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::model::{Environment, Service};

/// Aspects the cluster reader could not list this tick.
///
/// A degraded aspect is treated as matching the desired state so a transient
/// API error can never trigger an apply storm.
#[derive(Debug, Default, Clone, Copy)]
pub struct DegradedAspects {
    pub workloads: bool,
    pub services: bool,
    pub ingresses: bool,
    pub autoscalers: bool,
    pub claims: bool,
    pub custom_resources: bool,
}

impl DegradedAspects {
    pub fn any(&self) -> bool {
        self.workloads
            || self.services
            || self.ingresses
            || self.autoscalers
            || self.claims
            || self.custom_resources
    }
}

/// Per-service change descriptions recorded by [`compare`].
#[derive(Debug, Default)]
pub struct Changes {
    entries: BTreeMap<String, String>,
}

impl Changes {
    pub fn record(&mut self, service: &str, description: String) {
        self.entries.insert(service.to_string(), description);
    }

    /// Whether the named service drifted this tick.
    pub fn changed(&self, service: &str) -> bool {
        self.entries.contains_key(service)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, description)| (name.as_str(), description.as_str()))
    }
}

/// Compares the desired environment against the observed one, recording a
/// change entry for every service whose content fingerprint differs.
///
/// Aspects marked degraded are adopted from the desired side before
/// fingerprinting, and entirely unobserved services are left alone while any
/// listing is degraded.
pub fn compare(
    desired: &Environment,
    observed: &Environment,
    degraded: &DegradedAspects,
) -> Changes {
    let mut changes = Changes::default();

    for service in &desired.services {
        let workload_blinded = if service.is_custom_resource() {
            degraded.custom_resources
        } else {
            degraded.workloads
        };
        match observed.find_service(&service.name) {
            None if workload_blinded => {
                warn!(
                    service = service.name,
                    "cluster read was degraded; not treating unobserved service as new"
                );
            }
            None => changes.record(&service.name, "service is not deployed yet".to_string()),
            Some(current) => {
                let (left, right) = normalize(service, current, degraded);
                if left != right {
                    let description = describe(&left, &right);
                    debug!(service = service.name, "detected drift: {description}");
                    changes.record(&service.name, description);
                }
            }
        }
    }

    changes
}

/// Decides whether a service should be (re)applied this tick.
///
/// The rules run in a fixed order: no recorded change always skips; an
/// observed HPA owning a diverged replica count skips; blue/green parents
/// always apply; previously deployed services apply; a pinned version
/// applies; everything else is left alone.
pub fn should_deploy(
    desired: &Environment,
    observed: &Environment,
    changes: &Changes,
    name: &str,
) -> bool {
    if !changes.changed(name) {
        return false;
    }

    let current = observed.find_service(name);
    let updated = desired.find_service(name);

    if let Some(current) = current {
        if current.hpa.is_configured() {
            if let Some(updated) = updated {
                if current.status.desired_replicas != updated.status.desired_replicas {
                    // The HPA owns the replica count; reapplying would fight it.
                    return false;
                }
            }
        }
    }

    let Some(updated) = updated else {
        return true;
    };

    if updated.is_blue_green_parent() {
        debug!(service = name, "blue/green parent is always redeployed");
        return true;
    }

    if let Some(current) = current {
        if !current.status.deployed_at.is_empty() {
            return true;
        }
    }

    !updated.version.is_empty()
}

/// Produces the comparable projections of a desired/observed service pair.
fn normalize(desired: &Service, observed: &Service, degraded: &DegradedAspects) -> (Service, Service) {
    let mut left = desired.clone();
    let mut right = observed.clone();

    adopt_degraded_aspects(&left, &mut right, degraded);

    // Fields the operator does not own.
    left.status = Default::default();
    right.status = Default::default();
    left.resource_version = None;
    right.resource_version = None;

    // An unpinned version or application adopts whatever runs today.
    if left.version.is_empty() {
        left.version = right.version.clone();
    }
    if left.application.is_empty() {
        left.application = right.application.clone();
    }

    // With an active HPA the live replica count is authoritative.
    if right.hpa.is_configured() {
        left.replicas = right.replicas;
    }

    // Folding order is not manifest order.
    left.volumes.sort_by(|a, b| a.name.cmp(&b.name));
    right.volumes.sort_by(|a, b| a.name.cmp(&b.name));

    if left.is_custom_resource() {
        left = custom_projection(left);
        right = custom_projection(right);
    }

    (left, right)
}

/// Copies desired aspects over the observed ones wherever the reader could
/// not list the backing kind, so the missing aspect fingerprints as equal.
fn adopt_degraded_aspects(left: &Service, right: &mut Service, degraded: &DegradedAspects) {
    if degraded.workloads {
        right.version = left.version.clone();
        right.application = left.application.clone();
        right.replicas = left.replicas;
        right.commands = left.commands.clone();
        right.env_vars = left.env_vars.clone();
        right.requests = left.requests.clone();
        right.limits = left.limits.clone();
        right.annotations = left.annotations.clone();
        right.database_type = left.database_type.clone();
    }
    if degraded.services {
        right.ports = left.ports.clone();
    }
    if degraded.ingresses {
        right.external_url = left.external_url.clone();
        right.backend = left.backend.clone();
        right.backend_port = left.backend_port;
        right.ssl = left.ssl.clone();
        right.https_backend = left.https_backend.clone();
        right.https_only = left.https_only.clone();
        right.http2 = left.http2.clone();
    }
    if degraded.autoscalers {
        right.hpa = left.hpa.clone();
    }
    // Secret-backed volumes surface through the workload pod spec, so either
    // degradation blinds the volume view.
    if degraded.claims || degraded.workloads {
        right.volumes = left.volumes.clone();
    }
    if degraded.custom_resources && left.is_custom_resource() {
        right.kind = left.kind.clone();
        right.version = left.version.clone();
        right.options = left.options.clone();
    }
}

/// A custom resource carries only its kind, version and options; the rest of
/// the service shape is meaningless for it and must not produce drift.
fn custom_projection(service: Service) -> Service {
    Service {
        name: service.name,
        kind: service.kind,
        version: service.version,
        options: service.options,
        replicas: 0,
        ports: Vec::new(),
        application: String::new(),
        ..Service::default()
    }
}

/// Human-readable list of the aspects that differ.
fn describe(left: &Service, right: &Service) -> String {
    let mut drifted = Vec::new();

    if left.replicas != right.replicas {
        drifted.push("replicas");
    }
    if left.version != right.version {
        drifted.push("version");
    }
    if left.application != right.application {
        drifted.push("application");
    }
    if left.commands != right.commands {
        drifted.push("commands");
    }
    if left.ports != right.ports {
        drifted.push("ports");
    }
    if left.annotations != right.annotations {
        drifted.push("annotations");
    }
    if left.requests != right.requests || left.limits != right.limits {
        drifted.push("resources");
    }
    if left.volumes != right.volumes {
        drifted.push("volumes");
    }
    if left.env_vars != right.env_vars {
        drifted.push("env");
    }
    if left.hpa != right.hpa {
        drifted.push("hpa");
    }
    if left.external_url != right.external_url
        || left.backend != right.backend
        || left.backend_port != right.backend_port
        || left.ssl != right.ssl
        || left.https_backend != right.https_backend
        || left.https_only != right.https_only
        || left.http2 != right.http2
    {
        drifted.push("ingress");
    }
    if left.kind != right.kind || left.database_type != right.database_type {
        drifted.push("workload kind");
    }
    if left.options != right.options {
        drifted.push("options");
    }

    if drifted.is_empty() {
        // PartialEq said they differ; name the remainder honestly.
        return "configuration drift".to_string();
    }
    drifted.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Hpa, Metric, ServiceStatus};

    fn desired_service(name: &str, version: &str) -> Service {
        Service {
            name: name.into(),
            application: name.into(),
            version: version.into(),
            replicas: 2,
            ports: vec![8080],
            status: ServiceStatus {
                desired_replicas: 2,
                ..ServiceStatus::default()
            },
            ..Service::default()
        }
    }

    fn observed_from(service: &Service) -> Service {
        let mut observed = service.clone();
        observed.status.deployed_at = "2019-03-21T10:00:00+00:00".into();
        observed
    }

    fn environment(services: Vec<Service>) -> Environment {
        Environment {
            name: "dev".into(),
            namespace: "sample".into(),
            services,
        }
    }

    #[test]
    fn identical_environments_record_no_changes() {
        let desired = environment(vec![desired_service("api", "1.0.0")]);
        let observed = environment(vec![observed_from(&desired.services[0])]);

        let changes = compare(&desired, &observed, &DegradedAspects::default());
        assert!(changes.is_empty());
    }

    #[test]
    fn version_bump_is_recorded_as_drift() {
        let desired = environment(vec![desired_service("api", "1.0.1")]);
        let observed = environment(vec![observed_from(&desired_service("api", "1.0.0"))]);

        let changes = compare(&desired, &observed, &DegradedAspects::default());
        assert!(changes.changed("api"));
        assert!(should_deploy(&desired, &observed, &changes, "api"));
    }

    #[test]
    fn unpinned_version_adopts_the_observed_one() {
        let desired = environment(vec![desired_service("api", "")]);
        let observed = environment(vec![observed_from(&desired_service("api", "1.0.0"))]);

        let changes = compare(&desired, &observed, &DegradedAspects::default());
        assert!(!changes.changed("api"));
    }

    #[test]
    fn hpa_owned_replica_divergence_skips_the_apply() {
        // Cluster runs 5 replicas under an HPA; the manifest still says 2.
        let hpa = Hpa {
            min_replicas: 2,
            max_replicas: 10,
            metric: Metric {
                name: "cpu".into(),
                target_average_utilization: 75,
                ..Metric::default()
            },
        };

        let mut desired_api = desired_service("api", "1.0.0");
        desired_api.hpa = hpa.clone();

        let mut observed_api = observed_from(&desired_api);
        observed_api.replicas = 5;
        observed_api.status.desired_replicas = 5;

        let desired = environment(vec![desired_api]);
        let observed = environment(vec![observed_api]);

        // Replica drift alone does not fingerprint as a change.
        let changes = compare(&desired, &observed, &DegradedAspects::default());
        assert!(!changes.changed("api"));

        // And even with another recorded change, the HPA rule skips.
        let mut forced = Changes::default();
        forced.record("api", "annotations".into());
        assert!(!should_deploy(&desired, &observed, &forced, "api"));
    }

    #[test]
    fn new_service_without_version_is_skipped() {
        // Declared but never deployed and no version pinned: nothing to do.
        let desired = environment(vec![desired_service("api", "")]);
        let observed = environment(vec![]);

        let changes = compare(&desired, &observed, &DegradedAspects::default());
        assert!(changes.changed("api"));
        assert!(!should_deploy(&desired, &observed, &changes, "api"));
    }

    #[test]
    fn new_service_with_version_is_applied() {
        let desired = environment(vec![desired_service("api", "1.0.0")]);
        let observed = environment(vec![]);

        let changes = compare(&desired, &observed, &DegradedAspects::default());
        assert!(should_deploy(&desired, &observed, &changes, "api"));
    }

    #[test]
    fn previously_deployed_service_is_reapplied_on_drift() {
        let mut desired_api = desired_service("api", "");
        desired_api.replicas = 3;
        desired_api.status.desired_replicas = 3;

        let mut observed_api = observed_from(&desired_service("api", "1.0.0"));
        observed_api.replicas = 2;

        let desired = environment(vec![desired_api]);
        let observed = environment(vec![observed_api]);

        let changes = compare(&desired, &observed, &DegradedAspects::default());
        assert!(changes.changed("api"));
        assert!(should_deploy(&desired, &observed, &changes, "api"));
    }

    #[test]
    fn blue_green_parent_is_always_applied() {
        let mut desired_api = desired_service("front", "");
        desired_api.deployment_method = "bluegreen".into();

        let desired = environment(vec![desired_api]);
        let observed = environment(vec![]);

        let changes = compare(&desired, &observed, &DegradedAspects::default());
        assert!(should_deploy(&desired, &observed, &changes, "front"));
    }

    #[test]
    fn custom_resources_compare_on_kind_version_and_options_only() {
        let mut desired_db = desired_service("db", "3.4");
        desired_db.kind = "mongo".into();

        let mut observed_db = Service {
            name: "db".into(),
            kind: "mongo".into(),
            version: "3.4".into(),
            resource_version: Some("42".into()),
            replicas: 0,
            ports: Vec::new(),
            ..Service::default()
        };
        observed_db
            .options
            .clone_from(&desired_db.options);

        let desired = environment(vec![desired_db]);
        let observed = environment(vec![observed_db]);

        let changes = compare(&desired, &observed, &DegradedAspects::default());
        assert!(!changes.changed("db"));
    }

    #[test]
    fn custom_resource_version_drift_is_detected() {
        let mut desired_db = desired_service("db", "3.6");
        desired_db.kind = "mongo".into();

        let observed_db = Service {
            name: "db".into(),
            kind: "mongo".into(),
            version: "3.4".into(),
            ..Service::default()
        };

        let desired = environment(vec![desired_db]);
        let observed = environment(vec![observed_db]);

        let changes = compare(&desired, &observed, &DegradedAspects::default());
        assert!(changes.changed("db"));
        assert!(should_deploy(&desired, &observed, &changes, "db"));
    }

    #[test]
    fn degraded_workload_listing_masks_drift() {
        let desired = environment(vec![desired_service("api", "1.0.1")]);
        let observed = environment(vec![observed_from(&desired_service("api", "1.0.0"))]);

        let degraded = DegradedAspects {
            workloads: true,
            ..DegradedAspects::default()
        };
        let changes = compare(&desired, &observed, &degraded);
        assert!(!changes.changed("api"));
    }

    #[test]
    fn degraded_read_never_treats_unobserved_services_as_new() {
        let desired = environment(vec![desired_service("api", "1.0.0")]);
        let observed = environment(vec![]);

        let degraded = DegradedAspects {
            workloads: true,
            ..DegradedAspects::default()
        };
        assert!(!compare(&desired, &observed, &degraded).changed("api"));
    }

    #[test]
    fn describe_names_the_drifted_aspects() {
        let left = desired_service("api", "1.0.1");
        let mut right = desired_service("api", "1.0.0");
        right.replicas = 4;

        let description = describe(&left, &right);
        assert!(description.contains("version"));
        assert!(description.contains("replicas"));
    }
}
