//! Folds live Kubernetes objects back into the manifest model.
//!
//! Each `add_*` method takes one observed object and merges the aspects it
//! carries into the service named by its `name` label. After every kind has
//! been folded the map yields `Service` values directly comparable with the
//! loaded manifest.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{
    Container, PersistentVolumeClaim, PodSpec, Service as KubeService,
};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::DynamicObject;

use crate::labels;
use crate::model::{
    DEFAULT_ACCESS_MODES, EnvVar, Environment, ResourceQuantities, Service, Volume,
};

/// Annotation prefixes injected by Kubernetes itself; these never appear in
/// the manifest and are dropped so they cannot produce spurious drift.
const SERVER_ANNOTATION_PREFIXES: &[&str] = &[
    "kubernetes.io/",
    "kubectl.kubernetes.io/",
    "deployment.kubernetes.io/",
];

/// Observed services keyed by the `name` label.
#[derive(Debug, Default)]
pub struct ServiceMap {
    services: BTreeMap<String, Service>,
}

impl ServiceMap {
    pub fn new() -> ServiceMap {
        ServiceMap::default()
    }

    /// Finishes the fold, producing an environment for the namespace.
    pub fn into_environment(self, name: &str, namespace: &str) -> Environment {
        Environment {
            name: name.to_string(),
            namespace: namespace.to_string(),
            services: self.services.into_values().collect(),
        }
    }

    fn named(&mut self, name: &str) -> &mut Service {
        self.services
            .entry(name.to_string())
            .or_insert_with(|| Service {
                name: name.to_string(),
                replicas: 0,
                ports: Vec::new(),
                ..Service::default()
            })
    }

    pub fn add_deployment(&mut self, deployment: Deployment) {
        let Some(name) = name_label(&deployment.metadata) else {
            return;
        };

        let deployed_at = creation_timestamp(&deployment.metadata);
        let available = deployment
            .status
            .as_ref()
            .and_then(|status| status.available_replicas)
            .unwrap_or(0);

        let service = self.named(&name);
        service.application = label(&deployment.metadata, labels::APPLICATION);
        service.version = label(&deployment.metadata, labels::VERSION);
        service.status.deployed_at = deployed_at;
        service.status.available_replicas = available;

        if let Some(spec) = deployment.spec {
            let replicas = spec.replicas.unwrap_or(0);
            service.replicas = replicas;
            service.status.desired_replicas = replicas;

            if let Some(metadata) = &spec.template.metadata {
                service.annotations = manifest_annotations(metadata);
            }
            if let Some(pod_spec) = spec.template.spec {
                fold_pod_spec(service, pod_spec);
            }
        }
    }

    pub fn add_stateful_set(&mut self, set: StatefulSet) {
        let Some(name) = name_label(&set.metadata) else {
            return;
        };

        let deployed_at = creation_timestamp(&set.metadata);
        let database = label(&set.metadata, labels::DATABASE);

        let service = self.named(&name);
        service.application = label(&set.metadata, labels::APPLICATION);
        service.version = label(&set.metadata, labels::VERSION);
        service.database_type = if database.is_empty() {
            "mongo".to_string()
        } else {
            database
        };
        service.status.deployed_at = deployed_at;

        if let Some(spec) = set.spec {
            let replicas = spec.replicas.unwrap_or(0);
            service.replicas = replicas;
            service.status.desired_replicas = replicas;

            if let Some(metadata) = &spec.template.metadata {
                service.annotations = manifest_annotations(metadata);
            }
            if let Some(pod_spec) = spec.template.spec {
                fold_pod_spec(service, pod_spec);
            }
        }
    }

    pub fn add_service(&mut self, kube_service: KubeService) {
        let Some(name) = name_label(&kube_service.metadata) else {
            return;
        };

        let service = self.named(&name);
        if let Some(spec) = kube_service.spec {
            service.ports = spec
                .ports
                .unwrap_or_default()
                .into_iter()
                // The headless marker port carries no declared intent.
                .filter(|port| port.name.as_deref() != Some("headless"))
                .map(|port| port.port)
                .collect();
        }
    }

    pub fn add_ingress(&mut self, ingress: Ingress) {
        let Some(name) = name_label(&ingress.metadata) else {
            return;
        };

        let ssl = label(&ingress.metadata, "ssl");
        let https_backend = label(&ingress.metadata, "httpsBackend");
        let https_only = label(&ingress.metadata, "httpsOnly");
        let http2 = label(&ingress.metadata, "http2");

        let service = self.named(&name);
        service.ssl = ssl;
        service.https_backend = https_backend;
        service.https_only = https_only;
        service.http2 = http2;

        let Some(spec) = ingress.spec else {
            return;
        };
        let first_port = service.ports.first().copied();
        for rule in spec.rules.unwrap_or_default() {
            if let Some(host) = rule.host {
                service.external_url.push(host);
            }
            let Some(path) = rule
                .http
                .as_ref()
                .and_then(|http| http.paths.first())
            else {
                continue;
            };
            if let Some(backend) = &path.backend.service {
                if backend.name != service.name {
                    service.backend = backend.name.clone();
                }
                let number = backend.port.as_ref().and_then(|port| port.number);
                if let Some(number) = number {
                    if Some(number) != first_port {
                        service.backend_port = number;
                    }
                }
            }
        }
    }

    pub fn add_hpa(&mut self, hpa: HorizontalPodAutoscaler) {
        let Some(name) = name_label(&hpa.metadata) else {
            return;
        };

        let service = self.named(&name);
        let Some(spec) = hpa.spec else {
            return;
        };
        service.hpa.min_replicas = spec.min_replicas.unwrap_or(0);
        service.hpa.max_replicas = spec.max_replicas;

        let Some(metric) = spec.metrics.and_then(|metrics| metrics.into_iter().next()) else {
            return;
        };
        if let Some(resource) = metric.resource {
            service.hpa.metric.name = resource.name;
            service.hpa.metric.target_average_utilization =
                resource.target.average_utilization.unwrap_or(0);
        } else if let Some(pods) = metric.pods {
            service.hpa.metric.name = pods.metric.name;
            service.hpa.metric.target_average_value =
                pods.target.average_value.map(|q| q.0).unwrap_or_default();
        }
    }

    pub fn add_volume_claim(&mut self, claim: PersistentVolumeClaim) {
        let Some(name) = name_label(&claim.metadata) else {
            return;
        };

        let claim_name = claim.metadata.name.clone().unwrap_or_default();
        let path = labels::decode_mount_path(&label(&claim.metadata, labels::MOUNT_PATH));
        let size = label(&claim.metadata, labels::SIZE);
        let kind = label(&claim.metadata, labels::TYPE);
        let spec = claim.spec.unwrap_or_default();

        let volume = Volume {
            name: claim_name,
            path,
            size,
            kind,
            modes: spec
                .access_modes
                .map(|modes| modes.join(","))
                .unwrap_or_else(|| DEFAULT_ACCESS_MODES.to_string()),
            provisioning: if spec.volume_name.is_some() {
                "manual".to_string()
            } else {
                String::new()
            },
        };

        self.named(&name).volumes.push(volume);
    }

    pub fn add_custom_resource(&mut self, object: DynamicObject) {
        let Some(name) = name_label(&object.metadata) else {
            return;
        };

        let kind = object
            .types
            .as_ref()
            .map(|types| types.kind.to_lowercase())
            .unwrap_or_default();
        let resource_version = object.metadata.resource_version.clone();

        let service = self.named(&name);
        service.kind = kind;
        service.resource_version = resource_version;

        let spec = &object.data["spec"];
        if let Some(version) = spec["version"].as_str() {
            service.version = version.to_string();
        }
        if let Some(options) = spec["options"].as_object() {
            service.options = options
                .iter()
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
        }
    }
}

fn fold_pod_spec(service: &mut Service, pod_spec: PodSpec) {
    let mounts: BTreeMap<String, String> = pod_spec
        .containers
        .first()
        .and_then(|container| container.volume_mounts.clone())
        .unwrap_or_default()
        .into_iter()
        .map(|mount| (mount.name, mount.mount_path))
        .collect();

    // Secret and config-map volumes have no claim to fold later, so they are
    // reconstructed from the pod spec itself.
    for volume in pod_spec.volumes.unwrap_or_default() {
        let kind = if volume.secret.is_some() {
            "secret"
        } else if volume.config_map.is_some() {
            "configmap"
        } else {
            continue;
        };
        service.volumes.push(Volume {
            path: mounts.get(&volume.name).cloned().unwrap_or_default(),
            name: volume.name,
            kind: kind.to_string(),
            modes: DEFAULT_ACCESS_MODES.to_string(),
            ..Volume::default()
        });
    }

    if let Some(container) = pod_spec.containers.into_iter().next() {
        service.commands = container.command.clone().unwrap_or_default();
        service.env_vars = fold_env(&container);
        (service.requests, service.limits) = fold_resources(&container);
    }
}

fn fold_env(container: &Container) -> Vec<EnvVar> {
    let mut folded = Vec::new();
    for env in container.env.clone().unwrap_or_default() {
        if let Some(source) = env.value_from {
            if let Some(secret_ref) = source.secret_key_ref {
                let secret_name = secret_ref.name;
                let reference = if secret_ref.key == secret_name {
                    secret_name
                } else {
                    format!("{}/{}", secret_name, secret_ref.key)
                };
                folded.push(EnvVar::secret_ref(&env.name, &reference));
            } else if let Some(field_ref) = source.field_ref {
                folded.push(EnvVar::pod_field(&env.name, &field_ref.field_path));
            }
        } else {
            folded.push(EnvVar::literal(&env.name, &env.value.unwrap_or_default()));
        }
    }
    folded
}

fn fold_resources(container: &Container) -> (ResourceQuantities, ResourceQuantities) {
    let mut requests = ResourceQuantities::default();
    let mut limits = ResourceQuantities::default();

    if let Some(resources) = &container.resources {
        if let Some(observed) = &resources.requests {
            requests.cpu = observed.get("cpu").map(|q| q.0.clone()).unwrap_or_default();
            requests.memory = observed
                .get("memory")
                .map(|q| q.0.clone())
                .unwrap_or_default();
        }
        if let Some(observed) = &resources.limits {
            limits.cpu = observed.get("cpu").map(|q| q.0.clone()).unwrap_or_default();
            limits.memory = observed
                .get("memory")
                .map(|q| q.0.clone())
                .unwrap_or_default();
        }
    }

    (requests, limits)
}

fn name_label(metadata: &ObjectMeta) -> Option<String> {
    metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(labels::NAME))
        .cloned()
}

fn label(metadata: &ObjectMeta, key: &str) -> String {
    metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(key))
        .cloned()
        .unwrap_or_default()
}

fn creation_timestamp(metadata: &ObjectMeta) -> String {
    metadata
        .creation_timestamp
        .as_ref()
        .map(|time| time.0.to_rfc3339())
        .unwrap_or_default()
}

fn manifest_annotations(metadata: &ObjectMeta) -> BTreeMap<String, String> {
    metadata
        .annotations
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter(|(key, _)| {
            !SERVER_ANNOTATION_PREFIXES
                .iter()
                .any(|prefix| key.starts_with(prefix))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::model::{Hpa, Metric};
    use crate::translator::KubeMapper;

    fn mapper<'a>(service: &'a Service) -> KubeMapper<'a> {
        KubeMapper {
            service,
            namespace: "sample",
            registry: "registry.example.com",
            pull_secrets: &[],
        }
    }

    #[test]
    fn folds_a_deployment_into_service_shape() {
        let desired = Service {
            name: "api".into(),
            application: "api".into(),
            version: "1.0.0".into(),
            replicas: 2,
            ports: vec![8080],
            ..Service::default()
        };
        let deployment = mapper(&desired).deployment(&BTreeSet::new()).unwrap();

        let mut map = ServiceMap::new();
        map.add_deployment(deployment);
        let environment = map.into_environment("dev", "sample");

        let observed = environment.find_service("api").unwrap();
        assert_eq!(observed.application, "api");
        assert_eq!(observed.version, "1.0.0");
        assert_eq!(observed.replicas, 2);
        assert_eq!(observed.status.desired_replicas, 2);
    }

    #[test]
    fn objects_without_a_name_label_are_invisible() {
        let mut map = ServiceMap::new();
        map.add_deployment(Deployment::default());
        let environment = map.into_environment("dev", "sample");
        assert!(environment.services.is_empty());
    }

    #[test]
    fn folds_claims_into_volumes_with_decoded_paths() {
        let desired = Service {
            name: "api".into(),
            application: "api".into(),
            volumes: vec![Volume {
                name: "data".into(),
                path: "/var/data".into(),
                size: "10Gi".into(),
                kind: "ssd".into(),
                ..Volume::default()
            }],
            ..Service::default()
        };
        let claims = mapper(&desired).persistent_volume_claims();

        let mut map = ServiceMap::new();
        for claim in claims {
            map.add_volume_claim(claim);
        }
        let environment = map.into_environment("dev", "sample");
        let volume = &environment.find_service("api").unwrap().volumes[0];
        assert_eq!(volume.name, "data");
        assert_eq!(volume.path, "/var/data");
        assert_eq!(volume.size, "10Gi");
        assert_eq!(volume.kind, "ssd");
        assert_eq!(volume.modes, "ReadWriteOnce");
        assert!(!volume.is_manually_provisioned());
    }

    #[test]
    fn folds_hpa_metric_shapes_back_into_the_model() {
        let desired = Service {
            name: "api".into(),
            application: "api".into(),
            hpa: Hpa {
                min_replicas: 2,
                max_replicas: 10,
                metric: Metric {
                    name: "cpu".into(),
                    target_average_utilization: 75,
                    ..Metric::default()
                },
            },
            ..Service::default()
        };
        let hpa = mapper(&desired).hpa().unwrap();

        let mut map = ServiceMap::new();
        map.add_hpa(hpa);
        let environment = map.into_environment("dev", "sample");
        let observed = environment.find_service("api").unwrap();
        assert_eq!(observed.hpa.min_replicas, 2);
        assert_eq!(observed.hpa.max_replicas, 10);
        assert_eq!(observed.hpa.metric.name, "cpu");
        assert_eq!(observed.hpa.metric.target_average_utilization, 75);
    }

    #[test]
    fn ingress_overrides_are_detected_against_folded_ports() {
        let desired = Service {
            name: "api".into(),
            application: "api".into(),
            ports: vec![8080],
            external_url: vec!["api.example.com".into()],
            backend: "edge".into(),
            backend_port: 9090,
            ..Service::default()
        };
        let kube_mapper = mapper(&desired);

        let mut map = ServiceMap::new();
        map.add_service(kube_mapper.service());
        map.add_ingress(kube_mapper.ingress().unwrap());
        let environment = map.into_environment("dev", "sample");

        let observed = environment.find_service("api").unwrap();
        assert_eq!(observed.external_url, vec!["api.example.com"]);
        assert_eq!(observed.backend, "edge");
        assert_eq!(observed.backend_port, 9090);
    }

    #[test]
    fn custom_resource_folds_kind_version_and_options() {
        let desired = Service {
            name: "db".into(),
            kind: "mongo".into(),
            version: "3.4".into(),
            options: BTreeMap::from([("backups".to_string(), serde_json::json!("enabled"))]),
            ..Service::default()
        };
        let mut object = mapper(&desired).custom_resource();
        object.metadata.resource_version = Some("77".into());

        let mut map = ServiceMap::new();
        map.add_custom_resource(object);
        let environment = map.into_environment("dev", "sample");

        let observed = environment.find_service("db").unwrap();
        assert_eq!(observed.kind, "mongo");
        assert_eq!(observed.version, "3.4");
        assert_eq!(observed.resource_version.as_deref(), Some("77"));
        assert_eq!(observed.options["backups"], serde_json::json!("enabled"));
    }
}
