//! Projection of a desired service onto concrete Kubernetes objects.
//!
//! [`KubeMapper`] is pure: it takes the declared service plus the process
//! configuration it needs (namespace, registry, pull secrets) and builds
//! API objects without talking to the cluster. The only cluster-derived
//! input is the set of secret names known to exist this tick, used to fail
//! fast on dangling secret references.

use std::collections::{BTreeMap, BTreeSet};

use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec};
use k8s_openapi::api::autoscaling::v2::{
    CrossVersionObjectReference, HorizontalPodAutoscaler, HorizontalPodAutoscalerSpec,
    MetricIdentifier, MetricSpec, MetricTarget, PodsMetricSource, ResourceMetricSource,
};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, EnvVar as K8sEnvVar, EnvVarSource, LocalObjectReference,
    ObjectFieldSelector, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, ResourceRequirements, Secret,
    SecretKeySelector, SecretVolumeSource, Service as KubeService, ServicePort, ServiceSpec,
    Volume as KubeVolume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use rand::RngCore;
use serde_json::json;
use thiserror::Error;

use crate::k8s::custom::{CUSTOM_GROUP, CUSTOM_VERSION, title_case};
use crate::labels;
use crate::model::{Service, Volume};

/// Node selector applied to every pod spec the operator emits.
const NODE_ROLE: &str = "minion";
/// Annotation carrying the storage class on dynamically provisioned claims.
const STORAGE_CLASS_ANNOTATION: &str = "volume.beta.kubernetes.io/storage-class";
/// Key of the replica-set keyfile inside the mongo bootstrap secret.
const MONGO_KEYFILE_KEY: &str = "mongodb-keyfile";
/// Size in bytes of the generated keyfile material, pre-encoding.
const MONGO_KEYFILE_BYTES: usize = 756;

/// A service could not be projected onto Kubernetes objects.
///
/// The service is skipped for the tick; sibling services continue.
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error(
        "unable to find secret [{secret}] in namespace [{namespace}] when processing env vars for [{service}]"
    )]
    MissingSecret {
        secret: String,
        namespace: String,
        service: String,
    },

    #[error("service {service}: volume must have both name and path set")]
    IncompleteVolume { service: String },
}

/// Maps one desired service onto the Kubernetes objects realizing it.
pub struct KubeMapper<'a> {
    pub service: &'a Service,
    pub namespace: &'a str,
    pub registry: &'a str,
    pub pull_secrets: &'a [String],
}

impl KubeMapper<'_> {
    /// The Deployment realizing a generic service.
    pub fn deployment(
        &self,
        known_secrets: &BTreeSet<String>,
    ) -> Result<Deployment, TranslateError> {
        Ok(Deployment {
            metadata: ObjectMeta {
                name: Some(self.service.name.clone()),
                namespace: Some(self.namespace.to_string()),
                labels: Some(self.workload_labels()),
                ..ObjectMeta::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(self.service.replicas),
                selector: LabelSelector {
                    match_labels: Some(labels::identity(&self.service.name)),
                    ..LabelSelector::default()
                },
                template: self.pod_template(known_secrets)?,
                ..DeploymentSpec::default()
            }),
            ..Deployment::default()
        })
    }

    /// The StatefulSet realizing a mongo database service.
    pub fn stateful_set(
        &self,
        known_secrets: &BTreeSet<String>,
    ) -> Result<StatefulSet, TranslateError> {
        let mut set_labels = self.workload_labels();
        set_labels.insert(
            labels::DATABASE.to_string(),
            self.service.database_type.clone(),
        );

        Ok(StatefulSet {
            metadata: ObjectMeta {
                name: Some(self.service.name.clone()),
                namespace: Some(self.namespace.to_string()),
                labels: Some(set_labels),
                ..ObjectMeta::default()
            },
            spec: Some(StatefulSetSpec {
                replicas: Some(self.service.replicas),
                // Stable DNS comes from the headless service of the same name.
                service_name: self.service.name.clone(),
                selector: LabelSelector {
                    match_labels: Some(labels::identity(&self.service.name)),
                    ..LabelSelector::default()
                },
                template: self.pod_template(known_secrets)?,
                ..StatefulSetSpec::default()
            }),
            ..StatefulSet::default()
        })
    }

    /// The bootstrap secret for a mongo replica set.
    ///
    /// The applier only creates this when absent; rotating it would cut the
    /// replicas off from each other.
    pub fn mongo_secret(&self) -> Secret {
        let mut key_material = vec![0u8; MONGO_KEYFILE_BYTES];
        rand::thread_rng().fill_bytes(&mut key_material);

        Secret {
            metadata: ObjectMeta {
                name: Some(self.service.name.clone()),
                namespace: Some(self.namespace.to_string()),
                labels: Some(self.object_labels()),
                ..ObjectMeta::default()
            },
            type_: Some("Opaque".to_string()),
            string_data: Some(BTreeMap::from([(
                MONGO_KEYFILE_KEY.to_string(),
                BASE64_STANDARD.encode(&key_material),
            )])),
            ..Secret::default()
        }
    }

    /// The ClusterIP service exposing the declared ports.
    pub fn service(&self) -> KubeService {
        self.service_with_cluster_ip(None)
    }

    /// Same as [`KubeMapper::service`] but headless, for stable pod DNS.
    pub fn headless_service(&self) -> KubeService {
        self.service_with_cluster_ip(Some("None".to_string()))
    }

    fn service_with_cluster_ip(&self, cluster_ip: Option<String>) -> KubeService {
        let ports = self
            .service
            .ports
            .iter()
            .map(|&port| ServicePort {
                name: Some(format!("tcp-port-{port}")),
                port,
                target_port: Some(IntOrString::Int(port)),
                ..ServicePort::default()
            })
            .collect();

        KubeService {
            metadata: ObjectMeta {
                name: Some(self.service.name.clone()),
                namespace: Some(self.namespace.to_string()),
                labels: Some(self.object_labels()),
                ..ObjectMeta::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(ports),
                selector: Some(labels::identity(&self.service.name)),
                cluster_ip,
                ..ServiceSpec::default()
            }),
            ..KubeService::default()
        }
    }

    /// One claim per declared volume that is not backed by a secret or a
    /// config map.
    pub fn persistent_volume_claims(&self) -> Vec<PersistentVolumeClaim> {
        self.service
            .volumes
            .iter()
            .filter(|volume| volume.needs_claim())
            .map(|volume| self.claim(volume))
            .collect()
    }

    fn claim(&self, volume: &Volume) -> PersistentVolumeClaim {
        let mut claim_labels = labels::identity(&self.service.name);
        claim_labels.insert(
            labels::MOUNT_PATH.to_string(),
            labels::encode_mount_path(&volume.path),
        );
        claim_labels.insert(labels::SIZE.to_string(), volume.size.clone());
        claim_labels.insert(labels::TYPE.to_string(), volume.kind.to_lowercase());

        let mut metadata = ObjectMeta {
            name: Some(volume.name.clone()),
            namespace: Some(self.namespace.to_string()),
            labels: Some(claim_labels),
            ..ObjectMeta::default()
        };

        let mut spec = PersistentVolumeClaimSpec {
            access_modes: Some(volume.access_modes()),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(volume.size.clone()),
                )])),
                ..VolumeResourceRequirements::default()
            }),
            ..PersistentVolumeClaimSpec::default()
        };

        if volume.is_manually_provisioned() {
            // Bind to the pre-provisioned volume of the same name.
            spec.volume_name = Some(volume.name.clone());
            spec.selector = Some(LabelSelector {
                match_labels: Some(BTreeMap::from([(
                    labels::NAME.to_string(),
                    volume.name.clone(),
                )])),
                ..LabelSelector::default()
            });
        } else {
            metadata.annotations = Some(BTreeMap::from([(
                STORAGE_CLASS_ANNOTATION.to_string(),
                format!("aws-{}", volume.kind.to_lowercase()),
            )]));
        }

        PersistentVolumeClaim {
            metadata,
            spec: Some(spec),
            ..PersistentVolumeClaim::default()
        }
    }

    /// The autoscaler, when one is declared.
    pub fn hpa(&self) -> Option<HorizontalPodAutoscaler> {
        if !self.service.hpa.is_configured() {
            return None;
        }

        let target_kind = if self.service.is_mongo() {
            "StatefulSet"
        } else {
            "Deployment"
        };

        Some(HorizontalPodAutoscaler {
            metadata: ObjectMeta {
                name: Some(self.service.name.clone()),
                namespace: Some(self.namespace.to_string()),
                labels: Some(self.workload_labels()),
                ..ObjectMeta::default()
            },
            spec: Some(HorizontalPodAutoscalerSpec {
                scale_target_ref: CrossVersionObjectReference {
                    api_version: Some("apps/v1".to_string()),
                    kind: target_kind.to_string(),
                    name: self.service.name.clone(),
                },
                min_replicas: Some(self.service.hpa.min_replicas),
                max_replicas: self.service.hpa.max_replicas,
                metrics: Some(vec![self.metric_spec()]),
                ..HorizontalPodAutoscalerSpec::default()
            }),
            ..HorizontalPodAutoscaler::default()
        })
    }

    /// Renders the internal version-agnostic metric target onto the
    /// `autoscaling/v2` shape.
    fn metric_spec(&self) -> MetricSpec {
        let metric = &self.service.hpa.metric;
        if metric.is_resource() {
            MetricSpec {
                type_: "Resource".to_string(),
                resource: Some(ResourceMetricSource {
                    name: metric.name.clone(),
                    target: MetricTarget {
                        type_: "Utilization".to_string(),
                        average_utilization: Some(metric.target_average_utilization),
                        ..MetricTarget::default()
                    },
                }),
                ..MetricSpec::default()
            }
        } else {
            MetricSpec {
                type_: "Pods".to_string(),
                pods: Some(PodsMetricSource {
                    metric: MetricIdentifier {
                        name: metric.name.clone(),
                        selector: None,
                    },
                    target: MetricTarget {
                        type_: "AverageValue".to_string(),
                        average_value: Some(Quantity(metric.target_average_value.clone())),
                        ..MetricTarget::default()
                    },
                }),
                ..MetricSpec::default()
            }
        }
    }

    /// The ingress, when the service declares external hostnames.
    pub fn ingress(&self) -> Option<Ingress> {
        if !self.service.has_external_url() {
            return None;
        }

        let mut ingress_labels = self.object_labels();
        for (key, value) in [
            ("ssl", &self.service.ssl),
            ("httpsBackend", &self.service.https_backend),
            ("httpsOnly", &self.service.https_only),
            ("http2", &self.service.http2),
        ] {
            if !value.is_empty() {
                ingress_labels.insert(key.to_string(), value.clone());
            }
        }

        let backend_name = if self.service.backend.is_empty() {
            self.service.name.clone()
        } else {
            self.service.backend.clone()
        };
        let backend_port = if self.service.backend_port != 0 {
            self.service.backend_port
        } else {
            self.service.ports.first().copied().unwrap_or(80)
        };

        let rules = self
            .service
            .external_url
            .iter()
            .map(|host| IngressRule {
                host: Some(host.clone()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "ImplementationSpecific".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: backend_name.clone(),
                                port: Some(ServiceBackendPort {
                                    number: Some(backend_port),
                                    ..ServiceBackendPort::default()
                                }),
                            }),
                            ..IngressBackend::default()
                        },
                    }],
                }),
            })
            .collect();

        Some(Ingress {
            metadata: ObjectMeta {
                name: Some(self.service.name.clone()),
                namespace: Some(self.namespace.to_string()),
                labels: Some(ingress_labels),
                ..ObjectMeta::default()
            },
            spec: Some(IngressSpec {
                rules: Some(rules),
                ..IngressSpec::default()
            }),
            ..Ingress::default()
        })
    }

    /// The single custom resource realizing a typed service.
    ///
    /// The observed `resourceVersion` is carried verbatim so an update is a
    /// compare-and-swap; a brand-new resource carries none.
    pub fn custom_resource(&self) -> DynamicObject {
        let gvk = GroupVersionKind::gvk(
            CUSTOM_GROUP,
            CUSTOM_VERSION,
            &title_case(&self.service.kind),
        );
        let resource = ApiResource::from_gvk(&gvk);

        let mut object = DynamicObject::new(&self.service.name, &resource).within(self.namespace);
        object.metadata.labels = Some(labels::identity(&self.service.name));
        object.metadata.resource_version = self.service.resource_version.clone();
        object.data = json!({
            "spec": {
                "version": self.service.version,
                "options": self.service.options,
            }
        });
        object
    }

    fn container(&self, known_secrets: &BTreeSet<String>) -> Result<Container, TranslateError> {
        let image = if self.service.version.is_empty() {
            // No version pinned: leave the image untouched this tick.
            None
        } else {
            Some(format!(
                "{}/{}:{}",
                self.registry, self.service.application, self.service.version
            ))
        };

        Ok(Container {
            name: self.service.name.clone(),
            image,
            command: non_empty(self.service.commands.clone()),
            env: non_empty(self.env_vars(known_secrets)?),
            volume_mounts: non_empty(self.volume_mounts()?),
            resources: self.resource_requirements(),
            ..Container::default()
        })
    }

    fn pod_template(
        &self,
        known_secrets: &BTreeSet<String>,
    ) -> Result<PodTemplateSpec, TranslateError> {
        let pull_secrets: Vec<LocalObjectReference> = self
            .pull_secrets
            .iter()
            .map(|name| LocalObjectReference {
                name: name.clone(),
            })
            .collect();

        Ok(PodTemplateSpec {
            metadata: Some(ObjectMeta {
                name: Some(self.service.name.clone()),
                labels: Some(self.workload_labels()),
                annotations: non_empty_map(self.service.annotations.clone()),
                ..ObjectMeta::default()
            }),
            spec: Some(PodSpec {
                node_selector: Some(BTreeMap::from([(
                    "role".to_string(),
                    NODE_ROLE.to_string(),
                )])),
                containers: vec![self.container(known_secrets)?],
                image_pull_secrets: non_empty(pull_secrets),
                volumes: non_empty(self.pod_volumes()),
                ..PodSpec::default()
            }),
        })
    }

    fn env_vars(&self, known_secrets: &BTreeSet<String>) -> Result<Vec<K8sEnvVar>, TranslateError> {
        let mut rendered = Vec::with_capacity(self.service.env_vars.len());
        for declared in &self.service.env_vars {
            if declared.is_secret() {
                let (secret_name, key) = declared.secret_parts();
                if !known_secrets.contains(secret_name) {
                    return Err(TranslateError::MissingSecret {
                        secret: secret_name.to_string(),
                        namespace: self.namespace.to_string(),
                        service: self.service.name.clone(),
                    });
                }
                rendered.push(K8sEnvVar {
                    name: declared.secret.clone(),
                    value_from: Some(EnvVarSource {
                        secret_key_ref: Some(SecretKeySelector {
                            name: secret_name.to_string(),
                            key: key.to_string(),
                            ..SecretKeySelector::default()
                        }),
                        ..EnvVarSource::default()
                    }),
                    ..K8sEnvVar::default()
                });
            } else if declared.is_pod_field() {
                rendered.push(K8sEnvVar {
                    name: declared.name.clone(),
                    value_from: Some(EnvVarSource {
                        field_ref: Some(ObjectFieldSelector {
                            field_path: declared.pod_field.clone(),
                            ..ObjectFieldSelector::default()
                        }),
                        ..EnvVarSource::default()
                    }),
                    ..K8sEnvVar::default()
                });
            } else {
                rendered.push(K8sEnvVar {
                    name: declared.name.clone(),
                    value: Some(declared.value.clone()),
                    ..K8sEnvVar::default()
                });
            }
        }
        Ok(rendered)
    }

    fn volume_mounts(&self) -> Result<Vec<VolumeMount>, TranslateError> {
        self.service
            .volumes
            .iter()
            .map(|volume| {
                if volume.name.is_empty() || volume.path.is_empty() {
                    return Err(TranslateError::IncompleteVolume {
                        service: self.service.name.clone(),
                    });
                }
                Ok(VolumeMount {
                    name: volume.name.clone(),
                    mount_path: volume.path.clone(),
                    ..VolumeMount::default()
                })
            })
            .collect()
    }

    fn pod_volumes(&self) -> Vec<KubeVolume> {
        self.service
            .volumes
            .iter()
            .map(|volume| KubeVolume {
                name: volume.name.clone(),
                ..self.volume_source(volume)
            })
            .collect()
    }

    fn volume_source(&self, volume: &Volume) -> KubeVolume {
        if volume.is_secret() {
            KubeVolume {
                secret: Some(SecretVolumeSource {
                    secret_name: Some(volume.name.clone()),
                    ..SecretVolumeSource::default()
                }),
                ..KubeVolume::default()
            }
        } else if volume.is_config_map() {
            KubeVolume {
                config_map: Some(ConfigMapVolumeSource {
                    name: volume.name.clone(),
                    ..ConfigMapVolumeSource::default()
                }),
                ..KubeVolume::default()
            }
        } else {
            KubeVolume {
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: volume.name.clone(),
                    ..PersistentVolumeClaimVolumeSource::default()
                }),
                ..KubeVolume::default()
            }
        }
    }

    /// Requests and limits per the QoS rules: limits alone when no request
    /// is declared, otherwise the declared requests alongside both limits.
    fn resource_requirements(&self) -> Option<ResourceRequirements> {
        let mut limits = BTreeMap::new();
        if !self.service.limits.cpu.is_empty() {
            limits.insert("cpu".to_string(), Quantity(self.service.limits.cpu.clone()));
        }
        if !self.service.limits.memory.is_empty() {
            limits.insert(
                "memory".to_string(),
                Quantity(self.service.limits.memory.clone()),
            );
        }

        let mut requests = BTreeMap::new();
        if !self.service.requests.cpu.is_empty() {
            requests.insert(
                "cpu".to_string(),
                Quantity(self.service.requests.cpu.clone()),
            );
        }
        if !self.service.requests.memory.is_empty() {
            requests.insert(
                "memory".to_string(),
                Quantity(self.service.requests.memory.clone()),
            );
        }

        if limits.is_empty() && requests.is_empty() {
            return None;
        }

        Some(ResourceRequirements {
            limits: non_empty_map(limits),
            requests: non_empty_map(requests),
            ..ResourceRequirements::default()
        })
    }

    /// Full label set for workload objects: identity plus application and
    /// version.
    fn workload_labels(&self) -> BTreeMap<String, String> {
        let mut set = labels::identity(&self.service.name);
        set.insert(
            labels::APPLICATION.to_string(),
            self.service.application.clone(),
        );
        set.insert(labels::VERSION.to_string(), self.service.version.clone());
        set
    }

    /// Label set for satellite objects: identity plus application.
    fn object_labels(&self) -> BTreeMap<String, String> {
        let mut set = labels::identity(&self.service.name);
        set.insert(
            labels::APPLICATION.to_string(),
            self.service.application.clone(),
        );
        set
    }
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() { None } else { Some(items) }
}

fn non_empty_map<K, V>(map: BTreeMap<K, V>) -> Option<BTreeMap<K, V>> {
    if map.is_empty() { None } else { Some(map) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EnvVar, Hpa, Metric, ResourceQuantities};

    fn sample_service() -> Service {
        Service {
            name: "api".into(),
            application: "api".into(),
            version: "1.0.0".into(),
            replicas: 2,
            ports: vec![8080],
            external_url: vec!["api.example.com".into()],
            ..Service::default()
        }
    }

    fn mapper<'a>(service: &'a Service) -> KubeMapper<'a> {
        KubeMapper {
            service,
            namespace: "sample",
            registry: "registry.example.com",
            pull_secrets: &[],
        }
    }

    fn assert_identity_labels(labels: &BTreeMap<String, String>, service: &str) {
        assert_eq!(labels.get("creator").map(String::as_str), Some("pipeline"));
        assert_eq!(labels.get("name").map(String::as_str), Some(service));
    }

    #[test]
    fn every_emitted_object_carries_identity_labels() {
        let mut service = sample_service();
        service.volumes = vec![Volume {
            name: "data".into(),
            path: "/var/data".into(),
            size: "10Gi".into(),
            kind: "ssd".into(),
            ..Volume::default()
        }];
        service.hpa = Hpa {
            min_replicas: 2,
            max_replicas: 10,
            metric: Metric {
                name: "cpu".into(),
                target_average_utilization: 75,
                ..Metric::default()
            },
        };
        let mapper = mapper(&service);
        let none = BTreeSet::new();

        let deployment = mapper.deployment(&none).unwrap();
        assert_identity_labels(deployment.metadata.labels.as_ref().unwrap(), "api");

        let kube_service = mapper.service();
        assert_identity_labels(kube_service.metadata.labels.as_ref().unwrap(), "api");

        let ingress = mapper.ingress().unwrap();
        assert_identity_labels(ingress.metadata.labels.as_ref().unwrap(), "api");

        let hpa = mapper.hpa().unwrap();
        assert_identity_labels(hpa.metadata.labels.as_ref().unwrap(), "api");

        for claim in mapper.persistent_volume_claims() {
            assert_identity_labels(claim.metadata.labels.as_ref().unwrap(), "api");
        }
    }

    #[test]
    fn greenfield_deployment_service_and_ingress() {
        let service = sample_service();
        let mapper = mapper(&service);

        let deployment = mapper.deployment(&BTreeSet::new()).unwrap();
        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(2));
        let container = &spec.template.spec.as_ref().unwrap().containers[0];
        assert_eq!(
            container.image.as_deref(),
            Some("registry.example.com/api:1.0.0")
        );

        let kube_service = mapper.service();
        let ports = kube_service.spec.unwrap().ports.unwrap();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].port, 8080);
        assert_eq!(ports[0].name.as_deref(), Some("tcp-port-8080"));
        assert_eq!(ports[0].target_port, Some(IntOrString::Int(8080)));

        let ingress = mapper.ingress().unwrap();
        let rules = ingress.spec.unwrap().rules.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].host.as_deref(), Some("api.example.com"));
        let path = &rules[0].http.as_ref().unwrap().paths[0];
        assert_eq!(path.path.as_deref(), Some("/"));
        let backend = path.backend.service.as_ref().unwrap();
        assert_eq!(backend.name, "api");
        assert_eq!(backend.port.as_ref().unwrap().number, Some(8080));

        // No HPA declared, no HPA emitted.
        assert!(mapper.hpa().is_none());
        assert!(mapper.persistent_volume_claims().is_empty());
    }

    #[test]
    fn unpinned_version_leaves_the_image_unset() {
        let mut service = sample_service();
        service.version = String::new();
        let deployment = mapper(&service).deployment(&BTreeSet::new()).unwrap();
        let pod_spec = deployment.spec.unwrap().template.spec.unwrap();
        assert!(pod_spec.containers[0].image.is_none());
    }

    #[test]
    fn qos_limits_only_when_no_requests_are_declared() {
        let mut service = sample_service();
        service.limits = ResourceQuantities {
            cpu: "500m".into(),
            memory: "512Mi".into(),
        };
        let requirements = mapper(&service).resource_requirements().unwrap();
        assert!(requirements.requests.is_none());
        let limits = requirements.limits.unwrap();
        assert_eq!(limits["cpu"], Quantity("500m".into()));
        assert_eq!(limits["memory"], Quantity("512Mi".into()));
    }

    #[test]
    fn qos_partial_request_keeps_both_limits() {
        let mut service = sample_service();
        service.limits = ResourceQuantities {
            cpu: "500m".into(),
            memory: "512Mi".into(),
        };
        service.requests = ResourceQuantities {
            memory: "256Mi".into(),
            ..ResourceQuantities::default()
        };
        let requirements = mapper(&service).resource_requirements().unwrap();
        let requests = requirements.requests.unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests["memory"], Quantity("256Mi".into()));
        assert_eq!(requirements.limits.unwrap().len(), 2);
    }

    #[test]
    fn secret_env_var_requires_the_secret_to_exist() {
        let mut service = sample_service();
        service.env_vars = vec![EnvVar::secret_ref("DB_PASS", "creds/db")];

        let err = mapper(&service).deployment(&BTreeSet::new()).unwrap_err();
        assert!(matches!(err, TranslateError::MissingSecret { secret, .. } if secret == "creds"));

        let known = BTreeSet::from(["creds".to_string()]);
        let deployment = mapper(&service).deployment(&known).unwrap();
        let env = deployment.spec.unwrap().template.spec.unwrap().containers[0]
            .env
            .clone()
            .unwrap();
        let secret_ref = env[0].value_from.as_ref().unwrap().secret_key_ref.as_ref().unwrap();
        assert_eq!(env[0].name, "DB_PASS");
        assert_eq!(secret_ref.name, "creds");
        assert_eq!(secret_ref.key, "db");
    }

    #[test]
    fn slashless_secret_reference_uses_the_name_as_key() {
        let mut service = sample_service();
        service.env_vars = vec![EnvVar::secret_ref("TOKEN", "apitoken")];
        let known = BTreeSet::from(["apitoken".to_string()]);
        let deployment = mapper(&service).deployment(&known).unwrap();
        let env = deployment.spec.unwrap().template.spec.unwrap().containers[0]
            .env
            .clone()
            .unwrap();
        let secret_ref = env[0].value_from.as_ref().unwrap().secret_key_ref.as_ref().unwrap();
        assert_eq!(secret_ref.name, "apitoken");
        assert_eq!(secret_ref.key, "apitoken");
    }

    #[test]
    fn pod_field_env_var_renders_a_field_ref() {
        let mut service = sample_service();
        service.env_vars = vec![EnvVar::pod_field("POD_IP", "status.podIP")];
        let deployment = mapper(&service).deployment(&BTreeSet::new()).unwrap();
        let env = deployment.spec.unwrap().template.spec.unwrap().containers[0]
            .env
            .clone()
            .unwrap();
        let field_ref = env[0].value_from.as_ref().unwrap().field_ref.as_ref().unwrap();
        assert_eq!(field_ref.field_path, "status.podIP");
    }

    #[test]
    fn secret_volume_never_produces_a_claim_but_mounts_the_secret() {
        let mut service = sample_service();
        service.volumes = vec![Volume {
            name: "tls".into(),
            path: "/etc/tls".into(),
            kind: "secret".into(),
            ..Volume::default()
        }];
        let mapper = mapper(&service);

        assert!(mapper.persistent_volume_claims().is_empty());

        let deployment = mapper.deployment(&BTreeSet::new()).unwrap();
        let pod_spec = deployment.spec.unwrap().template.spec.unwrap();
        let volume = &pod_spec.volumes.as_ref().unwrap()[0];
        assert_eq!(
            volume.secret.as_ref().unwrap().secret_name.as_deref(),
            Some("tls")
        );
        let mount = &pod_spec.containers[0].volume_mounts.as_ref().unwrap()[0];
        assert_eq!(mount.name, "tls");
        assert_eq!(mount.mount_path, "/etc/tls");
    }

    #[test]
    fn dynamic_claim_carries_storage_class_and_encoded_path() {
        let mut service = sample_service();
        service.volumes = vec![Volume {
            name: "data".into(),
            path: "/var/data".into(),
            size: "10Gi".into(),
            kind: "SSD".into(),
            ..Volume::default()
        }];
        let claims = mapper(&service).persistent_volume_claims();
        assert_eq!(claims.len(), 1);

        let claim = &claims[0];
        let annotations = claim.metadata.annotations.as_ref().unwrap();
        assert_eq!(annotations[STORAGE_CLASS_ANNOTATION], "aws-ssd");
        let labels = claim.metadata.labels.as_ref().unwrap();
        assert_eq!(labels["mount_path"], "2Fvar2Fdata");
        assert_eq!(labels["size"], "10Gi");
        assert_eq!(labels["type"], "ssd");
        let spec = claim.spec.as_ref().unwrap();
        assert!(spec.volume_name.is_none());
        assert!(spec.selector.is_none());
    }

    #[test]
    fn manual_claim_binds_by_name_without_a_storage_class() {
        let mut service = sample_service();
        service.volumes = vec![Volume {
            name: "legacy".into(),
            path: "/var/legacy".into(),
            size: "50Gi".into(),
            kind: "ssd".into(),
            provisioning: "manual".into(),
            ..Volume::default()
        }];
        let claims = mapper(&service).persistent_volume_claims();
        let spec = claims[0].spec.as_ref().unwrap();
        assert_eq!(spec.volume_name.as_deref(), Some("legacy"));
        let match_labels = spec.selector.as_ref().unwrap().match_labels.as_ref().unwrap();
        assert_eq!(match_labels["name"], "legacy");
        assert!(claims[0].metadata.annotations.is_none());
    }

    #[test]
    fn cpu_metric_renders_a_resource_utilization_target() {
        let mut service = sample_service();
        service.hpa = Hpa {
            min_replicas: 2,
            max_replicas: 10,
            metric: Metric {
                name: "cpu".into(),
                target_average_utilization: 75,
                ..Metric::default()
            },
        };
        let hpa = mapper(&service).hpa().unwrap();
        let spec = hpa.spec.unwrap();
        assert_eq!(spec.min_replicas, Some(2));
        assert_eq!(spec.max_replicas, 10);
        assert_eq!(spec.scale_target_ref.kind, "Deployment");

        let metrics = spec.metrics.unwrap();
        let metric = &metrics[0];
        assert_eq!(metric.type_, "Resource");
        let resource = metric.resource.as_ref().unwrap();
        assert_eq!(resource.name, "cpu");
        assert_eq!(resource.target.average_utilization, Some(75));
    }

    #[test]
    fn custom_metric_renders_a_pods_average_value_target() {
        let mut service = sample_service();
        service.hpa = Hpa {
            min_replicas: 1,
            max_replicas: 5,
            metric: Metric {
                name: "requests_per_second".into(),
                target_average_value: "250".into(),
                ..Metric::default()
            },
        };
        let hpa = mapper(&service).hpa().unwrap();
        let metrics = hpa.spec.unwrap().metrics.unwrap();
        let metric = &metrics[0];
        assert_eq!(metric.type_, "Pods");
        let pods = metric.pods.as_ref().unwrap();
        assert_eq!(pods.metric.name, "requests_per_second");
        assert_eq!(pods.target.average_value, Some(Quantity("250".into())));
    }

    #[test]
    fn ingress_honors_backend_overrides_and_flag_labels() {
        let mut service = sample_service();
        service.external_url = vec!["a.example.com".into(), "b.example.com".into()];
        service.backend = "edge".into();
        service.backend_port = 9090;
        service.ssl = "true".into();
        service.http2 = "true".into();

        let ingress = mapper(&service).ingress().unwrap();
        let labels = ingress.metadata.labels.as_ref().unwrap();
        assert_eq!(labels["ssl"], "true");
        assert_eq!(labels["http2"], "true");
        assert!(!labels.contains_key("httpsOnly"));

        let rules = ingress.spec.unwrap().rules.unwrap();
        assert_eq!(rules.len(), 2);
        for rule in &rules {
            let backend = rule.http.as_ref().unwrap().paths[0]
                .backend
                .service
                .as_ref()
                .unwrap();
            assert_eq!(backend.name, "edge");
            assert_eq!(backend.port.as_ref().unwrap().number, Some(9090));
        }
    }

    #[test]
    fn custom_resource_is_title_cased_and_carries_the_observed_version() {
        let mut service = sample_service();
        service.kind = "mongo".into();
        service.version = "3.4".into();
        service.resource_version = Some("4242".into());
        service
            .options
            .insert("backups".into(), serde_json::json!("enabled"));

        let object = mapper(&service).custom_resource();
        assert_eq!(object.types.as_ref().unwrap().kind, "Mongo");
        assert_eq!(
            object.types.as_ref().unwrap().api_version,
            "prsn.io/v1"
        );
        assert_eq!(object.metadata.resource_version.as_deref(), Some("4242"));
        assert_eq!(object.data["spec"]["version"], "3.4");
        assert_eq!(object.data["spec"]["options"]["backups"], "enabled");
        assert_identity_labels(object.metadata.labels.as_ref().unwrap(), "api");
    }

    #[test]
    fn fresh_custom_resource_carries_no_resource_version() {
        let mut service = sample_service();
        service.kind = "docdb".into();
        let object = mapper(&service).custom_resource();
        assert!(object.metadata.resource_version.is_none());
    }

    #[test]
    fn mongo_objects_form_a_stateful_set_with_headless_service_and_secret() {
        let mut service = sample_service();
        service.database_type = "mongo".into();
        service.replicas = 3;
        let mapper = mapper(&service);

        let secret = mapper.mongo_secret();
        let data = secret.string_data.unwrap();
        assert!(data.contains_key("mongodb-keyfile"));
        assert!(!data["mongodb-keyfile"].is_empty());

        let set = mapper.stateful_set(&BTreeSet::new()).unwrap();
        let spec = set.spec.unwrap();
        assert_eq!(spec.service_name, "api");
        assert_eq!(spec.replicas, Some(3));
        assert_eq!(
            set.metadata.labels.as_ref().unwrap().get("database"),
            Some(&"mongo".to_string())
        );

        let headless = mapper.headless_service();
        assert_eq!(
            headless.spec.as_ref().unwrap().cluster_ip.as_deref(),
            Some("None")
        );
    }
}
