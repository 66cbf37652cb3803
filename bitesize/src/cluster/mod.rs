//! Reading the observed environment out of a namespace and applying the
//! desired one back into it.
//!
//! Reading tolerates partial failures: an error listing one kind is logged
//! and the affected aspect simply stays absent, which the diff layer treats
//! as unchanged. Applying logs per-object failures and carries on, favoring
//! eventual convergence over atomic application.

pub mod service_map;

use std::collections::BTreeSet;

use bitesize_config::OperatorConfig;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::{
    Namespace, PersistentVolumeClaim, Pod as KubePod, Secret, Service as KubeService,
};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, ListParams, LogParams};
use kube::{Client, ResourceExt};
use tracing::{debug, error, info, warn};

use crate::diff::{Changes, DegradedAspects, should_deploy};
use crate::k8s::custom::CustomResourceClient;
use crate::k8s::{K8sError, ResourceClient};
use crate::labels;
use crate::model::{Environment, Pod, Service};
use crate::translator::KubeMapper;

use self::service_map::ServiceMap;

/// Result of one cluster read: the reconstructed environment plus which
/// aspects could not be listed and must be treated as unchanged.
#[derive(Debug)]
pub struct Observation {
    pub environment: Environment,
    pub degraded: DegradedAspects,
}

/// Handle on the target namespace.
///
/// Construction requires a working Kubernetes client; failing to obtain one
/// is the only fatal error after startup begins.
pub struct Cluster {
    client: Client,
    config: OperatorConfig,
}

impl Cluster {
    pub fn new(client: Client, config: OperatorConfig) -> Cluster {
        Cluster { client, config }
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    fn typed<K>(&self) -> ResourceClient<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
            + Clone
            + serde::de::DeserializeOwned
            + serde::Serialize
            + std::fmt::Debug,
        K::DynamicType: Default,
    {
        ResourceClient::namespaced(self.client.clone(), &self.config.namespace)
    }

    fn custom(&self, kind: &str) -> CustomResourceClient {
        CustomResourceClient::namespaced(self.client.clone(), &self.config.namespace, kind)
    }

    /// Reconstructs the observed environment from the live objects carrying
    /// `creator=pipeline`.
    ///
    /// A failed listing is logged, marks its aspect degraded, and never
    /// fails the read as a whole.
    pub async fn load_environment(&self) -> Result<Observation, K8sError> {
        let environment_name = self.environment_label().await?;
        let mut map = ServiceMap::new();
        let mut degraded = DegradedAspects::default();

        match self.typed::<KubeService>().list().await {
            Ok(items) => items.into_iter().for_each(|item| map.add_service(item)),
            Err(err) => {
                error!("error loading kubernetes services: {err}");
                degraded.services = true;
            }
        }
        match self.typed::<Deployment>().list().await {
            Ok(items) => items.into_iter().for_each(|item| map.add_deployment(item)),
            Err(err) => {
                error!("error loading kubernetes deployments: {err}");
                degraded.workloads = true;
            }
        }
        match self.typed::<HorizontalPodAutoscaler>().list().await {
            Ok(items) => items.into_iter().for_each(|item| map.add_hpa(item)),
            Err(err) => {
                error!("error loading kubernetes hpas: {err}");
                degraded.autoscalers = true;
            }
        }
        match self.typed::<Ingress>().list().await {
            Ok(items) => items.into_iter().for_each(|item| map.add_ingress(item)),
            Err(err) => {
                error!("error loading kubernetes ingresses: {err}");
                degraded.ingresses = true;
            }
        }
        match self.typed::<StatefulSet>().list().await {
            Ok(items) => items
                .into_iter()
                .for_each(|item| map.add_stateful_set(item)),
            Err(err) => {
                error!("error loading kubernetes statefulsets: {err}");
                degraded.workloads = true;
            }
        }
        match self.typed::<PersistentVolumeClaim>().list().await {
            Ok(items) => items
                .into_iter()
                .for_each(|item| map.add_volume_claim(item)),
            Err(err) => {
                error!("error loading kubernetes volume claims: {err}");
                degraded.claims = true;
            }
        }
        for kind in &self.config.custom_kinds {
            match self.custom(kind).list().await {
                Ok(items) => items
                    .into_iter()
                    .for_each(|item| map.add_custom_resource(item)),
                // A registered kind whose definition is not installed lists
                // as 404; that is an empty kind, not a degraded read.
                Err(K8sError::Kube(kube::Error::Api(response))) if response.code == 404 => {
                    debug!("custom resource kind {kind} is not served by the cluster");
                }
                Err(err) => {
                    error!("error loading custom resources of kind {kind}: {err}");
                    degraded.custom_resources = true;
                }
            }
        }

        Ok(Observation {
            environment: map.into_environment(&environment_name, &self.config.namespace),
            degraded,
        })
    }

    /// The environment name the namespace is labelled with.
    async fn environment_label(&self) -> Result<String, K8sError> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let namespace = namespaces.get(&self.config.namespace).await?;
        Ok(namespace
            .labels()
            .get("environment")
            .cloned()
            .unwrap_or_default())
    }

    /// Applies every desired service the decider selects, in manifest order.
    pub async fn apply_environment(
        &self,
        desired: &Environment,
        observed: &Environment,
        changes: &Changes,
    ) {
        // One secret listing serves every service this tick.
        let known_secrets = self.secret_names().await;

        for service in &desired.services {
            if !should_deploy(desired, observed, changes, &service.name) {
                debug!(service = service.name, "skipping service without changes");
                continue;
            }

            let mut effective = service.clone();
            if let Some(current) = observed.find_service(&service.name) {
                // An unpinned version keeps whatever is running.
                if effective.version.is_empty() {
                    effective.version = current.version.clone();
                }
                if effective.application.is_empty() {
                    effective.application = current.application.clone();
                }
                effective.resource_version = current.resource_version.clone();
            }

            self.apply_service(&effective, &known_secrets).await;
        }
    }

    /// Applies the objects realizing one service, in the fixed order
    /// Secret, workload, claims, service, autoscaler, ingress.
    pub async fn apply_service(&self, service: &Service, known_secrets: &BTreeSet<String>) {
        let mapper = KubeMapper {
            service,
            namespace: &self.config.namespace,
            registry: &self.config.docker_registry,
            pull_secrets: &self.config.docker_pull_secrets,
        };

        if service.is_custom_resource() {
            let client = self.custom(&service.kind);
            match client.apply(&mapper.custom_resource()).await {
                Ok(()) => info!(
                    service = service.name,
                    kind = client.kind(),
                    "applied custom resource"
                ),
                Err(err) => error!(service = service.name, "error applying custom resource: {err}"),
            }
            return;
        }

        if service.is_mongo() {
            debug!(service = service.name, "applying stateful set for mongo service");

            // Rotating the bootstrap secret would break replica-set auth, so
            // it is only ever created, never updated.
            let secrets = self.typed::<Secret>();
            match secrets.exists(&service.name).await {
                Ok(true) => debug!(service = service.name, "bootstrap secret already exists"),
                Ok(false) => {
                    if let Err(err) = secrets.apply(&mapper.mongo_secret()).await {
                        error!(service = service.name, "error applying bootstrap secret: {err}");
                    }
                }
                Err(err) => error!(service = service.name, "error probing bootstrap secret: {err}"),
            }

            match mapper.stateful_set(known_secrets) {
                Ok(set) => {
                    if let Err(err) = self.typed::<StatefulSet>().apply(&set).await {
                        error!(service = service.name, "error applying stateful set: {err}");
                    }
                }
                Err(err) => {
                    error!(service = service.name, "error translating service: {err}");
                    return;
                }
            }
        } else {
            debug!(service = service.name, "applying deployment");

            match mapper.deployment(known_secrets) {
                Ok(deployment) => {
                    if let Err(err) = self.typed::<Deployment>().apply(&deployment).await {
                        error!(service = service.name, "error applying deployment: {err}");
                    }
                }
                Err(err) => {
                    error!(service = service.name, "error translating service: {err}");
                    return;
                }
            }
        }

        let claims = self.typed::<PersistentVolumeClaim>();
        for claim in mapper.persistent_volume_claims() {
            let name = claim.name_any();
            if let Ok(Some(existing)) = claims.get(&name).await {
                let owned = existing
                    .labels()
                    .get(labels::CREATOR)
                    .is_some_and(|value| value == labels::CREATOR_VALUE);
                if !owned {
                    warn!(
                        claim = name,
                        "updating existing claim that was not created by the pipeline"
                    );
                }
            }
            if let Err(err) = claims.apply(&claim).await {
                error!(service = service.name, claim = name, "error applying claim: {err}");
            }
        }

        let kube_service = if service.is_mongo() {
            mapper.headless_service()
        } else {
            mapper.service()
        };
        if let Err(err) = self.typed::<KubeService>().apply(&kube_service).await {
            error!(service = service.name, "error applying service: {err}");
        }

        if let Some(hpa) = mapper.hpa() {
            if let Err(err) = self.typed::<HorizontalPodAutoscaler>().apply(&hpa).await {
                error!(service = service.name, "error applying hpa: {err}");
            }
        }

        if let Some(ingress) = mapper.ingress() {
            if let Err(err) = self.typed::<Ingress>().apply(&ingress).await {
                error!(service = service.name, "error applying ingress: {err}");
            }
        }
    }

    /// Names of every secret in the namespace, used to validate secret
    /// references before a deployment is applied. A listing failure degrades
    /// to "nothing exists": affected services skip this tick and converge
    /// once the API recovers.
    async fn secret_names(&self) -> BTreeSet<String> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &self.config.namespace);
        match secrets.list(&ListParams::default()).await {
            Ok(list) => list.items.iter().map(|secret| secret.name_any()).collect(),
            Err(err) => {
                error!("error listing secrets: {err}");
                BTreeSet::new()
            }
        }
    }

    /// Pods owned by the operator, for the status surface.
    pub async fn load_pods(&self) -> Result<Vec<Pod>, K8sError> {
        let pods: Api<KubePod> = Api::namespaced(self.client.clone(), &self.config.namespace);
        let params = ListParams::default().labels(&labels::selector());
        let list = pods.list(&params).await?;

        Ok(list
            .items
            .into_iter()
            .map(|pod| {
                let status = pod.status.as_ref();
                Pod {
                    name: pod.name_any(),
                    phase: status
                        .and_then(|status| status.phase.clone())
                        .unwrap_or_default(),
                    start_time: status
                        .and_then(|status| status.start_time.as_ref())
                        .map(|time| time.0.to_rfc3339())
                        .unwrap_or_default(),
                    ..Pod::default()
                }
            })
            .collect())
    }

    /// Logs of a single pod, for the status surface.
    pub async fn pod_logs(&self, name: &str) -> Result<String, K8sError> {
        let pods: Api<KubePod> = Api::namespaced(self.client.clone(), &self.config.namespace);
        Ok(pods.logs(name, &LogParams::default()).await?)
    }

    /// Clients used by the reaper; kept here so every kind list goes through
    /// the same label selector.
    pub(crate) fn reapable(&self) -> ReapableClients {
        ReapableClients {
            deployments: self.typed(),
            services: self.typed(),
            ingresses: self.typed(),
            hpas: self.typed(),
            stateful_sets: self.typed(),
            claims: self.typed(),
            secrets: self.typed(),
            customs: self
                .config
                .custom_kinds
                .iter()
                .map(|kind| self.custom(kind))
                .collect(),
        }
    }
}

/// Typed clients for every kind the reaper sweeps.
pub(crate) struct ReapableClients {
    pub deployments: ResourceClient<Deployment>,
    pub services: ResourceClient<KubeService>,
    pub ingresses: ResourceClient<Ingress>,
    pub hpas: ResourceClient<HorizontalPodAutoscaler>,
    pub stateful_sets: ResourceClient<StatefulSet>,
    pub claims: ResourceClient<PersistentVolumeClaim>,
    pub secrets: ResourceClient<Secret>,
    pub customs: Vec<CustomResourceClient>,
}
