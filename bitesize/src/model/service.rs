use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, de};

use crate::model::env_var::EnvVar;
use crate::model::hpa::Hpa;
use crate::model::volume::Volume;

/// Deployment method marker for services that coordinate blue/green child
/// deployments. The decider always re-applies such parents.
const BLUE_GREEN_METHOD: &str = "bluegreen";

/// A single service declaration: one workload plus its satellite objects.
///
/// The same shape is reconstructed from the cluster by the reader, which is
/// what makes desired and observed state directly comparable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Service {
    pub name: String,
    /// Image repository stem; defaults to the service name.
    #[serde(default)]
    pub application: String,
    /// Image tag. Empty means the image is not managed by this tick.
    #[serde(default, deserialize_with = "flexible_string")]
    pub version: String,
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    #[serde(default)]
    pub commands: Vec<String>,
    /// TCP ports; the first one is the ingress target.
    #[serde(default = "default_ports")]
    pub ports: Vec<i32>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub requests: ResourceQuantities,
    #[serde(default)]
    pub limits: ResourceQuantities,
    #[serde(default)]
    pub volumes: Vec<Volume>,
    #[serde(default, rename = "env")]
    pub env_vars: Vec<EnvVar>,
    #[serde(default)]
    pub hpa: Hpa,
    #[serde(default, deserialize_with = "one_or_many")]
    pub external_url: Vec<String>,
    /// Ingress backend service override.
    #[serde(default)]
    pub backend: String,
    /// Ingress backend port override; zero means no override.
    #[serde(default)]
    pub backend_port: i32,
    #[serde(default, deserialize_with = "flexible_string")]
    pub ssl: String,
    #[serde(default, deserialize_with = "flexible_string")]
    pub https_backend: String,
    #[serde(default, deserialize_with = "flexible_string")]
    pub https_only: String,
    #[serde(default, deserialize_with = "flexible_string")]
    pub http2: String,
    /// Non-empty turns the whole service into a single custom resource of
    /// this kind.
    #[serde(default, rename = "type")]
    pub kind: String,
    /// Currently only `mongo` selects the stateful-set path.
    #[serde(default)]
    pub database_type: String,
    /// Opaque key/value bag passed through to custom resources.
    #[serde(default)]
    pub options: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub deployment_method: String,
    /// Server-assigned version of the backing custom resource, captured by
    /// the cluster reader for compare-and-swap updates.
    #[serde(skip)]
    pub resource_version: Option<String>,
    /// Observed status; populated only by the cluster reader, except for
    /// `desired_replicas` which the loader seeds from `replicas`.
    #[serde(skip)]
    pub status: ServiceStatus,
}

/// CPU and memory quantities in Kubernetes notation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceQuantities {
    #[serde(default, deserialize_with = "flexible_string")]
    pub cpu: String,
    #[serde(default, deserialize_with = "flexible_string")]
    pub memory: String,
}

/// Observed per-service state. Never compared directly; the diff layer
/// clears it before fingerprinting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub deployed_at: String,
    pub desired_replicas: i32,
    pub available_replicas: i32,
    pub current_replicas: i32,
}

impl Service {
    /// Whether the service is realized as a single custom resource.
    pub fn is_custom_resource(&self) -> bool {
        !self.kind.is_empty()
    }

    /// Whether the service takes the mongo stateful-set path.
    pub fn is_mongo(&self) -> bool {
        self.kind.is_empty() && self.database_type == "mongo"
    }

    pub fn has_external_url(&self) -> bool {
        !self.external_url.is_empty()
    }

    /// Blue/green parents are re-applied on every tick so the downstream
    /// color bookkeeping gets poked even without drift.
    pub fn is_blue_green_parent(&self) -> bool {
        self.deployment_method == BLUE_GREEN_METHOD
    }
}

fn default_replicas() -> i32 {
    1
}

fn default_ports() -> Vec<i32> {
    vec![80]
}

/// Accepts strings, booleans and numbers for fields that are string-typed in
/// the model but commonly written unquoted in YAML (`ssl: true`,
/// `version: 1.2`).
pub(crate) fn flexible_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flexible {
        String(String),
        Bool(bool),
        Int(i64),
        Float(f64),
    }

    Ok(match Flexible::deserialize(deserializer)? {
        Flexible::String(value) => value,
        Flexible::Bool(value) => value.to_string(),
        Flexible::Int(value) => value.to_string(),
        Flexible::Float(value) => value.to_string(),
    })
}

/// Accepts either a single hostname or a list of hostnames.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(host) if host.is_empty() => Err(de::Error::custom(
            "external_url must not be an empty string",
        )),
        OneOrMany::One(host) => Ok(vec![host]),
        OneOrMany::Many(hosts) => Ok(hosts),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_url_accepts_scalar_and_list() {
        let scalar: Service =
            serde_yaml::from_str("name: api\nexternal_url: api.example.com").unwrap();
        assert_eq!(scalar.external_url, vec!["api.example.com"]);

        let list: Service =
            serde_yaml::from_str("name: api\nexternal_url:\n- a.example.com\n- b.example.com")
                .unwrap();
        assert_eq!(list.external_url.len(), 2);
    }

    #[test]
    fn boolean_flags_parse_as_strings() {
        let service: Service = serde_yaml::from_str("name: api\nssl: true\nhttp2: false").unwrap();
        assert_eq!(service.ssl, "true");
        assert_eq!(service.http2, "false");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result: Result<Service, _> = serde_yaml::from_str("name: api\nreplica: 3");
        assert!(result.is_err());
    }

    #[test]
    fn blue_green_parent_detection() {
        let mut service = Service {
            name: "front".into(),
            ..Service::default()
        };
        assert!(!service.is_blue_green_parent());
        service.deployment_method = "bluegreen".into();
        assert!(service.is_blue_green_parent());
    }
}
