use serde::{Deserialize, Serialize};

use crate::model::service::Service;

/// A named environment: the unit the operator reconciles.
///
/// Service names are unique within an environment; the loader enforces this
/// before anything touches the cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Environment {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub services: Vec<Service>,
}

impl Environment {
    /// Looks up a service by name, preserving manifest order semantics.
    pub fn find_service(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|service| service.name == name)
    }

    /// Names of all declared services, in manifest order.
    pub fn service_names(&self) -> Vec<&str> {
        self.services
            .iter()
            .map(|service| service.name.as_str())
            .collect()
    }
}
