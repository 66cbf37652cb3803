use serde::{Deserialize, Serialize};

use crate::model::service::flexible_string;

/// Horizontal pod autoscaler declaration.
///
/// A zeroed struct means autoscaling is off; `min_replicas != 0` marks the
/// HPA as active, at which point the live replica count belongs to the HPA
/// and the declared `replicas` is advisory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Hpa {
    #[serde(default)]
    pub min_replicas: i32,
    #[serde(default)]
    pub max_replicas: i32,
    #[serde(default)]
    pub metric: Metric,
}

/// Scaling metric, version-agnostic.
///
/// `cpu` and `memory` scale on average utilization; any other name is a pods
/// metric scaling on an average value quantity. Rendering to a concrete
/// autoscaling API shape happens in the translator.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Metric {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub target_average_utilization: i32,
    #[serde(default, deserialize_with = "flexible_string")]
    pub target_average_value: String,
}

impl Hpa {
    pub fn is_configured(&self) -> bool {
        self.min_replicas != 0
    }
}

impl Metric {
    /// Whether this metric targets a resource (cpu/memory) utilization.
    pub fn is_resource(&self) -> bool {
        self.name == "cpu" || self.name == "memory"
    }
}
