use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::model::environment::Environment;
use crate::model::quantity::is_valid_quantity;
use crate::model::service::Service;

/// Root of the declarative manifest file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub project: String,
    pub environments: Vec<Environment>,
}

/// Schema or invariant violation in the desired state.
///
/// Any of these aborts the tick before anything touches the cluster.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("could not read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse manifest: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("environment {0} is not declared in the manifest")]
    UnknownEnvironment(String),

    #[error("environment {environment} declares service {service} more than once")]
    DuplicateService {
        environment: String,
        service: String,
    },

    #[error("service {service}: {field} has unparseable quantity {value:?}")]
    InvalidQuantity {
        service: String,
        field: &'static str,
        value: String,
    },

    #[error("service {service}: hpa bounds are inverted (min {min}, max {max})")]
    InvalidHpaBounds { service: String, min: i32, max: i32 },

    #[error("service {service}: hpa is configured but no metric name is set")]
    MissingHpaMetric { service: String },

    #[error("service {service}: volume must have both name and path set")]
    IncompleteVolume { service: String },
}

/// Loads one environment from the manifest file at `path`.
///
/// Applies defaults and validates invariants; the returned environment is
/// ready for translation without further normalization.
pub fn load_environment(path: &Path, name: &str) -> Result<Environment, ManifestError> {
    let manifest = load_manifest(path)?;
    let mut environment = manifest
        .environments
        .into_iter()
        .find(|environment| environment.name == name)
        .ok_or_else(|| ManifestError::UnknownEnvironment(name.to_string()))?;

    apply_defaults(&mut environment);
    validate(&environment)?;

    Ok(environment)
}

/// Parses the manifest file without selecting an environment.
pub fn load_manifest(path: &Path) -> Result<Manifest, ManifestError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_yaml::from_str(&raw)?)
}

fn apply_defaults(environment: &mut Environment) {
    for service in &mut environment.services {
        if service.application.is_empty() {
            service.application = service.name.clone();
        }

        // Requests inherit limits so a manifest that only pins limits still
        // lands in the Guaranteed QoS class.
        if service.requests.cpu.is_empty() {
            service.requests.cpu = service.limits.cpu.clone();
        }
        if service.requests.memory.is_empty() {
            service.requests.memory = service.limits.memory.clone();
        }

        // The diff layer compares desired replica intent against the
        // HPA-owned observed count through the status field.
        service.status.desired_replicas = service.replicas;

        for volume in &mut service.volumes {
            volume.kind = volume.kind.to_lowercase();
        }
    }
}

fn validate(environment: &Environment) -> Result<(), ManifestError> {
    let mut seen = HashSet::new();
    for service in &environment.services {
        if !seen.insert(service.name.as_str()) {
            return Err(ManifestError::DuplicateService {
                environment: environment.name.clone(),
                service: service.name.clone(),
            });
        }
        validate_service(service)?;
    }
    Ok(())
}

fn validate_service(service: &Service) -> Result<(), ManifestError> {
    let quantities: [(&'static str, &str); 4] = [
        ("requests.cpu", &service.requests.cpu),
        ("requests.memory", &service.requests.memory),
        ("limits.cpu", &service.limits.cpu),
        ("limits.memory", &service.limits.memory),
    ];
    for (field, value) in quantities {
        if !value.is_empty() && !is_valid_quantity(value) {
            return Err(ManifestError::InvalidQuantity {
                service: service.name.clone(),
                field,
                value: value.to_string(),
            });
        }
    }

    for volume in &service.volumes {
        if volume.name.is_empty() || volume.path.is_empty() {
            return Err(ManifestError::IncompleteVolume {
                service: service.name.clone(),
            });
        }
        if volume.needs_claim() && !is_valid_quantity(&volume.size) {
            return Err(ManifestError::InvalidQuantity {
                service: service.name.clone(),
                field: "volume.size",
                value: volume.size.clone(),
            });
        }
    }

    if service.hpa.is_configured() {
        if service.hpa.min_replicas < 1 || service.hpa.max_replicas < service.hpa.min_replicas {
            return Err(ManifestError::InvalidHpaBounds {
                service: service.name.clone(),
                min: service.hpa.min_replicas,
                max: service.hpa.max_replicas,
            });
        }
        if service.hpa.metric.name.is_empty() {
            return Err(ManifestError::MissingHpaMetric {
                service: service.name.clone(),
            });
        }
        if !service.hpa.metric.is_resource()
            && !service.hpa.metric.target_average_value.is_empty()
            && !is_valid_quantity(&service.hpa.metric.target_average_value)
        {
            return Err(ManifestError::InvalidQuantity {
                service: service.name.clone(),
                field: "hpa.metric.target_average_value",
                value: service.hpa.metric.target_average_value.clone(),
            });
        }
    }

    Ok(())
}
