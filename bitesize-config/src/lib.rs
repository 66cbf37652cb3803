//! Process configuration for the environment operator.
//!
//! All configuration is read once at startup from environment variables and
//! never re-read afterwards. The reconcile loop, the Git synchronizer and the
//! status API all receive their settings from here.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Environment variable holding the remote Git repository URL.
const GIT_REMOTE_REPOSITORY: &str = "GIT_REMOTE_REPOSITORY";
/// Environment variable holding the Git branch to track.
const GIT_BRANCH: &str = "GIT_BRANCH";
/// Environment variable holding the local Git working copy path.
const GIT_LOCAL_PATH: &str = "GIT_LOCAL_PATH";
/// Environment variable holding the SSH private key material.
const GIT_PRIVATE_KEY: &str = "GIT_PRIVATE_KEY";
/// Environment variable holding the Git username for token auth.
const GIT_USER: &str = "GIT_USER";
/// Environment variable holding the Git access token.
const GIT_TOKEN: &str = "GIT_TOKEN";
/// Environment variable selecting the environment within the manifest.
const ENVIRONMENT_NAME: &str = "ENVIRONMENT_NAME";
/// Environment variable holding the manifest file name inside the checkout.
const BITESIZE_FILE: &str = "BITESIZE_FILE";
/// Environment variable holding the target Kubernetes namespace.
const NAMESPACE: &str = "NAMESPACE";
/// Environment variable holding the Docker registry host.
const DOCKER_REGISTRY: &str = "DOCKER_REGISTRY";
/// Environment variable holding comma-separated image pull secret names.
const DOCKER_PULL_SECRETS: &str = "DOCKER_PULL_SECRETS";
/// Environment variable toggling bearer auth on the status API.
const USE_AUTH: &str = "USE_AUTH";
/// Environment variable holding the path of the bearer token file.
const AUTH_TOKEN_FILE: &str = "AUTH_TOKEN_FILE";
/// Environment variable toggling debug logging.
const DEBUG: &str = "DEBUG";
/// Environment variable overriding the reconcile interval, in seconds.
const RECONCILE_INTERVAL: &str = "RECONCILE_INTERVAL";
/// Environment variable overriding the registered custom resource kinds.
const CUSTOM_RESOURCE_KINDS: &str = "CUSTOM_RESOURCE_KINDS";

/// Custom resource kinds served at `prsn.io/v1` that the operator manages
/// when no override is configured.
const DEFAULT_CUSTOM_KINDS: &[&str] = &[
    "mongo",
    "mysql",
    "cassandra",
    "redis",
    "zookeeper",
    "kafka",
    "postgres",
    "neptune",
    "sns",
    "msk",
    "es",
    "docdb",
    "sqs",
    "helm",
];

/// Errors raised while reading the process configuration.
///
/// Any of these is fatal: the operator refuses to start with an incomplete
/// configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is not set.
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),

    /// An environment variable holds a value that cannot be parsed.
    #[error("environment variable {name} has invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Git transport settings for the manifest repository.
#[derive(Debug, Clone)]
pub struct GitConfig {
    /// Remote repository URL (SSH or HTTPS).
    pub remote_repository: String,
    /// Branch holding the environment manifest.
    pub branch: String,
    /// Local working copy location.
    pub local_path: PathBuf,
    /// SSH private key material, when key auth is used.
    pub private_key: Option<String>,
    /// Username for token auth over HTTPS.
    pub user: Option<String>,
    /// Access token for token auth over HTTPS.
    pub token: Option<String>,
}

/// Complete configuration for the operator process.
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Git transport settings.
    pub git: GitConfig,
    /// Name of the environment to reconcile, as declared in the manifest.
    pub environment_name: String,
    /// Manifest file name, relative to the Git working copy root.
    pub bitesize_file: String,
    /// Kubernetes namespace owned by this operator instance.
    pub namespace: String,
    /// Registry prefixed onto every container image reference.
    pub docker_registry: String,
    /// Image pull secret names attached to every pod spec.
    pub docker_pull_secrets: Vec<String>,
    /// Whether the status API requires a bearer token.
    pub use_auth: bool,
    /// File holding the expected bearer token, when auth is on.
    pub auth_token_file: Option<PathBuf>,
    /// Whether debug logging is enabled.
    pub debug: bool,
    /// Pause between reconcile ticks.
    pub reconcile_interval: Duration,
    /// Custom resource kinds managed by this operator.
    pub custom_kinds: Vec<String>,
}

impl OperatorConfig {
    /// Loads the configuration from the process environment.
    ///
    /// Missing optional variables fall back to their documented defaults;
    /// missing required variables produce [`ConfigError::Missing`].
    pub fn load() -> Result<OperatorConfig, ConfigError> {
        let git = GitConfig {
            remote_repository: required(GIT_REMOTE_REPOSITORY)?,
            branch: optional(GIT_BRANCH).unwrap_or_else(|| "master".into()),
            local_path: optional(GIT_LOCAL_PATH)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp/repository")),
            private_key: optional(GIT_PRIVATE_KEY),
            user: optional(GIT_USER),
            token: optional(GIT_TOKEN),
        };

        let use_auth = flag(USE_AUTH)?;
        let auth_token_file = optional(AUTH_TOKEN_FILE).map(PathBuf::from);
        if use_auth && auth_token_file.is_none() {
            return Err(ConfigError::Missing(AUTH_TOKEN_FILE));
        }

        Ok(OperatorConfig {
            git,
            environment_name: required(ENVIRONMENT_NAME)?,
            bitesize_file: optional(BITESIZE_FILE)
                .unwrap_or_else(|| "environments.bitesize".into()),
            namespace: required(NAMESPACE)?,
            docker_registry: required(DOCKER_REGISTRY)?,
            docker_pull_secrets: optional(DOCKER_PULL_SECRETS)
                .map(|raw| split_csv(&raw))
                .unwrap_or_default(),
            use_auth,
            auth_token_file,
            debug: flag(DEBUG)?,
            reconcile_interval: Duration::from_secs(seconds(RECONCILE_INTERVAL, 30)?),
            custom_kinds: optional(CUSTOM_RESOURCE_KINDS)
                .map(|raw| split_csv(&raw))
                .unwrap_or_else(|| DEFAULT_CUSTOM_KINDS.iter().map(|s| s.to_string()).collect()),
        })
    }

    /// Absolute path of the manifest file inside the Git working copy.
    pub fn manifest_path(&self) -> PathBuf {
        self.git.local_path.join(&self.bitesize_file)
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing(name))
}

fn optional(name: &'static str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

/// Reads a boolean-ish variable. Any non-empty value other than `false`/`0`
/// counts as enabled, mirroring how the deployment charts set these flags.
fn flag(name: &'static str) -> Result<bool, ConfigError> {
    match optional(name) {
        None => Ok(false),
        Some(value) => match value.to_lowercase().as_str() {
            "false" | "0" | "no" => Ok(false),
            _ => Ok(true),
        },
    }
}

fn seconds(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match optional(name) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
            name,
            value,
            reason: "expected a whole number of seconds".into(),
        }),
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_csv_trims_and_drops_empty_entries() {
        assert_eq!(
            split_csv("regsecret, other ,,third"),
            vec!["regsecret", "other", "third"]
        );
        assert!(split_csv("").is_empty());
    }

    #[test]
    fn default_custom_kinds_are_nonempty_and_lowercase() {
        assert!(!DEFAULT_CUSTOM_KINDS.is_empty());
        for kind in DEFAULT_CUSTOM_KINDS {
            assert_eq!(*kind, kind.to_lowercase());
        }
    }
}
