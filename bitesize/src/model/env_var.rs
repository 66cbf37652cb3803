use serde::{Deserialize, Serialize};

use crate::model::service::flexible_string;

/// One container environment variable declaration.
///
/// Three forms are accepted, distinguished by which fields are set:
/// a literal `name`/`value` pair, a secret reference (`secret` names the
/// variable, `value` holds `secretName/key`), or a downward-API field
/// (`name` plus `pod_field`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnvVar {
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "flexible_string")]
    pub value: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub pod_field: String,
}

impl EnvVar {
    pub fn literal(name: &str, value: &str) -> EnvVar {
        EnvVar {
            name: name.into(),
            value: value.into(),
            ..EnvVar::default()
        }
    }

    pub fn secret_ref(name: &str, reference: &str) -> EnvVar {
        EnvVar {
            secret: name.into(),
            value: reference.into(),
            ..EnvVar::default()
        }
    }

    pub fn pod_field(name: &str, field_path: &str) -> EnvVar {
        EnvVar {
            name: name.into(),
            pod_field: field_path.into(),
            ..EnvVar::default()
        }
    }

    pub fn is_secret(&self) -> bool {
        !self.secret.is_empty()
    }

    pub fn is_pod_field(&self) -> bool {
        self.secret.is_empty() && !self.pod_field.is_empty()
    }

    /// Splits the `secretName/key` reference of a secret variable. A
    /// reference without a slash uses the secret name as the key too.
    pub fn secret_parts(&self) -> (&str, &str) {
        match self.value.split_once('/') {
            Some((name, key)) => (name, key),
            None => (self.value.as_str(), self.value.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_reference_splits_on_slash() {
        let var = EnvVar::secret_ref("DB_PASS", "creds/db");
        assert_eq!(var.secret_parts(), ("creds", "db"));
    }

    #[test]
    fn slashless_secret_reference_reuses_the_name_as_key() {
        let var = EnvVar::secret_ref("DB_PASS", "creds");
        assert_eq!(var.secret_parts(), ("creds", "creds"));
    }
}
