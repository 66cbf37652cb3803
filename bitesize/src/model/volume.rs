use serde::{Deserialize, Serialize};

/// Default access mode applied when the manifest leaves `modes` out.
pub const DEFAULT_ACCESS_MODES: &str = "ReadWriteOnce";

/// A declared storage volume.
///
/// Most volumes become a PersistentVolumeClaim; volumes typed `secret` or
/// `configmap` instead mount the referenced object directly and never
/// produce a claim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Volume {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub size: String,
    /// Storage class stem (`ssd`, `gp2`, ...) or the markers `secret` /
    /// `configmap`.
    #[serde(default, rename = "type")]
    pub kind: String,
    /// Comma-separated Kubernetes access modes.
    #[serde(default = "default_modes")]
    pub modes: String,
    /// `manual` binds the claim to a pre-provisioned volume of the same
    /// name instead of requesting dynamic provisioning.
    #[serde(default)]
    pub provisioning: String,
}

impl Volume {
    pub fn is_secret(&self) -> bool {
        self.kind.eq_ignore_ascii_case("secret")
    }

    pub fn is_config_map(&self) -> bool {
        self.kind.eq_ignore_ascii_case("configmap")
    }

    pub fn is_manually_provisioned(&self) -> bool {
        self.provisioning.eq_ignore_ascii_case("manual")
    }

    /// Whether this volume is backed by a PersistentVolumeClaim.
    pub fn needs_claim(&self) -> bool {
        !self.is_secret() && !self.is_config_map()
    }

    /// Access modes split out of the comma-separated declaration.
    pub fn access_modes(&self) -> Vec<String> {
        self.modes
            .split(',')
            .map(str::trim)
            .filter(|mode| !mode.is_empty())
            .map(str::to_string)
            .collect()
    }
}

fn default_modes() -> String {
    DEFAULT_ACCESS_MODES.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_default_to_read_write_once() {
        let volume: Volume = serde_yaml::from_str("name: data\npath: /var/data").unwrap();
        assert_eq!(volume.access_modes(), vec!["ReadWriteOnce"]);
    }

    #[test]
    fn secret_and_configmap_volumes_do_not_need_claims() {
        let secret: Volume =
            serde_yaml::from_str("name: tls\npath: /etc/tls\ntype: secret").unwrap();
        let configmap: Volume =
            serde_yaml::from_str("name: conf\npath: /etc/conf\ntype: configmap").unwrap();
        let disk: Volume =
            serde_yaml::from_str("name: data\npath: /var/data\ntype: ssd\nsize: 10Gi").unwrap();

        assert!(!secret.needs_claim());
        assert!(!configmap.needs_claim());
        assert!(disk.needs_claim());
    }

    #[test]
    fn multiple_access_modes_are_split_and_trimmed() {
        let volume = Volume {
            modes: "ReadWriteOnce, ReadOnlyMany".into(),
            ..Volume::default()
        };
        assert_eq!(volume.access_modes(), vec!["ReadWriteOnce", "ReadOnlyMany"]);
    }
}
