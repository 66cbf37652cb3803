//! Label vocabulary shared by the translator, the cluster reader and the
//! reaper.
//!
//! Labels are the operator's identity mechanism: every managed object carries
//! `creator=pipeline` plus a `name` label pointing back at the owning
//! service. Owner references are deliberately not used; other tools in the
//! surrounding pipeline rely on the label contract.

use std::collections::BTreeMap;

pub const CREATOR: &str = "creator";
pub const CREATOR_VALUE: &str = "pipeline";
pub const NAME: &str = "name";
pub const APPLICATION: &str = "application";
pub const VERSION: &str = "version";
pub const DATABASE: &str = "database";
pub const MOUNT_PATH: &str = "mount_path";
pub const SIZE: &str = "size";
pub const TYPE: &str = "type";

/// List selector matching every object owned by the operator.
pub fn selector() -> String {
    format!("{CREATOR}={CREATOR_VALUE}")
}

/// The minimal identity label set: `creator=pipeline` plus the service name.
pub fn identity(service: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (CREATOR.to_string(), CREATOR_VALUE.to_string()),
        (NAME.to_string(), service.to_string()),
    ])
}

/// Encodes a mount path into a label-safe value. Label values cannot contain
/// slashes, so `/` becomes `2F`.
pub fn encode_mount_path(path: &str) -> String {
    path.replace('/', "2F")
}

/// Reverses [`encode_mount_path`].
pub fn decode_mount_path(encoded: &str) -> String {
    encoded.replace("2F", "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_path_encoding_round_trips() {
        assert_eq!(encode_mount_path("/var/lib/data"), "2Fvar2Flib2Fdata");
        assert_eq!(decode_mount_path("2Fvar2Flib2Fdata"), "/var/lib/data");
    }

    #[test]
    fn identity_carries_creator_and_name() {
        let labels = identity("api");
        assert_eq!(labels[CREATOR], CREATOR_VALUE);
        assert_eq!(labels[NAME], "api");
    }
}
