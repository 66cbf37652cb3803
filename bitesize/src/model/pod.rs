use serde::Serialize;

/// A pod observation served by the status API.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Pod {
    pub name: String,
    pub phase: String,
    pub start_time: String,
    /// Set when retrieving logs failed; the pod entry is still returned.
    pub message: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub logs: String,
}
