use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct StreamingConfig {
    /// Drop a `completion` frame when the next frame decoded from the same
    /// read is also a `completion`. Only safe when the backend resends
    /// cumulative payloads.
    #[serde(default)]
    pub aggregate_repeated_completions: bool,
}
