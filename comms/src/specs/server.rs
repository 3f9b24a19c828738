use serde::{Deserialize, Serialize};

/// How the pending updates are combined when drained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeSpec {
    #[default]
    Sum,
    Average,
}

/// The specification for a `ParameterServer` and its transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSpec {
    /// The maximum epoch lag tolerated before an update is dropped.
    pub staleness_bound: u64,
    /// How long a single frame may take to be written to a peer.
    pub send_deadline_ms: u64,
    /// The amount of updates buffered per peer before new ones are dropped.
    pub peer_queue_capacity: usize,
    #[serde(default)]
    pub merge: MergeSpec,
}

impl Default for ServerSpec {
    fn default() -> Self {
        Self {
            staleness_bound: 1,
            send_deadline_ms: 1_000,
            peer_queue_capacity: 16,
            merge: MergeSpec::Sum,
        }
    }
}
