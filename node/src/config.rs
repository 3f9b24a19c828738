use std::{fs, io, num::NonZeroU64};

use comms::{
    PeerId,
    specs::{EncodingSpec, ServerSpec},
};
use serde::Deserialize;

/// Where to reach one of the other workers.
#[derive(Debug, Clone, Deserialize)]
pub struct PeerConfig {
    pub id: PeerId,
    pub addr: String,
}

/// Everything a node needs to join a training run.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub id: PeerId,
    pub listen: String,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
    pub iterations: NonZeroU64,
    #[serde(default = "NodeConfig::default_iterations_per_epoch")]
    pub iterations_per_epoch: NonZeroU64,
    pub learning_rate: f32,
    #[serde(default)]
    pub seed: Option<u64>,
    pub encoding: EncodingSpec,
    #[serde(default)]
    pub server: ServerSpec,
}

const DEFAULT_ITERATIONS_PER_EPOCH: NonZeroU64 = NonZeroU64::new(100).unwrap();

impl NodeConfig {
    fn default_iterations_per_epoch() -> NonZeroU64 {
        DEFAULT_ITERATIONS_PER_EPOCH
    }

    /// Reads a `NodeConfig` from the json file at `path`.
    pub fn load(path: &str) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub(crate) fn parse(content: &str) -> io::Result<Self> {
        let config: Self = serde_json::from_str(content)?;

        if !(config.learning_rate.is_finite() && config.learning_rate > 0.) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("learning rate must be positive, got {}", config.learning_rate),
            ));
        }

        if config.peers.iter().any(|peer| peer.id == config.id) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{} lists itself as a peer", config.id),
            ));
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "id": 0,
        "listen": "127.0.0.1:9000",
        "peers": [{ "id": 1, "addr": "127.0.0.1:9001" }],
        "iterations": 500,
        "learning_rate": 0.1,
        "encoding": {
            "len": 1024,
            "boundary": 64,
            "threshold": { "adaptive": {
                "initial": 0.01, "min_sparsity": 0.01, "max_sparsity": 0.05, "decay": 0.9
            } },
            "quantization": "half"
        }
    }"#;

    #[test]
    fn parse_with_defaults() {
        let config = NodeConfig::parse(CONFIG).unwrap();

        assert_eq!(config.id, PeerId(0));
        assert_eq!(config.peers[0].id, PeerId(1));
        assert_eq!(config.iterations_per_epoch.get(), 100);
        assert_eq!(config.server, ServerSpec::default());
        assert_eq!(config.seed, None);
    }

    #[test]
    fn self_as_peer_is_rejected() {
        let config = CONFIG.replace(r#""id": 1"#, r#""id": 0"#);
        assert!(NodeConfig::parse(&config).is_err());
    }
}
