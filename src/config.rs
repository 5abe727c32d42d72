use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backend::PinRelease;
use crate::error::PolicyError;

/// Engine tunables, loadable from JSON. Missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Delay applied by `commit(None)` before configuration is compiled.
    #[serde(default = "default_commit_delay_ms")]
    pub commit_delay_ms: u64,

    /// When routes drop their pinned filter version.
    #[serde(default)]
    pub pin_release: PinRelease,

    /// Tags reserved for each export policy list.
    #[serde(default = "default_tag_block_size")]
    pub tag_block_size: u32,
}

fn default_commit_delay_ms() -> u64 {
    2000
}

fn default_tag_block_size() -> u32 {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            commit_delay_ms: default_commit_delay_ms(),
            pin_release: PinRelease::default(),
            tag_block_size: default_tag_block_size(),
        }
    }
}

impl EngineConfig {
    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        if config.tag_block_size == 0 {
            return Err(PolicyError::InvalidFormat(
                "tag_block_size must be at least 1".to_string(),
            ));
        }
        Ok(config)
    }

    pub fn commit_delay(&self) -> Duration {
        Duration::from_millis(self.commit_delay_ms)
    }
}
