//! Detector configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Consecutive sweeps without activity before a symbol's market-data
    /// subscription is torn down.
    #[serde(default = "default_idle_checks")]
    pub idle_checks: u32,
}

fn default_idle_checks() -> u32 {
    5
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            idle_checks: default_idle_checks(),
        }
    }
}
