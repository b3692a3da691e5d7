//! Process-wide streaming configuration

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::types::Result;

/// Tunables shared by every dataset of one viewer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Maximum number of visible points across all datasets
    pub point_budget: u64,
    /// Maximum node loads in flight
    pub max_nodes_loading: usize,
    /// Maximum LOADED -> GPU promotions per frame
    pub max_promotions_per_frame: usize,
    /// Upper bound on the near plane used for culling
    pub frustum_near_clamp: f32,
    /// Time slice for profile extraction per dataset and frame
    pub profile_time_slice_ms: f32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            point_budget: 1_000_000,
            max_nodes_loading: 4,
            max_promotions_per_frame: 2,
            frustum_near_clamp: 0.1,
            profile_time_slice_ms: 5.0,
        }
    }
}

impl StreamingConfig {
    /// Soft bound on resident points before eviction kicks in
    pub fn point_load_limit(&self) -> u64 {
        self.point_budget.saturating_mul(2)
    }

    /// Parse from JSON; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}
