//! Engine configuration
//!
//! Plain serde records with defaults. Nothing here is read from the
//! environment; host wrappers construct a config and hand it in.

use engram_core::constants::{
    DEFAULT_ACTIVE_REVIEW_SET_LIMIT, DEFAULT_SLEEP_THRESHOLD, DEFAULT_STORE_ID,
};
use serde::{Deserialize, Serialize};

/// Tunable defaults applied when a profile is first created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Store used when a request names none
    pub default_store_id: String,
    /// Initial fatigue consolidation threshold
    pub fatigue_threshold: f64,
    /// Initial novelty-write consolidation threshold
    pub novelty_write_threshold: f64,
    /// Initial active review set limit
    pub active_review_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_store_id: DEFAULT_STORE_ID.to_string(),
            fatigue_threshold: DEFAULT_SLEEP_THRESHOLD,
            novelty_write_threshold: DEFAULT_SLEEP_THRESHOLD,
            active_review_limit: DEFAULT_ACTIVE_REVIEW_SET_LIMIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_state_constants() {
        let config = EngineConfig::default();
        assert_eq!(config.default_store_id, "coding-agent");
        assert_eq!(config.fatigue_threshold, 8.0);
        assert_eq!(config.active_review_limit, 32);
    }
}
