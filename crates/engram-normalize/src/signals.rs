//! Agent signal fan-in
//!
//! Coding agents report overlapping facts under different field names.
//! Each supported agent gets one normalized [`AgentSignal`]: aliases fold,
//! tags union, and on duplicates the later observation wins confidence and
//! timestamp. Unknown agents are ignored rather than rejected.

use crate::parse::{clamp_unit, iso_timestamp, metadata_map, sorted_unique};
use engram_core::{EngramResult, EPOCH};
use engram_state::merge;
use engram_state::model::AgentSignal;
use serde_json::Value;

/// Supported agents and the request keys their signals arrive under.
const AGENT_KEYS: [(&str, [&str; 3]); 2] = [
    ("codex", ["codexSignal", "codexSignals", "codex"]),
    ("claude", ["claudeSignal", "claudeSignals", "claude"]),
];

/// Field aliases for tag lists, in precedence order.
const TAG_ALIASES: [&str; 4] = ["tags", "capabilities", "topics", "labels"];

/// Field aliases for confidence, in precedence order.
const CONFIDENCE_ALIASES: [&str; 3] = ["confidence", "score", "strength"];

/// Field aliases for the observation timestamp, in precedence order.
const OBSERVED_ALIASES: [&str; 4] = ["observedAt", "timestamp", "seenAt", "at"];

/// Extract and fold every agent signal present on a request.
///
/// Returns one merged signal per agent, sorted by agent name.
pub fn agent_signals(request: &Value) -> EngramResult<Vec<AgentSignal>> {
    let Some(map) = request.as_object() else {
        return Ok(Vec::new());
    };

    let mut folded: Vec<AgentSignal> = Vec::new();
    for (agent, keys) in AGENT_KEYS {
        for key in keys {
            let Some(raw) = map.get(key) else { continue };
            match raw {
                Value::Array(entries) => {
                    for entry in entries {
                        if let Some(signal) = parse_signal(agent, entry)? {
                            folded = merge::merge_agent_signals(&folded, &[signal]);
                        }
                    }
                }
                other => {
                    if let Some(signal) = parse_signal(agent, other)? {
                        folded = merge::merge_agent_signals(&folded, &[signal]);
                    }
                }
            }
        }
    }
    Ok(folded)
}

fn parse_signal(agent: &str, value: &Value) -> EngramResult<Option<AgentSignal>> {
    let Some(map) = value.as_object() else {
        return Ok(None);
    };

    let tags = TAG_ALIASES
        .iter()
        .find_map(|alias| map.get(*alias).and_then(Value::as_array))
        .map(|values| sorted_unique(values))
        .unwrap_or_default();
    let confidence_raw = CONFIDENCE_ALIASES
        .iter()
        .find_map(|alias| map.get(*alias))
        .filter(|v| v.is_number());
    let confidence = clamp_unit(confidence_raw, 0.5);
    let observed_raw = OBSERVED_ALIASES.iter().find_map(|alias| map.get(*alias));
    let observed_at = iso_timestamp(observed_raw, "agent signal observedAt", EPOCH)?;
    let metadata = metadata_map(map.get("metadata").or_else(|| map.get("meta")));

    Ok(Some(AgentSignal {
        agent: agent.to_string(),
        tags,
        confidence,
        observed_at,
        metadata,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn aliases_fold_to_one_signal_per_agent() {
        let request = json!({
            "codexSignal": { "capabilities": ["rust", "git"], "score": 0.7, "at": "2024-01-02T00:00:00Z" },
            "claude": [
                { "tags": ["python"], "confidence": 0.4, "observedAt": "2024-01-01T00:00:00Z" },
                { "topics": ["testing"], "strength": 0.9, "timestamp": "2024-02-01T00:00:00Z" },
            ],
        });
        let signals = agent_signals(&request).unwrap();
        assert_eq!(signals.len(), 2);

        let claude = &signals[0];
        assert_eq!(claude.agent, "claude");
        assert_eq!(claude.tags, vec!["python", "testing"]);
        assert_eq!(claude.confidence, 0.9);
        assert_eq!(claude.observed_at, "2024-02-01T00:00:00.000Z");

        let codex = &signals[1];
        assert_eq!(codex.agent, "codex");
        assert_eq!(codex.tags, vec!["git", "rust"]);
        assert_eq!(codex.confidence, 0.7);
    }

    #[test]
    fn duplicate_signals_keep_later_observation() {
        let request = json!({
            "codexSignals": [
                { "tags": ["a"], "confidence": 0.9, "observedAt": "2024-03-01T00:00:00Z" },
                { "tags": ["b"], "confidence": 0.1, "observedAt": "2024-01-01T00:00:00Z" },
            ],
        });
        let signals = agent_signals(&request).unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].tags, vec!["a", "b"]);
        assert_eq!(signals[0].confidence, 0.9);
        assert_eq!(signals[0].observed_at, "2024-03-01T00:00:00.000Z");
    }

    #[test]
    fn non_object_request_yields_nothing() {
        assert!(agent_signals(&json!([1, 2])).unwrap().is_empty());
    }
}
