//! Small helpers shared by every handler

use engram_core::canonical;
use serde::Serialize;
use serde_json::Value;

/// Serialize a typed record to its canonical JSON value.
///
/// Serialization of the state model cannot fail; a failure would be a logic
/// bug in the model types, so it collapses to `null` rather than panicking.
pub fn record_value<T: Serialize>(record: &T) -> Value {
    serde_json::to_value(record).unwrap_or(Value::Null)
}

/// Canonical digest of a typed record.
pub fn record_digest<T: Serialize>(record: &T) -> String {
    canonical::digest(&record_value(record))
}

/// Mint an id from a fingerprint value: `prefix_<hex12>`.
pub fn mint(prefix: &str, fingerprint: &Value) -> String {
    canonical::make_id(prefix, &canonical::digest(fingerprint))
}

/// Sorted field names that differ between two canonical record values.
///
/// Only top-level fields are compared; nested changes surface as their
/// top-level field name.
pub fn changed_fields(previous: &Value, next: &Value) -> Vec<String> {
    let mut changed = Vec::new();
    let (Some(prev), Some(next)) = (previous.as_object(), next.as_object()) else {
        return changed;
    };
    for (key, value) in next {
        if prev.get(key) != Some(value) {
            changed.push(key.clone());
        }
    }
    for key in prev.keys() {
        if !next.contains_key(key) {
            changed.push(key.clone());
        }
    }
    changed.sort();
    changed.dedup();
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn changed_fields_reports_both_sides_sorted() {
        let previous = json!({"a": 1, "b": 2, "gone": true});
        let next = json!({"a": 1, "b": 3, "new": false});
        assert_eq!(changed_fields(&previous, &next), vec!["b", "gone", "new"]);
    }

    #[test]
    fn mint_prefixes_twelve_hex() {
        let id = mint("cp", &json!({"objectiveId": "o1"}));
        assert!(id.starts_with("cp_"));
        assert_eq!(id.len(), 3 + 12);
    }
}
