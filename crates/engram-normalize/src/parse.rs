//! Scalar and collection parsers

use engram_core::constants::{MAX_ITEM_CHARS, MAX_LIST_ITEMS};
use engram_core::{clock, round6, EngramError, EngramResult, EPOCH};
use engram_state::merge;
use engram_state::model::{EvidenceKind, EvidencePointer, PolicyException};
use serde_json::Value;
use std::collections::BTreeMap;

/// Maximum characters in an evidence source label.
const MAX_SOURCE_CHARS: usize = 64;

/// Parse an optional bounded string field.
///
/// Trims; empty trims to `None`; anything longer than `max` or not a string
/// fails the contract.
pub fn bounded_string(
    value: Option<&Value>,
    field: &str,
    max: usize,
) -> EngramResult<Option<String>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                Ok(None)
            } else if trimmed.chars().count() > max {
                Err(EngramError::contract(format!(
                    "{field} exceeds {max} characters"
                )))
            } else {
                Ok(Some(trimmed.to_string()))
            }
        }
        Some(_) => Err(EngramError::contract(format!("{field} must be a string"))),
    }
}

/// Parse a required bounded string field.
pub fn required_string(value: Option<&Value>, field: &str, max: usize) -> EngramResult<String> {
    bounded_string(value, field, max)?
        .ok_or_else(|| EngramError::contract(format!("{field} is required")))
}

/// Sort, trim, dedupe, and cap a list of string values.
///
/// Non-string entries are dropped. Use [`guarded_string_array`] when the
/// contract forbids them.
pub fn sorted_unique(values: &[Value]) -> Vec<String> {
    let mut out: Vec<String> = values
        .iter()
        .filter_map(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out.truncate(MAX_LIST_ITEMS);
    out
}

/// Parse a string array field where every element must be a non-empty string.
///
/// `required_error`, when set, makes an empty result fail with the
/// evidence-pointer contract; `None` permits an empty array.
pub fn guarded_string_array(
    value: Option<&Value>,
    field: &str,
    required_error: Option<&str>,
) -> EngramResult<Vec<String>> {
    let items: Vec<String> = match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(values)) => {
            let mut items = Vec::new();
            for entry in values {
                let text = entry.as_str().ok_or_else(|| {
                    EngramError::contract(format!("{field} entries must be strings"))
                })?;
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    return Err(EngramError::contract(format!(
                        "{field} entries must be non-empty"
                    )));
                }
                if trimmed.chars().count() > MAX_ITEM_CHARS {
                    return Err(EngramError::contract(format!(
                        "{field} entries exceed {MAX_ITEM_CHARS} characters"
                    )));
                }
                items.push(trimmed.to_string());
            }
            items
        }
        Some(_) => {
            return Err(EngramError::contract(format!("{field} must be an array")));
        }
    };

    let mut items = items;
    items.sort();
    items.dedup();
    items.truncate(MAX_LIST_ITEMS);

    if items.is_empty() {
        if let Some(message) = required_error {
            return Err(EngramError::evidence(message));
        }
    }
    Ok(items)
}

/// Clamp a numeric field into `[0,1]`, digest-stable; non-numbers fall back.
pub fn clamp_unit(value: Option<&Value>, fallback: f64) -> f64 {
    match value.and_then(Value::as_f64) {
        Some(v) if v.is_finite() => round6(v.clamp(0.0, 1.0)),
        _ => round6(fallback.clamp(0.0, 1.0)),
    }
}

/// Parse an optional boolean field; non-booleans fall back.
pub fn optional_bool(value: Option<&Value>, fallback: bool) -> bool {
    value.and_then(Value::as_bool).unwrap_or(fallback)
}

/// Parse an optional finite float field; non-numbers fall back.
pub fn optional_f64(value: Option<&Value>, fallback: f64) -> f64 {
    match value.and_then(Value::as_f64) {
        Some(v) if v.is_finite() => v,
        _ => fallback,
    }
}

/// Parse an optional non-negative integer field; non-numbers fall back.
pub fn optional_u64(value: Option<&Value>, fallback: u64) -> u64 {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(fallback),
        _ => fallback,
    }
}

/// Parse an ISO-8601 timestamp field, normalizing to millisecond-`Z` form.
///
/// Missing fields take the fallback; present-but-invalid fields fail.
pub fn iso_timestamp(value: Option<&Value>, field: &str, fallback: &str) -> EngramResult<String> {
    match value {
        None | Some(Value::Null) => Ok(fallback.to_string()),
        Some(Value::String(raw)) => {
            if raw.trim().is_empty() {
                return Ok(fallback.to_string());
            }
            clock::normalize_timestamp(raw).ok_or_else(|| {
                EngramError::contract(format!("{field} is not a valid ISO-8601 timestamp"))
            })
        }
        Some(_) => Err(EngramError::contract(format!(
            "{field} must be an ISO-8601 string"
        ))),
    }
}

/// Parse and merge evidence pointers.
///
/// Accepts an array of strings (bare pointer ids) and/or objects; output is
/// deduplicated by `(kind, source, pointerId)` and sorted.
pub fn evidence_pointers(value: Option<&Value>) -> EngramResult<Vec<EvidencePointer>> {
    let entries = match value {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(entries)) => entries,
        Some(_) => {
            return Err(EngramError::contract("evidencePointers must be an array"));
        }
    };

    let mut parsed = Vec::new();
    for entry in entries {
        match entry {
            Value::String(raw) => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    continue;
                }
                parsed.push(EvidencePointer {
                    pointer_id: bounded(trimmed, MAX_ITEM_CHARS, "evidence pointerId")?,
                    kind: EvidenceKind::Event,
                    source: "unspecified".to_string(),
                    confidence: 0.5,
                    observed_at: None,
                    metadata: BTreeMap::new(),
                });
            }
            Value::Object(map) => {
                let pointer_id = required_string(
                    map.get("pointerId").or_else(|| map.get("id")),
                    "evidence pointerId",
                    MAX_ITEM_CHARS,
                )?;
                let kind = map
                    .get("kind")
                    .and_then(Value::as_str)
                    .map(EvidenceKind::parse)
                    .unwrap_or(EvidenceKind::Event);
                let source = bounded_string(map.get("source"), "evidence source", MAX_SOURCE_CHARS)?
                    .unwrap_or_else(|| "unspecified".to_string());
                let confidence = clamp_unit(map.get("confidence"), 0.5);
                let observed_at = match map.get("observedAt") {
                    None | Some(Value::Null) => None,
                    other => Some(iso_timestamp(other, "evidence observedAt", EPOCH)?),
                };
                let metadata = metadata_map(map.get("metadata"));
                parsed.push(EvidencePointer {
                    pointer_id,
                    kind,
                    source,
                    confidence,
                    observed_at,
                    metadata,
                });
            }
            _ => {
                return Err(EngramError::contract(
                    "evidence pointers must be strings or objects",
                ));
            }
        }
    }

    Ok(merge::merge_evidence_pointers(&[], &parsed))
}

/// Parse a policy exception in any of its accepted shapes.
///
/// `true` yields the fixed default record; `false`/absent yields `None`; a
/// string becomes the exception code; an object fills the full shape.
pub fn policy_exception(value: Option<&Value>) -> EngramResult<Option<PolicyException>> {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => Ok(None),
        Some(Value::Bool(true)) => Ok(Some(PolicyException {
            code: "policy_exception".to_string(),
            reason: "unspecified".to_string(),
            approved_by: "unspecified".to_string(),
            reference: None,
            timestamp: EPOCH.to_string(),
            metadata: BTreeMap::new(),
        })),
        Some(Value::String(raw)) => {
            let code = bounded(raw.trim(), MAX_ITEM_CHARS, "policyException")?;
            if code.is_empty() {
                return Ok(None);
            }
            Ok(Some(PolicyException {
                code,
                reason: "unspecified".to_string(),
                approved_by: "unspecified".to_string(),
                reference: None,
                timestamp: EPOCH.to_string(),
                metadata: BTreeMap::new(),
            }))
        }
        Some(Value::Object(map)) => {
            let code = bounded_string(map.get("code"), "policyException.code", MAX_ITEM_CHARS)?
                .unwrap_or_else(|| "policy_exception".to_string());
            let reason =
                bounded_string(map.get("reason"), "policyException.reason", MAX_ITEM_CHARS)?
                    .unwrap_or_else(|| "unspecified".to_string());
            let approved_by = bounded_string(
                map.get("approvedBy"),
                "policyException.approvedBy",
                MAX_ITEM_CHARS,
            )?
            .unwrap_or_else(|| "unspecified".to_string());
            let reference = bounded_string(
                map.get("reference"),
                "policyException.reference",
                MAX_ITEM_CHARS,
            )?;
            let timestamp = iso_timestamp(map.get("timestamp"), "policyException.timestamp", EPOCH)?;
            Ok(Some(PolicyException {
                code,
                reason,
                approved_by,
                reference,
                timestamp,
                metadata: metadata_map(map.get("metadata")),
            }))
        }
        Some(_) => Err(EngramError::contract(
            "policyException must be a boolean, string, or object",
        )),
    }
}

/// Coerce an optional object field into a metadata map.
pub(crate) fn metadata_map(value: Option<&Value>) -> BTreeMap<String, Value> {
    match value {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        _ => BTreeMap::new(),
    }
}

fn bounded(raw: &str, max: usize, field: &str) -> EngramResult<String> {
    if raw.chars().count() > max {
        return Err(EngramError::contract(format!(
            "{field} exceeds {max} characters"
        )));
    }
    Ok(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bounded_string_trims_and_bounds() {
        assert_eq!(
            bounded_string(Some(&json!("  hi  ")), "f", 8).unwrap(),
            Some("hi".to_string())
        );
        assert_eq!(bounded_string(Some(&json!("   ")), "f", 8).unwrap(), None);
        assert_eq!(bounded_string(None, "f", 8).unwrap(), None);
        assert!(bounded_string(Some(&json!("too long here")), "f", 4).is_err());
        assert!(bounded_string(Some(&json!(42)), "f", 4).is_err());
    }

    #[test]
    fn guarded_array_rejects_blank_entries() {
        let ok = guarded_string_array(Some(&json!(["b", "a", "b"])), "ids", None).unwrap();
        assert_eq!(ok, vec!["a", "b"]);
        assert!(guarded_string_array(Some(&json!(["a", ""])), "ids", None).is_err());
        assert!(guarded_string_array(Some(&json!(["a", 1])), "ids", None).is_err());
    }

    #[test]
    fn guarded_array_required_is_evidence_contract() {
        let err = guarded_string_array(Some(&json!([])), "evidenceEventIds", Some("evidence required"))
            .unwrap_err();
        assert_eq!(err.code(), "EVIDENCE_POINTER_CONTRACT_VIOLATION");
    }

    #[test]
    fn clamp_unit_clamps_and_falls_back() {
        assert_eq!(clamp_unit(Some(&json!(1.7)), 0.0), 1.0);
        assert_eq!(clamp_unit(Some(&json!(-3)), 0.0), 0.0);
        assert_eq!(clamp_unit(Some(&json!("nope")), 0.25), 0.25);
        assert_eq!(clamp_unit(None, 0.25), 0.25);
    }

    #[test]
    fn iso_timestamp_normalizes_or_fails() {
        assert_eq!(
            iso_timestamp(Some(&json!("2024-05-01T10:00:00+02:00")), "t", EPOCH).unwrap(),
            "2024-05-01T08:00:00.000Z"
        );
        assert_eq!(iso_timestamp(None, "t", EPOCH).unwrap(), EPOCH);
        assert!(iso_timestamp(Some(&json!("yesterday")), "t", EPOCH).is_err());
    }

    #[test]
    fn evidence_pointers_accept_mixed_forms() {
        let value = json!([
            "e1",
            { "pointerId": "e1", "kind": "event", "confidence": 0.9 },
            { "pointerId": "e2", "kind": "artifact", "source": "ci" },
        ]);
        let pointers = evidence_pointers(Some(&value)).unwrap();
        assert_eq!(pointers.len(), 2);
        assert_eq!(pointers[0].pointer_id, "e1");
        assert_eq!(pointers[0].confidence, 0.9);
        assert_eq!(pointers[1].source, "ci");
    }

    #[test]
    fn policy_exception_forms_normalize() {
        assert!(policy_exception(Some(&json!(false))).unwrap().is_none());
        let flag = policy_exception(Some(&json!(true))).unwrap().unwrap();
        assert_eq!(flag.approved_by, "unspecified");
        let named = policy_exception(Some(&json!("grandfathered"))).unwrap().unwrap();
        assert_eq!(named.code, "grandfathered");
        let full = policy_exception(Some(&json!({
            "code": "pilot",
            "reason": "beta cohort",
            "approvedBy": "governance",
            "timestamp": "2024-01-01T00:00:00Z",
        })))
        .unwrap()
        .unwrap();
        assert_eq!(full.timestamp, "2024-01-01T00:00:00.000Z");
        assert_eq!(full.approved_by, "governance");
    }
}
