//! Deterministic per-entity merge rules
//!
//! Merges are joins on a lattice: string lists union and sort, counters and
//! ranks take max/min, evidence pointers collapse by `(kind, source,
//! pointerId)`, and attribute lineage resolves its current view by the
//! `(timestamp, valueDigest, revisionId)` triple. Applying the same input
//! twice never changes the result.

use crate::model::{
    AgentSignal, AttributeRevision, AuditEvent, EvidencePointer, PolicyOutcome,
};
use engram_core::constants::{AUDIT_TRAIL_CAP, MAX_LIST_ITEMS};
use engram_core::round6;
use std::collections::BTreeMap;

/// Union two sorted-unique string lists, re-sort, and cap.
pub fn union_sorted(existing: &[String], incoming: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = existing
        .iter()
        .chain(incoming.iter())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    merged.sort();
    merged.dedup();
    merged.truncate(MAX_LIST_ITEMS);
    merged
}

/// Clamp a float into the unit interval, digest-stable.
pub fn clamp_unit(value: f64) -> f64 {
    round6(value.clamp(0.0, 1.0))
}

/// Raise a policy outcome by severity; merges never lower it.
pub fn raise_outcome(current: PolicyOutcome, incoming: PolicyOutcome) -> PolicyOutcome {
    if incoming.severity() > current.severity() {
        incoming
    } else {
        current
    }
}

/// Merge evidence pointer sets.
///
/// Pointers agreeing on `(kind, source, pointerId)` collapse: max confidence,
/// later `observedAt`, metadata shallow-merged with later keys winning. The
/// result is sorted by the merge key.
pub fn merge_evidence_pointers(
    existing: &[EvidencePointer],
    incoming: &[EvidencePointer],
) -> Vec<EvidencePointer> {
    let mut by_key: BTreeMap<(String, String, String), EvidencePointer> = BTreeMap::new();
    for pointer in existing.iter().chain(incoming.iter()) {
        let key = pointer.merge_key();
        match by_key.get_mut(&key) {
            None => {
                let mut entry = pointer.clone();
                entry.confidence = clamp_unit(entry.confidence);
                by_key.insert(key, entry);
            }
            Some(entry) => {
                entry.confidence = clamp_unit(entry.confidence.max(pointer.confidence));
                if later_timestamp(pointer.observed_at.as_deref(), entry.observed_at.as_deref()) {
                    entry.observed_at = pointer.observed_at.clone();
                }
                for (k, v) in &pointer.metadata {
                    entry.metadata.insert(k.clone(), v.clone());
                }
            }
        }
    }
    by_key.into_values().take(MAX_LIST_ITEMS).collect()
}

/// Merge agent signal sets, one folded signal per agent.
///
/// Tags union; the later observation wins confidence, timestamp, and
/// metadata-key conflicts. The result is sorted by agent name.
pub fn merge_agent_signals(existing: &[AgentSignal], incoming: &[AgentSignal]) -> Vec<AgentSignal> {
    let mut by_agent: BTreeMap<String, AgentSignal> = BTreeMap::new();
    for signal in existing.iter().chain(incoming.iter()) {
        match by_agent.get_mut(&signal.agent) {
            None => {
                let mut entry = signal.clone();
                entry.confidence = clamp_unit(entry.confidence);
                entry.tags = union_sorted(&entry.tags, &[]);
                by_agent.insert(signal.agent.clone(), entry);
            }
            Some(entry) => {
                entry.tags = union_sorted(&entry.tags, &signal.tags);
                if signal.observed_at.as_str() >= entry.observed_at.as_str() {
                    entry.observed_at = signal.observed_at.clone();
                    entry.confidence = clamp_unit(signal.confidence);
                }
                for (k, v) in &signal.metadata {
                    entry.metadata.insert(k.clone(), v.clone());
                }
            }
        }
    }
    by_agent.into_values().collect()
}

/// Resolve the current attribute view from its lineage.
///
/// The visible revision is the maximum by `(timestamp, valueDigest,
/// revisionId)`, so the timeline is preserved while the current value stays
/// deterministic under any append order.
pub fn resolve_current_revision(revisions: &[AttributeRevision]) -> Option<&AttributeRevision> {
    revisions.iter().max_by(|a, b| {
        (&a.timestamp, &a.value_digest, &a.revision_id).cmp(&(
            &b.timestamp,
            &b.value_digest,
            &b.revision_id,
        ))
    })
}

/// Decay stage for a harmful signal count: thresholds `[1,2,3,5]`.
pub fn decay_stage(harmful_count: u64) -> u32 {
    match harmful_count {
        0 => 0,
        1 => 1,
        2 => 2,
        3 | 4 => 3,
        _ => 4,
    }
}

/// Base confidence decrement for a decay stage.
pub fn base_decay(stage: u32) -> f64 {
    match stage {
        0 => 0.0,
        1 => 0.18,
        2 => 0.24,
        3 => 0.32,
        _ => 0.42,
    }
}

/// Severity penalty added to the base decay.
pub fn severity_penalty(severity: f64) -> f64 {
    round6(severity.clamp(0.0, 1.0) * 0.08)
}

/// Acceleration multiplier reported alongside the decay.
///
/// Stages below 2 report `1`; later stages report `1 + (stage - 1) * 0.35`.
pub fn acceleration_multiplier(stage: u32) -> f64 {
    if stage < 2 {
        1.0
    } else {
        round6(1.0 + (f64::from(stage) - 1.0) * 0.35)
    }
}

/// Append an audit event and trim the ring to the newest entries.
///
/// The trail stays sorted ascending by `(timestamp, auditEventId)`; when the
/// cap is exceeded the oldest entries fall off the front. Surviving entries
/// are never mutated.
pub fn push_audit(trail: &mut Vec<AuditEvent>, event: AuditEvent) {
    if trail
        .iter()
        .any(|e| e.audit_event_id == event.audit_event_id)
    {
        return;
    }
    trail.push(event);
    trail.sort_by(|a, b| {
        (&a.timestamp, &a.audit_event_id).cmp(&(&b.timestamp, &b.audit_event_id))
    });
    if trail.len() > AUDIT_TRAIL_CAP {
        let excess = trail.len() - AUDIT_TRAIL_CAP;
        trail.drain(..excess);
    }
}

/// Trim a chronology ring to the newest `cap` entries by a `(timestamp, id)`
/// key extracted per entry.
pub fn trim_ring<T, F>(ring: &mut Vec<T>, cap: usize, key: F)
where
    F: Fn(&T) -> (String, String),
{
    ring.sort_by_key(|entry| key(entry));
    if ring.len() > cap {
        let excess = ring.len() - cap;
        ring.drain(..excess);
    }
}

fn later_timestamp(candidate: Option<&str>, current: Option<&str>) -> bool {
    match (candidate, current) {
        (Some(c), Some(e)) => c > e,
        (Some(_), None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EvidenceKind;
    use serde_json::json;

    fn pointer(id: &str, confidence: f64, observed_at: Option<&str>) -> EvidencePointer {
        EvidencePointer {
            pointer_id: id.to_string(),
            kind: EvidenceKind::Event,
            source: "unspecified".to_string(),
            confidence,
            observed_at: observed_at.map(|s| s.to_string()),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn union_sorted_dedupes_and_sorts() {
        let a = vec!["beta".to_string(), "alpha".to_string()];
        let b = vec!["alpha".to_string(), " gamma ".to_string(), "".to_string()];
        assert_eq!(union_sorted(&a, &b), vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn evidence_merge_takes_max_confidence_and_later_observation() {
        let existing = vec![pointer("e1", 0.4, Some("2024-01-01T00:00:00.000Z"))];
        let incoming = vec![pointer("e1", 0.2, Some("2024-02-01T00:00:00.000Z"))];
        let merged = merge_evidence_pointers(&existing, &incoming);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].confidence, 0.4);
        assert_eq!(merged[0].observed_at.as_deref(), Some("2024-02-01T00:00:00.000Z"));
    }

    #[test]
    fn evidence_metadata_shallow_overrides() {
        let mut a = pointer("e1", 0.5, None);
        a.metadata.insert("note".to_string(), json!("old"));
        a.metadata.insert("keep".to_string(), json!(true));
        let mut b = pointer("e1", 0.5, None);
        b.metadata.insert("note".to_string(), json!("new"));
        let merged = merge_evidence_pointers(&[a], &[b]);
        assert_eq!(merged[0].metadata["note"], json!("new"));
        assert_eq!(merged[0].metadata["keep"], json!(true));
    }

    #[test]
    fn evidence_merge_is_idempotent() {
        let pointers = vec![pointer("e1", 0.7, Some("2024-01-01T00:00:00.000Z"))];
        let once = merge_evidence_pointers(&pointers, &pointers);
        let twice = merge_evidence_pointers(&once, &pointers);
        assert_eq!(once, twice);
    }

    #[test]
    fn outcome_only_raises() {
        assert_eq!(
            raise_outcome(PolicyOutcome::Deny, PolicyOutcome::Allow),
            PolicyOutcome::Deny
        );
        assert_eq!(
            raise_outcome(PolicyOutcome::Allow, PolicyOutcome::Review),
            PolicyOutcome::Review
        );
    }

    #[test]
    fn decay_tables_match_thresholds() {
        assert_eq!(decay_stage(0), 0);
        assert_eq!(decay_stage(1), 1);
        assert_eq!(decay_stage(2), 2);
        assert_eq!(decay_stage(3), 3);
        assert_eq!(decay_stage(4), 3);
        assert_eq!(decay_stage(5), 4);
        assert_eq!(decay_stage(50), 4);
        assert_eq!(base_decay(3), 0.32);
        assert_eq!(acceleration_multiplier(1), 1.0);
        assert_eq!(acceleration_multiplier(3), 1.7);
    }

    #[test]
    fn lineage_resolves_by_triple() {
        let revisions = vec![
            AttributeRevision {
                revision_id: "rev_b".to_string(),
                attribute: "editor".to_string(),
                timestamp: "2024-01-01T00:00:00.000Z".to_string(),
                value_digest: "bb".to_string(),
                value: json!("vim"),
            },
            AttributeRevision {
                revision_id: "rev_a".to_string(),
                attribute: "editor".to_string(),
                timestamp: "2024-01-01T00:00:00.000Z".to_string(),
                value_digest: "aa".to_string(),
                value: json!("emacs"),
            },
        ];
        let current = resolve_current_revision(&revisions).map(|r| r.value_digest.clone());
        assert_eq!(current.as_deref(), Some("bb"));
    }

    #[test]
    fn audit_ring_caps_at_newest() {
        let mut trail = Vec::new();
        for i in 0..(AUDIT_TRAIL_CAP + 10) {
            push_audit(
                &mut trail,
                AuditEvent {
                    audit_event_id: format!("aud_{i:012}"),
                    operation: "test".to_string(),
                    entity_id: "x".to_string(),
                    outcome: "allow".to_string(),
                    reason_codes: Vec::new(),
                    details: json!({}),
                    timestamp: format!("2024-01-01T00:00:{:02}.{:03}Z", (i / 1000) % 60, i % 1000),
                },
            );
        }
        assert_eq!(trail.len(), AUDIT_TRAIL_CAP);
        assert_eq!(trail.last().map(|e| e.audit_event_id.clone()).as_deref(), Some("aud_000000002057"));
    }
}
