//! Policy audit trail recording

use crate::support::mint;
use engram_state::merge;
use engram_state::model::{AuditEvent, ProfileState};
use serde_json::{json, Value};

/// Record one audit event into the profile's capped trail.
///
/// The event id is content-addressed over everything the event says, so
/// replaying the same operation records the same event exactly once.
pub fn record_audit(
    state: &mut ProfileState,
    operation: &str,
    entity_id: &str,
    outcome: &str,
    reason_codes: Vec<String>,
    details: Value,
    timestamp: &str,
) -> String {
    let mut reason_codes = reason_codes;
    reason_codes.sort();
    reason_codes.dedup();

    let fingerprint = json!({
        "details": details,
        "entityId": entity_id,
        "operation": operation,
        "outcome": outcome,
        "reasonCodes": reason_codes,
        "timestamp": timestamp,
    });
    let audit_event_id = mint("aud", &fingerprint);

    merge::push_audit(
        &mut state.policy_audit_trail,
        AuditEvent {
            audit_event_id: audit_event_id.clone(),
            operation: operation.to_string(),
            entity_id: entity_id.to_string(),
            outcome: outcome.to_string(),
            reason_codes,
            details,
            timestamp: timestamp.to_string(),
        },
    );
    audit_event_id
}
