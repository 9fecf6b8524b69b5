//! Policy decisions, recall allowlist management, and audit export

use crate::audit::record_audit;
use crate::authorize::authorize_recall;
use crate::engine::OpCtx;
use crate::support::{mint, record_value};
use engram_core::constants::{AUDIT_TRAIL_CAP, MAX_ITEM_CHARS};
use engram_core::{canonical, EngramError, EngramResult, EPOCH};
use engram_normalize::{
    bounded_string, guarded_string_array, iso_timestamp, optional_bool, optional_u64,
    required_string,
};
use engram_state::merge;
use engram_state::model::{PolicyDecision, PolicyOutcome, ProfileState};
use serde_json::{json, Map, Value};

/// Upsert policy decisions; merges only raise the outcome.
pub fn policy_decision_update(
    state: &mut ProfileState,
    ctx: &OpCtx,
    request: &Map<String, Value>,
) -> EngramResult<Value> {
    let timestamp = iso_timestamp(request.get("timestamp"), "timestamp", EPOCH)?;

    let decisions: Vec<Value> = match request.get("decisions") {
        Some(Value::Array(entries)) => entries.clone(),
        Some(other) => vec![other.clone()],
        None if request.contains_key("policyKey") => vec![Value::Object(request.clone())],
        None => Vec::new(),
    };
    if decisions.is_empty() {
        return Err(EngramError::contract(
            "policy_decision_update requires at least one decision",
        ));
    }

    let mut results = Vec::new();
    let mut created = 0u64;
    let mut updated = 0u64;
    for decision in &decisions {
        let map = decision
            .as_object()
            .ok_or_else(|| EngramError::contract("decisions must be objects"))?;
        let (decision_id, action, outcome) = apply_decision(state, ctx, map, &timestamp)?;
        match action {
            "created" => created += 1,
            "updated" => updated += 1,
            _ => {}
        }
        results.push(json!({
            "decisionId": decision_id,
            "action": action,
            "outcome": outcome.as_str(),
        }));
    }

    Ok(json!({
        "action": if created + updated > 0 { "applied" } else { "noop" },
        "results": results,
        "created": created,
        "updated": updated,
        "decisionCount": state.policy_decisions.len(),
    }))
}

fn apply_decision(
    state: &mut ProfileState,
    ctx: &OpCtx,
    map: &Map<String, Value>,
    timestamp: &str,
) -> EngramResult<(String, &'static str, PolicyOutcome)> {
    let policy_key = required_string(map.get("policyKey"), "policyKey", MAX_ITEM_CHARS)?;
    let action = bounded_string(map.get("action"), "action", MAX_ITEM_CHARS)?
        .unwrap_or_else(|| "unspecified".to_string());
    let surface = bounded_string(map.get("surface"), "surface", MAX_ITEM_CHARS)?
        .unwrap_or_else(|| "unspecified".to_string());
    let outcome = map
        .get("outcome")
        .and_then(Value::as_str)
        .and_then(PolicyOutcome::parse)
        .unwrap_or(PolicyOutcome::Allow);
    let reason_codes = guarded_string_array(map.get("reasonCodes"), "reasonCodes", None)?;
    if outcome == PolicyOutcome::Deny && reason_codes.is_empty() {
        return Err(EngramError::contract(
            "deny decisions require at least one reason code",
        ));
    }
    let provenance_event_ids = guarded_string_array(
        map.get("provenanceEventIds"),
        "provenanceEventIds",
        Some("policy_decision_update requires at least one provenance event id"),
    )?;

    let decision_id = mint(
        "pd",
        &json!({
            "action": &action,
            "policyKey": &policy_key,
            "profile": &ctx.profile_id,
            "storeId": &ctx.store_id,
            "surface": &surface,
        }),
    );

    let existing = state.policy_decisions.get(&decision_id).cloned();
    let is_new = existing.is_none();
    let previous_value = existing.as_ref().map(record_value);

    let mut record = existing.unwrap_or_else(|| PolicyDecision {
        decision_id: decision_id.clone(),
        policy_key: policy_key.clone(),
        action: action.clone(),
        surface: surface.clone(),
        outcome,
        reason_codes: Vec::new(),
        provenance_event_ids: Vec::new(),
        created_at: timestamp.to_string(),
        updated_at: timestamp.to_string(),
    });

    record.outcome = merge::raise_outcome(record.outcome, outcome);
    record.reason_codes = merge::union_sorted(&record.reason_codes, &reason_codes);
    record.provenance_event_ids =
        merge::union_sorted(&record.provenance_event_ids, &provenance_event_ids);

    let merged_outcome = record.outcome;
    let candidate_value = record_value(&record);
    let verb = if previous_value.as_ref() == Some(&candidate_value) {
        "noop"
    } else {
        record.updated_at = timestamp.to_string();
        if is_new {
            "created"
        } else {
            "updated"
        }
    };

    if verb != "noop" {
        record_audit(
            state,
            ctx.operation.as_str(),
            &decision_id,
            merged_outcome.as_str(),
            record.reason_codes.clone(),
            json!({ "action": &action, "policyKey": &policy_key, "surface": &surface }),
            timestamp,
        );
    }
    state.policy_decisions.insert(decision_id.clone(), record);
    Ok((decision_id, verb, merged_outcome))
}

/// Check or mutate the cross-space recall allowlist.
pub fn recall_authorization(
    state: &mut ProfileState,
    ctx: &OpCtx,
    request: &Map<String, Value>,
) -> EngramResult<Value> {
    let mode = bounded_string(request.get("mode"), "mode", MAX_ITEM_CHARS)?
        .unwrap_or_else(|| "check".to_string());
    let timestamp = iso_timestamp(request.get("timestamp"), "timestamp", EPOCH)?;

    match mode.as_str() {
        "check" => {
            let requester = required_string(
                request.get("requesterStoreId"),
                "requesterStoreId",
                MAX_ITEM_CHARS,
            )
            .map_err(|_| {
                EngramError::contract("recall_authorization check requires requesterStoreId")
            })?;
            let fail_closed = optional_bool(request.get("failClosed"), true);
            let auth = authorize_recall(
                state,
                ctx.operation.as_str(),
                &ctx.store_id,
                &requester,
                fail_closed,
                &timestamp,
            )?;
            Ok(json!({
                "mode": "check",
                "action": "checked",
                "requesterStoreId": requester,
                "authorized": auth.authorized,
                "allowedStoreIds": &state.recall_policy.allowed_store_ids,
                "policyId": &state.recall_policy.policy_id,
                "auditEventId": auth.audit_event_id,
            }))
        }
        "grant" | "revoke" | "replace" => {
            let listed = guarded_string_array(request.get("allowStoreIds"), "allowStoreIds", None)?;
            let before = state.recall_policy.allowed_store_ids.clone();

            let mut next = match mode.as_str() {
                "grant" => merge::union_sorted(&before, &listed),
                "replace" => merge::union_sorted(&[ctx.store_id.clone()], &listed),
                _ => before
                    .iter()
                    .filter(|id| !listed.contains(*id))
                    .cloned()
                    .collect(),
            };
            // The owning store can never drop off its own allowlist.
            if !next.iter().any(|id| id == &ctx.store_id) {
                next.push(ctx.store_id.clone());
                next.sort();
            }

            let action = if next == before { "noop" } else { "updated" };
            if action == "updated" {
                state.recall_policy.allowed_store_ids = next.clone();
                state.recall_policy.updated_at = timestamp.clone();
            }
            let policy_id = state.recall_policy.policy_id.clone();
            let audit_event_id = record_audit(
                state,
                ctx.operation.as_str(),
                &policy_id,
                "allow",
                vec![format!("allowlist_{mode}")],
                json!({ "allowStoreIds": &listed, "mode": &mode }),
                &timestamp,
            );

            Ok(json!({
                "mode": mode,
                "action": action,
                "allowedStoreIds": &state.recall_policy.allowed_store_ids,
                "policyId": &state.recall_policy.policy_id,
                "auditEventId": audit_event_id,
            }))
        }
        other => Err(EngramError::contract(format!(
            "recall_authorization mode {other} is not supported"
        ))),
    }
}

/// Export recent policy decisions and the audit trail with a fixed checklist.
pub fn policy_audit_export(
    state: &mut ProfileState,
    ctx: &OpCtx,
    request: &Map<String, Value>,
) -> EngramResult<Value> {
    let limit = optional_u64(request.get("limit"), 100).clamp(1, AUDIT_TRAIL_CAP as u64) as usize;

    let mut decisions: Vec<&PolicyDecision> = state.policy_decisions.values().collect();
    decisions.sort_by(|a, b| {
        (&a.updated_at, &a.decision_id).cmp(&(&b.updated_at, &b.decision_id))
    });
    let decisions: Vec<&PolicyDecision> = decisions
        .into_iter()
        .rev()
        .take(limit)
        .rev()
        .collect();

    let trail_start = state.policy_audit_trail.len().saturating_sub(limit);
    let trail = &state.policy_audit_trail[trail_start..];

    let deny_reasons_ok = state
        .policy_decisions
        .values()
        .filter(|d| d.outcome == PolicyOutcome::Deny)
        .all(|d| !d.reason_codes.is_empty());
    let provenance_ok = state
        .policy_decisions
        .values()
        .all(|d| !d.provenance_event_ids.is_empty());
    let incident_checklist = json!([
        {
            "check": "audit_trail_within_cap",
            "passed": state.policy_audit_trail.len() <= AUDIT_TRAIL_CAP,
        },
        {
            "check": "deny_decisions_carry_reasons",
            "passed": deny_reasons_ok,
        },
        {
            "check": "allowlist_contains_owner",
            "passed": state.recall_policy.allowed_store_ids.iter().any(|id| id == &ctx.store_id),
        },
        {
            "check": "decisions_have_provenance",
            "passed": provenance_ok,
        },
    ]);

    let payload = json!({
        "auditTrail": trail,
        "decisions": decisions,
        "incidentChecklist": &incident_checklist,
    });
    let payload_digest = canonical::digest(&payload);
    let export_id = mint(
        "pax",
        &json!({
            "payloadDigest": &payload_digest,
            "profile": &ctx.profile_id,
            "storeId": &ctx.store_id,
        }),
    );

    Ok(json!({
        "exportId": export_id,
        "payloadDigest": payload_digest,
        "decisions": payload["decisions"],
        "auditTrail": payload["auditTrail"],
        "incidentChecklist": incident_checklist,
        "decisionCount": state.policy_decisions.len(),
        "auditTrailCount": state.policy_audit_trail.len(),
    }))
}
