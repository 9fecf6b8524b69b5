//! Curriculum plan item upserts

use crate::engine::OpCtx;
use crate::support::{changed_fields, mint, record_digest, record_value};
use engram_core::constants::{CHRONOLOGY_CAP, MAX_ITEM_CHARS};
use engram_core::{EngramError, EngramResult, EPOCH};
use engram_normalize::{
    bounded_string, guarded_string_array, iso_timestamp, optional_u64, required_string,
};
use engram_state::merge;
use engram_state::model::{ConflictNote, PlanItem, PlanStatus, ProfileState};
use serde_json::{json, Map, Value};

/// Upsert curriculum plan items, with sticky blocking and min-rank merges.
pub fn curriculum_plan_update(
    state: &mut ProfileState,
    ctx: &OpCtx,
    request: &Map<String, Value>,
) -> EngramResult<Value> {
    let timestamp = iso_timestamp(request.get("timestamp"), "timestamp", EPOCH)?;

    let items: Vec<Value> = match request.get("planItems") {
        Some(Value::Array(entries)) => entries.clone(),
        Some(other) => vec![other.clone()],
        None if request.contains_key("objectiveId") => vec![Value::Object(request.clone())],
        None => Vec::new(),
    };
    if items.is_empty() {
        return Err(EngramError::contract(
            "curriculum_plan_update requires at least one plan item",
        ));
    }

    let mut results = Vec::new();
    let mut created = 0u64;
    let mut updated = 0u64;
    for item in &items {
        let map = item
            .as_object()
            .ok_or_else(|| EngramError::contract("plan items must be objects"))?;
        let (plan_item_id, action) = apply_plan_item(state, ctx, map, &timestamp)?;
        match action {
            "created" => created += 1,
            "updated" => updated += 1,
            _ => {}
        }
        results.push(json!({ "planItemId": plan_item_id, "action": action }));
    }

    Ok(json!({
        "action": if created + updated > 0 { "applied" } else { "noop" },
        "results": results,
        "created": created,
        "updated": updated,
        "planItemCount": state.plan_items.len(),
    }))
}

fn apply_plan_item(
    state: &mut ProfileState,
    ctx: &OpCtx,
    map: &Map<String, Value>,
    timestamp: &str,
) -> EngramResult<(String, &'static str)> {
    let objective_id = required_string(map.get("objectiveId"), "objectiveId", MAX_ITEM_CHARS)?;
    let objective = bounded_string(map.get("objective"), "objective", MAX_ITEM_CHARS)?
        .unwrap_or_else(|| objective_id.clone());
    let incoming_status = map
        .get("status")
        .and_then(Value::as_str)
        .and_then(PlanStatus::parse);
    let incoming_rank = optional_u64(map.get("recommendationRank"), 1).max(1);
    let due_at = match map.get("dueAt") {
        None | Some(Value::Null) => None,
        other => Some(iso_timestamp(other, "dueAt", EPOCH)?),
    };
    let misconception_ids =
        guarded_string_array(map.get("misconceptionIds"), "misconceptionIds", None)?;
    let interest_tags = guarded_string_array(map.get("interestTags"), "interestTags", None)?;
    let evidence_event_ids = guarded_string_array(
        map.get("evidenceEventIds"),
        "evidenceEventIds",
        Some("curriculum_plan_update requires at least one evidence event id"),
    )?;
    let provenance_signals =
        guarded_string_array(map.get("provenanceSignals"), "provenanceSignals", None)?;
    let metadata: std::collections::BTreeMap<String, Value> = match map.get("metadata") {
        Some(Value::Object(m)) => m.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        _ => Default::default(),
    };

    let plan_item_id = mint(
        "cp",
        &json!({
            "objectiveId": &objective_id,
            "profile": &ctx.profile_id,
            "storeId": &ctx.store_id,
        }),
    );

    let existing = state.plan_items.get(&plan_item_id).cloned();
    let is_new = existing.is_none();
    let previous_digest = existing.as_ref().map(record_digest);
    let previous_value = existing.as_ref().map(record_value);

    let mut record = existing.unwrap_or_else(|| PlanItem {
        plan_item_id: plan_item_id.clone(),
        objective_id: objective_id.clone(),
        objective: objective.clone(),
        status: PlanStatus::Proposed,
        recommendation_rank: incoming_rank,
        due_at: None,
        misconception_ids: Vec::new(),
        interest_tags: Vec::new(),
        evidence_event_ids: Vec::new(),
        provenance_signals: Vec::new(),
        metadata: Default::default(),
        created_at: timestamp.to_string(),
        updated_at: timestamp.to_string(),
    });

    // Blocked is sticky; rank merges by min; lists union and sort.
    record.status = if record.status == PlanStatus::Blocked {
        PlanStatus::Blocked
    } else {
        incoming_status.unwrap_or(record.status)
    };
    record.objective = objective;
    record.recommendation_rank = record.recommendation_rank.min(incoming_rank);
    if due_at.is_some() {
        record.due_at = due_at;
    }
    record.misconception_ids = merge::union_sorted(&record.misconception_ids, &misconception_ids);
    record.interest_tags = merge::union_sorted(&record.interest_tags, &interest_tags);
    record.evidence_event_ids =
        merge::union_sorted(&record.evidence_event_ids, &evidence_event_ids);
    record.provenance_signals =
        merge::union_sorted(&record.provenance_signals, &provenance_signals);
    for (key, value) in metadata {
        record.metadata.insert(key, value);
    }

    let candidate_value = record_value(&record);
    if previous_value.as_ref() == Some(&candidate_value) {
        return Ok((plan_item_id, "noop"));
    }

    let changed = match &previous_value {
        Some(previous) => changed_fields(previous, &candidate_value),
        None => {
            let mut fields: Vec<String> = candidate_value
                .as_object()
                .map(|m| m.keys().cloned().collect())
                .unwrap_or_default();
            fields.sort();
            fields
        }
    };
    record.updated_at = timestamp.to_string();
    let next_digest = record_digest(&record);

    let note_id = mint(
        "note",
        &json!({
            "nextDigest": &next_digest,
            "planItemId": &plan_item_id,
            "previousDigest": &previous_digest,
        }),
    );
    state.curriculum_conflicts.push(ConflictNote {
        note_id,
        profile_id: ctx.profile_id.clone(),
        plan_item_id: plan_item_id.clone(),
        objective_id,
        changed_fields: changed,
        previous_digest,
        next_digest,
        timestamp: timestamp.to_string(),
    });
    merge::trim_ring(&mut state.curriculum_conflicts, CHRONOLOGY_CAP, |note| {
        (note.timestamp.clone(), note.note_id.clone())
    });

    state.plan_items.insert(plan_item_id.clone(), record);
    Ok((plan_item_id, if is_new { "created" } else { "updated" }))
}
