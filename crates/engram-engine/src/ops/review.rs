//! Review scheduling: entry upserts, clock ticks, archival rebalance

use crate::engine::OpCtx;
use crate::support::{mint, record_value};
use engram_core::constants::{ACTIVE_REVIEW_SET_MAX, MAX_ITEM_CHARS};
use engram_core::{EngramError, EngramResult, EPOCH};
use engram_normalize::{
    clamp_unit, guarded_string_array, iso_timestamp, optional_bool, optional_f64, optional_u64,
    required_string,
};
use engram_state::merge;
use engram_state::model::{ProfileState, ReviewStatus, ScheduleEntry};
use engram_state::scheduler::{apply_clock_tick, rebalance, ClockMode, ClockTick};
use serde_json::{json, Map, Value};

/// Upsert review schedule entries.
pub fn review_schedule_update(
    state: &mut ProfileState,
    ctx: &OpCtx,
    request: &Map<String, Value>,
) -> EngramResult<Value> {
    let timestamp = iso_timestamp(request.get("timestamp"), "timestamp", EPOCH)?;

    let entries: Vec<Value> = match request.get("scheduleEntries") {
        Some(Value::Array(values)) => values.clone(),
        Some(other) => vec![other.clone()],
        None if request.contains_key("itemKey") => vec![Value::Object(request.clone())],
        None => Vec::new(),
    };
    if entries.is_empty() {
        return Err(EngramError::contract(
            "review_schedule_update requires at least one schedule entry",
        ));
    }

    let mut results = Vec::new();
    let mut created = 0u64;
    let mut updated = 0u64;
    for entry in &entries {
        let map = entry
            .as_object()
            .ok_or_else(|| EngramError::contract("schedule entries must be objects"))?;
        let (entry_id, action) = apply_schedule_entry(state, ctx, map, &timestamp)?;
        match action {
            "created" => created += 1,
            "updated" => updated += 1,
            _ => {}
        }
        results.push(json!({ "scheduleEntryId": entry_id, "action": action }));
    }

    Ok(json!({
        "action": if created + updated > 0 { "applied" } else { "noop" },
        "results": results,
        "created": created,
        "updated": updated,
        "entryCount": state.review_entries.len(),
    }))
}

fn apply_schedule_entry(
    state: &mut ProfileState,
    ctx: &OpCtx,
    map: &Map<String, Value>,
    timestamp: &str,
) -> EngramResult<(String, &'static str)> {
    let item_key = required_string(map.get("itemKey"), "itemKey", MAX_ITEM_CHARS)?;
    let incoming_status = map
        .get("status")
        .and_then(Value::as_str)
        .and_then(ReviewStatus::parse);
    let source_event_ids = guarded_string_array(
        map.get("sourceEventIds"),
        "sourceEventIds",
        Some("review_schedule_update requires at least one source event id"),
    )?;

    let schedule_entry_id = mint(
        "rs",
        &json!({
            "itemKey": &item_key,
            "profile": &ctx.profile_id,
            "storeId": &ctx.store_id,
        }),
    );

    let existing = state.review_entries.get(&schedule_entry_id).cloned();
    let is_new = existing.is_none();
    let previous_value = existing.as_ref().map(record_value);

    let mut record = existing.unwrap_or_else(|| ScheduleEntry {
        schedule_entry_id: schedule_entry_id.clone(),
        item_key: item_key.clone(),
        status: ReviewStatus::Scheduled,
        repetition: 0,
        interval_days: 1,
        ease_factor: 0.5,
        due_at: EPOCH.to_string(),
        source_event_ids: Vec::new(),
        created_at: timestamp.to_string(),
        updated_at: timestamp.to_string(),
    });

    if let Some(status) = incoming_status {
        record.status = status;
    }
    record.repetition = record.repetition.max(optional_u64(map.get("repetition"), record.repetition));
    if map.contains_key("intervalDays") {
        record.interval_days = optional_u64(map.get("intervalDays"), record.interval_days).max(1);
    }
    if map.contains_key("easeFactor") {
        record.ease_factor = clamp_unit(map.get("easeFactor"), record.ease_factor);
    }
    if map.contains_key("dueAt") {
        record.due_at = iso_timestamp(map.get("dueAt"), "dueAt", &record.due_at.clone())?;
    }
    record.source_event_ids = merge::union_sorted(&record.source_event_ids, &source_event_ids);

    let candidate_value = record_value(&record);
    if previous_value.as_ref() == Some(&candidate_value) {
        return Ok((schedule_entry_id, "noop"));
    }
    record.updated_at = timestamp.to_string();
    state
        .review_entries
        .insert(schedule_entry_id.clone(), record);
    Ok((schedule_entry_id, if is_new { "created" } else { "updated" }))
}

/// Advance the interaction/sleep clocks, then rebalance the active set.
pub fn review_schedule_clock(
    state: &mut ProfileState,
    _ctx: &OpCtx,
    request: &Map<String, Value>,
) -> EngramResult<Value> {
    let mode = request
        .get("mode")
        .and_then(Value::as_str)
        .map(ClockMode::parse)
        .unwrap_or(ClockMode::Auto);
    let fatigue_threshold = parse_threshold(request.get("fatigueThreshold"), "fatigueThreshold")?;
    let novelty_write_threshold =
        parse_threshold(request.get("noveltyWriteThreshold"), "noveltyWriteThreshold")?;

    let tick = ClockTick {
        mode,
        interaction_increment: optional_u64(request.get("interactionIncrement"), 1),
        sleep_increment: optional_u64(request.get("sleepIncrement"), 1),
        novelty_load: optional_f64(request.get("noveltyLoad"), 0.0),
        fatigue_delta: optional_f64(request.get("fatigueDelta"), 0.0),
        novelty_write_load: optional_f64(request.get("noveltyWriteLoad"), 0.0),
        fatigue_threshold,
        novelty_write_threshold,
        force_sleep: optional_bool(request.get("forceSleep"), false),
        timestamp: iso_timestamp(request.get("timestamp"), "timestamp", EPOCH)?,
    };

    let outcome = apply_clock_tick(state, &tick);
    let active_limit = state.review_archive.active_limit;
    let rebalanced = rebalance(state, active_limit, &tick.timestamp);

    Ok(json!({
        "mode": tick.mode.as_str(),
        "consolidationTriggered": outcome.consolidation_triggered,
        "consolidationCause": outcome.consolidation_cause,
        "becameDue": outcome.became_due,
        "rescheduled": outcome.rescheduled,
        "clocks": &state.clocks,
        "rebalance": {
            "activeCount": rebalanced.active_review_ids.len(),
            "warmCount": rebalanced.warm.len(),
            "coldCount": rebalanced.cold.len(),
            "frozenCount": rebalanced.frozen.len(),
        },
    }))
}

fn parse_threshold(value: Option<&Value>, field: &str) -> EngramResult<Option<f64>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => {
            let parsed = v.as_f64().filter(|f| f.is_finite() && *f > 0.0).ok_or_else(|| {
                EngramError::contract(format!("{field} must be a positive number"))
            })?;
            Ok(Some(parsed))
        }
    }
}

/// Rebalance the active review set into archival tiers.
pub fn review_set_rebalance(
    state: &mut ProfileState,
    _ctx: &OpCtx,
    request: &Map<String, Value>,
) -> EngramResult<Value> {
    let timestamp = iso_timestamp(request.get("timestamp"), "timestamp", EPOCH)?;
    let active_limit = optional_u64(
        request.get("activeLimit"),
        state.review_archive.active_limit as u64,
    )
    .clamp(1, ACTIVE_REVIEW_SET_MAX as u64) as usize;

    let outcome = rebalance(state, active_limit, &timestamp);

    Ok(json!({
        "action": "applied",
        "activeLimit": active_limit,
        "activeReviewIds": outcome.active_review_ids,
        "tiers": {
            "warm": outcome.warm,
            "cold": outcome.cold,
            "frozen": outcome.frozen,
        },
        "newlyArchived": outcome.archived,
        "archivedRecordCount": state.review_archive.archived_records.len(),
    }))
}
