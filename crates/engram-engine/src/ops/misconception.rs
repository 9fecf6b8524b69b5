//! Misconception lifecycle and the pain/failure signals that feed it
//!
//! Pain and failure ingestion normalize to a harmful misconception signal and
//! run the same update path, so counts, decay, and anti-patterns have one
//! source of truth.

use crate::audit::record_audit;
use crate::engine::OpCtx;
use crate::support::{changed_fields, mint, record_digest, record_value};
use engram_core::constants::{CHRONOLOGY_CAP, CONFIDENCE_FLOOR, MAX_ITEM_CHARS};
use engram_core::{round6, EngramResult, EPOCH};
use engram_normalize::{
    bounded_string, clamp_unit, guarded_string_array, iso_timestamp, required_string,
};
use engram_state::merge;
use engram_state::model::{
    AntiPattern, FailureSignalRecord, Misconception, MisconceptionNote, MisconceptionSignal,
    MisconceptionStatus, PainSignalRecord, ProfileState,
};
use serde_json::{json, Map, Value};

/// Harmful-count thresholds that emit anti-patterns.
const ANTI_PATTERN_THRESHOLDS: [u64; 3] = [2, 3, 5];

/// Confidence recovered by a helpful or correcting signal.
const RECOVERY_DELTA: f64 = 0.11;

/// Default confidence for a freshly observed misconception.
const INITIAL_CONFIDENCE: f64 = 0.5;

/// Parsed inputs for one misconception signal application.
pub struct SignalUpdate {
    /// Stable misconception key
    pub key: String,
    /// Signal kind
    pub signal: MisconceptionSignal,
    /// Evidence event ids; non-empty
    pub evidence_event_ids: Vec<String>,
    /// Replay guard id
    pub signal_id: Option<String>,
    /// Severity in `[0,1]`
    pub severity: f64,
    /// Requested status, honored only for suppression
    pub status: Option<MisconceptionStatus>,
    /// Update timestamp
    pub timestamp: String,
}

/// Apply one signal to the keyed misconception record.
///
/// This is the single write path for misconception state; the pain and
/// failure handlers call straight into it.
pub fn apply_signal(
    state: &mut ProfileState,
    ctx: &OpCtx,
    update: &SignalUpdate,
) -> EngramResult<Value> {
    let misconception_id = mint(
        "mis",
        &json!({
            "key": &update.key,
            "profile": &ctx.profile_id,
            "storeId": &ctx.store_id,
        }),
    );

    let existing = state.misconceptions.get(&misconception_id).cloned();
    let is_new = existing.is_none();
    let mut record = existing.clone().unwrap_or_else(|| Misconception {
        misconception_id: misconception_id.clone(),
        key: update.key.clone(),
        status: MisconceptionStatus::Active,
        harmful_signal_count: 0,
        helpful_signal_count: 0,
        correction_count: 0,
        confidence: INITIAL_CONFIDENCE,
        decay_stage: 0,
        seen_signal_ids: Vec::new(),
        evidence_event_ids: Vec::new(),
        anti_patterns: Vec::new(),
        created_at: update.timestamp.clone(),
        updated_at: update.timestamp.clone(),
    });

    // Replay guard: a signal id is applied at most once per record.
    if let Some(signal_id) = &update.signal_id {
        if record.seen_signal_ids.iter().any(|id| id == signal_id) {
            return Ok(signal_response(
                "noop",
                &record,
                &decay_block(record.decay_stage, 0.0, 0.0),
            ));
        }
    }

    let previous_digest = existing.as_ref().map(record_digest);
    let previous_value = existing.as_ref().map(record_value);

    match update.signal {
        MisconceptionSignal::Harmful => record.harmful_signal_count += 1,
        MisconceptionSignal::Helpful => record.helpful_signal_count += 1,
        MisconceptionSignal::Correction => record.correction_count += 1,
    }

    let stage = merge::decay_stage(record.harmful_signal_count);
    record.decay_stage = stage;
    let decay = match update.signal {
        MisconceptionSignal::Harmful => {
            let base = merge::base_decay(stage);
            let penalty = merge::severity_penalty(update.severity);
            let delta = round6(base + penalty);
            record.confidence = round6((record.confidence - delta).max(CONFIDENCE_FLOOR));
            decay_block(stage, penalty, -delta)
        }
        MisconceptionSignal::Helpful | MisconceptionSignal::Correction => {
            record.confidence = merge::clamp_unit(record.confidence + RECOVERY_DELTA);
            decay_block(stage, 0.0, RECOVERY_DELTA)
        }
    };

    // Suppression is sticky; otherwise status is derived from the counts.
    let suppressed = record.status == MisconceptionStatus::Suppressed
        || update.status == Some(MisconceptionStatus::Suppressed);
    record.status = if suppressed {
        MisconceptionStatus::Suppressed
    } else if record.harmful_signal_count > 0
        && record.correction_count >= record.harmful_signal_count
    {
        MisconceptionStatus::Resolved
    } else {
        MisconceptionStatus::Active
    };

    record.evidence_event_ids =
        merge::union_sorted(&record.evidence_event_ids, &update.evidence_event_ids);
    if let Some(signal_id) = &update.signal_id {
        record.seen_signal_ids =
            merge::union_sorted(&record.seen_signal_ids, &[signal_id.clone()]);
    }

    for threshold in ANTI_PATTERN_THRESHOLDS {
        if record.harmful_signal_count >= threshold
            && !record.anti_patterns.iter().any(|p| p.threshold == threshold)
        {
            let anti_pattern_id = mint(
                "anti",
                &json!({ "misconceptionId": &misconception_id, "threshold": threshold }),
            );
            record.anti_patterns.push(AntiPattern {
                anti_pattern_id,
                statement: format!("avoid:{}", update.key),
                threshold,
                evidence_event_ids: record.evidence_event_ids.clone(),
                signal_ids: record.seen_signal_ids.clone(),
                activated_at: update.timestamp.clone(),
            });
        }
    }
    record
        .anti_patterns
        .sort_by(|a, b| (&a.activated_at, &a.anti_pattern_id).cmp(&(&b.activated_at, &b.anti_pattern_id)));

    let candidate_value = record_value(&record);
    if previous_value.as_ref() == Some(&candidate_value) {
        return Ok(signal_response("noop", &record, &decay));
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
    record.updated_at = update.timestamp.clone();
    let next_digest = record_digest(&record);

    let note_id = mint(
        "note",
        &json!({
            "misconceptionId": &misconception_id,
            "nextDigest": &next_digest,
            "previousDigest": &previous_digest,
        }),
    );
    state.misconception_chronology.push(MisconceptionNote {
        note_id,
        misconception_id: misconception_id.clone(),
        key: update.key.clone(),
        changed_fields: changed,
        previous_digest,
        next_digest,
        harmful_signal_count: record.harmful_signal_count,
        helpful_signal_count: record.helpful_signal_count,
        correction_count: record.correction_count,
        timestamp: update.timestamp.clone(),
    });
    merge::trim_ring(&mut state.misconception_chronology, CHRONOLOGY_CAP, |note| {
        (note.timestamp.clone(), note.note_id.clone())
    });

    let action = if is_new { "created" } else { "updated" };
    let response = signal_response(action, &record, &decay);
    state.misconceptions.insert(misconception_id, record);
    Ok(response)
}

fn decay_block(stage: u32, severity_penalty: f64, applied_delta: f64) -> Value {
    json!({
        "stage": stage,
        "baseDecay": merge::base_decay(stage),
        "severityPenalty": round6(severity_penalty),
        "accelerationMultiplier": merge::acceleration_multiplier(stage),
        "appliedDelta": round6(applied_delta),
    })
}

fn signal_response(action: &str, record: &Misconception, decay: &Value) -> Value {
    json!({
        "action": action,
        "misconceptionId": &record.misconception_id,
        "status": record.status.as_str(),
        "confidence": record.confidence,
        "harmfulSignalCount": record.harmful_signal_count,
        "helpfulSignalCount": record.helpful_signal_count,
        "correctionCount": record.correction_count,
        "confidenceDecay": decay,
        "antiPatterns": &record.anti_patterns,
        "evidenceEventIds": &record.evidence_event_ids,
        "record": record,
        "recordDigest": record_digest(record),
    })
}

fn parse_signal_update(request: &Map<String, Value>) -> EngramResult<SignalUpdate> {
    let key = required_string(request.get("misconceptionKey"), "misconceptionKey", MAX_ITEM_CHARS)?;
    let signal = request
        .get("signal")
        .and_then(Value::as_str)
        .map(MisconceptionSignal::parse)
        .unwrap_or(MisconceptionSignal::Harmful);
    let evidence_event_ids = guarded_string_array(
        request.get("evidenceEventIds"),
        "evidenceEventIds",
        Some("misconception_update requires at least one evidence event id"),
    )?;
    let severity = clamp_unit(
        request
            .get("metadata")
            .and_then(|m| m.get("severity"))
            .or_else(|| request.get("severity")),
        0.0,
    );
    let status = request
        .get("status")
        .and_then(Value::as_str)
        .and_then(MisconceptionStatus::parse);
    Ok(SignalUpdate {
        key,
        signal,
        evidence_event_ids,
        signal_id: bounded_string(request.get("signalId"), "signalId", MAX_ITEM_CHARS)?,
        severity,
        status,
        timestamp: iso_timestamp(request.get("timestamp"), "timestamp", EPOCH)?,
    })
}

/// Apply a misconception signal from a request.
pub fn misconception_update(
    state: &mut ProfileState,
    ctx: &OpCtx,
    request: &Map<String, Value>,
) -> EngramResult<Value> {
    let update = parse_signal_update(request)?;
    apply_signal(state, ctx, &update)
}

/// Ingest an explicit pain signal; maps to a harmful misconception signal.
pub fn pain_signal_ingest(
    state: &mut ProfileState,
    ctx: &OpCtx,
    request: &Map<String, Value>,
) -> EngramResult<Value> {
    let key = required_string(request.get("misconceptionKey"), "misconceptionKey", MAX_ITEM_CHARS)?;
    let evidence_event_ids = guarded_string_array(
        request.get("evidenceEventIds"),
        "evidenceEventIds",
        Some("pain_signal_ingest requires at least one evidence event id"),
    )?;
    let signal_id = bounded_string(request.get("signalId"), "signalId", MAX_ITEM_CHARS)?;
    let severity = clamp_unit(
        request
            .get("severity")
            .or_else(|| request.get("metadata").and_then(|m| m.get("severity"))),
        0.0,
    );
    let timestamp = iso_timestamp(request.get("timestamp"), "timestamp", EPOCH)?;

    let pain_signal_id = mint(
        "pain",
        &json!({
            "evidenceEventIds": &evidence_event_ids,
            "misconceptionKey": &key,
            "profile": &ctx.profile_id,
            "signalId": &signal_id,
            "storeId": &ctx.store_id,
        }),
    );
    let replay = state
        .pain_signals
        .iter()
        .any(|record| record.pain_signal_id == pain_signal_id);
    if !replay {
        state.pain_signals.push(PainSignalRecord {
            pain_signal_id: pain_signal_id.clone(),
            misconception_key: key.clone(),
            mapped_signal: "harmful".to_string(),
            signal_id: signal_id.clone(),
            evidence_event_ids: evidence_event_ids.clone(),
            severity,
            recorded_at: timestamp.clone(),
        });
    }

    let misconception = apply_signal(
        state,
        ctx,
        &SignalUpdate {
            key: key.clone(),
            signal: MisconceptionSignal::Harmful,
            evidence_event_ids,
            signal_id,
            severity,
            status: None,
            timestamp: timestamp.clone(),
        },
    )?;

    let audit_event_id = record_audit(
        state,
        ctx.operation.as_str(),
        &pain_signal_id,
        "recorded",
        vec!["explicit_pain_signal".to_string()],
        json!({ "misconceptionKey": key }),
        &timestamp,
    );

    Ok(json!({
        "action": if replay { "noop" } else { "recorded" },
        "painSignalId": pain_signal_id,
        "mappedSignal": "harmful",
        "misconception": misconception,
        "auditEventId": audit_event_id,
    }))
}

/// Ingest an implicit failure signal; maps to a harmful misconception signal.
pub fn failure_signal_ingest(
    state: &mut ProfileState,
    ctx: &OpCtx,
    request: &Map<String, Value>,
) -> EngramResult<Value> {
    let failure_type = bounded_string(request.get("failureType"), "failureType", MAX_ITEM_CHARS)?
        .unwrap_or_else(|| "unknown".to_string());
    let key = bounded_string(request.get("misconceptionKey"), "misconceptionKey", MAX_ITEM_CHARS)?
        .unwrap_or_else(|| format!("failure:{failure_type}"));
    let evidence_event_ids = guarded_string_array(
        request.get("evidenceEventIds"),
        "evidenceEventIds",
        Some("failure_signal_ingest requires at least one evidence event id"),
    )?;
    let signal_id = bounded_string(request.get("signalId"), "signalId", MAX_ITEM_CHARS)?;
    let timestamp = iso_timestamp(request.get("timestamp"), "timestamp", EPOCH)?;

    let failure_signal_id = mint(
        "fail",
        &json!({
            "evidenceEventIds": &evidence_event_ids,
            "failureType": &failure_type,
            "misconceptionKey": &key,
            "profile": &ctx.profile_id,
            "signalId": &signal_id,
            "storeId": &ctx.store_id,
        }),
    );
    let replay = state
        .failure_signals
        .iter()
        .any(|record| record.failure_signal_id == failure_signal_id);
    if !replay {
        state.failure_signals.push(FailureSignalRecord {
            failure_signal_id: failure_signal_id.clone(),
            failure_type: failure_type.clone(),
            misconception_key: key.clone(),
            mapped_signal: "harmful".to_string(),
            signal_id: signal_id.clone(),
            evidence_event_ids: evidence_event_ids.clone(),
            recorded_at: timestamp.clone(),
        });
    }

    let misconception = apply_signal(
        state,
        ctx,
        &SignalUpdate {
            key: key.clone(),
            signal: MisconceptionSignal::Harmful,
            evidence_event_ids,
            signal_id,
            severity: 0.0,
            status: None,
            timestamp: timestamp.clone(),
        },
    )?;

    let audit_event_id = record_audit(
        state,
        ctx.operation.as_str(),
        &failure_signal_id,
        "recorded",
        vec![format!("implicit_{failure_type}")],
        json!({ "failureType": &failure_type, "misconceptionKey": &key }),
        &timestamp,
    );

    Ok(json!({
        "action": if replay { "noop" } else { "recorded" },
        "failureSignalId": failure_signal_id,
        "failureType": failure_type,
        "mappedSignal": "harmful",
        "misconception": misconception,
        "auditEventId": audit_event_id,
    }))
}
