//! Event ledger operations: ingest, context, reflect, validate

use crate::engine::OpCtx;
use crate::support::mint;
use engram_core::constants::{MAX_ITEM_CHARS, MAX_LIST_ITEMS};
use engram_core::{canonical, EngramError, EngramResult, EPOCH};
use engram_normalize::{bounded_string, guarded_string_array, iso_timestamp, optional_u64};
use engram_state::model::{EventRecord, ProfileState};
use serde_json::{json, Map, Value};

/// Upper bound on event payload text.
const MAX_CONTENT_CHARS: usize = 65_536;

/// Default number of events `reflect` examines.
const DEFAULT_REFLECT_WINDOW: u64 = 5;

/// Default number of events `context` returns.
const DEFAULT_CONTEXT_LIMIT: u64 = 20;

/// Ingest a batch of events, deduplicating by content digest.
pub fn ingest(state: &mut ProfileState, _ctx: &OpCtx, request: &Map<String, Value>) -> EngramResult<Value> {
    let timestamp = iso_timestamp(request.get("timestamp"), "timestamp", EPOCH)?;

    let raw_events: Vec<Value> = match request.get("events") {
        Some(Value::Array(entries)) => entries.clone(),
        Some(other) => vec![other.clone()],
        None if request.contains_key("content") => vec![Value::Object(request.clone())],
        None => Vec::new(),
    };
    if raw_events.is_empty() {
        return Err(EngramError::contract("ingest requires at least one event"));
    }

    let mut accepted = 0u64;
    let mut duplicates = 0u64;
    let mut event_ids = Vec::new();
    for (ordinal, entry) in raw_events.iter().enumerate() {
        let (event_type, source, content) = match entry {
            Value::String(text) => ("note".to_string(), "unspecified".to_string(), text.clone()),
            Value::Object(map) => {
                let event_type = bounded_string(map.get("type"), "event type", MAX_ITEM_CHARS)?
                    .unwrap_or_else(|| "note".to_string());
                let source = bounded_string(map.get("source"), "event source", MAX_ITEM_CHARS)?
                    .unwrap_or_else(|| "unspecified".to_string());
                let content =
                    bounded_string(map.get("content"), "event content", MAX_CONTENT_CHARS)?
                        .ok_or_else(|| EngramError::contract("event content is required"))?;
                (event_type, source, content)
            }
            _ => {
                return Err(EngramError::contract(
                    "events must be strings or objects",
                ));
            }
        };
        let content = content.trim().to_string();
        if content.is_empty() {
            return Err(EngramError::contract("event content is required"));
        }

        let digest = canonical::digest(&json!({
            "content": &content,
            "ordinal": ordinal as u64,
            "source": &source,
            "type": &event_type,
        }));
        let event_id = canonical::make_id("evt", &digest);
        event_ids.push(event_id.clone());

        if state.events.iter().any(|e| e.digest == digest) {
            duplicates += 1;
            continue;
        }
        state.events.push(EventRecord {
            event_id,
            event_type,
            source,
            content,
            digest,
            ordinal: ordinal as u64,
            ingested_at: timestamp.clone(),
        });
        accepted += 1;
    }

    let ledger_digest = canonical::digest(&json!(state
        .events
        .iter()
        .map(|e| e.digest.clone())
        .collect::<Vec<_>>()));

    Ok(json!({
        "action": if accepted > 0 { "applied" } else { "noop" },
        "accepted": accepted,
        "duplicates": duplicates,
        "eventIds": event_ids,
        "ledgerDigest": ledger_digest,
        "eventCount": state.events.len(),
    }))
}

/// Query events, with an optional misconception-chronology section.
pub fn context(state: &mut ProfileState, _ctx: &OpCtx, request: &Map<String, Value>) -> EngramResult<Value> {
    let query = bounded_string(request.get("query"), "query", MAX_ITEM_CHARS)?;
    let limit = optional_u64(request.get("limit"), DEFAULT_CONTEXT_LIMIT)
        .clamp(1, MAX_LIST_ITEMS as u64) as usize;
    let chronology_limit =
        optional_u64(request.get("misconceptionChronologyLimit"), 0).min(MAX_LIST_ITEMS as u64)
            as usize;

    let needle = query.as_deref().map(str::to_lowercase);
    let mut matched: Vec<&EventRecord> = state
        .events
        .iter()
        .filter(|event| match &needle {
            None => true,
            Some(needle) => {
                event.content.to_lowercase().contains(needle)
                    || event.event_type.to_lowercase().contains(needle)
                    || event.source.to_lowercase().contains(needle)
            }
        })
        .collect();
    let match_count = matched.len();
    matched.reverse();
    matched.truncate(limit);
    let returned = matched.len();

    let mut response = json!({
        "matchedEvents": matched,
        "matchCount": match_count,
        "returned": returned,
    });
    if let Some(q) = &query {
        response["query"] = json!(q);
    }

    if chronology_limit > 0 {
        let mut notes: Vec<_> = state.misconception_chronology.iter().collect();
        notes.sort_by(|a, b| {
            let relevance = |note: &&engram_state::model::MisconceptionNote| match &needle {
                Some(needle) => {
                    note.key.to_lowercase().contains(needle)
                        || note
                            .changed_fields
                            .iter()
                            .any(|f| f.to_lowercase().contains(needle))
                }
                None => false,
            };
            (relevance(b), &b.timestamp, &a.note_id).cmp(&(relevance(a), &a.timestamp, &b.note_id))
        });
        notes.truncate(chronology_limit);
        response["misconceptionChronology"] = json!(notes);
    }
    Ok(response)
}

/// Synthesize deterministic curation candidates from the newest events.
pub fn reflect(state: &mut ProfileState, _ctx: &OpCtx, request: &Map<String, Value>) -> EngramResult<Value> {
    let window = optional_u64(request.get("maxEvents"), DEFAULT_REFLECT_WINDOW).clamp(1, 32) as usize;

    let mut candidates = Vec::new();
    for event in state.events.iter().rev().take(window) {
        let mut statement: String = event.content.trim().chars().take(160).collect();
        if statement.is_empty() {
            continue;
        }
        statement = statement.trim_end().to_string();
        let candidate_id = mint(
            "cand",
            &json!({ "sourceEventId": &event.event_id, "statement": &statement }),
        );
        candidates.push(json!({
            "candidateId": candidate_id,
            "statement": statement,
            "confidence": 0.5,
            "sourceEventId": &event.event_id,
        }));
    }

    Ok(json!({
        "candidates": candidates,
        "examinedEvents": state.events.len().min(window),
    }))
}

/// Check that referenced evidence exists in this profile's ledger.
pub fn validate(state: &mut ProfileState, _ctx: &OpCtx, request: &Map<String, Value>) -> EngramResult<Value> {
    let mut ids = guarded_string_array(request.get("evidenceEventIds"), "evidenceEventIds", None)?;
    if let Some(Value::Array(candidates)) = request.get("candidates") {
        for candidate in candidates {
            if let Some(source) = candidate.get("sourceEventId").and_then(Value::as_str) {
                let trimmed = source.trim();
                if !trimmed.is_empty() {
                    ids.push(trimmed.to_string());
                }
            }
        }
    }
    ids.sort();
    ids.dedup();

    let results: Vec<Value> = ids
        .iter()
        .map(|id| {
            json!({
                "eventId": id,
                "valid": state.event_by_id(id).is_some(),
            })
        })
        .collect();
    let valid_count = results
        .iter()
        .filter(|r| r["valid"] == Value::Bool(true))
        .count();

    Ok(json!({
        "results": results,
        "validCount": valid_count,
        "invalidCount": results.len() - valid_count,
        "allValid": valid_count == results.len(),
    }))
}
