//! Rule curation, plain and guarded

use crate::audit::record_audit;
use crate::engine::OpCtx;
use crate::support::{mint, record_digest};
use engram_core::constants::MAX_ITEM_CHARS;
use engram_core::{EngramError, EngramResult, EPOCH};
use engram_guards::scan_injection;
use engram_normalize::{bounded_string, clamp_unit, iso_timestamp, optional_bool};
use engram_state::model::{ProfileState, RuleRecord};
use serde_json::{json, Map, Value};

/// One parsed curation candidate.
struct Candidate {
    candidate_id: Option<String>,
    statement: String,
    confidence: f64,
    source_event_id: Option<String>,
    external_valid: bool,
    external_evidence: Option<String>,
}

fn parse_candidates(request: &Map<String, Value>) -> EngramResult<Vec<Candidate>> {
    let entries = match request.get("candidates") {
        Some(Value::Array(entries)) => entries.clone(),
        Some(other) => vec![other.clone()],
        None => Vec::new(),
    };

    let request_validation = request.get("externalValidation");
    let mut candidates = Vec::new();
    for entry in &entries {
        let map = entry
            .as_object()
            .ok_or_else(|| EngramError::contract("candidates must be objects"))?;
        let validation = map.get("externalValidation").or(request_validation);
        let (external_valid, external_evidence) = match validation {
            Some(Value::Object(v)) => (
                optional_bool(v.get("valid"), false),
                bounded_string(v.get("evidenceEventId"), "evidenceEventId", MAX_ITEM_CHARS)?,
            ),
            _ => (false, None),
        };
        candidates.push(Candidate {
            candidate_id: bounded_string(map.get("candidateId"), "candidateId", MAX_ITEM_CHARS)?,
            statement: map
                .get("statement")
                .and_then(Value::as_str)
                .unwrap_or("")
                .trim()
                .to_string(),
            confidence: clamp_unit(map.get("confidence"), 0.5),
            source_event_id: bounded_string(map.get("sourceEventId"), "sourceEventId", MAX_ITEM_CHARS)?,
            external_valid,
            external_evidence,
        });
    }
    Ok(candidates)
}

/// Upsert one safe candidate into the rule set.
fn apply_candidate(
    state: &mut ProfileState,
    ctx: &OpCtx,
    candidate: &Candidate,
    timestamp: &str,
) -> (String, &'static str) {
    let rule_id = candidate.candidate_id.clone().unwrap_or_else(|| {
        mint(
            "rule",
            &json!({
                "profile": &ctx.profile_id,
                "statement": &candidate.statement,
                "storeId": &ctx.store_id,
            }),
        )
    });

    match state.rules.iter_mut().find(|r| r.rule_id == rule_id) {
        Some(existing) => {
            let before = record_digest(existing);
            existing.statement = candidate.statement.clone();
            existing.confidence = existing.confidence.max(candidate.confidence);
            if candidate.source_event_id.is_some() {
                existing.source_event_id = candidate.source_event_id.clone();
            }
            let after_probe = record_digest(existing);
            if after_probe == before {
                (rule_id, "noop")
            } else {
                existing.updated_at = timestamp.to_string();
                (rule_id, "updated")
            }
        }
        None => {
            state.rules.push(RuleRecord {
                rule_id: rule_id.clone(),
                statement: candidate.statement.clone(),
                confidence: candidate.confidence,
                source_event_id: candidate.source_event_id.clone(),
                created_at: timestamp.to_string(),
                updated_at: timestamp.to_string(),
            });
            (rule_id, "created")
        }
    }
}

/// Upsert curated rules.
pub fn curate(state: &mut ProfileState, ctx: &OpCtx, request: &Map<String, Value>) -> EngramResult<Value> {
    let timestamp = iso_timestamp(request.get("timestamp"), "timestamp", EPOCH)?;
    let candidates = parse_candidates(request)?;

    let mut results = Vec::new();
    let mut created = 0u64;
    let mut updated = 0u64;
    for candidate in &candidates {
        if candidate.statement.is_empty() {
            return Err(EngramError::contract("candidate statement is required"));
        }
        let (rule_id, action) = apply_candidate(state, ctx, candidate, &timestamp);
        match action {
            "created" => created += 1,
            "updated" => updated += 1,
            _ => {}
        }
        results.push(json!({ "ruleId": rule_id, "action": action }));
    }

    Ok(json!({
        "action": if created + updated > 0 { "applied" } else { "noop" },
        "results": results,
        "created": created,
        "updated": updated,
        "ruleCount": state.rules.len(),
    }))
}

/// Guarded curation: injection screen, then evidence screen, then curate.
pub fn curate_guarded(
    state: &mut ProfileState,
    ctx: &OpCtx,
    request: &Map<String, Value>,
) -> EngramResult<Value> {
    let timestamp = iso_timestamp(request.get("timestamp"), "timestamp", EPOCH)?;
    let candidates = parse_candidates(request)?;

    let mut accepted = Vec::new();
    let mut quarantined = Vec::new();
    let mut rejected = Vec::new();
    let mut applied = 0u64;
    for candidate in &candidates {
        let reference_id = candidate.candidate_id.clone().unwrap_or_else(|| {
            mint("cand", &json!({ "statement": &candidate.statement }))
        });

        let scan = scan_injection(&candidate.statement);
        if scan.flagged {
            record_audit(
                state,
                ctx.operation.as_str(),
                &reference_id,
                "quarantine",
                scan.reason_codes.clone(),
                json!({ "statement": candidate.statement }),
                &timestamp,
            );
            quarantined.push(json!({
                "candidateId": reference_id,
                "statement": &candidate.statement,
                "reasonCodes": scan.reason_codes,
            }));
            continue;
        }

        if candidate.statement.is_empty() {
            record_audit(
                state,
                ctx.operation.as_str(),
                &reference_id,
                "reject",
                vec!["empty_statement".to_string()],
                json!({}),
                &timestamp,
            );
            rejected.push(json!({
                "candidateId": reference_id,
                "statement": &candidate.statement,
                "reasonCodes": ["empty_statement"],
            }));
            continue;
        }

        let evidence_ok = candidate
            .source_event_id
            .as_deref()
            .is_some_and(|id| state.event_by_id(id).is_some())
            || (candidate.external_valid && candidate.external_evidence.is_some());
        if !evidence_ok {
            record_audit(
                state,
                ctx.operation.as_str(),
                &reference_id,
                "reject",
                vec!["missing_evidence".to_string()],
                json!({ "statement": candidate.statement }),
                &timestamp,
            );
            rejected.push(json!({
                "candidateId": reference_id,
                "statement": &candidate.statement,
                "reasonCodes": ["missing_evidence"],
            }));
            continue;
        }

        let (rule_id, action) = apply_candidate(state, ctx, candidate, &timestamp);
        if action != "noop" {
            applied += 1;
        }
        accepted.push(json!({ "ruleId": rule_id, "action": action }));
    }

    Ok(json!({
        "action": if applied > 0 { "applied" } else { "noop" },
        "accepted": accepted,
        "quarantined": quarantined,
        "rejected": rejected,
        "ruleCount": state.rules.len(),
    }))
}
