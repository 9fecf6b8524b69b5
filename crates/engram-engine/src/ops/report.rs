//! Appended records and reporting surfaces

use crate::engine::OpCtx;
use crate::support::{mint, record_digest};
use engram_core::constants::MAX_ITEM_CHARS;
use engram_core::{canonical, round6, EngramResult, EPOCH};
use engram_normalize::{bounded_string, iso_timestamp, required_string};
use engram_state::model::{FeedbackRecord, OutcomeRecord, ProfileState, ReviewStatus};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt::Write as _;

fn metadata_of(request: &Map<String, Value>) -> BTreeMap<String, Value> {
    match request.get("metadata") {
        Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        _ => BTreeMap::new(),
    }
}

/// Append a content-addressed feedback record.
pub fn feedback(
    state: &mut ProfileState,
    ctx: &OpCtx,
    request: &Map<String, Value>,
) -> EngramResult<Value> {
    let content = required_string(request.get("content"), "content", MAX_ITEM_CHARS)?;
    let category = bounded_string(request.get("category"), "category", MAX_ITEM_CHARS)?
        .unwrap_or_else(|| "general".to_string());
    let timestamp = iso_timestamp(request.get("timestamp"), "timestamp", EPOCH)?;

    let feedback_id = mint(
        "fb",
        &json!({
            "category": &category,
            "content": &content,
            "profile": &ctx.profile_id,
            "storeId": &ctx.store_id,
        }),
    );
    let replay = state.feedback.iter().any(|f| f.feedback_id == feedback_id);
    if !replay {
        state.feedback.push(FeedbackRecord {
            feedback_id: feedback_id.clone(),
            content,
            category,
            recorded_at: timestamp,
            metadata: metadata_of(request),
        });
    }
    let record = state
        .feedback
        .iter()
        .find(|f| f.feedback_id == feedback_id);

    Ok(json!({
        "action": if replay { "noop" } else { "recorded" },
        "feedbackId": feedback_id,
        "recordDigest": record.map(record_digest),
        "feedbackCount": state.feedback.len(),
    }))
}

/// Append a content-addressed outcome record.
pub fn outcome(
    state: &mut ProfileState,
    ctx: &OpCtx,
    request: &Map<String, Value>,
) -> EngramResult<Value> {
    let task = required_string(request.get("task"), "task", MAX_ITEM_CHARS)?;
    let status = bounded_string(request.get("status"), "status", MAX_ITEM_CHARS)?
        .unwrap_or_else(|| "unknown".to_string());
    let timestamp = iso_timestamp(request.get("timestamp"), "timestamp", EPOCH)?;

    let outcome_id = mint(
        "out",
        &json!({
            "profile": &ctx.profile_id,
            "status": &status,
            "storeId": &ctx.store_id,
            "task": &task,
        }),
    );
    let replay = state.outcomes.iter().any(|o| o.outcome_id == outcome_id);
    if !replay {
        state.outcomes.push(OutcomeRecord {
            outcome_id: outcome_id.clone(),
            task,
            status,
            recorded_at: timestamp,
            metadata: metadata_of(request),
        });
    }
    let record = state.outcomes.iter().find(|o| o.outcome_id == outcome_id);

    Ok(json!({
        "action": if replay { "noop" } else { "recorded" },
        "outcomeId": outcome_id,
        "recordDigest": record.map(record_digest),
        "outcomeCount": state.outcomes.len(),
    }))
}

/// Ledger consistency checks plus duplicate-rule detection.
pub fn audit(
    state: &mut ProfileState,
    _ctx: &OpCtx,
    _request: &Map<String, Value>,
) -> EngramResult<Value> {
    let dangling_rules: Vec<&str> = state
        .rules
        .iter()
        .filter(|rule| {
            rule.source_event_id
                .as_deref()
                .is_some_and(|id| state.event_by_id(id).is_none())
        })
        .map(|rule| rule.rule_id.as_str())
        .collect();

    let mut by_statement: BTreeMap<String, Vec<&str>> = BTreeMap::new();
    for rule in &state.rules {
        by_statement
            .entry(rule.statement.trim().to_lowercase())
            .or_default()
            .push(rule.rule_id.as_str());
    }
    let duplicate_rule_groups: Vec<Vec<&str>> = by_statement
        .into_values()
        .filter(|ids| ids.len() > 1)
        .collect();

    let missing_misconception_evidence: Vec<&str> = state
        .misconceptions
        .values()
        .filter(|m| m.evidence_event_ids.is_empty())
        .map(|m| m.misconception_id.as_str())
        .collect();
    let missing_plan_evidence: Vec<&str> = state
        .plan_items
        .values()
        .filter(|item| item.evidence_event_ids.is_empty())
        .map(|item| item.plan_item_id.as_str())
        .collect();

    let checks = json!([
        {
            "check": "rules_reference_known_events",
            "passed": dangling_rules.is_empty(),
            "failing": dangling_rules,
        },
        {
            "check": "no_duplicate_rule_statements",
            "passed": duplicate_rule_groups.is_empty(),
            "failing": duplicate_rule_groups.iter().flatten().collect::<Vec<_>>(),
        },
        {
            "check": "misconceptions_have_evidence",
            "passed": missing_misconception_evidence.is_empty(),
            "failing": missing_misconception_evidence,
        },
        {
            "check": "plan_items_have_evidence",
            "passed": missing_plan_evidence.is_empty(),
            "failing": missing_plan_evidence,
        },
    ]);
    let all_passed = checks
        .as_array()
        .map(|entries| entries.iter().all(|c| c["passed"] == Value::Bool(true)))
        .unwrap_or(false);

    Ok(json!({
        "checks": checks,
        "duplicateRuleGroups": duplicate_rule_groups,
        "allPassed": all_passed,
        "eventCount": state.events.len(),
        "ruleCount": state.rules.len(),
    }))
}

/// Fixed-template Markdown playbook plus its structured form.
pub fn export(
    state: &mut ProfileState,
    ctx: &OpCtx,
    _request: &Map<String, Value>,
) -> EngramResult<Value> {
    let mut markdown = String::new();
    let _ = writeln!(markdown, "# Personalization Playbook");
    let _ = writeln!(markdown);
    let _ = writeln!(markdown, "Store: {}", ctx.store_id);
    let _ = writeln!(markdown);

    let _ = writeln!(markdown, "## Rules ({})", state.rules.len());
    for rule in &state.rules {
        let _ = writeln!(
            markdown,
            "- {} (confidence {})",
            rule.statement,
            json!(rule.confidence)
        );
    }
    let _ = writeln!(markdown);

    let _ = writeln!(markdown, "## Misconceptions ({})", state.misconceptions.len());
    for misconception in state.misconceptions.values() {
        let _ = writeln!(
            markdown,
            "- {} [{}] harmful={} confidence={}",
            misconception.key,
            misconception.status.as_str(),
            misconception.harmful_signal_count,
            json!(misconception.confidence)
        );
    }
    let _ = writeln!(markdown);

    let _ = writeln!(markdown, "## Review Queue ({})", state.review_entries.len());
    for entry in state.review_entries.values() {
        let _ = writeln!(
            markdown,
            "- {} [{}] due {}",
            entry.item_key,
            entry.status.as_str(),
            entry.due_at
        );
    }

    let playbook = json!({
        "misconceptions": state.misconceptions.values().collect::<Vec<_>>(),
        "planItems": state.plan_items.values().collect::<Vec<_>>(),
        "reviewEntries": state.review_entries.values().collect::<Vec<_>>(),
        "rules": &state.rules,
    });
    let export_digest = canonical::digest(&json!({
        "markdown": &markdown,
        "playbook": &playbook,
    }));

    Ok(json!({
        "markdown": markdown,
        "playbook": playbook,
        "exportDigest": export_digest,
    }))
}

/// Deterministic health counters over current in-memory state.
pub fn doctor(
    state: &mut ProfileState,
    ctx: &OpCtx,
    _request: &Map<String, Value>,
) -> EngramResult<Value> {
    let review_total = state.review_entries.len();
    let active_reviews = state
        .review_entries
        .values()
        .filter(|e| matches!(e.status, ReviewStatus::Scheduled | ReviewStatus::Due))
        .count();
    let active_review_ratio = round6(active_reviews as f64 / review_total.max(1) as f64);

    Ok(json!({
        "healthy": true,
        "counters": {
            "events": state.events.len(),
            "rules": state.rules.len(),
            "feedback": state.feedback.len(),
            "outcomes": state.outcomes.len(),
            "learnerProfiles": state.learner_profiles.len(),
            "identityEdges": state.identity_edges.len(),
            "misconceptions": state.misconceptions.len(),
            "planItems": state.plan_items.len(),
            "reviewEntries": review_total,
            "painSignals": state.pain_signals.len(),
            "failureSignals": state.failure_signals.len(),
            "policyDecisions": state.policy_decisions.len(),
            "policyAuditTrail": state.policy_audit_trail.len(),
            "misconceptionChronology": state.misconception_chronology.len(),
            "curriculumConflicts": state.curriculum_conflicts.len(),
            "degradedSessions": state.degraded_sessions.len(),
            "recommendationSnapshots": state.recommendation_snapshots.len(),
            "archivedRecords": state.review_archive.archived_records.len(),
        },
        "activeReviewRatio": active_review_ratio,
        "consolidationCount": state.clocks.consolidation_count,
        "allowedStoreCount": state.recall_policy.allowed_store_ids.len(),
        "storeCount": ctx.store_count,
        "profileCount": ctx.profile_count,
    }))
}
