//! Degraded tutoring sessions
//!
//! When the LLM or index is unavailable (or degradation is forced) the tutor
//! falls back to evidence-backed suggestions straight from state: due reviews
//! first, then active misconceptions by harmful count, then curriculum items
//! by rank.

use crate::engine::OpCtx;
use crate::support::mint;
use engram_core::{EngramResult, EPOCH};
use engram_normalize::{iso_timestamp, optional_bool, optional_u64};
use engram_state::model::{
    DegradedSession, DegradedSuggestion, MisconceptionStatus, PlanStatus, ProfileState,
    ReviewStatus,
};
use serde_json::{json, Map, Value};

/// Plan a deterministic degraded-tutor session.
pub fn tutor_degraded(
    state: &mut ProfileState,
    ctx: &OpCtx,
    request: &Map<String, Value>,
) -> EngramResult<Value> {
    let llm_available = optional_bool(request.get("llmAvailable"), true);
    let index_available = optional_bool(request.get("indexAvailable"), true);
    let force_degraded = optional_bool(request.get("forceDegraded"), false);
    let max_suggestions = optional_u64(request.get("maxSuggestions"), 5).clamp(1, 32) as usize;
    let timestamp = iso_timestamp(request.get("timestamp"), "timestamp", EPOCH)?;

    let degraded = force_degraded || !llm_available || !index_available;
    let mut warnings = Vec::new();
    if !index_available {
        warnings.push("INDEX_UNAVAILABLE".to_string());
    }
    if !llm_available {
        warnings.push("LLM_UNAVAILABLE".to_string());
    }
    warnings.sort();

    let mut suggestions: Vec<DegradedSuggestion> = Vec::new();

    let mut due_entries: Vec<_> = state
        .review_entries
        .values()
        .filter(|entry| entry.status == ReviewStatus::Due)
        .collect();
    due_entries.sort_by(|a, b| {
        (&a.due_at, &a.schedule_entry_id).cmp(&(&b.due_at, &b.schedule_entry_id))
    });
    for entry in due_entries {
        if suggestions.len() >= max_suggestions {
            break;
        }
        suggestions.push(DegradedSuggestion {
            kind: "review".to_string(),
            target_id: entry.schedule_entry_id.clone(),
            statement: format!("review:{}", entry.item_key),
            evidence_event_ids: entry.source_event_ids.clone(),
        });
    }

    let mut active_misconceptions: Vec<_> = state
        .misconceptions
        .values()
        .filter(|m| m.status == MisconceptionStatus::Active)
        .collect();
    active_misconceptions.sort_by(|a, b| {
        b.harmful_signal_count
            .cmp(&a.harmful_signal_count)
            .then_with(|| a.misconception_id.cmp(&b.misconception_id))
    });
    for misconception in active_misconceptions {
        if suggestions.len() >= max_suggestions {
            break;
        }
        suggestions.push(DegradedSuggestion {
            kind: "misconception".to_string(),
            target_id: misconception.misconception_id.clone(),
            statement: format!("address misconception:{}", misconception.key),
            evidence_event_ids: misconception.evidence_event_ids.clone(),
        });
    }

    let mut plan_items: Vec<_> = state
        .plan_items
        .values()
        .filter(|item| matches!(item.status, PlanStatus::Proposed | PlanStatus::Committed))
        .collect();
    plan_items.sort_by(|a, b| {
        a.recommendation_rank
            .cmp(&b.recommendation_rank)
            .then_with(|| a.plan_item_id.cmp(&b.plan_item_id))
    });
    for item in plan_items {
        if suggestions.len() >= max_suggestions {
            break;
        }
        suggestions.push(DegradedSuggestion {
            kind: "curriculum".to_string(),
            target_id: item.plan_item_id.clone(),
            statement: format!("advance objective:{}", item.objective_id),
            evidence_event_ids: item.evidence_event_ids.clone(),
        });
    }

    let session_id = mint(
        "dts",
        &json!({
            "forceDegraded": force_degraded,
            "indexAvailable": index_available,
            "llmAvailable": llm_available,
            "profile": &ctx.profile_id,
            "storeId": &ctx.store_id,
            "suggestions": &suggestions,
            "timestamp": &timestamp,
        }),
    );
    let replay = state.degraded_sessions.contains_key(&session_id);
    let session = DegradedSession {
        session_id: session_id.clone(),
        llm_available,
        index_available,
        force_degraded,
        warnings: warnings.clone(),
        suggestions: suggestions.clone(),
        generated_at: timestamp,
    };
    state.degraded_sessions.insert(session_id.clone(), session);

    Ok(json!({
        "action": if replay { "noop" } else { "created" },
        "sessionId": session_id,
        "degraded": degraded,
        "warnings": warnings,
        "suggestionCount": suggestions.len(),
        "suggestions": suggestions,
    }))
}
