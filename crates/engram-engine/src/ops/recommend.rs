//! Curriculum recommendation ranking
//!
//! A bounded, explainable ranker: four weighted factors in `[0,1]`, a rank
//! bias, status and freshness penalties, then token-budget admission in score
//! order. Every number that reaches the response is rounded first, so the
//! per-recommendation digests are platform-stable.

use crate::engine::OpCtx;
use crate::support::mint;
use engram_core::constants::CHRONOLOGY_CAP;
use engram_core::{age_days, canonical, round6, EngramResult, EPOCH};
use engram_normalize::{iso_timestamp, optional_bool, optional_u64};
use engram_state::merge;
use engram_state::model::{
    MisconceptionStatus, PlanItem, PlanStatus, ProfileState, RecommendationSnapshot, ReviewStatus,
};
use serde_json::{json, Map, Value};

/// Default ranking weights; mastery gap is one minus the rest.
const DEFAULT_INTEREST_WEIGHT: f64 = 0.35;
const DEFAULT_DUE_WEIGHT: f64 = 0.15;
const DEFAULT_EVIDENCE_WEIGHT: f64 = 0.05;

/// Mastery-gap factor when a plan item links no known misconceptions.
const UNLINKED_MASTERY_GAP: f64 = 0.4;

/// Normalized ranking weights.
#[derive(Debug, Clone, Copy)]
struct Weights {
    interest: f64,
    mastery_gap: f64,
    due: f64,
    evidence: f64,
}

fn parse_weights(value: Option<&Value>) -> Weights {
    let map = value.and_then(Value::as_object);
    let pick = |key: &str, fallback: f64| -> f64 {
        map.and_then(|m| m.get(key))
            .and_then(Value::as_f64)
            .filter(|v| v.is_finite())
            .map(|v| v.max(0.0))
            .unwrap_or(fallback)
    };

    let interest = pick("interest", DEFAULT_INTEREST_WEIGHT);
    let due = pick("due", DEFAULT_DUE_WEIGHT);
    let evidence = pick("evidence", DEFAULT_EVIDENCE_WEIGHT);
    let others = interest + due + evidence;
    let mastery_gap = pick("masteryGap", (1.0 - others).max(0.0));

    let sum = interest + due + evidence + mastery_gap;
    if sum <= 0.0 {
        return Weights {
            interest: DEFAULT_INTEREST_WEIGHT,
            mastery_gap: 1.0 - DEFAULT_INTEREST_WEIGHT - DEFAULT_DUE_WEIGHT - DEFAULT_EVIDENCE_WEIGHT,
            due: DEFAULT_DUE_WEIGHT,
            evidence: DEFAULT_EVIDENCE_WEIGHT,
        };
    }
    Weights {
        interest: round6(interest / sum),
        mastery_gap: round6(mastery_gap / sum),
        due: round6(due / sum),
        evidence: round6(evidence / sum),
    }
}

struct Factors {
    interest_affinity: f64,
    mastery_gap_score: f64,
    due_pressure: f64,
    evidence_depth: f64,
    rank_bias: f64,
}

fn compute_factors(state: &ProfileState, item: &PlanItem) -> Factors {
    let mut profile_tags: Vec<String> = state
        .learner_profiles
        .values()
        .flat_map(|p| p.interest_tags.iter().cloned())
        .collect();
    profile_tags.sort();
    profile_tags.dedup();
    let overlap = item
        .interest_tags
        .iter()
        .filter(|tag| profile_tags.binary_search(*tag).is_ok())
        .count();
    let interest_affinity = merge::clamp_unit(overlap as f64 / profile_tags.len().max(1) as f64);

    let linked: Vec<_> = item
        .misconception_ids
        .iter()
        .filter_map(|id| state.misconceptions.get(id))
        .collect();
    let mastery_gap_score = if linked.is_empty() {
        UNLINKED_MASTERY_GAP
    } else {
        let total: f64 = linked
            .iter()
            .map(|m| {
                let status_factor = if m.status == MisconceptionStatus::Resolved {
                    0.45
                } else {
                    1.0
                };
                let harmful = m.harmful_signal_count.min(5) as f64;
                status_factor * (0.35 + m.confidence) * (1.0 + harmful * 0.12)
            })
            .sum();
        merge::clamp_unit(total / linked.len() as f64)
    };

    let due_sum: f64 = state
        .review_entries
        .values()
        .filter(|entry| {
            entry.item_key == item.objective_id
                || item.misconception_ids.binary_search(&entry.item_key).is_ok()
        })
        .map(|entry| match entry.status {
            ReviewStatus::Due => 12.0,
            ReviewStatus::Scheduled => 4.0,
            _ => 0.0,
        })
        .sum();
    let due_pressure = merge::clamp_unit(due_sum / 24.0);

    let evidence_depth = merge::clamp_unit(item.evidence_event_ids.len() as f64 / 10.0);
    let rank_bias = round6((1.0 - (item.recommendation_rank.saturating_sub(1)) as f64 / 64.0).max(0.0));

    Factors {
        interest_affinity,
        mastery_gap_score,
        due_pressure,
        evidence_depth,
        rank_bias,
    }
}

/// Rank plan items into a bounded, token-budgeted recommendation set.
pub fn curriculum_recommendation(
    state: &mut ProfileState,
    ctx: &OpCtx,
    request: &Map<String, Value>,
) -> EngramResult<Value> {
    let reference_at = iso_timestamp(request.get("referenceAt"), "referenceAt", EPOCH)?;
    let max_recommendations = optional_u64(request.get("maxRecommendations"), 5).clamp(1, 64);
    let token_budget = optional_u64(request.get("tokenBudget"), 1024).clamp(32, 8192);
    let freshness_warning_days =
        optional_u64(request.get("freshnessWarningDays"), 14).clamp(1, 365);
    let decay_warning_days =
        optional_u64(request.get("decayWarningDays"), 30).clamp(freshness_warning_days, 730);
    let include_blocked = optional_bool(request.get("includeBlocked"), false);
    let include_completed = optional_bool(request.get("includeCompleted"), false);
    let max_conflict_notes = optional_u64(request.get("maxConflictNotes"), 5).min(64) as usize;
    let weights = parse_weights(request.get("rankingWeights"));

    let mut scored: Vec<(String, f64, &PlanItem, Factors, i64, Vec<String>)> = Vec::new();
    for item in state.plan_items.values() {
        if item.evidence_event_ids.is_empty() {
            continue;
        }
        let allowed = match item.status {
            PlanStatus::Proposed | PlanStatus::Committed => true,
            PlanStatus::Blocked => include_blocked,
            PlanStatus::Completed => include_completed,
        };
        if !allowed {
            continue;
        }

        let factors = compute_factors(state, item);
        let status_penalty = match item.status {
            PlanStatus::Blocked => -40.0,
            PlanStatus::Completed => -80.0,
            _ => 0.0,
        };

        let mut basis = item.created_at.clone();
        if item.updated_at > basis {
            basis = item.updated_at.clone();
        }
        if let Some(due_at) = &item.due_at {
            if *due_at > basis {
                basis = due_at.clone();
            }
        }
        let age = age_days(&basis, &reference_at);
        let (decay_penalty, warning_codes) = if age >= decay_warning_days as i64 {
            (24.0, vec!["decayed".to_string()])
        } else if age >= freshness_warning_days as i64 {
            (12.0, vec!["stale".to_string()])
        } else {
            (0.0, Vec::new())
        };

        let weighted = weights.interest * factors.interest_affinity
            + weights.mastery_gap * factors.mastery_gap_score
            + weights.due * factors.due_pressure
            + weights.evidence * factors.evidence_depth;
        let score = round6(100.0 * weighted + 5.0 * factors.rank_bias + status_penalty - decay_penalty);

        let recommendation_id = mint(
            "rec",
            &json!({
                "planItemId": &item.plan_item_id,
                "profile": &ctx.profile_id,
                "storeId": &ctx.store_id,
            }),
        );
        scored.push((recommendation_id, score, item, factors, age, warning_codes));
    }

    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    let candidate_count = scored.len();

    let mut recommendations = Vec::new();
    let mut digests = Vec::new();
    let mut tokens_used = 0u64;
    let mut skipped_by_token_budget = 0u64;
    for (recommendation_id, score, item, factors, age, warning_codes) in scored {
        if recommendations.len() as u64 >= max_recommendations {
            break;
        }

        let mut provenance_pointers: Vec<Value> = item
            .evidence_event_ids
            .iter()
            .map(|id| json!({ "kind": "event", "pointerId": id, "source": "curriculum_plan" }))
            .collect();
        provenance_pointers.extend(item.provenance_signals.iter().map(|signal| {
            json!({ "kind": "signal", "pointerId": signal, "source": "curriculum_plan" })
        }));

        let metadata_canonical = canonical::stringify(&json!(&item.metadata));
        let token_estimate = (item.objective.chars().count() as u64).div_ceil(4)
            + (metadata_canonical.chars().count() as u64).div_ceil(20)
            + 8 * provenance_pointers.len() as u64
            + 12;
        let token_estimate = token_estimate.max(24);
        if tokens_used + token_estimate > token_budget {
            skipped_by_token_budget += 1;
            continue;
        }
        tokens_used += token_estimate;

        let conflict_chronology: Vec<&engram_state::model::ConflictNote> = {
            let mut notes: Vec<_> = state
                .curriculum_conflicts
                .iter()
                .filter(|note| {
                    note.profile_id == ctx.profile_id && note.plan_item_id == item.plan_item_id
                })
                .collect();
            notes.sort_by(|a, b| (&b.timestamp, &a.note_id).cmp(&(&a.timestamp, &b.note_id)));
            notes.truncate(max_conflict_notes);
            notes
        };

        let explanation = vec![
            format!("interestAffinity:{}", json!(factors.interest_affinity)),
            format!("masteryGapScore:{}", json!(factors.mastery_gap_score)),
            format!("duePressure:{}", json!(factors.due_pressure)),
            format!("evidenceDepth:{}", json!(factors.evidence_depth)),
            format!("rankBias:{}", json!(factors.rank_bias)),
        ];
        let weights_value = json!({
            "due": weights.due,
            "evidence": weights.evidence,
            "interest": weights.interest,
            "masteryGap": weights.mastery_gap,
        });

        let mut recommendation = json!({
            "recommendationId": recommendation_id,
            "planItemId": &item.plan_item_id,
            "objectiveId": &item.objective_id,
            "objective": &item.objective,
            "status": item.status.as_str(),
            "score": score,
            "factors": {
                "interestAffinity": factors.interest_affinity,
                "masteryGapScore": factors.mastery_gap_score,
                "duePressure": factors.due_pressure,
                "evidenceDepth": factors.evidence_depth,
                "rankBias": factors.rank_bias,
            },
            "provenancePointers": provenance_pointers,
            "freshness": {
                "ageDays": age,
                "warningCodes": warning_codes,
            },
            "conflictChronology": conflict_chronology,
            "rationale": {
                "explanation": explanation,
                "weights": weights_value,
            },
            "tokenEstimate": token_estimate,
        });
        let digest = canonical::digest(&recommendation);
        if let Some(map) = recommendation.as_object_mut() {
            map.insert("digest".to_string(), json!(digest));
        }
        digests.push(digest);
        recommendations.push(recommendation);
    }

    let recommendation_set_id = mint(
        "recset",
        &json!({
            "maxRecommendations": max_recommendations,
            "profile": &ctx.profile_id,
            "recommendationDigests": &digests,
            "referenceAt": &reference_at,
            "storeId": &ctx.store_id,
        }),
    );
    let snapshot = RecommendationSnapshot {
        recommendation_set_id: recommendation_set_id.clone(),
        reference_at: reference_at.clone(),
        max_recommendations,
        recommendation_digests: digests,
        generated_at: reference_at.clone(),
    };
    state
        .recommendation_snapshots
        .retain(|s| s.recommendation_set_id != recommendation_set_id);
    state.recommendation_snapshots.push(snapshot);
    merge::trim_ring(&mut state.recommendation_snapshots, CHRONOLOGY_CAP, |s| {
        (s.generated_at.clone(), s.recommendation_set_id.clone())
    });

    let admitted = recommendations.len() as u64;
    Ok(json!({
        "recommendations": recommendations,
        "recommendationSetId": recommendation_set_id,
        "referenceAt": reference_at,
        "weights": {
            "due": weights.due,
            "evidence": weights.evidence,
            "interest": weights.interest,
            "masteryGap": weights.mastery_gap,
        },
        "observability": {
            "candidateCount": candidate_count,
            "admittedCount": admitted,
            "skippedByTokenBudget": skipped_by_token_budget,
            "boundedByTokenBudget": skipped_by_token_budget > 0,
            "tokenBudget": token_budget,
            "tokensUsed": tokens_used,
        },
    }))
}
