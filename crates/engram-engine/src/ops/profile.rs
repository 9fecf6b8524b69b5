//! Learner profile and identity graph updates

use crate::engine::OpCtx;
use crate::support::{mint, record_digest, record_value};
use engram_core::constants::{
    MAX_DISPLAY_NAME_CHARS, MAX_EMAIL_CHARS, MAX_IDENTITY_REFS, MAX_ITEM_CHARS,
};
use engram_core::{canonical, EngramError, EngramResult, EPOCH};
use engram_normalize::{
    agent_signals, bounded_string, clamp_unit, evidence_pointers, guarded_string_array,
    iso_timestamp, policy_exception, required_string,
};
use engram_state::merge;
use engram_state::model::{
    AttributeRevision, EvidenceKind, EvidencePointer, IdentityEdge, IdentityEndpoint, IdentityRef,
    IdentityRelation, LearnerProfile, ProfileStatus, ProfileState,
};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Upsert a learner profile with per-attribute lineage.
pub fn learner_profile_update(
    state: &mut ProfileState,
    ctx: &OpCtx,
    request: &Map<String, Value>,
) -> EngramResult<Value> {
    let learner_id = required_string(request.get("learnerId"), "learnerId", MAX_ITEM_CHARS)?;
    let timestamp = iso_timestamp(request.get("timestamp"), "timestamp", EPOCH)?;

    let mut evidence = evidence_pointers(request.get("evidencePointers"))?;
    let bare_ids = guarded_string_array(request.get("evidenceEventIds"), "evidenceEventIds", None)?;
    let bare_pointers: Vec<EvidencePointer> = bare_ids
        .into_iter()
        .map(|id| EvidencePointer {
            pointer_id: id,
            kind: EvidenceKind::Event,
            source: "unspecified".to_string(),
            confidence: 0.5,
            observed_at: None,
            metadata: BTreeMap::new(),
        })
        .collect();
    evidence = merge::merge_evidence_pointers(&evidence, &bare_pointers);

    let exception = policy_exception(request.get("policyException"))?;
    if evidence.is_empty() && exception.is_none() {
        return Err(EngramError::evidence(
            "learner_profile_update requires at least one evidence pointer or a policy exception",
        ));
    }

    let profile_id = mint(
        "lp",
        &json!({
            "canonicalIdentity": format!("learner:{}", learner_id.to_lowercase()),
            "learnerId": &learner_id,
            "profile": &ctx.profile_id,
            "storeId": &ctx.store_id,
        }),
    );

    let existing = state.learner_profiles.get(&profile_id).cloned();
    let is_new = existing.is_none();
    let mut record = existing.clone().unwrap_or_else(|| LearnerProfile {
        profile_id: profile_id.clone(),
        learner_id: learner_id.clone(),
        status: ProfileStatus::Active,
        version: 1,
        confidence: 0.5,
        identity_refs: Vec::new(),
        goals: Vec::new(),
        interest_tags: Vec::new(),
        misconception_ids: Vec::new(),
        evidence_pointers: Vec::new(),
        policy_exception: None,
        source_signals: Vec::new(),
        provided_attributes: BTreeMap::new(),
        attribute_lineage: BTreeMap::new(),
        created_at: timestamp.clone(),
        updated_at: timestamp.clone(),
    });

    if let Some(status) = request.get("status").and_then(Value::as_str) {
        record.status = ProfileStatus::parse(status);
    }
    if request.contains_key("confidence") {
        record.confidence = clamp_unit(request.get("confidence"), record.confidence);
    }

    merge_identity_refs(&mut record, request, &learner_id)?;
    record.goals = merge::union_sorted(
        &record.goals,
        &guarded_string_array(request.get("goals"), "goals", None)?,
    );
    record.interest_tags = merge::union_sorted(
        &record.interest_tags,
        &guarded_string_array(request.get("interestTags"), "interestTags", None)?,
    );
    record.misconception_ids = merge::union_sorted(
        &record.misconception_ids,
        &guarded_string_array(request.get("misconceptionIds"), "misconceptionIds", None)?,
    );
    record.evidence_pointers = merge::merge_evidence_pointers(&record.evidence_pointers, &evidence);
    if exception.is_some() {
        record.policy_exception = exception;
    }
    record.source_signals = merge::merge_agent_signals(
        &record.source_signals,
        &agent_signals(&Value::Object(request.clone()))?,
    );

    if let Some(Value::Object(attributes)) = request.get("attributes") {
        for (attribute, value) in attributes {
            let value_digest = canonical::digest(value);
            let revision_id = mint(
                "rev",
                &json!({
                    "attribute": attribute,
                    "profileId": &profile_id,
                    "timestamp": &timestamp,
                    "valueDigest": &value_digest,
                }),
            );
            let lineage = record
                .attribute_lineage
                .entry(attribute.clone())
                .or_default();
            if !lineage.iter().any(|rev| rev.revision_id == revision_id) {
                lineage.push(AttributeRevision {
                    revision_id,
                    attribute: attribute.clone(),
                    timestamp: timestamp.clone(),
                    value_digest,
                    value: value.clone(),
                });
                lineage.sort_by(|a, b| {
                    (&a.timestamp, &a.value_digest, &a.revision_id).cmp(&(
                        &b.timestamp,
                        &b.value_digest,
                        &b.revision_id,
                    ))
                });
            }
        }
    }
    record.provided_attributes = record
        .attribute_lineage
        .iter()
        .filter_map(|(attribute, revisions)| {
            merge::resolve_current_revision(revisions)
                .map(|rev| (attribute.clone(), rev.value.clone()))
        })
        .collect();

    let changed = structural_view(&record) != existing.as_ref().map(structural_view).unwrap_or_default();
    let action = if is_new {
        "created"
    } else if changed {
        record.version += 1;
        "updated"
    } else {
        "noop"
    };
    if changed && !is_new {
        record.updated_at = timestamp.clone();
    }

    let response = json!({
        "action": action,
        "profileId": &profile_id,
        "learnerId": &learner_id,
        "version": record.version,
        "record": &record,
        "recordDigest": record_digest(&record),
    });
    state.learner_profiles.insert(profile_id, record);
    Ok(response)
}

/// Canonical view of a profile minus version bookkeeping, for change checks.
fn structural_view(record: &LearnerProfile) -> Value {
    let mut value = record_value(record);
    if let Some(map) = value.as_object_mut() {
        map.remove("version");
        map.remove("updatedAt");
    }
    value
}

fn merge_identity_refs(
    record: &mut LearnerProfile,
    request: &Map<String, Value>,
    learner_id: &str,
) -> EngramResult<()> {
    let mut incoming: Vec<IdentityRef> = Vec::new();

    if let Some(display_name) =
        bounded_string(request.get("displayName"), "displayName", MAX_DISPLAY_NAME_CHARS)?
    {
        incoming.push(IdentityRef {
            value: display_name,
            namespace: "display_name".to_string(),
            primary: false,
        });
    }
    if let Some(email) = bounded_string(request.get("email"), "email", MAX_EMAIL_CHARS)? {
        incoming.push(IdentityRef {
            value: email,
            namespace: "email".to_string(),
            primary: false,
        });
    }

    if let Some(Value::Array(refs)) = request.get("identityRefs") {
        for entry in refs {
            let map = entry
                .as_object()
                .ok_or_else(|| EngramError::contract("identityRefs must be objects"))?;
            let namespace = bounded_string(map.get("namespace"), "identity namespace", MAX_ITEM_CHARS)?
                .unwrap_or_else(|| "unspecified".to_string());
            let max_value = if namespace == "email" {
                MAX_EMAIL_CHARS
            } else {
                MAX_ITEM_CHARS
            };
            let value = required_string(map.get("value"), "identity value", max_value)?;
            incoming.push(IdentityRef {
                value,
                namespace,
                primary: map.get("primary").and_then(Value::as_bool).unwrap_or(false),
            });
        }
    }

    let mut merged = record.identity_refs.clone();
    for incoming_ref in incoming {
        match merged
            .iter_mut()
            .find(|r| r.namespace == incoming_ref.namespace && r.value == incoming_ref.value)
        {
            Some(existing) => {
                if incoming_ref.primary {
                    existing.primary = true;
                }
            }
            None => merged.push(incoming_ref),
        }
    }
    if merged.is_empty() {
        merged.push(IdentityRef {
            value: learner_id.to_string(),
            namespace: "learner".to_string(),
            primary: true,
        });
    }
    merged.sort_by(|a, b| (&a.namespace, &a.value).cmp(&(&b.namespace, &b.value)));
    merged.truncate(MAX_IDENTITY_REFS);

    // Exactly one primary: the first flagged ref wins, the rest demote.
    let first_primary = merged.iter().position(|r| r.primary).unwrap_or(0);
    for (index, entry) in merged.iter_mut().enumerate() {
        entry.primary = index == first_primary;
    }

    record.identity_refs = merged;
    Ok(())
}

/// Upsert identity edges; endpoints are immutable per edge id.
pub fn identity_graph_update(
    state: &mut ProfileState,
    ctx: &OpCtx,
    request: &Map<String, Value>,
) -> EngramResult<Value> {
    let timestamp = iso_timestamp(request.get("timestamp"), "timestamp", EPOCH)?;

    let edges: Vec<Value> = match request.get("edges") {
        Some(Value::Array(entries)) => entries.clone(),
        Some(other) => vec![other.clone()],
        None if request.contains_key("fromRef") => vec![Value::Object(request.clone())],
        None => Vec::new(),
    };
    if edges.is_empty() {
        return Err(EngramError::contract(
            "identity_graph_update requires at least one edge",
        ));
    }

    let mut results = Vec::new();
    let mut created = 0u64;
    let mut updated = 0u64;
    for edge in &edges {
        let map = edge
            .as_object()
            .ok_or_else(|| EngramError::contract("edges must be objects"))?;
        let (edge_id, action) = apply_edge(state, ctx, map, &timestamp)?;
        match action {
            "created" => created += 1,
            "updated" => updated += 1,
            _ => {}
        }
        results.push(json!({ "edgeId": edge_id, "action": action }));
    }

    Ok(json!({
        "action": if created + updated > 0 { "applied" } else { "noop" },
        "results": results,
        "created": created,
        "updated": updated,
        "edgeCount": state.identity_edges.len(),
    }))
}

fn parse_endpoint(value: Option<&Value>, field: &str) -> EngramResult<IdentityEndpoint> {
    let endpoint = match value {
        Some(Value::String(raw)) => {
            let trimmed = raw.trim();
            let (namespace, value) = trimmed
                .split_once(':')
                .ok_or_else(|| EngramError::contract(format!("{field} must be namespace:value")))?;
            IdentityEndpoint {
                namespace: namespace.trim().to_string(),
                value: value.trim().to_string(),
            }
        }
        Some(Value::Object(map)) => IdentityEndpoint {
            namespace: required_string(map.get("namespace"), "endpoint namespace", MAX_ITEM_CHARS)?,
            value: required_string(map.get("value"), "endpoint value", MAX_ITEM_CHARS)?,
        },
        _ => return Err(EngramError::contract(format!("{field} is required"))),
    };
    if endpoint.namespace.is_empty() || endpoint.value.is_empty() {
        return Err(EngramError::contract(format!("{field} is incomplete")));
    }
    if endpoint.namespace == "unknown" || endpoint.value == "unknown" {
        return Err(EngramError::contract(format!(
            "{field} endpoints may not be unknown"
        )));
    }
    Ok(endpoint)
}

fn apply_edge(
    state: &mut ProfileState,
    ctx: &OpCtx,
    map: &Map<String, Value>,
    timestamp: &str,
) -> EngramResult<(String, &'static str)> {
    let from_ref = parse_endpoint(map.get("fromRef"), "fromRef")?;
    let to_ref = parse_endpoint(map.get("toRef"), "toRef")?;
    if from_ref == to_ref {
        return Err(EngramError::contract("edge endpoints must be distinct"));
    }
    let relation = map
        .get("relation")
        .and_then(Value::as_str)
        .map(IdentityRelation::parse)
        .unwrap_or(IdentityRelation::AliasOf);
    let evidence_event_ids = guarded_string_array(
        map.get("evidenceEventIds"),
        "evidenceEventIds",
        Some("identity_graph_update requires at least one evidence event id"),
    )?;
    let confidence = clamp_unit(map.get("confidence"), 0.5);

    let edge_id = mint(
        "edge",
        &json!({
            "from": { "namespace": &from_ref.namespace, "value": &from_ref.value },
            "profile": &ctx.profile_id,
            "relation": relation.as_str(),
            "storeId": &ctx.store_id,
            "to": { "namespace": &to_ref.namespace, "value": &to_ref.value },
        }),
    );

    match state.identity_edges.iter_mut().find(|e| e.edge_id == edge_id) {
        Some(existing) => {
            let before = record_digest(existing);
            existing.evidence_event_ids =
                merge::union_sorted(&existing.evidence_event_ids, &evidence_event_ids);
            existing.confidence = merge::clamp_unit(existing.confidence.max(confidence));
            if record_digest(existing) == before {
                Ok((edge_id, "noop"))
            } else {
                existing.updated_at = timestamp.to_string();
                Ok((edge_id, "updated"))
            }
        }
        None => {
            state.identity_edges.push(IdentityEdge {
                edge_id: edge_id.clone(),
                relation,
                from_ref,
                to_ref,
                evidence_event_ids,
                confidence,
                created_at: timestamp.to_string(),
                updated_at: timestamp.to_string(),
            });
            state.identity_edges.sort_by(|a, b| a.edge_id.cmp(&b.edge_id));
            Ok((edge_id, "created"))
        }
    }
}
