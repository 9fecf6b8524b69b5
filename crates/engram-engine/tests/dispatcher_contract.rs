//! Dispatcher envelope contract: base fields, aliases, errors, snapshots.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use engram_engine::{Engine, EngineConfig};
use serde_json::{json, Value};

const TS: &str = "2024-07-01T00:00:00.000Z";

fn execute(engine: &mut Engine, operation: &str, request: Value) -> Value {
    engine
        .execute(operation, &request)
        .unwrap_or_else(|err| panic!("{operation} failed: {err}"))
}

#[test]
fn every_result_carries_the_base_fields() {
    let mut engine = Engine::new();
    let result = execute(&mut engine, "doctor", json!({ "storeId": "space-a" }));
    assert_eq!(result["operation"], "doctor");
    assert_eq!(result["storeId"], "space-a");
    assert_eq!(result["profile"], "__store_default__");
    assert_eq!(result["deterministic"], true);
    assert_eq!(result["requestDigest"].as_str().unwrap().len(), 64);
}

#[test]
fn operation_names_are_trimmed_and_lowercased() {
    let mut engine = Engine::new();
    let result = execute(&mut engine, "  DOCTOR  ", json!({}));
    assert_eq!(result["operation"], "doctor");
}

#[test]
fn aliases_fold_to_the_canonical_operation_name() {
    let mut engine = Engine::new();
    let result = execute(
        &mut engine,
        "degraded_tutor",
        json!({ "timestamp": TS }),
    );
    assert_eq!(result["operation"], "tutor_degraded");

    let result = execute(&mut engine, "curriculum_recommend", json!({}));
    assert_eq!(result["operation"], "curriculum_recommendation");
}

#[test]
fn unknown_operations_and_bad_envelopes_error() {
    let mut engine = Engine::new();
    let err = engine.execute("transmogrify", &json!({})).unwrap_err();
    assert_eq!(err.code(), "UNSUPPORTED_OPERATION");

    let err = engine.execute("doctor", &json!([1, 2, 3])).unwrap_err();
    assert_eq!(err.code(), "VALIDATION_CONTRACT_VIOLATION");

    let err = engine.execute("doctor", &Value::Null).unwrap_err();
    assert_eq!(err.code(), "VALIDATION_CONTRACT_VIOLATION");
}

#[test]
fn store_defaults_and_store_alias_resolve() {
    let mut engine = Engine::new();
    let defaulted = execute(&mut engine, "doctor", json!({}));
    assert_eq!(defaulted["storeId"], "coding-agent");

    let aliased = execute(&mut engine, "doctor", json!({ "store": "space-z" }));
    assert_eq!(aliased["storeId"], "space-z");
}

#[test]
fn engine_config_seeds_fresh_profiles() {
    let mut engine = Engine::with_config(EngineConfig {
        default_store_id: "tutor-lab".to_string(),
        fatigue_threshold: 4.0,
        novelty_write_threshold: 6.0,
        active_review_limit: 16,
    });

    let result = execute(&mut engine, "review_schedule_clock", json!({ "timestamp": TS }));
    assert_eq!(result["storeId"], "tutor-lab");
    assert_eq!(result["clocks"]["fatigueThreshold"], 4.0);
    assert_eq!(result["clocks"]["noveltyWriteThreshold"], 6.0);

    let state = engine
        .registry()
        .profile("tutor-lab", "__store_default__")
        .unwrap();
    assert_eq!(state.review_archive.active_limit, 16);
}

#[test]
fn request_digest_depends_only_on_operation_store_and_input() {
    let mut engine = Engine::new();
    let a = execute(&mut engine, "doctor", json!({ "storeId": "space-a" }));
    let b = execute(&mut engine, "doctor", json!({ "storeId": "space-a" }));
    let c = execute(&mut engine, "doctor", json!({ "storeId": "space-b" }));
    assert_eq!(a["requestDigest"], b["requestDigest"]);
    assert_ne!(a["requestDigest"], c["requestDigest"]);
}

#[test]
fn snapshots_round_trip_through_export_and_import() {
    let mut engine = Engine::new();
    execute(
        &mut engine,
        "ingest",
        json!({ "storeId": "space-a", "timestamp": TS, "events": ["kept"] }),
    );
    let snapshot = engine.export_snapshot().unwrap();

    let mut restored = Engine::new();
    restored.import_snapshot(&snapshot).unwrap();
    assert_eq!(
        restored.export_snapshot().unwrap(),
        engine.export_snapshot().unwrap()
    );

    restored.reset();
    let empty = restored.export_snapshot().unwrap();
    assert_eq!(empty["stores"], json!({}));
}

#[test]
fn learner_profile_versions_bump_only_on_structural_change() {
    let mut engine = Engine::new();
    let request = json!({
        "timestamp": TS,
        "learnerId": "lea",
        "goals": ["ship the parser"],
        "evidencePointers": ["ev1"],
    });

    let created = execute(&mut engine, "learner_profile_update", request.clone());
    assert_eq!(created["action"], "created");
    assert_eq!(created["version"], 1);

    let replayed = execute(&mut engine, "learner_profile_update", request);
    assert_eq!(replayed["action"], "noop");
    assert_eq!(replayed["version"], 1);

    let grown = execute(
        &mut engine,
        "learner_profile_update",
        json!({
            "timestamp": TS,
            "learnerId": "lea",
            "goals": ["ship the parser", "learn lifetimes"],
            "evidencePointers": ["ev1"],
        }),
    );
    assert_eq!(grown["action"], "updated");
    assert_eq!(grown["version"], 2);
}

#[test]
fn learner_profile_requires_evidence_or_exception() {
    let mut engine = Engine::new();
    let err = engine
        .execute(
            "learner_profile_update",
            &json!({ "timestamp": TS, "learnerId": "lea" }),
        )
        .unwrap_err();
    assert_eq!(err.code(), "EVIDENCE_POINTER_CONTRACT_VIOLATION");

    let excepted = execute(
        &mut engine,
        "learner_profile_update",
        json!({
            "timestamp": TS,
            "learnerId": "lea",
            "policyException": { "code": "pilot", "approvedBy": "governance" },
        }),
    );
    assert_eq!(excepted["action"], "created");
    assert_eq!(excepted["record"]["policyException"]["approvedBy"], "governance");
}

#[test]
fn identity_edges_reject_unknown_and_self_endpoints() {
    let mut engine = Engine::new();
    let err = engine
        .execute(
            "identity_graph_update",
            &json!({
                "timestamp": TS,
                "fromRef": { "namespace": "unknown", "value": "x" },
                "toRef": { "namespace": "email", "value": "x@example.com" },
                "evidenceEventIds": ["e1"],
            }),
        )
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_CONTRACT_VIOLATION");

    let err = engine
        .execute(
            "identity_graph_update",
            &json!({
                "timestamp": TS,
                "fromRef": "email:x@example.com",
                "toRef": "email:x@example.com",
                "evidenceEventIds": ["e1"],
            }),
        )
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_CONTRACT_VIOLATION");

    let created = execute(
        &mut engine,
        "identity_graph_update",
        json!({
            "timestamp": TS,
            "fromRef": "github:lea",
            "toRef": "email:lea@example.com",
            "relation": "alias_of",
            "evidenceEventIds": ["e1"],
        }),
    );
    assert_eq!(created["results"][0]["action"], "created");
}

#[test]
fn review_rebalance_bounds_the_active_set() {
    let mut engine = Engine::new();
    for index in 0..4 {
        execute(
            &mut engine,
            "review_schedule_update",
            json!({
                "timestamp": TS,
                "itemKey": format!("topic-{index}"),
                "dueAt": format!("2024-07-0{}T00:00:00.000Z", index + 1),
                "sourceEventIds": [format!("e{index}")],
            }),
        );
    }

    let rebalanced = execute(
        &mut engine,
        "review_archive_rebalance",
        json!({ "timestamp": TS, "activeLimit": 2 }),
    );
    assert_eq!(rebalanced["operation"], "review_set_rebalance");
    assert_eq!(rebalanced["activeReviewIds"].as_array().unwrap().len(), 2);
    assert_eq!(rebalanced["tiers"]["warm"].as_array().unwrap().len(), 2);
}

#[test]
fn context_returns_chronology_when_asked() {
    let mut engine = Engine::new();
    execute(
        &mut engine,
        "ingest",
        json!({ "timestamp": TS, "events": ["watch the borrow checker"] }),
    );
    execute(
        &mut engine,
        "misconception_update",
        json!({
            "timestamp": TS,
            "misconceptionKey": "borrow-checker",
            "evidenceEventIds": ["e1"],
        }),
    );

    let plain = execute(&mut engine, "context", json!({ "query": "borrow" }));
    assert_eq!(plain["matchCount"], 1);
    assert!(plain.get("misconceptionChronology").is_none());

    let with_notes = execute(
        &mut engine,
        "context",
        json!({ "query": "borrow", "misconceptionChronologyLimit": 5 }),
    );
    let notes = with_notes["misconceptionChronology"].as_array().unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0]["key"], "borrow-checker");
}

#[test]
fn reflect_validate_feedback_outcome_round_trip() {
    let mut engine = Engine::new();
    let ingested = execute(
        &mut engine,
        "ingest",
        json!({ "timestamp": TS, "events": ["always run clippy before pushing"] }),
    );
    let event_id = ingested["eventIds"][0].as_str().unwrap().to_string();

    let reflected = execute(&mut engine, "reflect", json!({ "maxEvents": 3 }));
    assert_eq!(reflected["candidates"][0]["sourceEventId"], json!(event_id));

    let validated = execute(
        &mut engine,
        "validate",
        json!({ "evidenceEventIds": [event_id, "evt_missing00000"] }),
    );
    assert_eq!(validated["validCount"], 1);
    assert_eq!(validated["invalidCount"], 1);
    assert_eq!(validated["allValid"], false);

    let feedback = execute(
        &mut engine,
        "feedback",
        json!({ "timestamp": TS, "content": "too many hints", "category": "tutoring" }),
    );
    assert_eq!(feedback["action"], "recorded");
    let feedback_replay = execute(
        &mut engine,
        "feedback",
        json!({ "timestamp": TS, "content": "too many hints", "category": "tutoring" }),
    );
    assert_eq!(feedback_replay["action"], "noop");

    let outcome = execute(
        &mut engine,
        "outcome",
        json!({ "timestamp": TS, "task": "fix flaky test", "status": "success" }),
    );
    assert_eq!(outcome["action"], "recorded");
}

#[test]
fn audit_flags_duplicate_rules_and_export_is_stable() {
    let mut engine = Engine::new();
    execute(
        &mut engine,
        "curate",
        json!({
            "timestamp": TS,
            "candidates": [
                { "candidateId": "rule_a", "statement": "Prefer iterators" },
                { "candidateId": "rule_b", "statement": "prefer iterators" },
            ],
        }),
    );

    let audited = execute(&mut engine, "audit", json!({}));
    assert_eq!(audited["allPassed"], false);
    assert_eq!(audited["duplicateRuleGroups"].as_array().unwrap().len(), 1);

    let export_a = execute(&mut engine, "export", json!({}));
    let export_b = execute(&mut engine, "export", json!({}));
    assert_eq!(export_a["exportDigest"], export_b["exportDigest"]);
    assert!(export_a["markdown"]
        .as_str()
        .unwrap()
        .starts_with("# Personalization Playbook"));
}
