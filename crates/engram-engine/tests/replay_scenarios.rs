//! End-to-end replay and determinism scenarios against the dispatcher.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use engram_engine::Engine;
use serde_json::{json, Value};

const TS: &str = "2024-05-01T00:00:00.000Z";

fn execute(engine: &mut Engine, operation: &str, request: Value) -> Value {
    engine
        .execute(operation, &request)
        .unwrap_or_else(|err| panic!("{operation} failed: {err}"))
}

#[test]
fn ingest_replay_reports_duplicates_with_identical_ledger_digest() {
    let mut engine = Engine::new();
    let request = json!({
        "storeId": "space-a",
        "timestamp": TS,
        "events": [
            { "type": "note", "source": "session", "content": "prefers builder pattern" },
            { "type": "note", "source": "session", "content": "tests flake on CI" },
        ],
    });

    let first = execute(&mut engine, "ingest", request.clone());
    assert_eq!(first["accepted"], 2);
    assert_eq!(first["duplicates"], 0);

    let second = execute(&mut engine, "ingest", request);
    assert_eq!(second["accepted"], 0);
    assert_eq!(second["duplicates"], 2);
    assert_eq!(first["ledgerDigest"], second["ledgerDigest"]);
    assert_eq!(first["eventIds"], second["eventIds"]);
    assert_eq!(second["action"], "noop");
}

#[test]
fn misconception_signal_replay_is_noop() {
    let mut engine = Engine::new();
    let request = json!({
        "storeId": "space-a",
        "timestamp": TS,
        "misconceptionKey": "off-by-one",
        "signal": "harmful",
        "signalId": "s1",
        "evidenceEventIds": ["e1"],
    });

    let first = execute(&mut engine, "misconception_update", request.clone());
    assert_eq!(first["action"], "created");
    assert_eq!(first["harmfulSignalCount"], 1);

    let second = execute(&mut engine, "misconception_update", request);
    assert_eq!(second["action"], "noop");
    assert_eq!(second["harmfulSignalCount"], 1);
    assert_eq!(first["recordDigest"], second["recordDigest"]);
}

#[test]
fn three_harmful_signals_reach_stage_three_and_the_floor() {
    let mut engine = Engine::new();
    for (signal_id, evidence) in [("s1", "e1"), ("s2", "e2"), ("s3", "e3")] {
        execute(
            &mut engine,
            "misconception_update",
            json!({
                "storeId": "space-a",
                "timestamp": TS,
                "misconceptionKey": "off-by-one",
                "signal": "harmful",
                "signalId": signal_id,
                "evidenceEventIds": [evidence],
            }),
        );
    }

    let last = execute(
        &mut engine,
        "misconception_update",
        json!({
            "storeId": "space-a",
            "timestamp": TS,
            "misconceptionKey": "off-by-one",
            "signal": "harmful",
            "signalId": "s3",
            "evidenceEventIds": ["e3"],
        }),
    );
    assert_eq!(last["action"], "noop");
    assert_eq!(last["harmfulSignalCount"], 3);
    assert_eq!(last["confidence"], 0.05);
    assert_eq!(last["evidenceEventIds"], json!(["e1", "e2", "e3"]));

    let thresholds: Vec<u64> = last["antiPatterns"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["threshold"].as_u64().unwrap())
        .collect();
    assert!(thresholds.contains(&3));
    assert_eq!(
        last["antiPatterns"][0]["statement"],
        "avoid:off-by-one"
    );
}

#[test]
fn harmful_decay_block_reports_stage_three_delta() {
    let mut engine = Engine::new();
    let mut last = Value::Null;
    for signal_id in ["s1", "s2", "s3"] {
        last = execute(
            &mut engine,
            "misconception_update",
            json!({
                "timestamp": TS,
                "misconceptionKey": "nil-deref",
                "signal": "harmful",
                "signalId": signal_id,
                "evidenceEventIds": [format!("evidence-{signal_id}")],
            }),
        );
    }
    assert_eq!(last["confidenceDecay"]["stage"], 3);
    assert_eq!(last["confidenceDecay"]["appliedDelta"], -0.32);
    assert_eq!(last["confidenceDecay"]["baseDecay"], 0.32);
    assert_eq!(last["confidence"], 0.05);
}

#[test]
fn curriculum_ranking_follows_the_weights() {
    let mut engine = Engine::new();
    execute(
        &mut engine,
        "learner_profile_update",
        json!({
            "timestamp": TS,
            "learnerId": "lea",
            "interestTags": ["async", "rust"],
            "evidencePointers": ["ev-profile"],
        }),
    );
    let misconception = execute(
        &mut engine,
        "misconception_update",
        json!({
            "timestamp": TS,
            "misconceptionKey": "borrow-checker",
            "signal": "harmful",
            "signalId": "s1",
            "evidenceEventIds": ["ev-mis"],
        }),
    );
    let misconception_id = misconception["misconceptionId"].as_str().unwrap();

    execute(
        &mut engine,
        "curriculum_plan_update",
        json!({
            "timestamp": TS,
            "planItems": [
                {
                    "objectiveId": "obj-interest",
                    "objective": "async streams deep dive",
                    "interestTags": ["rust"],
                    "evidenceEventIds": ["ev-a"],
                },
                {
                    "objectiveId": "obj-fix",
                    "objective": "borrow checker drills",
                    "misconceptionIds": [misconception_id],
                    "evidenceEventIds": ["ev-b"],
                },
            ],
        }),
    );

    let interest_led = execute(
        &mut engine,
        "curriculum_recommendation",
        json!({ "referenceAt": TS, "rankingWeights": { "interest": 0.9 } }),
    );
    assert_eq!(
        interest_led["recommendations"][0]["objectiveId"],
        "obj-interest"
    );

    let mastery_led = execute(
        &mut engine,
        "curriculum_recommendation",
        json!({ "referenceAt": TS, "rankingWeights": { "masteryGap": 0.9 } }),
    );
    assert_eq!(mastery_led["recommendations"][0]["objectiveId"], "obj-fix");

    let budgeted = execute(
        &mut engine,
        "curriculum_recommendation",
        json!({ "referenceAt": TS, "tokenBudget": 30 }),
    );
    assert!(budgeted["recommendations"].as_array().unwrap().len() <= 1);
    assert_eq!(budgeted["observability"]["boundedByTokenBudget"], true);
}

#[test]
fn fatigue_threshold_consolidates_on_the_third_tick() {
    let mut engine = Engine::new();
    let request = json!({
        "timestamp": TS,
        "fatigueThreshold": 3,
        "interactionIncrement": 1,
    });

    let first = execute(&mut engine, "review_schedule_clock", request.clone());
    assert_eq!(first["consolidationTriggered"], false);
    let second = execute(&mut engine, "review_schedule_clock", request.clone());
    assert_eq!(second["consolidationTriggered"], false);

    let third = execute(&mut engine, "review_schedule_clock", request);
    assert_eq!(third["consolidationTriggered"], true);
    assert_eq!(third["consolidationCause"], "fatigue_threshold");
    assert_eq!(third["clocks"]["lastConsolidationCause"], "fatigue_threshold");
    assert_eq!(third["clocks"]["noveltyWriteLoad"], 0.0);
    assert_eq!(third["clocks"]["fatigueLoad"], 1.0);
    assert_eq!(third["clocks"]["consolidationCount"], 1);
}

#[test]
fn identical_runs_produce_byte_identical_responses_and_snapshots() {
    let run = || {
        let mut engine = Engine::new();
        let mut transcript = String::new();
        let operations = [
            ("ingest", json!({ "timestamp": TS, "events": ["note one", "note two"] })),
            (
                "misconception_update",
                json!({
                    "timestamp": TS,
                    "misconceptionKey": "unwrap-everywhere",
                    "evidenceEventIds": ["e1"],
                    "signalId": "s1",
                }),
            ),
            (
                "curriculum_plan_update",
                json!({
                    "timestamp": TS,
                    "objectiveId": "obj-1",
                    "evidenceEventIds": ["e1"],
                }),
            ),
            ("curriculum_recommendation", json!({ "referenceAt": TS })),
            ("review_schedule_clock", json!({ "timestamp": TS })),
            ("doctor", json!({})),
        ];
        for (operation, request) in operations {
            let result = engine.execute(operation, &request).unwrap();
            transcript.push_str(&engram_core::canonical::stringify(&result));
            transcript.push('\n');
        }
        let snapshot = engine.export_snapshot().unwrap();
        transcript.push_str(&engram_core::canonical::digest(&snapshot));
        transcript
    };
    assert_eq!(run(), run());
}

#[test]
fn stores_are_isolated() {
    let mut engine = Engine::new();
    execute(
        &mut engine,
        "ingest",
        json!({ "storeId": "space-a", "timestamp": TS, "events": ["a-only"] }),
    );
    execute(
        &mut engine,
        "ingest",
        json!({ "storeId": "space-b", "timestamp": TS, "events": ["b-only"] }),
    );

    let context_b = execute(
        &mut engine,
        "context",
        json!({ "storeId": "space-b", "query": "a-only" }),
    );
    assert_eq!(context_b["matchCount"], 0);

    let doctor_a = execute(&mut engine, "doctor", json!({ "storeId": "space-a" }));
    assert_eq!(doctor_a["counters"]["events"], 1);
}
