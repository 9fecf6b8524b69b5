//! The operation dispatcher
//!
//! `Engine::execute` is the whole external contract: trim and fold the
//! operation name, validate the request envelope, resolve the store, digest
//! the request, run the recall gate when a requester is named, then hand off
//! to the statically matched handler. Every result carries the same base
//! fields and is a pure function of `(prior state, request)`.

use crate::authorize::authorize_recall;
use crate::config::EngineConfig;
use crate::dispatch::Operation;
use crate::ops;
use engram_core::constants::{MAX_ITEM_CHARS, PROFILE_SENTINEL};
use engram_state::ProfileState;
use engram_core::{canonical, EngramError, EngramResult, EPOCH};
use engram_normalize::{bounded_string, iso_timestamp, optional_bool};
use engram_state::Registry;
use serde_json::{json, Map, Value};
use tracing::debug;

/// Per-dispatch context handed to every handler.
#[derive(Debug, Clone)]
pub struct OpCtx {
    /// The folded operation
    pub operation: Operation,
    /// Resolved store id
    pub store_id: String,
    /// The profile sentinel
    pub profile_id: String,
    /// Digest of `{operation, storeId, profile, input}`
    pub request_digest: String,
    /// Stores registered at dispatch time
    pub store_count: usize,
    /// Profiles registered at dispatch time
    pub profile_count: usize,
}

/// The in-memory personalization engine.
#[derive(Debug, Clone, Default)]
pub struct Engine {
    registry: Registry,
    config: EngineConfig,
}

impl Engine {
    /// Engine over an empty registry with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine over an empty registry with explicit configuration.
    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            registry: Registry::new(),
            config,
        }
    }

    /// Borrow the registry, for inspection.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Drop every store.
    pub fn reset(&mut self) {
        self.registry.reset();
    }

    /// Export the registry in the snapshot file shape.
    pub fn export_snapshot(&self) -> EngramResult<Value> {
        self.registry.export_snapshot()
    }

    /// Replace the registry from a snapshot value.
    pub fn import_snapshot(&mut self, snapshot: &Value) -> EngramResult<()> {
        let default_store = self.config.default_store_id.clone();
        self.registry.import_snapshot(snapshot, &default_store)
    }

    /// Execute one operation against the registry.
    pub fn execute(&mut self, operation: &str, request: &Value) -> EngramResult<Value> {
        let name = operation.trim().to_lowercase();
        let op = Operation::parse(&name).ok_or_else(|| EngramError::unsupported(name.clone()))?;

        let map = match request {
            Value::Object(map) => map,
            _ => {
                return Err(EngramError::contract(
                    "request must be a non-null JSON object",
                ));
            }
        };

        let store_id = bounded_string(
            map.get("storeId").or_else(|| map.get("store")),
            "storeId",
            MAX_ITEM_CHARS,
        )?
        .unwrap_or_else(|| self.config.default_store_id.clone());
        let profile_id = PROFILE_SENTINEL.to_string();

        if self.registry.profile(&store_id, &profile_id).is_none() {
            let mut fresh = ProfileState::new(&store_id, &profile_id);
            fresh.clocks.fatigue_threshold = self.config.fatigue_threshold;
            fresh.clocks.novelty_write_threshold = self.config.novelty_write_threshold;
            fresh.review_archive.active_limit = self
                .config
                .active_review_limit
                .min(engram_core::constants::ACTIVE_REVIEW_SET_MAX);
            *self.registry.profile_mut(&store_id, &profile_id) = fresh;
        }

        let request_digest = canonical::digest(&json!({
            "input": canonical::canonicalize(request),
            "operation": op.as_str(),
            "profile": &profile_id,
            "storeId": &store_id,
        }));
        debug!(operation = op.as_str(), store = %store_id, digest = %request_digest, "dispatch");

        let ctx = OpCtx {
            operation: op,
            store_id: store_id.clone(),
            profile_id: profile_id.clone(),
            request_digest,
            store_count: self.registry.stores.len(),
            profile_count: self
                .registry
                .stores
                .values()
                .map(|s| s.profiles.len())
                .sum(),
        };

        if recall_gated(op) {
            if let Some(requester) =
                bounded_string(map.get("requesterStoreId"), "requesterStoreId", MAX_ITEM_CHARS)?
            {
                let fail_closed = optional_bool(map.get("failClosed"), true);
                let timestamp = iso_timestamp(map.get("timestamp"), "timestamp", EPOCH)?;
                let state = self.registry.profile_mut(&store_id, &profile_id);
                authorize_recall(state, op.as_str(), &store_id, &requester, fail_closed, &timestamp)?;
            }
        }

        let state = self.registry.profile_mut(&store_id, &profile_id);
        let handled = match op {
            Operation::Ingest => ops::ingest::ingest(state, &ctx, map),
            Operation::Context => ops::ingest::context(state, &ctx, map),
            Operation::Reflect => ops::ingest::reflect(state, &ctx, map),
            Operation::Validate => ops::ingest::validate(state, &ctx, map),
            Operation::Curate => ops::curate::curate(state, &ctx, map),
            Operation::CurateGuarded => ops::curate::curate_guarded(state, &ctx, map),
            Operation::LearnerProfileUpdate => ops::profile::learner_profile_update(state, &ctx, map),
            Operation::IdentityGraphUpdate => ops::profile::identity_graph_update(state, &ctx, map),
            Operation::MisconceptionUpdate => {
                ops::misconception::misconception_update(state, &ctx, map)
            }
            Operation::PainSignalIngest => ops::misconception::pain_signal_ingest(state, &ctx, map),
            Operation::FailureSignalIngest => {
                ops::misconception::failure_signal_ingest(state, &ctx, map)
            }
            Operation::CurriculumPlanUpdate => {
                ops::curriculum::curriculum_plan_update(state, &ctx, map)
            }
            Operation::CurriculumRecommendation => {
                ops::recommend::curriculum_recommendation(state, &ctx, map)
            }
            Operation::ReviewScheduleUpdate => ops::review::review_schedule_update(state, &ctx, map),
            Operation::ReviewScheduleClock => ops::review::review_schedule_clock(state, &ctx, map),
            Operation::ReviewSetRebalance => ops::review::review_set_rebalance(state, &ctx, map),
            Operation::PolicyDecisionUpdate => ops::policy::policy_decision_update(state, &ctx, map),
            Operation::RecallAuthorization => ops::policy::recall_authorization(state, &ctx, map),
            Operation::TutorDegraded => ops::tutor::tutor_degraded(state, &ctx, map),
            Operation::PolicyAuditExport => ops::policy::policy_audit_export(state, &ctx, map),
            Operation::Feedback => ops::report::feedback(state, &ctx, map),
            Operation::Outcome => ops::report::outcome(state, &ctx, map),
            Operation::Audit => ops::report::audit(state, &ctx, map),
            Operation::Export => ops::report::export(state, &ctx, map),
            Operation::Doctor => ops::report::doctor(state, &ctx, map),
        }?;

        let mut result = match handled {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("result".to_string(), other);
                map
            }
        };
        result.insert("operation".to_string(), json!(op.as_str()));
        result.insert("storeId".to_string(), json!(ctx.store_id));
        result.insert("profile".to_string(), json!(ctx.profile_id));
        result.insert("requestDigest".to_string(), json!(ctx.request_digest));
        result.insert("deterministic".to_string(), json!(true));
        Ok(Value::Object(result))
    }
}

/// Operations that run the cross-space recall gate when a
/// `requesterStoreId` is present.
fn recall_gated(op: Operation) -> bool {
    op.read_only()
        || matches!(
            op,
            Operation::CurriculumRecommendation | Operation::TutorDegraded | Operation::Reflect
        )
}
