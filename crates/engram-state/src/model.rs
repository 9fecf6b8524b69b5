//! Typed profile-state records
//!
//! Every collection a profile owns lives here as a serde camelCase record so
//! the snapshot file and the in-memory form are the same shape. All maps are
//! `BTreeMap` and all invariant string lists are kept sorted-unique, so
//! canonical key order falls out of the types.

use engram_core::constants::{DEFAULT_ACTIVE_REVIEW_SET_LIMIT, DEFAULT_SLEEP_THRESHOLD};
use engram_core::{canonical, EPOCH};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Learner profile lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileStatus {
    /// Profile is live and accepting updates
    Active,
    /// Profile has been archived
    Archived,
}

impl ProfileStatus {
    /// Parse from the wire form; unknown values fall back to `active`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "archived" => Self::Archived,
            _ => Self::Active,
        }
    }

    /// Wire form of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }
}

/// Misconception lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MisconceptionStatus {
    /// Still being observed
    Active,
    /// Corrections caught up with harmful signals
    Resolved,
    /// Explicitly suppressed; sticky
    Suppressed,
}

impl MisconceptionStatus {
    /// Parse from the wire form.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "active" => Some(Self::Active),
            "resolved" => Some(Self::Resolved),
            "suppressed" => Some(Self::Suppressed),
            _ => None,
        }
    }

    /// Wire form of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Resolved => "resolved",
            Self::Suppressed => "suppressed",
        }
    }
}

/// Signal kind carried by a misconception update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MisconceptionSignal {
    /// Evidence the misconception fired again
    Harmful,
    /// Evidence the learner worked around it
    Helpful,
    /// Evidence it was explicitly corrected
    Correction,
}

impl MisconceptionSignal {
    /// Parse from the wire form; absent/unknown defaults to `harmful`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "helpful" => Self::Helpful,
            "correction" => Self::Correction,
            _ => Self::Harmful,
        }
    }

    /// Wire form of the signal.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Harmful => "harmful",
            Self::Helpful => "helpful",
            Self::Correction => "correction",
        }
    }
}

/// Curriculum plan item status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    /// Proposed by the planner
    Proposed,
    /// Committed to by the learner
    Committed,
    /// Blocked; sticky once set
    Blocked,
    /// Finished
    Completed,
}

impl PlanStatus {
    /// Parse from the wire form.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "proposed" => Some(Self::Proposed),
            "committed" => Some(Self::Committed),
            "blocked" => Some(Self::Blocked),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    /// Wire form of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "proposed",
            Self::Committed => "committed",
            Self::Blocked => "blocked",
            Self::Completed => "completed",
        }
    }
}

/// Review schedule entry status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    /// Waiting for its due time
    Scheduled,
    /// Due now
    Due,
    /// Completed this cycle
    Completed,
    /// Taken out of rotation
    Suspended,
}

impl ReviewStatus {
    /// Parse from the wire form.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "scheduled" => Some(Self::Scheduled),
            "due" => Some(Self::Due),
            "completed" => Some(Self::Completed),
            "suspended" => Some(Self::Suspended),
            _ => None,
        }
    }

    /// Wire form of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Due => "due",
            Self::Completed => "completed",
            Self::Suspended => "suspended",
        }
    }
}

/// Policy decision outcome, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyOutcome {
    /// Permitted
    Allow,
    /// Needs human review
    Review,
    /// Forbidden
    Deny,
}

impl PolicyOutcome {
    /// Parse from the wire form.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "allow" => Some(Self::Allow),
            "review" => Some(Self::Review),
            "deny" => Some(Self::Deny),
            _ => None,
        }
    }

    /// Wire form of the outcome.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Review => "review",
            Self::Deny => "deny",
        }
    }

    /// Severity rank: allow < review < deny.
    pub fn severity(&self) -> u8 {
        match self {
            Self::Allow => 1,
            Self::Review => 2,
            Self::Deny => 3,
        }
    }
}

/// Evidence pointer kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceKind {
    /// Ingested event
    Event,
    /// Conversation episode
    Episode,
    /// Agent signal
    Signal,
    /// Produced artifact
    Artifact,
    /// Policy record
    Policy,
}

impl EvidenceKind {
    /// Parse from the wire form; unknown values default to `event`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "episode" => Self::Episode,
            "signal" => Self::Signal,
            "artifact" => Self::Artifact,
            "policy" => Self::Policy,
            _ => Self::Event,
        }
    }

    /// Wire form of the kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Event => "event",
            Self::Episode => "episode",
            Self::Signal => "signal",
            Self::Artifact => "artifact",
            Self::Policy => "policy",
        }
    }
}

/// Identity graph relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityRelation {
    /// Two refs denote the same learner
    AliasOf,
    /// Ref is evidence for the other
    EvidenceOf,
    /// Ref records a misconception of the other
    MisconceptionOf,
    /// Ref records a goal of the other
    GoalOf,
    /// Ref records an interest of the other
    InterestOf,
}

impl IdentityRelation {
    /// Parse from the wire form; unknown values default to `alias_of`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "evidence_of" => Self::EvidenceOf,
            "misconception_of" => Self::MisconceptionOf,
            "goal_of" => Self::GoalOf,
            "interest_of" => Self::InterestOf,
            _ => Self::AliasOf,
        }
    }

    /// Wire form of the relation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AliasOf => "alias_of",
            Self::EvidenceOf => "evidence_of",
            Self::MisconceptionOf => "misconception_of",
            Self::GoalOf => "goal_of",
            Self::InterestOf => "interest_of",
        }
    }
}

/// Archival tier for review entries evicted from the active set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchiveTier {
    /// Recently evicted, likely to return
    Warm,
    /// Completed or aging out
    Cold,
    /// A year or more stale
    Frozen,
}

impl ArchiveTier {
    /// Wire form of the tier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warm => "warm",
            Self::Cold => "cold",
            Self::Frozen => "frozen",
        }
    }
}

/// Evidence pointer: the unit of provenance on fact-asserting records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidencePointer {
    /// Identifier of the evidence (event id, episode id, ...)
    pub pointer_id: String,
    /// What class of thing the pointer names
    pub kind: EvidenceKind,
    /// Producing subsystem; `unspecified` when absent
    pub source: String,
    /// Confidence in `[0,1]`
    pub confidence: f64,
    /// When the evidence was observed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<String>,
    /// Free-form annotations, shallow-merged on conflict
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl EvidencePointer {
    /// Merge key: pointers agreeing on `(kind, source, pointerId)` collapse.
    pub fn merge_key(&self) -> (String, String, String) {
        (
            self.kind.as_str().to_string(),
            self.source.clone(),
            self.pointer_id.clone(),
        )
    }
}

/// Normalized policy exception attached to a learner profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyException {
    /// Exception code
    pub code: String,
    /// Why the exception applies
    pub reason: String,
    /// Approver; `unspecified` when absent
    pub approved_by: String,
    /// External reference (ticket, document)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// When the exception was granted
    pub timestamp: String,
    /// Free-form annotations
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// One normalized signal per agent (`codex`, `claude`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSignal {
    /// Agent name the signal was folded from
    pub agent: String,
    /// Sorted-unique capability/topic tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Confidence in `[0,1]`
    pub confidence: f64,
    /// Latest observation time across folded duplicates
    pub observed_at: String,
    /// Free-form annotations
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// Ingested event, deduplicated by content digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    /// `evt_<hex12>` of the content digest
    pub event_id: String,
    /// Event type label
    #[serde(rename = "type")]
    pub event_type: String,
    /// Producing source label
    pub source: String,
    /// Event payload text
    pub content: String,
    /// Digest of canonical `{source, type, content, ordinal}`
    pub digest: String,
    /// Insertion ordinal within the profile
    pub ordinal: u64,
    /// Ingest timestamp
    pub ingested_at: String,
}

/// Curated rule derived from events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleRecord {
    /// Candidate id; unique within the profile
    pub rule_id: String,
    /// The rule statement
    pub statement: String,
    /// Confidence in `[0,1]`
    pub confidence: f64,
    /// Event the rule was derived from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_event_id: Option<String>,
    /// First curation time
    pub created_at: String,
    /// Last curation time
    pub updated_at: String,
}

/// Appended feedback record, content-addressed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackRecord {
    /// `fb_<hex12>` of the content digest
    pub feedback_id: String,
    /// Feedback text
    pub content: String,
    /// Category label
    pub category: String,
    /// Record timestamp
    pub recorded_at: String,
    /// Free-form annotations
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// Appended outcome record, content-addressed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRecord {
    /// `out_<hex12>` of the content digest
    pub outcome_id: String,
    /// Task or activity label
    pub task: String,
    /// Outcome status label
    pub status: String,
    /// Record timestamp
    pub recorded_at: String,
    /// Free-form annotations
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

/// One identity reference on a learner profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRef {
    /// Reference value (email, handle, ...)
    pub value: String,
    /// Namespace the value lives in
    pub namespace: String,
    /// Exactly one ref per profile is primary
    pub primary: bool,
}

/// One revision in an attribute's lineage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeRevision {
    /// `rev_<hex12>` of the revision fingerprint
    pub revision_id: String,
    /// Attribute name
    pub attribute: String,
    /// Revision timestamp
    pub timestamp: String,
    /// Digest of the canonical value
    pub value_digest: String,
    /// The attribute value at this revision
    pub value: Value,
}

/// Learner profile with per-attribute lineage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerProfile {
    /// Derived from `{storeId, profile, learnerId, canonical_identity}`
    pub profile_id: String,
    /// Stable learner identifier from the request
    pub learner_id: String,
    /// Lifecycle status
    pub status: ProfileStatus,
    /// Monotonic; bumps on any structural change
    pub version: u64,
    /// Confidence in `[0,1]`
    pub confidence: f64,
    /// At least one; exactly one primary
    pub identity_refs: Vec<IdentityRef>,
    /// Sorted-unique goals
    #[serde(default)]
    pub goals: Vec<String>,
    /// Sorted-unique interest tags
    #[serde(default)]
    pub interest_tags: Vec<String>,
    /// Sorted-unique linked misconception ids
    #[serde(default)]
    pub misconception_ids: Vec<String>,
    /// Evidence backing the profile
    #[serde(default)]
    pub evidence_pointers: Vec<EvidencePointer>,
    /// Present when the profile was admitted without evidence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_exception: Option<PolicyException>,
    /// One folded signal per agent, sorted by agent
    #[serde(default)]
    pub source_signals: Vec<AgentSignal>,
    /// Current attribute view, resolved from lineage
    #[serde(default)]
    pub provided_attributes: BTreeMap<String, Value>,
    /// Full revision history per attribute
    #[serde(default)]
    pub attribute_lineage: BTreeMap<String, Vec<AttributeRevision>>,
    /// Creation timestamp
    pub created_at: String,
    /// Last structural change timestamp
    pub updated_at: String,
}

/// Endpoint of an identity edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityEndpoint {
    /// Namespace; never `unknown`
    pub namespace: String,
    /// Value; never `unknown`
    pub value: String,
}

/// Directed identity edge; endpoints immutable per edge id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityEdge {
    /// Derived from endpoints + relation
    pub edge_id: String,
    /// Relation kind
    pub relation: IdentityRelation,
    /// Source endpoint
    pub from_ref: IdentityEndpoint,
    /// Target endpoint; distinct from source
    pub to_ref: IdentityEndpoint,
    /// Sorted-unique evidence event ids
    #[serde(default)]
    pub evidence_event_ids: Vec<String>,
    /// Confidence in `[0,1]`
    pub confidence: f64,
    /// Creation timestamp
    pub created_at: String,
    /// Last merge timestamp
    pub updated_at: String,
}

/// Anti-pattern emitted when harmful signals cross a threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AntiPattern {
    /// `anti_<hex12>` of the activation fingerprint
    pub anti_pattern_id: String,
    /// `avoid:<misconception key>`
    pub statement: String,
    /// Harmful-count threshold that activated it
    pub threshold: u64,
    /// Evidence event ids at activation
    #[serde(default)]
    pub evidence_event_ids: Vec<String>,
    /// Signal ids seen at activation
    #[serde(default)]
    pub signal_ids: Vec<String>,
    /// Activation timestamp
    pub activated_at: String,
}

/// Tracked misconception with signal counts and decay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Misconception {
    /// `mis_<hex12>` of `{store, profile, key}`
    pub misconception_id: String,
    /// Stable misconception key
    pub key: String,
    /// Lifecycle status
    pub status: MisconceptionStatus,
    /// Count of harmful signals
    pub harmful_signal_count: u64,
    /// Count of helpful signals
    pub helpful_signal_count: u64,
    /// Count of corrections
    pub correction_count: u64,
    /// Confidence, floored at 0.05
    pub confidence: f64,
    /// Current decay stage in `[0..4]`
    pub decay_stage: u32,
    /// Signal ids already applied (replay guard)
    #[serde(default)]
    pub seen_signal_ids: Vec<String>,
    /// Sorted-unique evidence event ids
    #[serde(default)]
    pub evidence_event_ids: Vec<String>,
    /// Emitted anti-patterns, ordered by `(activatedAt, id)`
    #[serde(default)]
    pub anti_patterns: Vec<AntiPattern>,
    /// Creation timestamp
    pub created_at: String,
    /// Last structural change timestamp
    pub updated_at: String,
}

/// Chronology note recording a misconception structural change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MisconceptionNote {
    /// `note_<hex12>` content address
    pub note_id: String,
    /// Misconception the note describes
    pub misconception_id: String,
    /// Misconception key
    pub key: String,
    /// Field names that changed, sorted
    pub changed_fields: Vec<String>,
    /// Record digest before the change
    pub previous_digest: Option<String>,
    /// Record digest after the change
    pub next_digest: String,
    /// Harmful count after the change
    pub harmful_signal_count: u64,
    /// Helpful count after the change
    pub helpful_signal_count: u64,
    /// Correction count after the change
    pub correction_count: u64,
    /// Change timestamp
    pub timestamp: String,
}

/// Conflict-chronology note recording a plan item structural change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictNote {
    /// `note_<hex12>` content address
    pub note_id: String,
    /// Owning profile id (the sentinel)
    pub profile_id: String,
    /// Plan item the note describes
    pub plan_item_id: String,
    /// Objective the plan item targets
    pub objective_id: String,
    /// Field names that changed, sorted
    pub changed_fields: Vec<String>,
    /// Record digest before the change
    pub previous_digest: Option<String>,
    /// Record digest after the change
    pub next_digest: String,
    /// Change timestamp
    pub timestamp: String,
}

/// Curriculum plan item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanItem {
    /// `cp_<hex12>` of `{store, profile, objectiveId}`
    pub plan_item_id: String,
    /// Objective identifier
    pub objective_id: String,
    /// Objective statement
    pub objective: String,
    /// Lifecycle status; `blocked` is sticky
    pub status: PlanStatus,
    /// Rank; merges by min; >= 1
    pub recommendation_rank: u64,
    /// Optional due time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<String>,
    /// Sorted-unique linked misconception ids
    #[serde(default)]
    pub misconception_ids: Vec<String>,
    /// Sorted-unique interest tags
    #[serde(default)]
    pub interest_tags: Vec<String>,
    /// Sorted-unique evidence event ids; non-empty
    #[serde(default)]
    pub evidence_event_ids: Vec<String>,
    /// Sorted-unique provenance signal labels
    #[serde(default)]
    pub provenance_signals: Vec<String>,
    /// Free-form annotations
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    /// Creation timestamp
    pub created_at: String,
    /// Last structural change timestamp
    pub updated_at: String,
}

/// Review schedule entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    /// `rs_<hex12>` of `{store, profile, itemKey}`
    pub schedule_entry_id: String,
    /// What is being reviewed
    pub item_key: String,
    /// Lifecycle status
    pub status: ReviewStatus,
    /// Completed repetitions
    pub repetition: u64,
    /// Interval in days; >= 1
    pub interval_days: u64,
    /// Ease factor in `[0,1]`
    pub ease_factor: f64,
    /// Next due time
    pub due_at: String,
    /// Sorted-unique source event ids; non-empty
    pub source_event_ids: Vec<String>,
    /// Creation timestamp
    pub created_at: String,
    /// Last structural change timestamp
    pub updated_at: String,
}

/// Policy decision record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDecision {
    /// `pd_<hex12>` of `{store, profile, policyKey, action, surface}`
    pub decision_id: String,
    /// Policy key being decided
    pub policy_key: String,
    /// Action under the policy
    pub action: String,
    /// Surface the action targets
    pub surface: String,
    /// Outcome; merges raise by severity
    pub outcome: PolicyOutcome,
    /// Sorted-unique reason codes; non-empty for deny
    #[serde(default)]
    pub reason_codes: Vec<String>,
    /// Sorted-unique provenance event ids; non-empty
    pub provenance_event_ids: Vec<String>,
    /// Creation timestamp
    pub created_at: String,
    /// Last merge timestamp
    pub updated_at: String,
}

/// Append-only policy audit event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// `aud_<hex12>` content address
    pub audit_event_id: String,
    /// Operation that emitted the event
    pub operation: String,
    /// Entity the event concerns
    pub entity_id: String,
    /// Outcome label (`allow`, `deny`, `quarantine`, ...)
    pub outcome: String,
    /// Sorted-unique reason codes
    #[serde(default)]
    pub reason_codes: Vec<String>,
    /// Structured detail payload
    #[serde(default)]
    pub details: Value,
    /// Event timestamp
    pub timestamp: String,
}

/// Cross-space recall allowlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecallPolicy {
    /// `pol_<hex12>` of the owning scope
    pub policy_id: String,
    /// Sorted-unique store ids; always contains the owner
    pub allowed_store_ids: Vec<String>,
    /// Last mutation timestamp
    pub updated_at: String,
}

/// Interaction/sleep scheduler clocks, singleton per profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerClocks {
    /// Interaction counter
    pub interaction_tick: u64,
    /// Sleep (consolidation) counter
    pub sleep_tick: u64,
    /// Accumulated fatigue; never negative
    pub fatigue_load: f64,
    /// Fatigue consolidation threshold; positive
    pub fatigue_threshold: f64,
    /// Accumulated novelty writes; never negative
    pub novelty_write_load: f64,
    /// Novelty-write consolidation threshold; positive
    pub novelty_write_threshold: f64,
    /// Completed consolidations
    pub consolidation_count: u64,
    /// Cause of the last consolidation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_consolidation_cause: Option<String>,
    /// Last interaction timestamp
    pub last_interaction_at: String,
    /// Last consolidation timestamp
    pub last_sleep_at: String,
}

impl Default for SchedulerClocks {
    fn default() -> Self {
        Self {
            interaction_tick: 0,
            sleep_tick: 0,
            fatigue_load: 0.0,
            fatigue_threshold: DEFAULT_SLEEP_THRESHOLD,
            novelty_write_load: 0.0,
            novelty_write_threshold: DEFAULT_SLEEP_THRESHOLD,
            consolidation_count: 0,
            last_consolidation_cause: None,
            last_interaction_at: EPOCH.to_string(),
            last_sleep_at: EPOCH.to_string(),
        }
    }
}

/// Archived review entry, content-addressed under the `arc` prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedRecord {
    /// `arc_<hex12>` content address
    pub archive_id: String,
    /// The archived schedule entry
    pub schedule_entry_id: String,
    /// Tier the entry landed in
    pub tier: ArchiveTier,
    /// Digest of the entry at archival time
    pub entry_digest: String,
    /// Archival timestamp
    pub archived_at: String,
}

/// Review archival tiers, singleton per profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewArchive {
    /// Active set ceiling; <= 256
    pub active_limit: usize,
    /// Entry ids currently in the active set
    pub active_review_ids: Vec<String>,
    /// Warm tier entry ids
    #[serde(default)]
    pub warm: Vec<String>,
    /// Cold tier entry ids
    #[serde(default)]
    pub cold: Vec<String>,
    /// Frozen tier entry ids
    #[serde(default)]
    pub frozen: Vec<String>,
    /// Content-addressed archival records
    #[serde(default)]
    pub archived_records: Vec<ArchivedRecord>,
}

impl Default for ReviewArchive {
    fn default() -> Self {
        Self {
            active_limit: DEFAULT_ACTIVE_REVIEW_SET_LIMIT,
            active_review_ids: Vec::new(),
            warm: Vec::new(),
            cold: Vec::new(),
            frozen: Vec::new(),
            archived_records: Vec::new(),
        }
    }
}

/// Recorded explicit pain signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PainSignalRecord {
    /// `pain_<hex12>` content address
    pub pain_signal_id: String,
    /// Misconception key the pain maps onto
    pub misconception_key: String,
    /// Always `harmful`
    pub mapped_signal: String,
    /// Carried signal id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_id: Option<String>,
    /// Sorted-unique evidence event ids
    pub evidence_event_ids: Vec<String>,
    /// Severity in `[0,1]`
    pub severity: f64,
    /// Record timestamp
    pub recorded_at: String,
}

/// Recorded implicit failure signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureSignalRecord {
    /// `fail_<hex12>` content address
    pub failure_signal_id: String,
    /// Failure class (`test`, `build`, ...)
    pub failure_type: String,
    /// Misconception key the failure maps onto
    pub misconception_key: String,
    /// Always `harmful`
    pub mapped_signal: String,
    /// Carried signal id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_id: Option<String>,
    /// Sorted-unique evidence event ids
    pub evidence_event_ids: Vec<String>,
    /// Record timestamp
    pub recorded_at: String,
}

/// One degraded-tutor suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DegradedSuggestion {
    /// Source kind: `review`, `misconception`, or `curriculum`
    pub kind: String,
    /// Id of the record the suggestion points at
    pub target_id: String,
    /// Suggestion text
    pub statement: String,
    /// Evidence backing the suggestion
    #[serde(default)]
    pub evidence_event_ids: Vec<String>,
}

/// Degraded-tutor session record, upserted by content-addressed id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DegradedSession {
    /// `dts_<hex12>` content address
    pub session_id: String,
    /// LLM capability flag at session time
    pub llm_available: bool,
    /// Index capability flag at session time
    pub index_available: bool,
    /// Forced-degraded flag at session time
    pub force_degraded: bool,
    /// Sorted warning codes
    pub warnings: Vec<String>,
    /// Ordered suggestions
    pub suggestions: Vec<DegradedSuggestion>,
    /// Session timestamp
    pub generated_at: String,
}

/// Curriculum recommendation snapshot ring entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecommendationSnapshot {
    /// Hash of `(store, profile, referenceAt, maxRecommendations, digests)`
    pub recommendation_set_id: String,
    /// Reference time the ranking ran at
    pub reference_at: String,
    /// Admission ceiling used
    pub max_recommendations: u64,
    /// Per-recommendation digests, in rank order
    pub recommendation_digests: Vec<String>,
    /// Snapshot timestamp
    pub generated_at: String,
}

/// Everything one (store, profile) pair owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProfileState {
    /// Ingested events in insertion order
    pub events: Vec<EventRecord>,
    /// Curated rules in insertion order
    pub rules: Vec<RuleRecord>,
    /// Feedback records in insertion order
    pub feedback: Vec<FeedbackRecord>,
    /// Outcome records in insertion order
    pub outcomes: Vec<OutcomeRecord>,
    /// Learner profiles by profile id
    pub learner_profiles: BTreeMap<String, LearnerProfile>,
    /// Identity edges sorted by edge id
    pub identity_edges: Vec<IdentityEdge>,
    /// Misconceptions by id
    pub misconceptions: BTreeMap<String, Misconception>,
    /// Curriculum plan items by id
    pub plan_items: BTreeMap<String, PlanItem>,
    /// Review schedule entries by id
    pub review_entries: BTreeMap<String, ScheduleEntry>,
    /// Pain signal records in insertion order
    pub pain_signals: Vec<PainSignalRecord>,
    /// Failure signal records in insertion order
    pub failure_signals: Vec<FailureSignalRecord>,
    /// Scheduler clocks
    pub clocks: SchedulerClocks,
    /// Review archival tiers
    pub review_archive: ReviewArchive,
    /// Cross-space recall allowlist
    pub recall_policy: RecallPolicy,
    /// Degraded-tutor sessions by session id
    pub degraded_sessions: BTreeMap<String, DegradedSession>,
    /// Policy decisions by id
    pub policy_decisions: BTreeMap<String, PolicyDecision>,
    /// Append-only audit ring, newest-capped
    pub policy_audit_trail: Vec<AuditEvent>,
    /// Recommendation snapshot ring
    pub recommendation_snapshots: Vec<RecommendationSnapshot>,
    /// Misconception chronology ring
    pub misconception_chronology: Vec<MisconceptionNote>,
    /// Curriculum conflict chronology ring
    pub curriculum_conflicts: Vec<ConflictNote>,
}

impl Default for ProfileState {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            rules: Vec::new(),
            feedback: Vec::new(),
            outcomes: Vec::new(),
            learner_profiles: BTreeMap::new(),
            identity_edges: Vec::new(),
            misconceptions: BTreeMap::new(),
            plan_items: BTreeMap::new(),
            review_entries: BTreeMap::new(),
            pain_signals: Vec::new(),
            failure_signals: Vec::new(),
            clocks: SchedulerClocks::default(),
            review_archive: ReviewArchive::default(),
            recall_policy: RecallPolicy {
                policy_id: String::new(),
                allowed_store_ids: Vec::new(),
                updated_at: EPOCH.to_string(),
            },
            degraded_sessions: BTreeMap::new(),
            policy_decisions: BTreeMap::new(),
            policy_audit_trail: Vec::new(),
            recommendation_snapshots: Vec::new(),
            misconception_chronology: Vec::new(),
            curriculum_conflicts: Vec::new(),
        }
    }
}

impl ProfileState {
    /// Fresh state for a (store, profile) pair: empty collections, default
    /// thresholds, and an allowlist containing only the owning store.
    pub fn new(store_id: &str, profile_id: &str) -> Self {
        let policy_fingerprint = json!({
            "profile": profile_id,
            "scope": "recall_policy",
            "storeId": store_id,
        });
        let policy_id = canonical::make_id("pol", &canonical::digest(&policy_fingerprint));
        Self {
            recall_policy: RecallPolicy {
                policy_id,
                allowed_store_ids: vec![store_id.to_string()],
                updated_at: EPOCH.to_string(),
            },
            ..Self::default()
        }
    }

    /// Look up an event by id.
    pub fn event_by_id(&self, event_id: &str) -> Option<&EventRecord> {
        self.events.iter().find(|e| e.event_id == event_id)
    }

    /// Whether every id in `event_ids` names an ingested event.
    pub fn has_all_events(&self, event_ids: &[String]) -> bool {
        event_ids.iter().all(|id| self.event_by_id(id).is_some())
    }
}
