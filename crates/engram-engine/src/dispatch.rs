//! Operation names and alias folding
//!
//! The wire name is trimmed and lowercased, aliases fold to the canonical
//! operation, and everything downstream matches statically on the enum.

/// Every operation the dispatcher understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Ingest events into the ledger
    Ingest,
    /// Query events and misconception chronology
    Context,
    /// Synthesize curation candidates from recent events
    Reflect,
    /// Check evidence existence
    Validate,
    /// Upsert curated rules
    Curate,
    /// Curate behind the injection/evidence guard pipeline
    CurateGuarded,
    /// Upsert a learner profile
    LearnerProfileUpdate,
    /// Upsert identity edges
    IdentityGraphUpdate,
    /// Apply a misconception signal
    MisconceptionUpdate,
    /// Ingest an explicit pain signal
    PainSignalIngest,
    /// Ingest an implicit failure signal
    FailureSignalIngest,
    /// Upsert curriculum plan items
    CurriculumPlanUpdate,
    /// Rank curriculum recommendations
    CurriculumRecommendation,
    /// Upsert review schedule entries
    ReviewScheduleUpdate,
    /// Advance the interaction/sleep clocks
    ReviewScheduleClock,
    /// Rebalance the active review set
    ReviewSetRebalance,
    /// Upsert policy decisions
    PolicyDecisionUpdate,
    /// Manage and check the recall allowlist
    RecallAuthorization,
    /// Plan a degraded tutoring session
    TutorDegraded,
    /// Export decisions and the audit trail
    PolicyAuditExport,
    /// Append a feedback record
    Feedback,
    /// Append an outcome record
    Outcome,
    /// Run ledger consistency checks
    Audit,
    /// Export the playbook
    Export,
    /// Report engine health counters
    Doctor,
}

impl Operation {
    /// Fold a wire name (already trimmed and lowercased) to an operation.
    pub fn parse(name: &str) -> Option<Self> {
        let op = match name {
            "ingest" => Self::Ingest,
            "context" => Self::Context,
            "reflect" => Self::Reflect,
            "validate" => Self::Validate,
            "curate" => Self::Curate,
            "curate_guarded" | "guarded_curate" | "secure_curate" => Self::CurateGuarded,
            "learner_profile_update" => Self::LearnerProfileUpdate,
            "identity_graph_update" => Self::IdentityGraphUpdate,
            "misconception_update" => Self::MisconceptionUpdate,
            "pain_signal_ingest" | "explicit_pain_signal_ingest" => Self::PainSignalIngest,
            "failure_signal_ingest" | "implicit_failure_signal_ingest" => Self::FailureSignalIngest,
            "curriculum_plan_update" => Self::CurriculumPlanUpdate,
            "curriculum_recommendation" | "curriculum_recommend" => Self::CurriculumRecommendation,
            "review_schedule_update" => Self::ReviewScheduleUpdate,
            "review_schedule_clock" => Self::ReviewScheduleClock,
            "review_set_rebalance" | "review_archive_rebalance" => Self::ReviewSetRebalance,
            "policy_decision_update" => Self::PolicyDecisionUpdate,
            "recall_authorization" | "recall_authorize" => Self::RecallAuthorization,
            "tutor_degraded" | "degraded_tutor" => Self::TutorDegraded,
            "policy_audit_export" => Self::PolicyAuditExport,
            "feedback" => Self::Feedback,
            "outcome" => Self::Outcome,
            "audit" => Self::Audit,
            "export" => Self::Export,
            "doctor" => Self::Doctor,
            _ => return None,
        };
        Some(op)
    }

    /// Canonical wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::Context => "context",
            Self::Reflect => "reflect",
            Self::Validate => "validate",
            Self::Curate => "curate",
            Self::CurateGuarded => "curate_guarded",
            Self::LearnerProfileUpdate => "learner_profile_update",
            Self::IdentityGraphUpdate => "identity_graph_update",
            Self::MisconceptionUpdate => "misconception_update",
            Self::PainSignalIngest => "pain_signal_ingest",
            Self::FailureSignalIngest => "failure_signal_ingest",
            Self::CurriculumPlanUpdate => "curriculum_plan_update",
            Self::CurriculumRecommendation => "curriculum_recommendation",
            Self::ReviewScheduleUpdate => "review_schedule_update",
            Self::ReviewScheduleClock => "review_schedule_clock",
            Self::ReviewSetRebalance => "review_set_rebalance",
            Self::PolicyDecisionUpdate => "policy_decision_update",
            Self::RecallAuthorization => "recall_authorization",
            Self::TutorDegraded => "tutor_degraded",
            Self::PolicyAuditExport => "policy_audit_export",
            Self::Feedback => "feedback",
            Self::Outcome => "outcome",
            Self::Audit => "audit",
            Self::Export => "export",
            Self::Doctor => "doctor",
        }
    }

    /// Whether the operation never mutates state.
    ///
    /// The persistence gate skips the exclusive lock for these.
    pub fn read_only(&self) -> bool {
        matches!(
            self,
            Self::Context
                | Self::Validate
                | Self::Audit
                | Self::Export
                | Self::Doctor
                | Self::PolicyAuditExport
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_fold_to_canonical() {
        assert_eq!(Operation::parse("guarded_curate"), Some(Operation::CurateGuarded));
        assert_eq!(Operation::parse("secure_curate"), Some(Operation::CurateGuarded));
        assert_eq!(
            Operation::parse("explicit_pain_signal_ingest"),
            Some(Operation::PainSignalIngest)
        );
        assert_eq!(
            Operation::parse("review_archive_rebalance"),
            Some(Operation::ReviewSetRebalance)
        );
        assert_eq!(
            Operation::parse("recall_authorize"),
            Some(Operation::RecallAuthorization)
        );
        assert_eq!(Operation::parse("degraded_tutor"), Some(Operation::TutorDegraded));
        assert_eq!(
            Operation::parse("curriculum_recommend"),
            Some(Operation::CurriculumRecommendation)
        );
        assert_eq!(Operation::parse("no_such_op"), None);
    }

    #[test]
    fn read_only_set_matches_persistence_contract() {
        for op in ["context", "validate", "audit", "export", "doctor", "policy_audit_export"] {
            assert!(Operation::parse(op).map(|o| o.read_only()).unwrap_or(false), "{op}");
        }
        for op in ["ingest", "curate", "misconception_update", "review_schedule_clock"] {
            assert!(Operation::parse(op).map(|o| !o.read_only()).unwrap_or(false), "{op}");
        }
    }
}
