//! Cross-space recall authorization
//!
//! Every recall-shaped operation that names a `requesterStoreId` passes this
//! gate before touching state. Same-store requests short-circuit; cross-space
//! requests must appear on the owning store's allowlist. Denials are
//! fail-closed by default: an audit event is recorded, then the structured
//! policy error surfaces.

use crate::audit::record_audit;
use engram_core::{EngramError, EngramResult};
use engram_state::model::ProfileState;
use serde_json::json;
use tracing::warn;

/// Result of an authorization check that did not raise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecallAuthorization {
    /// Whether the requester may recall from this store
    pub authorized: bool,
    /// Audit event recorded for cross-space checks
    pub audit_event_id: Option<String>,
}

/// Authorize `requester_store_id` against the profile's allowlist.
///
/// With `fail_closed` (the default), an unauthorized cross-space request
/// records a deny audit event and returns [`EngramError::PolicyDeny`]
/// carrying that event's id. With `fail_closed == false` the deny is
/// reported in-band instead.
pub fn authorize_recall(
    state: &mut ProfileState,
    operation: &str,
    store_id: &str,
    requester_store_id: &str,
    fail_closed: bool,
    timestamp: &str,
) -> EngramResult<RecallAuthorization> {
    if requester_store_id == store_id {
        return Ok(RecallAuthorization {
            authorized: true,
            audit_event_id: None,
        });
    }

    let allowed = state
        .recall_policy
        .allowed_store_ids
        .iter()
        .any(|id| id == requester_store_id);

    let outcome = if allowed { "allow" } else { "deny" };
    let reason_codes = if allowed {
        vec!["cross_space_allowlisted".to_string()]
    } else {
        vec!["cross_space_not_allowlisted".to_string()]
    };
    let policy_id = state.recall_policy.policy_id.clone();
    let audit_event_id = record_audit(
        state,
        operation,
        &policy_id,
        outcome,
        reason_codes,
        json!({
            "requesterStoreId": requester_store_id,
            "storeId": store_id,
        }),
        timestamp,
    );

    if allowed {
        return Ok(RecallAuthorization {
            authorized: true,
            audit_event_id: Some(audit_event_id),
        });
    }

    warn!(
        requester = requester_store_id,
        store = store_id,
        operation, "cross-space recall denied"
    );
    if fail_closed {
        return Err(EngramError::policy_deny(
            format!("store {requester_store_id} is not allowlisted for {store_id}"),
            Some(audit_event_id),
        ));
    }
    Ok(RecallAuthorization {
        authorized: false,
        audit_event_id: Some(audit_event_id),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_store_needs_no_allowlist() {
        let mut state = ProfileState::new("space-a", "__store_default__");
        let auth = authorize_recall(&mut state, "context", "space-a", "space-a", true, "1970-01-01T00:00:00.000Z")
            .unwrap();
        assert!(auth.authorized);
        assert!(auth.audit_event_id.is_none());
        assert!(state.policy_audit_trail.is_empty());
    }

    #[test]
    fn unlisted_requester_fails_closed_with_audit() {
        let mut state = ProfileState::new("space-a", "__store_default__");
        let err = authorize_recall(&mut state, "context", "space-a", "space-b", true, "1970-01-01T00:00:00.000Z")
            .unwrap_err();
        assert_eq!(err.code(), "PERSONALIZATION_POLICY_DENY");
        assert_eq!(state.policy_audit_trail.len(), 1);
        assert_eq!(state.policy_audit_trail[0].outcome, "deny");
    }

    #[test]
    fn open_mode_reports_denial_in_band() {
        let mut state = ProfileState::new("space-a", "__store_default__");
        let auth = authorize_recall(&mut state, "context", "space-a", "space-b", false, "1970-01-01T00:00:00.000Z")
            .unwrap();
        assert!(!auth.authorized);
        assert!(auth.audit_event_id.is_some());
    }

    #[test]
    fn allowlisted_requester_is_recorded_and_allowed() {
        let mut state = ProfileState::new("space-a", "__store_default__");
        state
            .recall_policy
            .allowed_store_ids
            .push("space-b".to_string());
        let auth = authorize_recall(&mut state, "context", "space-a", "space-b", true, "1970-01-01T00:00:00.000Z")
            .unwrap();
        assert!(auth.authorized);
        assert_eq!(state.policy_audit_trail[0].outcome, "allow");
    }
}
