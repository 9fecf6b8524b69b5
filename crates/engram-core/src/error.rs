//! Unified error type for Engram operations
//!
//! One enum covers the whole taxonomy: contract violations, missing
//! evidence, policy denials, unsupported operations, and persistence-gate
//! failures. Each variant maps to a stable wire code via [`EngramError::code`]
//! and renders into the host error envelope via [`EngramError::envelope`].

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Standard result type for Engram operations.
pub type EngramResult<T> = Result<T, EngramError>;

/// Unified error type for all Engram operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum EngramError {
    /// Malformed request: bad type, missing field, out-of-range value.
    #[error("{message}")]
    ContractViolation {
        /// Stable wire code for the violation
        code: String,
        /// Human-readable description of the breach
        message: String,
    },

    /// A handler that requires evidence was invoked without any.
    #[error("{message}")]
    EvidenceMissing {
        /// Fixed per-operation message
        message: String,
    },

    /// Cross-space recall denied by the allowlist policy.
    #[error("{message}")]
    PolicyDeny {
        /// Description of the denial
        message: String,
        /// Audit event recorded before the denial surfaced
        policy_audit_event_id: Option<String>,
    },

    /// Unknown operation name.
    #[error("unsupported operation: {operation}")]
    Unsupported {
        /// The operation name as received (after trim+lowercase)
        operation: String,
    },

    /// The shared-state lock could not be acquired in time.
    #[error("timed out acquiring state lock at {path}")]
    LockTimeout {
        /// Lock file path
        path: String,
    },

    /// The shared-state file exists but does not parse.
    #[error("state file corrupt at {path}: {message}")]
    StateCorrupt {
        /// State file path
        path: String,
        /// Parse failure detail
        message: String,
    },

    /// Filesystem failure in the persistence gate.
    #[error("storage error: {message}")]
    Storage {
        /// Underlying I/O detail
        message: String,
    },
}

impl EngramError {
    /// Create a generic contract violation.
    pub fn contract(message: impl Into<String>) -> Self {
        Self::ContractViolation {
            code: "VALIDATION_CONTRACT_VIOLATION".to_string(),
            message: message.into(),
        }
    }

    /// Create a contract violation with an explicit code.
    pub fn contract_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ContractViolation {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Create an evidence-missing error.
    pub fn evidence(message: impl Into<String>) -> Self {
        Self::EvidenceMissing {
            message: message.into(),
        }
    }

    /// Create a policy denial, optionally carrying the recorded audit event.
    pub fn policy_deny(message: impl Into<String>, audit_event_id: Option<String>) -> Self {
        Self::PolicyDeny {
            message: message.into(),
            policy_audit_event_id: audit_event_id,
        }
    }

    /// Create an unsupported-operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Stable wire code for this error.
    pub fn code(&self) -> &str {
        match self {
            Self::ContractViolation { code, .. } => code,
            Self::EvidenceMissing { .. } => "EVIDENCE_POINTER_CONTRACT_VIOLATION",
            Self::PolicyDeny { .. } => "PERSONALIZATION_POLICY_DENY",
            Self::Unsupported { .. } => "UNSUPPORTED_OPERATION",
            Self::LockTimeout { .. } => "STATE_LOCK_TIMEOUT",
            Self::StateCorrupt { .. } => "STATE_FILE_CORRUPT",
            Self::Storage { .. } => "STATE_IO",
        }
    }

    /// Render the host-facing error envelope: `{ok:false, error:{code,message}}`.
    pub fn envelope(&self) -> Value {
        let mut error = json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        if let Self::PolicyDeny {
            policy_audit_event_id: Some(id),
            ..
        } = self
        {
            if let Some(map) = error.as_object_mut() {
                map.insert("policyAuditEventId".to_string(), json!(id));
            }
        }
        json!({ "ok": false, "error": error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            EngramError::contract("bad").code(),
            "VALIDATION_CONTRACT_VIOLATION"
        );
        assert_eq!(
            EngramError::evidence("need evidence").code(),
            "EVIDENCE_POINTER_CONTRACT_VIOLATION"
        );
        assert_eq!(
            EngramError::unsupported("nope").code(),
            "UNSUPPORTED_OPERATION"
        );
    }

    #[test]
    fn deny_envelope_carries_audit_event() {
        let err = EngramError::policy_deny("denied", Some("aud_abc123def456".to_string()));
        let envelope = err.envelope();
        assert_eq!(envelope["ok"], false);
        assert_eq!(envelope["error"]["code"], "PERSONALIZATION_POLICY_DENY");
        assert_eq!(envelope["error"]["policyAuditEventId"], "aud_abc123def456");
    }
}
