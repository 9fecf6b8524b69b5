//! System-wide bounds and defaults
//!
//! Single source of truth for every cap and default the engine enforces.

/// Maximum entries in any bounded string list.
pub const MAX_LIST_ITEMS: usize = 128;

/// Maximum characters in a bounded list item or short string field.
pub const MAX_ITEM_CHARS: usize = 256;

/// Maximum identity references on a learner profile.
pub const MAX_IDENTITY_REFS: usize = 32;

/// Maximum characters in an email identity value.
pub const MAX_EMAIL_CHARS: usize = 320;

/// Maximum characters in a display-name identity value.
pub const MAX_DISPLAY_NAME_CHARS: usize = 160;

/// Policy audit trail ring size; newest entries by `(timestamp, id)` survive.
pub const AUDIT_TRAIL_CAP: usize = 2048;

/// Chronology ring size for misconception and curriculum-conflict notes.
pub const CHRONOLOGY_CAP: usize = 2048;

/// Hard ceiling on the active review set limit.
pub const ACTIVE_REVIEW_SET_MAX: usize = 256;

/// Default active review set limit for a fresh profile.
pub const DEFAULT_ACTIVE_REVIEW_SET_LIMIT: usize = 32;

/// Default fatigue and novelty-write consolidation threshold.
pub const DEFAULT_SLEEP_THRESHOLD: f64 = 8.0;

/// Confidence floor for misconception decay.
pub const CONFIDENCE_FLOOR: f64 = 0.05;

/// Store used when a request names none.
pub const DEFAULT_STORE_ID: &str = "coding-agent";

/// Internal sentinel every request's profile resolves to.
pub const PROFILE_SENTINEL: &str = "__store_default__";
