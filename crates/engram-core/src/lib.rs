//! Foundation types for Engram
//!
//! This crate provides the deterministic substrate every other Engram crate
//! builds on: canonical JSON encoding and SHA-256 content addressing, the
//! unified error type, and pure timestamp arithmetic. Nothing in here reads
//! the wall clock, the environment, or the filesystem.

pub mod canonical;
pub mod clock;
pub mod constants;
pub mod error;
pub mod prelude;

pub use canonical::{canonicalize, digest, make_id, round6, stringify};
pub use clock::{add_days, age_days, normalize_timestamp, EPOCH};
pub use error::{EngramError, EngramResult};
