//! Typed request parsers
//!
//! Every operation handler validates through this crate before touching
//! state. Parsers either produce a value in canonical form or fail with a
//! contract violation; nothing here mutates anything, so a failed parse
//! leaves no trace.

pub mod parse;
pub mod signals;

pub use parse::{
    bounded_string, clamp_unit, evidence_pointers, guarded_string_array, iso_timestamp,
    optional_bool, optional_f64, optional_u64, policy_exception, required_string, sorted_unique,
};
pub use signals::agent_signals;
