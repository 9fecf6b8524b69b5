//! Deterministic operation dispatcher for Engram
//!
//! `Engine::execute(operation, request)` is the whole contract: JSON in,
//! JSON out, every response a pure function of `(prior state, request)`.
//! Handlers normalize first, merge through the state lattice, then derive
//! observability and audit entries. Identical inputs always produce
//! byte-identical responses and digests.

pub mod audit;
pub mod authorize;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod ops;
pub mod support;

pub use config::EngineConfig;
pub use dispatch::Operation;
pub use engine::{Engine, OpCtx};
