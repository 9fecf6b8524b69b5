//! Common imports for Engram crates
//!
//! `use engram_core::prelude::*;` pulls in the handful of items nearly every
//! module touches.

pub use crate::canonical::{canonicalize, digest, make_id, round6, stringify};
pub use crate::clock::{add_days, age_days, normalize_timestamp, EPOCH};
pub use crate::error::{EngramError, EngramResult};
