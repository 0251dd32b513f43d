//! Monotonic wall time and opaque ID generation (C1).
//!
//! All sortable instants in the store are UTC and generated from a single
//! `now()` so tests can observe a consistent ordering; production code has no
//! reason to call `chrono::Utc::now()` directly outside this module.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Current UTC wall-clock time.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// A fresh opaque identifier, used for Channel/Episode/QueueItem primary keys.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// A run nonce for temp file names, distinct from the entity id so two runs
/// of the same episode (e.g. after a cancellation) never collide on disk.
pub fn new_nonce() -> String {
    Uuid::new_v4().simple().to_string()
}
