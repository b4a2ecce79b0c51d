//! Local identifier generation for nodes and jobs.
//!
//! Identifiers are the hex-encoded SHA-256 digest of the current wall-clock
//! time, a process-local counter and a caller supplied name. They are unique
//! within one master process; they are not secrets.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use sha2::{Digest, Sha256};

static NONCE: AtomicU64 = AtomicU64::new(0);

/// Digest `name` together with the current time into a 64-character hex id.
pub fn generate_id(name: &str) -> String {
    let millis = Utc::now().timestamp_millis();
    let nonce = NONCE.fetch_add(1, Ordering::Relaxed);

    let mut hasher = Sha256::new();
    hasher.update(millis.to_be_bytes());
    hasher.update(nonce.to_be_bytes());
    hasher.update(name.as_bytes());
    hex::encode(hasher.finalize())
}

/// Identifier for a worker node, derived from its display name.
pub fn node_id(name: &str) -> String {
    generate_id(name)
}

/// Identifier for a job, derived from its source file and name.
pub fn job_id(source_file: &str, job_name: &str) -> String {
    generate_id(&format!("{source_file}{job_name}"))
}
