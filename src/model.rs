//! Core data model.
//!
//! A job is an opaque payload plus routing metadata. The queue layer never
//! inspects payload bytes; it orders pointers to them by a time-decayed
//! priority score and, for jobs sharing an affinity key, drains them in
//! strict FIFO order under exclusive ownership.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A job handed to a [`JobHandler`](crate::handler::JobHandler).
///
/// Consumed exactly once: the payload is read-and-cleared atomically from
/// the unique job store before execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier, supplied by the producer.
    pub id: String,

    /// Logical queue the job was popped from.
    pub queue: String,

    /// Serialized payload. Opaque to this layer.
    pub payload: Vec<u8>,
}

/// What to do when a payload already exists under the same job id.
///
/// A per-call parameter: re-enqueueing the same job id either preserves the
/// stored payload or replaces it, chosen by the producer each time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverwritePolicy {
    /// Keep the existing payload (set-if-absent).
    IfAbsent,
    /// Replace the existing payload unconditionally.
    Overwrite,
}

/// Everything the atomic enqueue operation needs.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub queue: String,
    pub job_id: String,
    pub score: f64,
    pub affinity_key: Option<String>,
    pub payload: Vec<u8>,
    pub policy: OverwritePolicy,
    /// Lifetime of the active marker planted with a fresh affinity
    /// pointer. Once the marker lapses, an enqueue plants a replacement
    /// pointer, so a crashed drain stalls its key at most this long.
    pub activation_ttl: Duration,
}

// ---------------------------------------------------------------------------
// Queue entries
// ---------------------------------------------------------------------------

/// A member of a queue's sorted set: either a direct job pointer or a
/// pointer to an affinity key whose list holds the actual job ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEntry {
    Job(String),
    Affinity(String),
}

const JOB_TAG: &str = "j:";
const AFFINITY_TAG: &str = "k:";

impl QueueEntry {
    /// Stable member encoding so both kinds share one sorted set.
    pub fn encode(&self) -> String {
        match self {
            QueueEntry::Job(id) => format!("{JOB_TAG}{id}"),
            QueueEntry::Affinity(key) => format!("{AFFINITY_TAG}{key}"),
        }
    }

    /// Decode a sorted-set member. Affinity keys may themselves contain
    /// separators ("doc:42"), so only the two-byte tag is stripped.
    pub fn decode(member: &str) -> Option<Self> {
        if let Some(id) = member.strip_prefix(JOB_TAG) {
            Some(QueueEntry::Job(id.to_string()))
        } else {
            member
                .strip_prefix(AFFINITY_TAG)
                .map(|key| QueueEntry::Affinity(key.to_string()))
        }
    }
}

impl std::fmt::Display for QueueEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueEntry::Job(id) => write!(f, "job {id}"),
            QueueEntry::Affinity(key) => write!(f, "affinity {key}"),
        }
    }
}

/// An entry popped from a queue, with enough context to re-insert it at its
/// original position if shutdown interrupts dispatch.
#[derive(Debug, Clone)]
pub struct PoppedEntry {
    pub queue: String,
    pub entry: QueueEntry,
    pub score: f64,
}

// ---------------------------------------------------------------------------
// Priority score
// ---------------------------------------------------------------------------

/// Nanoseconds since the epoch. Saturates past the chrono i64 horizon
/// (year 2262).
pub fn now_ns() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// Score for a queue entry: `now_ns / 10^priority`.
///
/// Higher priority divides harder, yielding a smaller score, so an
/// ascending-score pop dequeues it sooner. Within one priority the embedded
/// enqueue time breaks ties FIFO.
pub fn priority_score(priority: u32, now_ns: i64) -> f64 {
    now_ns as f64 / 10f64.powi(priority as i32)
}

// ---------------------------------------------------------------------------
// Affinity arbitration outcomes
// ---------------------------------------------------------------------------

/// Result of the atomic claim operation for one affinity key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// This runner owns the key and popped the next job id (FIFO).
    Job(String),
    /// This runner owns the key but its list is empty.
    Empty,
    /// A different runner is the recorded owner; not authorized.
    NotOwner,
}

/// Result of the atomic termination check. All three outcomes are explicit
/// values; "continue" is never an absent reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Work remains and this runner still owns the key.
    Continue,
    /// List empty and still owner: ownership records were deleted.
    Clean,
    /// A foreign owner is recorded: terminate with no cleanup, the new
    /// owner owns the bookkeeping now.
    Foreign,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_encoding_round_trips() {
        let job = QueueEntry::Job("j-1".to_string());
        assert_eq!(QueueEntry::decode(&job.encode()), Some(job));

        // Affinity keys with embedded separators survive
        let aff = QueueEntry::Affinity("doc:42".to_string());
        assert_eq!(aff.encode(), "k:doc:42");
        assert_eq!(QueueEntry::decode(&aff.encode()), Some(aff));

        assert_eq!(QueueEntry::decode("bogus"), None);
    }

    #[test]
    fn higher_priority_scores_smaller() {
        let t = now_ns();
        assert!(priority_score(5, t) < priority_score(1, t));
        assert!(priority_score(1, t) < priority_score(0, t));
    }

    #[test]
    fn equal_priority_preserves_enqueue_order() {
        let a = priority_score(2, 1_000_000_000_000);
        let b = priority_score(2, 1_000_000_100_000);
        assert!(a < b);
    }
}
