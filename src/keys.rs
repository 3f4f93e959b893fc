//! Redis key naming.
//!
//! One prefix per backend structure. The four atomic operations address a
//! mutually consistent set of these keys per queue / affinity key; nothing
//! outside this module builds key strings.

pub const PREFIX: &str = "radish";

/// Sorted set of pending queue entries, ordered by priority score.
pub fn queue(queue: &str) -> String {
    format!("{PREFIX}:queue:{queue}")
}

/// Consume-once payload slot for one job id.
pub fn payload(job_id: &str) -> String {
    format!("{PREFIX}:payload:{job_id}")
}

/// FIFO list of pending job ids for one affinity key.
pub fn affinity_list(affinity_key: &str) -> String {
    format!("{PREFIX}:affinity:{affinity_key}")
}

/// Owning runner id for one affinity key (carries the liveness TTL).
pub fn owner(affinity_key: &str) -> String {
    format!("{PREFIX}:owner:{affinity_key}")
}

/// Last-activity timestamp for one affinity key's owner.
pub fn activity(affinity_key: &str) -> String {
    format!("{PREFIX}:activity:{affinity_key}")
}

/// Marker: the affinity key has a pointer in some queue or a runner
/// draining it, so producers must not add another pointer.
pub fn active(affinity_key: &str) -> String {
    format!("{PREFIX}:active:{affinity_key}")
}

/// Hash of per-worker execution counters for one queue.
pub fn running(queue: &str) -> String {
    format!("{PREFIX}:running:{queue}")
}
