//! Backend trait: the atomic-operation seam.
//!
//! The backend store is the sole source of truth for queue state, ownership,
//! and payloads. Every mutation goes through these operations; worker code
//! never read-then-writes shared state. [`RedisBackend`](crate::redis::RedisBackend)
//! implements them with server-side scripts; [`MemoryBackend`](crate::memory::MemoryBackend)
//! emulates the same atomicity under a single lock for tests and local dev.

use crate::error::Result;
use crate::model::{ClaimOutcome, EnqueueRequest, PoppedEntry, QueueEntry, Termination};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Atomic enqueue: queue-entry insertion, affinity bookkeeping, and
    /// payload storage in one step. Returns whether a payload already
    /// existed under this job id (duplicate scheduling detection).
    async fn enqueue(&self, req: &EnqueueRequest) -> Result<bool>;

    /// Blocking pop of the smallest-score entry across `queues`, waiting at
    /// most `timeout`. The timeout bounds shutdown latency, not correctness.
    async fn pop_entry(&self, queues: &[String], timeout: Duration)
    -> Result<Option<PoppedEntry>>;

    /// Re-insert an entry at its original score. Used when shutdown
    /// interrupts a pop that was never dispatched.
    async fn requeue_entry(&self, queue: &str, entry: &QueueEntry, score: f64) -> Result<()>;

    /// Atomic read-and-clear of a job's payload. `None` means the payload
    /// was already consumed; concurrent attempts never both succeed.
    async fn take_payload(&self, job_id: &str) -> Result<Option<Vec<u8>>>;

    /// Atomic claim for one affinity key: become owner if none is recorded,
    /// refresh the liveness TTL if already owner, then pop the next job id
    /// FIFO. A foreign recorded owner yields [`ClaimOutcome::NotOwner`].
    async fn claim_next_affinity_job(
        &self,
        affinity_key: &str,
        runner_id: &str,
        ttl: Duration,
    ) -> Result<ClaimOutcome>;

    /// Atomic termination check for one affinity key; deletes the
    /// ownership/activity/active records when the list is empty and this
    /// runner still owns the key.
    async fn termination_check(&self, affinity_key: &str, runner_id: &str)
    -> Result<Termination>;

    /// Total pending entries in a queue's sorted set, regardless of score.
    async fn queue_depth(&self, queue: &str) -> Result<u64>;

    /// Point-in-time per-worker execution counters for a queue.
    async fn running_counts(&self, queue: &str) -> Result<HashMap<String, u64>>;

    /// Clear the per-worker execution counters for a queue.
    async fn reset_running_counts(&self, queue: &str) -> Result<()>;

    /// Bump this worker's execution counter for a queue. Called by worker
    /// instrumentation after each handler invocation.
    async fn record_execution(&self, queue: &str, worker_id: &str) -> Result<()>;
}
