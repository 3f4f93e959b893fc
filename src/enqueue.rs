//! Producer API.
//!
//! Computes the priority score and hands the whole insertion to the atomic
//! enqueue operation. No execution happens here; the call either succeeds
//! (the job is now schedulable) or returns an error. There is no
//! partial-success state.

use crate::backend::Backend;
use crate::error::Result;
use crate::model::{EnqueueRequest, OverwritePolicy, now_ns, priority_score};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default lifetime of the active marker planted with a fresh pointer.
pub const DEFAULT_ACTIVATION_TTL: Duration = Duration::from_secs(60);

pub struct Enqueuer {
    backend: Arc<dyn Backend>,
    activation_ttl: Duration,
}

impl Enqueuer {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            activation_ttl: DEFAULT_ACTIVATION_TTL,
        }
    }

    /// Override the active-marker lifetime. A marker that outlives its
    /// owner's drain blocks re-activation of the key until it lapses; a
    /// marker that lapses mid-drain at worst plants a duplicate pointer,
    /// which runners resolve through the ownership arbitration.
    pub fn with_activation_ttl(mut self, ttl: Duration) -> Self {
        self.activation_ttl = ttl;
        self
    }

    /// Schedule a job. Returns whether a payload already existed under
    /// `job_id`, letting the caller detect duplicate scheduling.
    ///
    /// Jobs sharing an `affinity_key` execute strictly in enqueue order
    /// while one runner owns the key; jobs without one are ordered only by
    /// priority score.
    pub async fn enqueue(
        &self,
        queue: &str,
        job_id: &str,
        priority: u32,
        payload: Vec<u8>,
        affinity_key: Option<&str>,
        policy: OverwritePolicy,
    ) -> Result<bool> {
        let score = priority_score(priority, now_ns());
        let existed = self
            .backend
            .enqueue(&EnqueueRequest {
                queue: queue.to_string(),
                job_id: job_id.to_string(),
                score,
                affinity_key: affinity_key.map(str::to_string),
                payload,
                policy,
                activation_ttl: self.activation_ttl,
            })
            .await?;

        debug!(
            queue = queue,
            job_id = job_id,
            priority = priority,
            affinity_key = affinity_key.unwrap_or("-"),
            existed = existed,
            "job enqueued"
        );
        metrics::jobs_enqueued().add(
            1,
            &[
                KeyValue::new("queue", queue.to_string()),
                KeyValue::new("result", if existed { "duplicate" } else { "ok" }),
            ],
        );
        Ok(existed)
    }
}
