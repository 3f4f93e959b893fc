//! Read-only depth/throughput introspection.
//!
//! The authorization gate is supplied by the caller; it protects the facet,
//! it is not part of queue correctness. The running counters are written by
//! worker instrumentation; this facet only reads and resets them.

use crate::backend::Backend;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Caller-supplied role check for monitoring access.
pub trait AccessPolicy: Send + Sync {
    fn can_inspect(&self) -> bool;
}

/// Policy that admits everyone. For tests and trusted CLIs.
pub struct AllowAll;

impl AccessPolicy for AllowAll {
    fn can_inspect(&self) -> bool {
        true
    }
}

pub struct Monitor {
    backend: Arc<dyn Backend>,
    queues: Vec<String>,
    policy: Arc<dyn AccessPolicy>,
}

impl Monitor {
    pub fn new(backend: Arc<dyn Backend>, queues: Vec<String>, policy: Arc<dyn AccessPolicy>) -> Self {
        Self {
            backend,
            queues,
            policy,
        }
    }

    fn authorize(&self) -> Result<()> {
        if self.policy.can_inspect() {
            Ok(())
        } else {
            Err(Error::Unauthorized("queue monitoring"))
        }
    }

    /// Pending entries per configured queue, regardless of score.
    pub async fn get_queue_depth(&self) -> Result<HashMap<String, u64>> {
        self.authorize()?;
        let mut depths = HashMap::with_capacity(self.queues.len());
        for queue in &self.queues {
            depths.insert(queue.clone(), self.backend.queue_depth(queue).await?);
        }
        Ok(depths)
    }

    /// Point-in-time per-worker execution counters for one queue.
    pub async fn get_running_counts(&self, queue: &str) -> Result<HashMap<String, u64>> {
        self.authorize()?;
        self.backend.running_counts(queue).await
    }

    pub async fn reset_running_counts(&self, queue: &str) -> Result<()> {
        self.authorize()?;
        self.backend.reset_running_counts(queue).await
    }
}
