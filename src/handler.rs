//! Job handler seam.
//!
//! The execution side of the queue is a single entry point: the worker
//! deserializes nothing and interprets nothing, it hands the opaque payload
//! to whatever implements [`JobHandler`].

use crate::error::{Error, Result};
use crate::model::Job;
use std::sync::Arc;

/// Executes one job. Implementations are shared across the worker's task
/// pool, so `handle` takes `&self`.
#[async_trait::async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: Job) -> Result<()>;
}

/// Callback invoked when a handler fails. Receives the error and the queue
/// the job came from. Failures terminate only the one task that ran the
/// job, never the worker process.
pub type ErrorHandler = Arc<dyn Fn(&Error, &str) + Send + Sync>;

/// An error handler that just logs. Useful as a default.
pub fn log_errors() -> ErrorHandler {
    Arc::new(|err, queue| {
        tracing::error!(queue = queue, error = %err, "job handler failed");
    })
}
