//! Worker side: dispatch loop and affinity runners.

mod affinity;
mod dispatcher;

pub use dispatcher::{Worker, WorkerConfig};

use crate::backend::Backend;
use crate::error::Result;
use crate::handler::{ErrorHandler, JobHandler};
use crate::model::Job;
use crate::telemetry::{job::start_job_span, metrics};
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument as _;

/// Run one job through the handler. Handler failures are routed to the
/// error callback and end here, they never cross the task boundary.
/// The execution counter bump afterwards feeds the monitoring facet.
pub(crate) async fn execute_job(
    backend: &Arc<dyn Backend>,
    handler: &Arc<dyn JobHandler>,
    error_handler: &ErrorHandler,
    worker_id: &str,
    queue: &str,
    job_id: String,
    payload: Vec<u8>,
) -> Result<()> {
    let span = start_job_span(queue, &job_id);
    let started = Instant::now();
    let result = handler
        .handle(Job {
            id: job_id,
            queue: queue.to_string(),
            payload,
        })
        .instrument(span)
        .await;

    metrics::handler_duration_ms().record(
        started.elapsed().as_secs_f64() * 1000.0,
        &[KeyValue::new("queue", queue.to_string())],
    );
    let outcome = match result {
        Ok(()) => "ok",
        Err(ref err) => {
            error_handler(err, queue);
            "error"
        }
    };
    metrics::jobs_executed().add(
        1,
        &[
            KeyValue::new("queue", queue.to_string()),
            KeyValue::new("result", outcome),
        ],
    );

    backend.record_execution(queue, worker_id).await
}
