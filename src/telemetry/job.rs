//! Job execution span helpers.

use tracing::Span;

/// Start a span covering one job handler invocation.
pub fn start_job_span(queue: &str, job_id: &str) -> Span {
    tracing::info_span!(
        "job.execute",
        "job.queue" = queue,
        "job.id" = job_id,
    )
}

/// Start a span covering one affinity runner's tenure over a key.
pub fn start_runner_span(affinity_key: &str, runner_id: &str) -> Span {
    tracing::info_span!(
        "affinity.drain",
        "affinity.key" = affinity_key,
        "runner.id" = runner_id,
    )
}
