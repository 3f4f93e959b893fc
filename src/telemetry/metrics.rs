//! Metric instrument factories.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"radish"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("radish")
}

/// Counter: jobs enqueued.
/// Labels: `queue`, `result` ("ok" | "duplicate").
pub fn jobs_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("radish.jobs.enqueued")
        .with_description("Number of jobs enqueued")
        .build()
}

/// Counter: queue-level operations (enqueue, pop, requeue).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("radish.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Counter: handler invocations.
/// Labels: `queue`, `result` ("ok" | "error").
pub fn jobs_executed() -> Counter<u64> {
    meter()
        .u64_counter("radish.jobs.executed")
        .with_description("Number of job handler invocations")
        .build()
}

/// Counter: affinity claim outcomes.
/// Labels: `outcome` ("job" | "empty" | "not_owner").
pub fn affinity_claims() -> Counter<u64> {
    meter()
        .u64_counter("radish.affinity.claims")
        .with_description("Affinity claim outcomes")
        .build()
}

/// Counter: affinity runner terminations.
/// Labels: `verdict` ("clean" | "foreign").
pub fn affinity_terminations() -> Counter<u64> {
    meter()
        .u64_counter("radish.affinity.terminations")
        .with_description("Affinity runner termination verdicts")
        .build()
}

/// Histogram: handler execution duration in milliseconds.
/// Labels: `queue`.
pub fn handler_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("radish.handler.duration_ms")
        .with_description("Job handler duration in milliseconds")
        .with_unit("ms")
        .build()
}
