//! Affinity runner: ordered, exclusive, self-terminating.
//!
//! One runner drains one affinity key's list sequentially under exclusive,
//! TTL-bounded ownership. Without the ownership record two runners could
//! interleave a key's backlog; the TTL, refreshed only by the legitimate
//! owner, bounds how long a crashed runner can stall the key before
//! another may take over.

use crate::backend::Backend;
use crate::error::Result;
use crate::handler::{ErrorHandler, JobHandler};
use crate::model::{ClaimOutcome, Termination};
use crate::telemetry::{job::start_runner_span, metrics};
use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument as _, debug, info};
use uuid::Uuid;

pub(crate) struct AffinityRunner {
    backend: Arc<dyn Backend>,
    handler: Arc<dyn JobHandler>,
    error_handler: ErrorHandler,
    queue: String,
    affinity_key: String,
    worker_id: String,
    ownership_ttl: Duration,
    /// Ephemeral identity, fresh per invocation. Used solely to answer
    /// "do I still own this key".
    runner_id: String,
}

impl AffinityRunner {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        backend: Arc<dyn Backend>,
        handler: Arc<dyn JobHandler>,
        error_handler: ErrorHandler,
        queue: String,
        affinity_key: String,
        worker_id: String,
        ownership_ttl: Duration,
    ) -> Self {
        Self {
            backend,
            handler,
            error_handler,
            queue,
            affinity_key,
            worker_id,
            ownership_ttl,
            runner_id: Uuid::new_v4().to_string(),
        }
    }

    /// Drain the key until its list is empty or ownership is lost. There is
    /// no external cancel; no handler is preempted mid-execution.
    pub(crate) async fn run(self) -> Result<()> {
        let span = start_runner_span(&self.affinity_key, &self.runner_id);
        self.drain().instrument(span).await
    }

    async fn drain(&self) -> Result<()> {
        loop {
            let claim = self
                .backend
                .claim_next_affinity_job(&self.affinity_key, &self.runner_id, self.ownership_ttl)
                .await?;
            metrics::affinity_claims().add(
                1,
                &[KeyValue::new(
                    "outcome",
                    match claim {
                        ClaimOutcome::Job(_) => "job",
                        ClaimOutcome::Empty => "empty",
                        ClaimOutcome::NotOwner => "not_owner",
                    },
                )],
            );

            let job_id = match claim {
                ClaimOutcome::Job(job_id) => job_id,
                ClaimOutcome::NotOwner => {
                    debug!(key = %self.affinity_key, "foreign owner, runner exits");
                    return Ok(());
                }
                ClaimOutcome::Empty => {
                    // The claim may just have created ownership for an
                    // already-drained key; the check removes the records
                    // we would otherwise leak. A producer may also append
                    // between the empty pop and the check, in which case
                    // the verdict says to keep draining.
                    match self.terminate_check().await? {
                        Termination::Continue => continue,
                        Termination::Clean | Termination::Foreign => return Ok(()),
                    }
                }
            };

            match self.backend.take_payload(&job_id).await? {
                Some(payload) => {
                    super::execute_job(
                        &self.backend,
                        &self.handler,
                        &self.error_handler,
                        &self.worker_id,
                        &self.queue,
                        job_id,
                        payload,
                    )
                    .await?;
                }
                None => {
                    debug!(job_id = %job_id, "payload already consumed, skipping");
                }
            }

            match self.terminate_check().await? {
                Termination::Continue => continue,
                Termination::Clean => {
                    info!(key = %self.affinity_key, "affinity key drained");
                    return Ok(());
                }
                Termination::Foreign => {
                    // New owner owns the cleanup.
                    debug!(key = %self.affinity_key, "ownership lost, runner exits");
                    return Ok(());
                }
            }
        }
    }

    async fn terminate_check(&self) -> Result<Termination> {
        let verdict = self
            .backend
            .termination_check(&self.affinity_key, &self.runner_id)
            .await?;
        if let Some(label) = match verdict {
            Termination::Clean => Some("clean"),
            Termination::Foreign => Some("foreign"),
            Termination::Continue => None,
        } {
            metrics::affinity_terminations().add(1, &[KeyValue::new("verdict", label)]);
        }
        Ok(verdict)
    }
}
