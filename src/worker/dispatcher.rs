//! Dispatch loop: Running → Stopping → Finished.
//!
//! One long-running loop pops entries across the configured queues with a
//! bounded timeout (the timeout bounds shutdown latency, not correctness)
//! and dispatches each onto a fixed-size task pool: affinity entries spawn
//! an [`AffinityRunner`](super::affinity::AffinityRunner), plain job
//! entries run the handler directly.

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::handler::{ErrorHandler, JobHandler};
use crate::model::QueueEntry;
use crate::redis::{ConnectionRegistry, RedisBackend};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::affinity::AffinityRunner;

const RUNNING: u8 = 0;
const STOPPING: u8 = 1;
const FINISHED: u8 = 2;

#[derive(Debug, Clone, Copy)]
pub struct WorkerConfig {
    /// Maximum concurrent tasks: one per in-flight job or per affinity key
    /// being drained.
    pub pool_size: usize,
    /// Upper bound on one blocking pop. Shutdown is observed at the top of
    /// the loop, so this also bounds shutdown latency.
    pub pop_timeout: Duration,
    /// Liveness TTL for affinity ownership records.
    pub ownership_ttl: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            pop_timeout: Duration::from_secs(2),
            ownership_ttl: Duration::from_secs(30),
        }
    }
}

/// A worker process's dispatch loop plus its task pool.
pub struct Worker {
    backend: Arc<dyn Backend>,
    handler: Arc<dyn JobHandler>,
    error_handler: ErrorHandler,
    config: WorkerConfig,
    worker_id: String,
    state: Arc<AtomicU8>,
    loop_handle: Option<JoinHandle<Result<()>>>,
}

impl Worker {
    pub fn new(
        backend: Arc<dyn Backend>,
        handler: Arc<dyn JobHandler>,
        error_handler: ErrorHandler,
        config: WorkerConfig,
    ) -> Self {
        Self {
            backend,
            handler,
            error_handler,
            config,
            worker_id: format!("worker-{}", Uuid::new_v4()),
            state: Arc::new(AtomicU8::new(RUNNING)),
            loop_handle: None,
        }
    }

    /// Bootstrap against a Redis URL through a shared connection registry.
    pub async fn connect(
        registry: Arc<ConnectionRegistry>,
        url: &str,
        handler: Arc<dyn JobHandler>,
        error_handler: ErrorHandler,
        config: WorkerConfig,
    ) -> Result<Self> {
        let backend = RedisBackend::connect(registry, url).await?;
        Ok(Self::new(Arc::new(backend), handler, error_handler, config))
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn is_finished(&self) -> bool {
        self.state.load(Ordering::SeqCst) == FINISHED
    }

    /// Spawn the dispatch loop over `queues`. Idempotent per worker: a
    /// second call is ignored.
    pub fn start(&mut self, queues: Vec<String>) {
        if self.loop_handle.is_some() {
            warn!("worker already started");
            return;
        }
        let dispatch = DispatchLoop {
            backend: Arc::clone(&self.backend),
            handler: Arc::clone(&self.handler),
            error_handler: Arc::clone(&self.error_handler),
            config: self.config,
            worker_id: self.worker_id.clone(),
            state: Arc::clone(&self.state),
            pool: Arc::new(Semaphore::new(self.config.pool_size)),
            queues,
        };
        self.loop_handle = Some(tokio::spawn(dispatch.run()));
    }

    /// Graceful stop: request Stopping, then block until the loop has
    /// drained all in-flight tasks and reached Finished.
    pub async fn finish(&mut self) -> Result<()> {
        let _ = self
            .state
            .compare_exchange(RUNNING, STOPPING, Ordering::SeqCst, Ordering::SeqCst);
        match self.loop_handle.take() {
            Some(handle) => handle
                .await
                .map_err(|e| Error::Other(format!("dispatch loop panicked: {e}")))?,
            None => {
                // Never started: nothing to drain.
                self.state.store(FINISHED, Ordering::SeqCst);
                Ok(())
            }
        }
    }
}

struct DispatchLoop {
    backend: Arc<dyn Backend>,
    handler: Arc<dyn JobHandler>,
    error_handler: ErrorHandler,
    config: WorkerConfig,
    worker_id: String,
    state: Arc<AtomicU8>,
    pool: Arc<Semaphore>,
    queues: Vec<String>,
}

impl DispatchLoop {
    async fn run(self) -> Result<()> {
        info!(
            worker_id = %self.worker_id,
            queues = ?self.queues,
            pool_size = self.config.pool_size,
            "worker started"
        );

        let result = self.pump().await;
        if let Err(ref e) = result {
            error!(worker_id = %self.worker_id, error = %e, "dispatch loop aborted");
        }

        // Finished only once every in-flight pool task has completed.
        let _all = self
            .pool
            .acquire_many(self.config.pool_size as u32)
            .await
            .map_err(|_| Error::Other("worker pool closed unexpectedly".to_string()))?;
        self.state.store(FINISHED, Ordering::SeqCst);
        info!(worker_id = %self.worker_id, "worker finished");
        result
    }

    async fn pump(&self) -> Result<()> {
        loop {
            if self.state.load(Ordering::SeqCst) != RUNNING {
                return Ok(());
            }

            let Some(popped) = self
                .backend
                .pop_entry(&self.queues, self.config.pop_timeout)
                .await?
            else {
                continue;
            };

            // Popped but not yet dispatched when shutdown was requested:
            // put it back at its original score so no work is lost.
            if self.state.load(Ordering::SeqCst) != RUNNING {
                self.backend
                    .requeue_entry(&popped.queue, &popped.entry, popped.score)
                    .await?;
                return Ok(());
            }

            self.dispatch(popped.queue, popped.entry).await?;
        }
    }

    async fn dispatch(&self, queue: String, entry: QueueEntry) -> Result<()> {
        match entry {
            QueueEntry::Affinity(key) => {
                let permit = Arc::clone(&self.pool)
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::Other("worker pool closed unexpectedly".to_string()))?;
                let runner = AffinityRunner::new(
                    Arc::clone(&self.backend),
                    Arc::clone(&self.handler),
                    Arc::clone(&self.error_handler),
                    queue,
                    key.clone(),
                    self.worker_id.clone(),
                    self.config.ownership_ttl,
                );
                tokio::spawn(async move {
                    if let Err(e) = runner.run().await {
                        error!(key = %key, error = %e, "affinity runner aborted");
                    }
                    drop(permit);
                });
            }
            QueueEntry::Job(job_id) => {
                let Some(payload) = self.backend.take_payload(&job_id).await? else {
                    debug!(job_id = %job_id, "payload already consumed, skipping");
                    return Ok(());
                };
                let permit = Arc::clone(&self.pool)
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::Other("worker pool closed unexpectedly".to_string()))?;
                let backend = Arc::clone(&self.backend);
                let handler = Arc::clone(&self.handler);
                let error_handler = Arc::clone(&self.error_handler);
                let worker_id = self.worker_id.clone();
                tokio::spawn(async move {
                    if let Err(e) = super::execute_job(
                        &backend,
                        &handler,
                        &error_handler,
                        &worker_id,
                        &queue,
                        job_id,
                        payload,
                    )
                    .await
                    {
                        error!(error = %e, "job task aborted");
                    }
                    drop(permit);
                });
            }
        }
        Ok(())
    }
}
