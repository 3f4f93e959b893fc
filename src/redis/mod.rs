//! Redis connection registry and backend.
//!
//! The registry caches one multiplexed connection per URL and loads the
//! four atomic scripts when a connection is first created. It is built once
//! at process start and shared by producers and workers in the process.
//! A process-local cache, never a coordination point.

pub mod scripts;

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::keys;
use crate::model::{ClaimOutcome, EnqueueRequest, PoppedEntry, QueueEntry, Termination};
use crate::telemetry::metrics;
use async_trait::async_trait;
use opentelemetry::KeyValue;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use scripts::Scripts;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::warn;

/// Caches backend connections by URL; registers the four atomic operations
/// on each new connection. Connection failures propagate immediately, no
/// implicit retry.
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<String, MultiplexedConnection>>,
    scripts: Scripts,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            scripts: Scripts::new(),
        }
    }

    /// Cached, lazily-created connection for `url`.
    pub async fn get_connection(&self, url: &str) -> Result<MultiplexedConnection> {
        let mut connections = self.connections.lock().await;
        if let Some(conn) = connections.get(url) {
            return Ok(conn.clone());
        }

        let client = redis::Client::open(url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        for script in self.scripts.all() {
            script.prepare_invoke().load_async(&mut conn).await?;
        }
        connections.insert(url.to_string(), conn.clone());
        Ok(conn)
    }

    pub fn scripts(&self) -> &Scripts {
        &self.scripts
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Redis implementation of [`Backend`].
///
/// Shares the registry's multiplexed connection for scripted and plain
/// commands; blocking pops run on a dedicated connection so they cannot
/// stall claims issued by affinity runners in the same process.
pub struct RedisBackend {
    registry: Arc<ConnectionRegistry>,
    url: String,
    pop_conn: Mutex<Option<MultiplexedConnection>>,
}

impl RedisBackend {
    /// Connect eagerly so a bad URL fails here, not on first use.
    pub async fn connect(registry: Arc<ConnectionRegistry>, url: &str) -> Result<Self> {
        registry.get_connection(url).await?;
        Ok(Self {
            registry,
            url: url.to_string(),
            pop_conn: Mutex::new(None),
        })
    }

    async fn conn(&self) -> Result<MultiplexedConnection> {
        self.registry.get_connection(&self.url).await
    }

    fn scripts(&self) -> &Scripts {
        self.registry.scripts()
    }

    fn queue_op(queue: &str, operation: &'static str) {
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", queue.to_string()),
                KeyValue::new("operation", operation),
            ],
        );
    }
}

#[async_trait]
impl Backend for RedisBackend {
    async fn enqueue(&self, req: &EnqueueRequest) -> Result<bool> {
        let mut conn = self.conn().await?;
        let affinity = req.affinity_key.as_deref().unwrap_or("");
        let member = match &req.affinity_key {
            Some(key) => QueueEntry::Affinity(key.clone()).encode(),
            None => QueueEntry::Job(req.job_id.clone()).encode(),
        };
        let overwrite = matches!(req.policy, crate::model::OverwritePolicy::Overwrite);

        let existed: bool = self
            .scripts()
            .enqueue
            .key(keys::queue(&req.queue))
            .key(keys::payload(&req.job_id))
            .key(keys::affinity_list(affinity))
            .key(keys::active(affinity))
            .key(keys::owner(affinity))
            .key(keys::activity(affinity))
            .arg(req.score)
            .arg(&member)
            .arg(if req.affinity_key.is_some() { "1" } else { "0" })
            .arg(&req.job_id)
            .arg(if overwrite { "1" } else { "0" })
            .arg(&req.payload)
            .arg(req.activation_ttl.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;

        Self::queue_op(&req.queue, "enqueue");
        Ok(existed)
    }

    async fn pop_entry(
        &self,
        queues: &[String],
        timeout: Duration,
    ) -> Result<Option<PoppedEntry>> {
        // Dedicated connection: BZPOPMIN parks the whole pipeline of a
        // multiplexed connection until it returns.
        let mut guard = self.pop_conn.lock().await;
        if guard.is_none() {
            let client = redis::Client::open(self.url.as_str())?;
            *guard = Some(client.get_multiplexed_async_connection().await?);
        }
        let conn = guard
            .as_mut()
            .ok_or_else(|| Error::Other("pop connection missing after init".to_string()))?;

        let mut cmd = redis::cmd("BZPOPMIN");
        for queue in queues {
            cmd.arg(keys::queue(queue));
        }
        cmd.arg(timeout.as_secs_f64());

        let popped: Option<(String, String, f64)> = cmd.query_async(conn).await?;
        let Some((key, member, score)) = popped else {
            return Ok(None);
        };

        let prefix = format!("{}:queue:", keys::PREFIX);
        let queue = key.strip_prefix(&prefix).unwrap_or(&key).to_string();
        Self::queue_op(&queue, "pop");

        match QueueEntry::decode(&member) {
            Some(entry) => Ok(Some(PoppedEntry {
                queue,
                entry,
                score,
            })),
            None => {
                warn!(queue = %queue, member = %member, "dropping undecodable queue entry");
                Ok(None)
            }
        }
    }

    async fn requeue_entry(&self, queue: &str, entry: &QueueEntry, score: f64) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.zadd(keys::queue(queue), entry.encode(), score).await?;
        Self::queue_op(queue, "requeue");
        Ok(())
    }

    async fn take_payload(&self, job_id: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        let payload: Option<Vec<u8>> = self
            .scripts()
            .take_payload
            .key(keys::payload(job_id))
            .invoke_async(&mut conn)
            .await?;
        Ok(payload)
    }

    async fn claim_next_affinity_job(
        &self,
        affinity_key: &str,
        runner_id: &str,
        ttl: Duration,
    ) -> Result<ClaimOutcome> {
        let mut conn = self.conn().await?;
        let (code, job_id): (i64, Option<String>) = self
            .scripts()
            .claim_next
            .key(keys::owner(affinity_key))
            .key(keys::activity(affinity_key))
            .key(keys::affinity_list(affinity_key))
            .arg(runner_id)
            .arg(ttl.as_millis() as u64)
            .arg(chrono::Utc::now().timestamp_millis())
            .invoke_async(&mut conn)
            .await?;

        match (code, job_id) {
            (1, Some(id)) => Ok(ClaimOutcome::Job(id)),
            (0, _) => Ok(ClaimOutcome::Empty),
            (-1, _) => Ok(ClaimOutcome::NotOwner),
            (other, _) => Err(Error::Other(format!(
                "claim script returned unexpected code {other}"
            ))),
        }
    }

    async fn termination_check(
        &self,
        affinity_key: &str,
        runner_id: &str,
    ) -> Result<Termination> {
        let mut conn = self.conn().await?;
        let verdict: String = self
            .scripts()
            .should_terminate
            .key(keys::owner(affinity_key))
            .key(keys::activity(affinity_key))
            .key(keys::active(affinity_key))
            .key(keys::affinity_list(affinity_key))
            .arg(runner_id)
            .invoke_async(&mut conn)
            .await?;

        match verdict.as_str() {
            "continue" => Ok(Termination::Continue),
            "clean" => Ok(Termination::Clean),
            "foreign" => Ok(Termination::Foreign),
            other => Err(Error::Other(format!(
                "termination script returned unexpected verdict {other:?}"
            ))),
        }
    }

    async fn queue_depth(&self, queue: &str) -> Result<u64> {
        let mut conn = self.conn().await?;
        let depth: u64 = conn.zcard(keys::queue(queue)).await?;
        Ok(depth)
    }

    async fn running_counts(&self, queue: &str) -> Result<HashMap<String, u64>> {
        let mut conn = self.conn().await?;
        let counts: HashMap<String, u64> = conn.hgetall(keys::running(queue)).await?;
        Ok(counts)
    }

    async fn reset_running_counts(&self, queue: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.del(keys::running(queue)).await?;
        Ok(())
    }

    async fn record_execution(&self, queue: &str, worker_id: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        let _: i64 = conn.hincr(keys::running(queue), worker_id, 1).await?;
        Ok(())
    }
}
