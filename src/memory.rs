//! In-memory backend emulating the Redis structures.
//!
//! Every operation takes the single state lock for its whole duration, which
//! gives the same atomicity the Lua scripts give on Redis. Used by the test
//! suite and for local development; not a distributed coordination point.

use crate::backend::Backend;
use crate::error::Result;
use crate::model::{
    ClaimOutcome, EnqueueRequest, OverwritePolicy, PoppedEntry, QueueEntry, Termination,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct OwnerRecord {
    runner_id: String,
    expires_at: Instant,
}

#[derive(Default)]
struct MemoryState {
    /// Queue name → sorted-set emulation. Members are unique; ZADD on an
    /// existing member updates its score.
    queues: HashMap<String, Vec<(f64, String)>>,
    payloads: HashMap<String, Vec<u8>>,
    /// Affinity key → pending job ids. Producers push the front, runners
    /// pop the back (FIFO).
    affinity_lists: HashMap<String, VecDeque<String>>,
    owners: HashMap<String, OwnerRecord>,
    activity: HashMap<String, i64>,
    /// Affinity key → activation expiry. A lapsed marker counts as absent,
    /// so a later enqueue can plant a replacement pointer after a crash.
    active: HashMap<String, Instant>,
    running: HashMap<String, HashMap<String, u64>>,
}

impl MemoryState {
    fn zadd(&mut self, queue: &str, score: f64, member: String) {
        let set = self.queues.entry(queue.to_string()).or_default();
        if let Some(slot) = set.iter_mut().find(|(_, m)| *m == member) {
            slot.0 = score;
        } else {
            set.push((score, member));
        }
    }

    /// Live owner of an affinity key, expired records treated as absent.
    fn owner(&self, affinity_key: &str, now: Instant) -> Option<&OwnerRecord> {
        self.owners
            .get(affinity_key)
            .filter(|rec| rec.expires_at > now)
    }
}

#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn enqueue(&self, req: &EnqueueRequest) -> Result<bool> {
        let mut state = self.state.lock().await;

        match &req.affinity_key {
            Some(key) => {
                let now = Instant::now();
                let alive = state.active.get(key).is_some_and(|expiry| *expiry > now);
                if !alive {
                    let member = QueueEntry::Affinity(key.clone()).encode();
                    state.zadd(&req.queue, req.score, member);
                    state.owners.remove(key);
                    state.activity.remove(key);
                    state.active.insert(key.clone(), now + req.activation_ttl);
                }
                state
                    .affinity_lists
                    .entry(key.clone())
                    .or_default()
                    .push_front(req.job_id.clone());
            }
            None => {
                let member = QueueEntry::Job(req.job_id.clone()).encode();
                state.zadd(&req.queue, req.score, member);
            }
        }

        let existed = state.payloads.contains_key(&req.job_id);
        match req.policy {
            OverwritePolicy::Overwrite => {
                state
                    .payloads
                    .insert(req.job_id.clone(), req.payload.clone());
            }
            OverwritePolicy::IfAbsent => {
                state
                    .payloads
                    .entry(req.job_id.clone())
                    .or_insert_with(|| req.payload.clone());
            }
        }
        Ok(existed)
    }

    async fn pop_entry(
        &self,
        queues: &[String],
        timeout: Duration,
    ) -> Result<Option<PoppedEntry>> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut state = self.state.lock().await;
                // BZPOPMIN semantics: first non-empty queue in argument
                // order, smallest score within it.
                for queue in queues {
                    let Some(set) = state.queues.get_mut(queue) else {
                        continue;
                    };
                    let min = set
                        .iter()
                        .enumerate()
                        .min_by(|(_, a), (_, b)| a.0.total_cmp(&b.0))
                        .map(|(i, _)| i);
                    if let Some(i) = min {
                        let (score, member) = set.remove(i);
                        let Some(entry) = QueueEntry::decode(&member) else {
                            continue;
                        };
                        return Ok(Some(PoppedEntry {
                            queue: queue.clone(),
                            entry,
                            score,
                        }));
                    }
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn requeue_entry(&self, queue: &str, entry: &QueueEntry, score: f64) -> Result<()> {
        let mut state = self.state.lock().await;
        state.zadd(queue, score, entry.encode());
        Ok(())
    }

    async fn take_payload(&self, job_id: &str) -> Result<Option<Vec<u8>>> {
        let mut state = self.state.lock().await;
        Ok(state.payloads.remove(job_id))
    }

    async fn claim_next_affinity_job(
        &self,
        affinity_key: &str,
        runner_id: &str,
        ttl: Duration,
    ) -> Result<ClaimOutcome> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let recorded = state
            .owner(affinity_key, now)
            .map(|rec| rec.runner_id.clone());
        match recorded {
            None => {
                state.owners.insert(
                    affinity_key.to_string(),
                    OwnerRecord {
                        runner_id: runner_id.to_string(),
                        expires_at: now + ttl,
                    },
                );
            }
            Some(owner) if owner != runner_id => return Ok(ClaimOutcome::NotOwner),
            Some(_) => {
                if let Some(rec) = state.owners.get_mut(affinity_key) {
                    rec.expires_at = now + ttl;
                }
            }
        }
        state.activity.insert(
            affinity_key.to_string(),
            chrono::Utc::now().timestamp_millis(),
        );

        match state
            .affinity_lists
            .get_mut(affinity_key)
            .and_then(|list| list.pop_back())
        {
            Some(job_id) => Ok(ClaimOutcome::Job(job_id)),
            None => Ok(ClaimOutcome::Empty),
        }
    }

    async fn termination_check(
        &self,
        affinity_key: &str,
        runner_id: &str,
    ) -> Result<Termination> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        if let Some(rec) = state.owner(affinity_key, now) {
            if rec.runner_id != runner_id {
                return Ok(Termination::Foreign);
            }
        }

        let empty = state
            .affinity_lists
            .get(affinity_key)
            .is_none_or(|list| list.is_empty());
        if empty {
            state.owners.remove(affinity_key);
            state.activity.remove(affinity_key);
            state.active.remove(affinity_key);
            return Ok(Termination::Clean);
        }
        Ok(Termination::Continue)
    }

    async fn queue_depth(&self, queue: &str) -> Result<u64> {
        let state = self.state.lock().await;
        Ok(state.queues.get(queue).map_or(0, |set| set.len() as u64))
    }

    async fn running_counts(&self, queue: &str) -> Result<HashMap<String, u64>> {
        let state = self.state.lock().await;
        Ok(state.running.get(queue).cloned().unwrap_or_default())
    }

    async fn reset_running_counts(&self, queue: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.running.remove(queue);
        Ok(())
    }

    async fn record_execution(&self, queue: &str, worker_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        *state
            .running
            .entry(queue.to_string())
            .or_default()
            .entry(worker_id.to_string())
            .or_insert(0) += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{now_ns, priority_score};

    fn request(queue: &str, job_id: &str, priority: u32, affinity: Option<&str>) -> EnqueueRequest {
        EnqueueRequest {
            queue: queue.to_string(),
            job_id: job_id.to_string(),
            score: priority_score(priority, now_ns()),
            affinity_key: affinity.map(str::to_string),
            payload: b"{}".to_vec(),
            policy: OverwritePolicy::IfAbsent,
            activation_ttl: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn plain_enqueue_then_pop() {
        let backend = MemoryBackend::new();
        backend.enqueue(&request("default", "j1", 0, None)).await.unwrap();

        let popped = backend
            .pop_entry(&["default".to_string()], Duration::from_millis(50))
            .await
            .unwrap()
            .expect("entry expected");
        assert_eq!(popped.entry, QueueEntry::Job("j1".to_string()));
        assert_eq!(backend.queue_depth("default").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn take_payload_is_consume_once() {
        let backend = MemoryBackend::new();
        backend.enqueue(&request("default", "j1", 0, None)).await.unwrap();

        assert!(backend.take_payload("j1").await.unwrap().is_some());
        assert!(backend.take_payload("j1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn affinity_enqueue_adds_one_pointer() {
        let backend = MemoryBackend::new();
        backend
            .enqueue(&request("default", "j1", 0, Some("doc:1")))
            .await
            .unwrap();
        backend
            .enqueue(&request("default", "j2", 0, Some("doc:1")))
            .await
            .unwrap();

        // One affinity pointer for both jobs
        assert_eq!(backend.queue_depth("default").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn expired_owner_allows_takeover() {
        let backend = MemoryBackend::new();
        backend
            .enqueue(&request("default", "j1", 0, Some("doc:1")))
            .await
            .unwrap();

        let claimed = backend
            .claim_next_affinity_job("doc:1", "runner-a", Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(claimed, ClaimOutcome::Job("j1".to_string()));

        tokio::time::sleep(Duration::from_millis(30)).await;

        backend
            .enqueue(&request("default", "j2", 0, Some("doc:1")))
            .await
            .unwrap();
        let claimed = backend
            .claim_next_affinity_job("doc:1", "runner-b", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(claimed, ClaimOutcome::Job("j2".to_string()));
    }
}
