//! Affinity ownership arbitration: exclusive claims, takeover, cleanup.

use radish::backend::Backend;
use radish::enqueue::Enqueuer;
use radish::memory::MemoryBackend;
use radish::model::{ClaimOutcome, OverwritePolicy, Termination};
use std::sync::Arc;
use std::time::Duration;

const TTL: Duration = Duration::from_secs(5);

async fn seed(backend: &Arc<MemoryBackend>, key: &str, ids: &[&str]) {
    let enqueuer = Enqueuer::new(backend.clone());
    for id in ids {
        enqueuer
            .enqueue("default", id, 0, b"{}".to_vec(), Some(key), OverwritePolicy::IfAbsent)
            .await
            .unwrap();
    }
}

// ---------------------------------------------------------------------------
// Exclusive ownership (P3)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn second_runner_is_not_authorized() {
    let backend = Arc::new(MemoryBackend::new());
    seed(&backend, "doc:1", &["j1", "j2"]).await;

    let claimed = backend
        .claim_next_affinity_job("doc:1", "runner-a", TTL)
        .await
        .unwrap();
    assert_eq!(claimed, ClaimOutcome::Job("j1".to_string()));

    let claimed = backend
        .claim_next_affinity_job("doc:1", "runner-b", TTL)
        .await
        .unwrap();
    assert_eq!(claimed, ClaimOutcome::NotOwner);
}

#[tokio::test]
async fn concurrent_claims_elect_exactly_one_owner() {
    let backend = Arc::new(MemoryBackend::new());
    seed(&backend, "doc:1", &["j1"]).await;

    let mut tasks = Vec::new();
    for i in 0..16 {
        let backend = backend.clone();
        tasks.push(tokio::spawn(async move {
            backend
                .claim_next_affinity_job("doc:1", &format!("runner-{i}"), TTL)
                .await
                .unwrap()
        }));
    }

    let mut owners = 0;
    for task in tasks {
        match task.await.unwrap() {
            // The elected owner sees the job (or an empty list on a later
            // claim); everyone else is refused.
            ClaimOutcome::Job(_) | ClaimOutcome::Empty => owners += 1,
            ClaimOutcome::NotOwner => {}
        }
    }
    assert_eq!(owners, 1, "at most one recognized owner per key");
}

// ---------------------------------------------------------------------------
// FIFO within one owner's tenure (P1, claim level)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn claims_drain_in_enqueue_order() {
    let backend = Arc::new(MemoryBackend::new());
    seed(&backend, "doc:1", &["j1", "j2", "j3"]).await;

    for expected in ["j1", "j2", "j3"] {
        let claimed = backend
            .claim_next_affinity_job("doc:1", "runner-a", TTL)
            .await
            .unwrap();
        assert_eq!(claimed, ClaimOutcome::Job(expected.to_string()));
    }
    assert_eq!(
        backend
            .claim_next_affinity_job("doc:1", "runner-a", TTL)
            .await
            .unwrap(),
        ClaimOutcome::Empty
    );
}

// ---------------------------------------------------------------------------
// Termination verdicts and cleanup (P4)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn drained_key_terminates_clean_and_leaves_no_records() {
    let backend = Arc::new(MemoryBackend::new());
    seed(&backend, "doc:1", &["j1"]).await;

    backend
        .claim_next_affinity_job("doc:1", "runner-a", TTL)
        .await
        .unwrap();
    assert_eq!(
        backend.termination_check("doc:1", "runner-a").await.unwrap(),
        Termination::Clean
    );

    // Drain the stale pointer left from the first activation.
    backend
        .pop_entry(&["default".to_string()], Duration::from_millis(50))
        .await
        .unwrap();

    // With all records gone, a new enqueue re-activates the key: a fresh
    // pointer lands in the queue and a fresh runner may claim at once.
    seed(&backend, "doc:1", &["j2"]).await;
    assert_eq!(backend.queue_depth("default").await.unwrap(), 1);
    assert_eq!(
        backend
            .claim_next_affinity_job("doc:1", "runner-b", TTL)
            .await
            .unwrap(),
        ClaimOutcome::Job("j2".to_string())
    );
}

#[tokio::test]
async fn pending_work_keeps_records_alive() {
    let backend = Arc::new(MemoryBackend::new());
    seed(&backend, "doc:1", &["j1", "j2"]).await;

    backend
        .claim_next_affinity_job("doc:1", "runner-a", TTL)
        .await
        .unwrap();
    assert_eq!(
        backend.termination_check("doc:1", "runner-a").await.unwrap(),
        Termination::Continue
    );
}

// ---------------------------------------------------------------------------
// Crash recovery: once activation lapses, an enqueue replants the pointer
// ---------------------------------------------------------------------------

#[tokio::test]
async fn lapsed_activation_lets_enqueue_replant_pointer() {
    let backend = Arc::new(MemoryBackend::new());
    let enqueuer =
        Enqueuer::new(backend.clone()).with_activation_ttl(Duration::from_millis(20));
    for id in ["j1", "j2"] {
        enqueuer
            .enqueue("default", id, 0, b"{}".to_vec(), Some("doc:1"), OverwritePolicy::IfAbsent)
            .await
            .unwrap();
    }

    // The pointer is popped, then the draining worker dies after one claim.
    backend
        .pop_entry(&["default".to_string()], Duration::from_millis(50))
        .await
        .unwrap();
    backend
        .claim_next_affinity_job("doc:1", "runner-a", Duration::from_millis(10))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;

    // No pointer exists anywhere, but owner and activation have both
    // lapsed, so a new enqueue resurrects the key.
    assert_eq!(backend.queue_depth("default").await.unwrap(), 0);
    enqueuer
        .enqueue("default", "j3", 0, b"{}".to_vec(), Some("doc:1"), OverwritePolicy::IfAbsent)
        .await
        .unwrap();
    assert_eq!(backend.queue_depth("default").await.unwrap(), 1);

    // A fresh runner drains the backlog in order, j2 before j3.
    assert_eq!(
        backend
            .claim_next_affinity_job("doc:1", "runner-b", TTL)
            .await
            .unwrap(),
        ClaimOutcome::Job("j2".to_string())
    );
}

#[tokio::test]
async fn stale_owner_sees_foreign_after_takeover() {
    let backend = Arc::new(MemoryBackend::new());
    seed(&backend, "doc:1", &["j1", "j2"]).await;

    // runner-a claims with a tiny TTL, then stalls past it.
    backend
        .claim_next_affinity_job("doc:1", "runner-a", Duration::from_millis(10))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    // runner-b takes over the expired key.
    assert_eq!(
        backend
            .claim_next_affinity_job("doc:1", "runner-b", TTL)
            .await
            .unwrap(),
        ClaimOutcome::Job("j2".to_string())
    );

    // The stale owner must terminate immediately, without cleanup.
    assert_eq!(
        backend.termination_check("doc:1", "runner-a").await.unwrap(),
        Termination::Foreign
    );
    assert_eq!(
        backend
            .claim_next_affinity_job("doc:1", "runner-a", TTL)
            .await
            .unwrap(),
        ClaimOutcome::NotOwner
    );
}
