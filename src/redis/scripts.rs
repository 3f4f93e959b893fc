//! The four atomic server-side operations, as Redis Lua scripts.
//!
//! Each script touches a mutually consistent set of keys for one queue or
//! one affinity key, so every multi-step decision (activate-or-append,
//! claim-or-refuse, cleanup-or-continue, read-and-clear) happens in a
//! single atomic step. Worker code never emulates these with
//! read-then-write.

use redis::Script;

/// Atomic enqueue.
///
/// KEYS: queue zset, payload, affinity list, active marker, owner, activity
/// ARGV: score, zset member, has_affinity, job_id, overwrite, payload,
///       activation_ttl_ms
///
/// With an affinity key, the queue gets a single pointer to the key (added
/// only when the key is not already active, clearing any stale ownership
/// records at the same time) and the job id goes onto the key's list. The
/// active marker carries a PX TTL so a crashed drain cannot block
/// re-activation forever: once both the owner record and the marker lapse,
/// the next enqueue plants a replacement pointer. The payload store is
/// written last; the reply is whether a payload already existed under this
/// job id.
const ENQUEUE_JOB: &str = r#"
if ARGV[3] == '1' then
  if redis.call('EXISTS', KEYS[4]) == 0 then
    redis.call('ZADD', KEYS[1], ARGV[1], ARGV[2])
    redis.call('DEL', KEYS[5], KEYS[6])
    redis.call('SET', KEYS[4], '1', 'PX', ARGV[7])
  end
  redis.call('LPUSH', KEYS[3], ARGV[4])
else
  redis.call('ZADD', KEYS[1], ARGV[1], ARGV[2])
end
local existed = redis.call('EXISTS', KEYS[2])
if ARGV[5] == '1' then
  redis.call('SET', KEYS[2], ARGV[6])
else
  redis.call('SET', KEYS[2], ARGV[6], 'NX')
end
return existed
"#;

/// Atomic claim for one affinity key.
///
/// KEYS: owner, activity, affinity list
/// ARGV: runner_id, ttl_ms, now_ms
///
/// No recorded owner (or an expired one): this runner becomes owner. The
/// recorded owner: liveness TTL and last-activity are refreshed and one job
/// id is popped from the tail (producers push the head, so the pop is
/// FIFO). A different recorded owner: not authorized.
///
/// Reply: {1, job_id} claimed, {0, nil} empty, {-1, nil} foreign owner.
const CLAIM_NEXT_AFFINITY_JOB: &str = r#"
local owner = redis.call('GET', KEYS[1])
if not owner then
  redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
elseif owner ~= ARGV[1] then
  return {-1, false}
else
  redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
redis.call('SET', KEYS[2], ARGV[3])
local job_id = redis.call('RPOP', KEYS[3])
if not job_id then
  return {0, false}
end
return {1, job_id}
"#;

/// Atomic termination check for one affinity key.
///
/// KEYS: owner, activity, active marker, affinity list
/// ARGV: runner_id
///
/// A foreign recorded owner terminates the runner with no cleanup; the new
/// owner owns the bookkeeping. An empty list with no foreign owner deletes
/// all three records. The records are never removed while the list still
/// holds pending work.
///
/// Reply: 'foreign' | 'clean' | 'continue'.
const SHOULD_TERMINATE: &str = r#"
local owner = redis.call('GET', KEYS[1])
if owner and owner ~= ARGV[1] then
  return 'foreign'
end
if redis.call('LLEN', KEYS[4]) == 0 then
  redis.call('DEL', KEYS[1], KEYS[2], KEYS[3])
  return 'clean'
end
return 'continue'
"#;

/// Atomic payload read-and-clear.
///
/// KEYS: payload
///
/// Replies with the payload bytes or nil when already consumed; two
/// concurrent takers can never both receive the bytes.
const TAKE_PAYLOAD: &str = r#"
local payload = redis.call('GET', KEYS[1])
if payload then
  redis.call('DEL', KEYS[1])
end
return payload
"#;

/// The prepared scripts, created once and shared by every connection the
/// registry hands out.
pub struct Scripts {
    pub enqueue: Script,
    pub claim_next: Script,
    pub should_terminate: Script,
    pub take_payload: Script,
}

impl Scripts {
    pub fn new() -> Self {
        Self {
            enqueue: Script::new(ENQUEUE_JOB),
            claim_next: Script::new(CLAIM_NEXT_AFFINITY_JOB),
            should_terminate: Script::new(SHOULD_TERMINATE),
            take_payload: Script::new(TAKE_PAYLOAD),
        }
    }

    pub fn all(&self) -> [&Script; 4] {
        [
            &self.enqueue,
            &self.claim_next,
            &self.should_terminate,
            &self.take_payload,
        ]
    }
}

impl Default for Scripts {
    fn default() -> Self {
        Self::new()
    }
}
