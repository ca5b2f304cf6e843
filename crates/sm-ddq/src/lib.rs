//! Deduplication Queue (spec §4.4): a bounded-capacity "have I seen this
//! UUID" set scoped per `(message_class, handler_id)`. One `Ddq` instance is
//! already scoped to its pair; the dispatcher owns the `(class, handler_id)
//! -> Ddq` map (spec §4.9).
//!
//! Grounded in the teacher's registry-with-lazy-backing shape
//! (`fc_secrets`'s pluggable-provider pattern) generalized to a bounded
//! recency set; the external backing mirrors `fc_standby::leader`'s use of
//! `redis::aio::ConnectionManager` and Lua scripts for atomic operations.

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DdqError {
    #[error("backing store error: {0}")]
    Backing(String),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DdqStats {
    pub size: usize,
    pub capacity: usize,
}

/// Internal backing contract. Failures must never be surfaced to `Ddq`
/// callers: the wrapper treats any backing error as fail-open (uuid
/// considered unseen).
#[async_trait]
pub trait DdqBacking: Send + Sync {
    async fn contains(&self, uuid: Uuid) -> Result<bool, DdqError>;
    async fn add(&self, uuid: Uuid) -> Result<(), DdqError>;
    /// Atomic check-and-add: `Ok(true)` when `uuid` was not already present
    /// and has now been recorded, `Ok(false)` when it was already present
    /// (nothing changed). Used by callers that must not let a `contains`
    /// check and the matching `add` race against a concurrent caller doing
    /// the same pair of calls for the same uuid.
    async fn try_reserve(&self, uuid: Uuid) -> Result<bool, DdqError>;
    /// Undoes a `try_reserve` — removes `uuid` if still present. A no-op if
    /// the ring has already evicted it; that's fine, the uuid is gone from
    /// the dedup set either way.
    async fn remove(&self, uuid: Uuid) -> Result<(), DdqError>;
    async fn clear(&self) -> Result<(), DdqError>;
    async fn stats(&self) -> Result<DdqStats, DdqError>;
}

/// Ring buffer of capacity N plus a side index, exactly as spec §4.4
/// describes: `add` overwrites the oldest slot, and when the displaced slot
/// held a UUID that entry is dropped from the index. `contains` is O(1).
pub struct MemoryBacking {
    state: Mutex<RingState>,
}

struct RingState {
    capacity: usize,
    slots: Vec<Option<Uuid>>,
    index: std::collections::HashMap<Uuid, usize>,
    next_slot: usize,
}

impl MemoryBacking {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            state: Mutex::new(RingState {
                capacity,
                slots: vec![None; capacity],
                index: std::collections::HashMap::new(),
                next_slot: 0,
            }),
        }
    }

    /// Unconditionally records `uuid` in the next ring slot, evicting
    /// whatever was there. Caller is responsible for the "already present"
    /// check when that distinction matters.
    fn reserve_locked(state: &mut RingState, uuid: Uuid) {
        let slot = state.next_slot;
        if let Some(displaced) = state.slots[slot].take() {
            state.index.remove(&displaced);
        }
        state.slots[slot] = Some(uuid);
        state.index.insert(uuid, slot);
        state.next_slot = (slot + 1) % state.capacity;
    }
}

#[async_trait]
impl DdqBacking for MemoryBacking {
    async fn contains(&self, uuid: Uuid) -> Result<bool, DdqError> {
        Ok(self.state.lock().index.contains_key(&uuid))
    }

    async fn add(&self, uuid: Uuid) -> Result<(), DdqError> {
        let mut state = self.state.lock();
        Self::reserve_locked(&mut state, uuid);
        Ok(())
    }

    async fn try_reserve(&self, uuid: Uuid) -> Result<bool, DdqError> {
        let mut state = self.state.lock();
        if state.index.contains_key(&uuid) {
            return Ok(false);
        }
        Self::reserve_locked(&mut state, uuid);
        Ok(true)
    }

    async fn remove(&self, uuid: Uuid) -> Result<(), DdqError> {
        let mut state = self.state.lock();
        if let Some(slot) = state.index.remove(&uuid) {
            if state.slots[slot] == Some(uuid) {
                state.slots[slot] = None;
            }
        }
        Ok(())
    }

    async fn clear(&self) -> Result<(), DdqError> {
        let mut state = self.state.lock();
        state.slots.iter_mut().for_each(|s| *s = None);
        state.index.clear();
        state.next_slot = 0;
        Ok(())
    }

    async fn stats(&self) -> Result<DdqStats, DdqError> {
        let state = self.state.lock();
        Ok(DdqStats {
            size: state.index.len(),
            capacity: state.capacity,
        })
    }
}

/// Default capacity per spec §4.4.
pub const DEFAULT_CAPACITY: usize = 100;

/// Public-facing deduplication queue. Wraps any `DdqBacking` and fails open
/// on backing errors: a contains-check that errors is treated as "unseen",
/// and an add/clear that errors is logged and otherwise ignored.
pub struct Ddq {
    scope: String,
    backing: Box<dyn DdqBacking>,
}

impl Ddq {
    pub fn new(scope: impl Into<String>, backing: Box<dyn DdqBacking>) -> Self {
        Self {
            scope: scope.into(),
            backing,
        }
    }

    pub fn memory(scope: impl Into<String>, capacity: usize) -> Self {
        Self::new(scope, Box::new(MemoryBacking::new(capacity)))
    }

    pub async fn contains(&self, uuid: Uuid) -> bool {
        match self.backing.contains(uuid).await {
            Ok(seen) => seen,
            Err(err) => {
                warn!(scope = %self.scope, error = %err, "ddq backing failed, treating uuid as unseen");
                false
            }
        }
    }

    pub async fn add(&self, uuid: Uuid) {
        if let Err(err) = self.backing.add(uuid).await {
            warn!(scope = %self.scope, error = %err, "ddq backing failed to record uuid");
        }
    }

    /// Atomic check-and-add: callers that would otherwise `contains` then
    /// `add` across an await point (letting a concurrent duplicate slip
    /// through both checks) should use this instead. Returns `true` when
    /// the uuid was newly reserved and dispatch should proceed, `false`
    /// when it was already present and the caller should skip. Backing
    /// failures fail open, matching `contains`'s "unseen" default: the
    /// uuid is treated as newly reserved so the message is not dropped.
    pub async fn try_reserve(&self, uuid: Uuid) -> bool {
        match self.backing.try_reserve(uuid).await {
            Ok(is_new) => is_new,
            Err(err) => {
                warn!(scope = %self.scope, error = %err, "ddq backing failed, treating uuid as unseen");
                true
            }
        }
    }

    /// Undoes a `try_reserve` that should not count as processed (spec
    /// §4.9.3 step 3: a circuit-breaker fallback must not mark the DDQ).
    pub async fn release(&self, uuid: Uuid) {
        if let Err(err) = self.backing.remove(uuid).await {
            warn!(scope = %self.scope, error = %err, "ddq backing failed to release uuid");
        }
    }

    pub async fn clear(&self) {
        if let Err(err) = self.backing.clear().await {
            warn!(scope = %self.scope, error = %err, "ddq backing failed to clear");
        }
    }

    pub async fn stats(&self) -> DdqStats {
        self.backing.stats().await.unwrap_or_default()
    }
}

#[cfg(feature = "redis-backing")]
pub mod redis_backing {
    use super::{DdqBacking, DdqError, DdqStats};
    use async_trait::async_trait;
    use redis::aio::ConnectionManager;
    use redis::AsyncCommands;
    use uuid::Uuid;

    /// Sorted-set backed implementation: `ZADD key now member`, trimmed to
    /// the N highest-scored members on every add so capacity semantics
    /// match the memory ring buffer. Key prefix derives from the DDQ's
    /// scope (`message_class:handler_id`).
    pub struct RedisBacking {
        conn: ConnectionManager,
        key: String,
        capacity: isize,
    }

    impl RedisBacking {
        pub fn new(conn: ConnectionManager, key_prefix: &str, scope: &str, capacity: usize) -> Self {
            Self {
                conn,
                key: format!("{key_prefix}:ddq:{scope}"),
                capacity: capacity.max(1) as isize,
            }
        }
    }

    #[async_trait]
    impl DdqBacking for RedisBacking {
        async fn contains(&self, uuid: Uuid) -> Result<bool, DdqError> {
            let mut conn = self.conn.clone();
            let score: Option<f64> = conn
                .zscore(&self.key, uuid.to_string())
                .await
                .map_err(|e| DdqError::Backing(e.to_string()))?;
            Ok(score.is_some())
        }

        async fn add(&self, uuid: Uuid) -> Result<(), DdqError> {
            let mut conn = self.conn.clone();
            let now = chrono::Utc::now().timestamp_millis() as f64;
            let script = redis::Script::new(
                r"
                redis.call('ZADD', KEYS[1], ARGV[1], ARGV[2])
                redis.call('ZREMRANGEBYRANK', KEYS[1], 0, -ARGV[3] - 1)
                return 1
                ",
            );
            script
                .key(&self.key)
                .arg(now)
                .arg(uuid.to_string())
                .arg(self.capacity)
                .invoke_async::<_, ()>(&mut conn)
                .await
                .map_err(|e| DdqError::Backing(e.to_string()))?;
            Ok(())
        }

        /// Atomic check-and-add in one round trip: the script checks
        /// `ZSCORE` first and only `ZADD`s (plus trims to capacity) when the
        /// member was absent, returning `1` for newly-reserved and `0` for
        /// already-present so a concurrent duplicate can never see both
        /// calls succeed.
        async fn try_reserve(&self, uuid: Uuid) -> Result<bool, DdqError> {
            let mut conn = self.conn.clone();
            let now = chrono::Utc::now().timestamp_millis() as f64;
            let script = redis::Script::new(
                r"
                if redis.call('ZSCORE', KEYS[1], ARGV[2]) then
                    return 0
                end
                redis.call('ZADD', KEYS[1], ARGV[1], ARGV[2])
                redis.call('ZREMRANGEBYRANK', KEYS[1], 0, -ARGV[3] - 1)
                return 1
                ",
            );
            let reserved: i64 = script
                .key(&self.key)
                .arg(now)
                .arg(uuid.to_string())
                .arg(self.capacity)
                .invoke_async(&mut conn)
                .await
                .map_err(|e| DdqError::Backing(e.to_string()))?;
            Ok(reserved == 1)
        }

        async fn remove(&self, uuid: Uuid) -> Result<(), DdqError> {
            let mut conn = self.conn.clone();
            let _: () = conn
                .zrem(&self.key, uuid.to_string())
                .await
                .map_err(|e| DdqError::Backing(e.to_string()))?;
            Ok(())
        }

        async fn clear(&self) -> Result<(), DdqError> {
            let mut conn = self.conn.clone();
            let _: () = conn
                .del(&self.key)
                .await
                .map_err(|e| DdqError::Backing(e.to_string()))?;
            Ok(())
        }

        async fn stats(&self) -> Result<DdqStats, DdqError> {
            let mut conn = self.conn.clone();
            let size: usize = conn
                .zcard(&self.key)
                .await
                .map_err(|e| DdqError::Backing(e.to_string()))?;
            Ok(DdqStats {
                size,
                capacity: self.capacity as usize,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bounded_capacity_keeps_most_recent_n() {
        // Property P3: after K adds of distinct UUIDs with capacity N,
        // contains? is true iff the uuid is among the most recent N.
        let ddq = Ddq::memory("Class#handler", 3);
        let uuids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        for u in &uuids {
            ddq.add(*u).await;
        }
        assert!(!ddq.contains(uuids[0]).await);
        assert!(!ddq.contains(uuids[1]).await);
        assert!(ddq.contains(uuids[2]).await);
        assert!(ddq.contains(uuids[3]).await);
        assert!(ddq.contains(uuids[4]).await);
    }

    #[tokio::test]
    async fn add_is_idempotent() {
        let ddq = Ddq::memory("Class#handler", 2);
        let u = Uuid::new_v4();
        ddq.add(u).await;
        ddq.add(u).await;
        assert!(ddq.contains(u).await);
        assert_eq!(ddq.stats().await.size, 1);
    }

    #[tokio::test]
    async fn clear_empties_the_set() {
        let ddq = Ddq::memory("Class#handler", 4);
        let u = Uuid::new_v4();
        ddq.add(u).await;
        ddq.clear().await;
        assert!(!ddq.contains(u).await);
        assert_eq!(ddq.stats().await.size, 0);
    }

    struct AlwaysFailingBacking;

    #[async_trait]
    impl DdqBacking for AlwaysFailingBacking {
        async fn contains(&self, _uuid: Uuid) -> Result<bool, DdqError> {
            Err(DdqError::Backing("store unreachable".into()))
        }
        async fn add(&self, _uuid: Uuid) -> Result<(), DdqError> {
            Err(DdqError::Backing("store unreachable".into()))
        }
        async fn try_reserve(&self, _uuid: Uuid) -> Result<bool, DdqError> {
            Err(DdqError::Backing("store unreachable".into()))
        }
        async fn remove(&self, _uuid: Uuid) -> Result<(), DdqError> {
            Err(DdqError::Backing("store unreachable".into()))
        }
        async fn clear(&self) -> Result<(), DdqError> {
            Err(DdqError::Backing("store unreachable".into()))
        }
        async fn stats(&self) -> Result<DdqStats, DdqError> {
            Err(DdqError::Backing("store unreachable".into()))
        }
    }

    #[tokio::test]
    async fn backing_failures_fail_open() {
        let ddq = Ddq::new("Class#handler", Box::new(AlwaysFailingBacking));
        let u = Uuid::new_v4();
        ddq.add(u).await;
        assert!(!ddq.contains(u).await);
        assert_eq!(ddq.stats().await.size, 0);
    }

    #[tokio::test]
    async fn try_reserve_is_atomic_check_and_add() {
        let ddq = Ddq::memory("Class#handler", 10);
        let u = Uuid::new_v4();
        assert!(ddq.try_reserve(u).await);
        assert!(!ddq.try_reserve(u).await);
        assert!(ddq.contains(u).await);
    }

    #[tokio::test]
    async fn release_undoes_a_reservation() {
        let ddq = Ddq::memory("Class#handler", 10);
        let u = Uuid::new_v4();
        assert!(ddq.try_reserve(u).await);
        ddq.release(u).await;
        assert!(!ddq.contains(u).await);
        assert!(ddq.try_reserve(u).await);
    }

    #[tokio::test]
    async fn try_reserve_on_backing_failure_fails_open() {
        let ddq = Ddq::new("Class#handler", Box::new(AlwaysFailingBacking));
        let u = Uuid::new_v4();
        assert!(ddq.try_reserve(u).await);
    }
}
