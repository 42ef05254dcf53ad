//! Fixed-bucket rate limiting keyed by group hash.
//!
//! Time is cut into epoch-aligned buckets of `period` seconds. Each alert
//! increments the counter for `(group_hash, bucket)`; the alert is limited
//! once the counter exceeds `burst`. Counters expire after one period, so
//! stale buckets evict themselves.
//!
//! Counters live in a [`CounterStore`]. The increment and the expiry are one
//! atomic operation from the point of view of every worker sharing the store.
//! Each alert id is counted at most once per bucket, so a redelivered alert
//! gets the decision of its first attempt back instead of counting against
//! itself.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

use crate::error::Result;

/// A shared counter store.
pub trait CounterStore: Send + Sync + 'static {
    /// Atomically counts `member` under `key` and returns the counter value
    /// reached by that member's first count. Counting a member again within
    /// the counter's lifetime returns the same value without incrementing.
    /// A counter created by this call expires after `ttl`; an existing
    /// counter keeps its expiry.
    fn count_once(
        &self,
        key: &str,
        member: &str,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<u64>> + Send;
}

/// Decision for one alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Counter value after this alert.
    pub count: u64,
    /// Whether the alert exceeded the burst.
    pub limited: bool,
}

/// Fixed-bucket limiter over a [`CounterStore`].
#[derive(Debug)]
pub struct RateLimiter<C> {
    burst: u64,
    period: Duration,
    store: C,
}

impl<C: CounterStore> RateLimiter<C> {
    /// Creates a limiter. `period` is clamped to at least one second.
    #[must_use]
    pub fn new(burst: u64, period: Duration, store: C) -> Self {
        Self {
            burst,
            period: period.max(Duration::from_secs(1)),
            store,
        }
    }

    /// Returns the burst.
    #[must_use]
    pub const fn burst(&self) -> u64 {
        self.burst
    }

    /// Returns the bucket length.
    #[must_use]
    pub const fn period(&self) -> Duration {
        self.period
    }

    /// Returns the counter store.
    #[must_use]
    pub const fn store(&self) -> &C {
        &self.store
    }

    /// Index of the bucket containing `now`.
    #[must_use]
    pub fn bucket(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp().div_euclid(self.period.as_secs() as i64)
    }

    /// Counter key for a group in the bucket containing `now`.
    #[must_use]
    pub fn key(&self, group_hash: &str, now: DateTime<Utc>) -> String {
        format!("ratelimit/group_hash/{group_hash}:{}", self.bucket(now))
    }

    /// Counts alert `alert_id` of `group_hash` at `now`.
    ///
    /// # Errors
    ///
    /// Returns the counter store's error unchanged.
    pub async fn check(
        &self,
        group_hash: &str,
        alert_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RateDecision> {
        let key = self.key(group_hash, now);
        let count = self.store.count_once(&key, alert_id, self.period).await?;
        let limited = count > self.burst;
        debug!(key = %key, alert_id, count, burst = self.burst, limited, "rate limit counter");
        Ok(RateDecision { count, limited })
    }
}

/// Sweep expired counters once the map grows past this many entries.
const SWEEP_THRESHOLD: usize = 4096;

#[derive(Debug)]
struct Counter {
    count: u64,
    expires: Instant,
    members: HashMap<String, u64>,
}

impl Counter {
    fn new(expires: Instant) -> Self {
        Self {
            count: 0,
            expires,
            members: HashMap::new(),
        }
    }
}

/// Process-local counter store.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    counters: Mutex<HashMap<String, Counter>>,
}

impl MemoryCounterStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live value of `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<u64> {
        let counters = self.counters.lock();
        counters
            .get(key)
            .filter(|counter| counter.expires > Instant::now())
            .map(|counter| counter.count)
    }

    /// Number of stored counters, including expired ones not yet swept.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counters.lock().len()
    }

    /// Returns true if no counters are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counters.lock().is_empty()
    }

    fn count(&self, key: &str, member: &str, ttl: Duration) -> u64 {
        let now = Instant::now();
        let mut counters = self.counters.lock();
        if counters.len() >= SWEEP_THRESHOLD {
            counters.retain(|_, counter| counter.expires > now);
        }
        let counter = counters
            .entry(key.to_string())
            .or_insert_with(|| Counter::new(now + ttl));
        if counter.expires <= now {
            *counter = Counter::new(now + ttl);
        }
        if let Some(&seen) = counter.members.get(member) {
            return seen;
        }
        counter.count += 1;
        counter.members.insert(member.to_string(), counter.count);
        counter.count
    }
}

impl CounterStore for MemoryCounterStore {
    fn count_once(
        &self,
        key: &str,
        member: &str,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<u64>> + Send {
        let count = self.count(key, member, ttl);
        async move { Ok(count) }
    }
}

impl<C: CounterStore> CounterStore for std::sync::Arc<C> {
    fn count_once(
        &self,
        key: &str,
        member: &str,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<u64>> + Send {
        (**self).count_once(key, member, ttl)
    }
}

#[cfg(feature = "redis")]
pub use self::redis_store::RedisCounterStore;

#[cfg(feature = "redis")]
mod redis_store {
    use std::time::Duration;

    use tracing::info;

    use super::CounterStore;
    use crate::error::{PipelineError, Result};

    fn store_error(e: &redis::RedisError) -> PipelineError {
        PipelineError::CounterStore {
            reason: e.to_string(),
        }
    }

    /// Counter store backed by Redis, shared by every processor instance.
    #[derive(Clone)]
    pub struct RedisCounterStore {
        conn: redis::aio::MultiplexedConnection,
    }

    impl std::fmt::Debug for RedisCounterStore {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("RedisCounterStore").finish_non_exhaustive()
        }
    }

    impl RedisCounterStore {
        /// Connects to the Redis server at `url`.
        ///
        /// # Errors
        ///
        /// Returns [`PipelineError::CounterStore`] if the connection fails.
        pub async fn connect(url: &str) -> Result<Self> {
            let client = redis::Client::open(url).map_err(|e| store_error(&e))?;
            let conn = client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| store_error(&e))?;
            info!("connected to redis counter store");
            Ok(Self { conn })
        }
    }

    /// Counts a member once: the members hash remembers the value each
    /// member got, the counter and the hash share the bucket's expiry.
    const COUNT_ONCE: &str = r"
local seen = redis.call('HGET', KEYS[2], ARGV[1])
if seen then
  return tonumber(seen)
end
local count = redis.call('INCR', KEYS[1])
redis.call('HSET', KEYS[2], ARGV[1], count)
if count == 1 then
  redis.call('EXPIRE', KEYS[1], ARGV[2])
  redis.call('EXPIRE', KEYS[2], ARGV[2])
end
return count
";

    impl CounterStore for RedisCounterStore {
        fn count_once(
            &self,
            key: &str,
            member: &str,
            ttl: Duration,
        ) -> impl std::future::Future<Output = Result<u64>> + Send {
            let mut conn = self.conn.clone();
            let key = key.to_string();
            let member = member.to_string();
            async move {
                let count: u64 = redis::Script::new(COUNT_ONCE)
                    .key(&key)
                    .key(format!("{key}:members"))
                    .arg(&member)
                    .arg(ttl.as_secs().max(1))
                    .invoke_async(&mut conn)
                    .await
                    .map_err(|e| store_error(&e))?;
                Ok(count)
            }
        }
    }
}
