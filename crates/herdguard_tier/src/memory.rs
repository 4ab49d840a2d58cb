// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! In-process store and lock driven by a [`Clock`].
//!
//! Both types honour expiry against the injected clock, which makes them suitable for
//! single-process deployments and for tests that control time with `tick::ClockControl`.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use parking_lot::Mutex;
use tick::Clock;

use crate::{CacheStore, DistributedLock, LockLease, Result, WaitPolicy};

#[derive(Debug)]
struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// A [`CacheStore`] kept in process memory.
///
/// Physical TTLs are measured on the clock passed to [`InMemoryStore::new`]. Expired entries are
/// dropped lazily on access. Clones share the same entries.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use herdguard_tier::{CacheStore, InMemoryStore};
/// use tick::Clock;
/// # futures::executor::block_on(async {
///
/// let store = InMemoryStore::new(Clock::new_frozen());
/// store.set("shop:1", "{}".to_owned(), Some(Duration::from_secs(30))).await?;
/// assert_eq!(store.get("shop:1").await?.as_deref(), Some("{}"));
/// # herdguard_tier::Result::Ok(())
/// # }).unwrap();
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryStore {
    clock: Clock,
    entries: Arc<Mutex<HashMap<String, StoredValue>>>,
}

impl InMemoryStore {
    /// Creates an empty store that measures TTLs on `clock`.
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the live value under `key` without going through the async interface.
    #[must_use]
    pub fn peek(&self, key: &str) -> Option<String> {
        let now = self.clock.instant();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(stored) if stored.is_live(now) => Some(stored.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Returns the remaining physical TTL of `key`.
    ///
    /// `None` when the key is missing or stored without a TTL.
    #[must_use]
    pub fn time_to_live(&self, key: &str) -> Option<Duration> {
        let now = self.clock.instant();
        let entries = self.entries.lock();
        let stored = entries.get(key).filter(|stored| stored.is_live(now))?;
        stored.expires_at.map(|at| at.saturating_duration_since(now))
    }

    /// Returns the number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = self.clock.instant();
        self.entries.lock().values().filter(|stored| stored.is_live(now)).count()
    }

    /// Returns true if the store holds no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write(&self, key: &str, value: String, ttl: Option<Duration>) {
        let expires_at = ttl.and_then(|ttl| self.clock.instant().checked_add(ttl));
        self.entries.lock().insert(key.to_owned(), StoredValue { value, expires_at });
    }
}

impl CacheStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.peek(key))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        self.write(key, value, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

#[derive(Debug)]
struct Holder {
    token: String,
    // `None` when the lease is too long to be represented; such a lock only ends on release.
    expires_at: Option<Instant>,
}

impl Holder {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// How often [`InMemoryLock`] re-checks a busy lock when the wait policy allows waiting.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// A [`DistributedLock`] shared by the tasks of a single process.
///
/// Leases expire on the clock passed to [`InMemoryLock::new`]. Every acquisition gets a fresh
/// token, so releasing an expired lease never frees a lock that was taken over. Clones share the
/// same lock table.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use herdguard_tier::{DistributedLock, InMemoryLock, WaitPolicy};
/// use tick::Clock;
/// # futures::executor::block_on(async {
///
/// let lock = InMemoryLock::new(Clock::new_frozen());
/// let lease = lock.try_acquire("lock:shop:1", WaitPolicy::NoWait, Duration::from_secs(10)).await?;
/// let lease = lease.expect("lock is free");
///
/// let busy = lock.try_acquire("lock:shop:1", WaitPolicy::NoWait, Duration::from_secs(10)).await?;
/// assert!(busy.is_none());
///
/// assert!(lock.release(lease).await?);
/// # herdguard_tier::Result::Ok(())
/// # }).unwrap();
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryLock {
    clock: Clock,
    poll_interval: Duration,
    holders: Arc<Mutex<HashMap<String, Holder>>>,
    next_token: Arc<AtomicU64>,
}

impl InMemoryLock {
    /// Creates an empty lock table that expires leases on `clock`.
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self {
            clock,
            poll_interval: DEFAULT_POLL_INTERVAL,
            holders: Arc::new(Mutex::new(HashMap::new())),
            next_token: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Sets how often a busy lock is re-checked while waiting.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Returns true if `name` is currently held by anybody.
    #[must_use]
    pub fn is_locked(&self, name: &str) -> bool {
        let now = self.clock.instant();
        self.holders.lock().get(name).is_some_and(|holder| holder.is_live(now))
    }

    fn acquire_once(&self, name: &str, lease: Duration) -> Option<LockLease> {
        let now = self.clock.instant();
        let mut holders = self.holders.lock();
        if holders.get(name).is_some_and(|holder| holder.is_live(now)) {
            return None;
        }

        let token = format!("{:016x}", self.next_token.fetch_add(1, Ordering::Relaxed));
        let expires_at = now.checked_add(lease);
        holders.insert(
            name.to_owned(),
            Holder {
                token: token.clone(),
                expires_at,
            },
        );
        Some(LockLease::new(name, token, lease))
    }

    fn release_owned(&self, lease: &LockLease) -> bool {
        let now = self.clock.instant();
        let mut holders = self.holders.lock();
        let owned = holders
            .get(lease.name())
            .is_some_and(|holder| holder.token == lease.token() && holder.is_live(now));
        if owned {
            holders.remove(lease.name());
        }
        owned
    }
}

impl DistributedLock for InMemoryLock {
    async fn try_acquire(&self, name: &str, wait: WaitPolicy, lease: Duration) -> Result<Option<LockLease>> {
        let budget = wait.budget();
        let stopwatch = self.clock.stopwatch();

        loop {
            if let Some(acquired) = self.acquire_once(name, lease) {
                return Ok(Some(acquired));
            }

            let pause = match budget {
                None => self.poll_interval,
                Some(limit) => {
                    let waited = stopwatch.elapsed();
                    if waited >= limit {
                        return Ok(None);
                    }
                    self.poll_interval.min(limit - waited)
                }
            };
            self.clock.delay(pause).await;
        }
    }

    async fn release(&self, lease: LockLease) -> Result<bool> {
        Ok(self.release_owned(&lease))
    }
}
