// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Recording store and lock doubles for testing.
//!
//! [`MockStore`] and [`MockLock`] keep their state in memory, record every call and can be told
//! to fail chosen calls, which makes them useful for exercising error paths.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;

use crate::{CacheStore, DistributedLock, Error, LockLease, Result, WaitPolicy};

/// Recorded store call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    /// A read of the given key.
    Get(String),
    /// A write of `value` under `key` with the physical `ttl`.
    Set {
        /// The key that was written.
        key: String,
        /// The raw value that was written.
        value: String,
        /// The physical time-to-live requested by the caller.
        ttl: Option<Duration>,
    },
    /// A delete of the given key.
    Delete(String),
}

type StorePredicate = Box<dyn Fn(&StoreOp) -> bool + Send + Sync>;

/// A [`CacheStore`] that records calls and fails on demand.
///
/// TTLs are recorded but never enforced; use `InMemoryStore` when expiry matters.
///
/// # Examples
///
/// ```
/// use herdguard_tier::{CacheStore, testing::{MockStore, StoreOp}};
/// # futures::executor::block_on(async {
///
/// let store = MockStore::new();
/// store.fail_when(|op| matches!(op, StoreOp::Get(key) if key == "shop:bad"));
///
/// assert!(store.get("shop:bad").await.is_err());
/// assert!(store.get("shop:good").await.is_ok());
/// assert_eq!(store.operations().len(), 2);
/// # });
/// ```
#[derive(Clone, Default)]
pub struct MockStore {
    data: Arc<Mutex<HashMap<String, String>>>,
    operations: Arc<Mutex<Vec<StoreOp>>>,
    fail_when: Arc<Mutex<Option<StorePredicate>>>,
}

impl std::fmt::Debug for MockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockStore")
            .field("data", &self.data)
            .field("operations", &self.operations)
            .field("fail_when", &self.fail_when.lock().is_some())
            .finish()
    }
}

impl MockStore {
    /// Creates an empty mock store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a mock store holding `data`.
    #[must_use]
    pub fn with_data(data: HashMap<String, String>) -> Self {
        Self {
            data: Arc::new(Mutex::new(data)),
            ..Self::default()
        }
    }

    /// Returns the raw value under `key` without recording a call.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<String> {
        self.data.lock().get(key).cloned()
    }

    /// Stores `value` under `key` without recording a call.
    ///
    /// Handy for simulating a write by another process from inside a failure predicate.
    pub fn put(&self, key: &str, value: &str) {
        self.data.lock().insert(key.to_owned(), value.to_owned());
    }

    /// Sets a predicate that decides which calls fail with a store error.
    pub fn fail_when<F>(&self, predicate: F)
    where
        F: Fn(&StoreOp) -> bool + Send + Sync + 'static,
    {
        *self.fail_when.lock() = Some(Box::new(predicate));
    }

    /// Clears the failure predicate, allowing all calls to succeed.
    pub fn clear_failures(&self) {
        *self.fail_when.lock() = None;
    }

    /// Returns a copy of all recorded calls.
    #[must_use]
    pub fn operations(&self) -> Vec<StoreOp> {
        self.operations.lock().clone()
    }

    /// Returns the number of recorded reads.
    #[must_use]
    pub fn get_count(&self) -> usize {
        self.operations.lock().iter().filter(|op| matches!(op, StoreOp::Get(_))).count()
    }

    /// Returns the recorded writes as `(key, value, ttl)` tuples.
    #[must_use]
    pub fn writes(&self) -> Vec<(String, String, Option<Duration>)> {
        self.operations
            .lock()
            .iter()
            .filter_map(|op| match op {
                StoreOp::Set { key, value, ttl } => Some((key.clone(), value.clone(), *ttl)),
                _ => None,
            })
            .collect()
    }

    /// Clears all recorded calls.
    pub fn clear_operations(&self) {
        self.operations.lock().clear();
    }

    fn check(&self, op: StoreOp) -> Result<()> {
        let fail = self.fail_when.lock().as_ref().is_some_and(|predicate| predicate(&op));
        let message = match &op {
            StoreOp::Get(_) => "mock: get failed",
            StoreOp::Set { .. } => "mock: set failed",
            StoreOp::Delete(_) => "mock: delete failed",
        };
        self.operations.lock().push(op);
        if fail { Err(Error::store(message)) } else { Ok(()) }
    }
}

impl CacheStore for MockStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check(StoreOp::Get(key.to_owned()))?;
        Ok(self.raw(key))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        self.check(StoreOp::Set {
            key: key.to_owned(),
            value: value.clone(),
            ttl,
        })?;
        self.data.lock().insert(key.to_owned(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check(StoreOp::Delete(key.to_owned()))?;
        self.data.lock().remove(key);
        Ok(())
    }
}

/// Recorded lock call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOp {
    /// An acquisition attempt on `name`.
    Acquire {
        /// The lock name.
        name: String,
        /// The wait policy of the attempt.
        wait: WaitPolicy,
        /// The requested lease.
        lease: Duration,
    },
    /// A release of the lock `name`.
    Release(String),
}

type LockPredicate = Box<dyn Fn(&LockOp) -> bool + Send + Sync>;

/// A [`DistributedLock`] that records calls and fails on demand.
///
/// Leases never expire and waiting policies are treated as [`WaitPolicy::NoWait`], so a busy lock
/// answers immediately. Use [`MockLock::hold`] to simulate a lock held by another process.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use herdguard_tier::{DistributedLock, WaitPolicy, testing::MockLock};
/// # futures::executor::block_on(async {
///
/// let lock = MockLock::new();
/// let _foreign = lock.hold("lock:shop:1");
///
/// let lease = lock.try_acquire("lock:shop:1", WaitPolicy::NoWait, Duration::from_secs(10)).await?;
/// assert!(lease.is_none());
/// assert_eq!(lock.acquire_count(), 1);
/// # herdguard_tier::Result::Ok(())
/// # }).unwrap();
/// ```
#[derive(Clone, Default)]
pub struct MockLock {
    holders: Arc<Mutex<HashMap<String, String>>>,
    operations: Arc<Mutex<Vec<LockOp>>>,
    fail_when: Arc<Mutex<Option<LockPredicate>>>,
    next_token: Arc<AtomicU64>,
}

impl std::fmt::Debug for MockLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLock")
            .field("holders", &self.holders)
            .field("operations", &self.operations)
            .field("fail_when", &self.fail_when.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl MockLock {
    /// Creates a mock lock with no holders.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `name` as held by somebody else without recording a call.
    ///
    /// The returned lease can be passed to [`DistributedLock::release`] to free the lock again.
    pub fn hold(&self, name: &str) -> LockLease {
        let token = self.issue_token();
        self.holders.lock().insert(name.to_owned(), token.clone());
        LockLease::new(name, token, Duration::MAX)
    }

    /// Returns true if `name` is currently held.
    #[must_use]
    pub fn is_locked(&self, name: &str) -> bool {
        self.holders.lock().contains_key(name)
    }

    /// Sets a predicate that decides which calls fail with a lock error.
    pub fn fail_when<F>(&self, predicate: F)
    where
        F: Fn(&LockOp) -> bool + Send + Sync + 'static,
    {
        *self.fail_when.lock() = Some(Box::new(predicate));
    }

    /// Clears the failure predicate, allowing all calls to succeed.
    pub fn clear_failures(&self) {
        *self.fail_when.lock() = None;
    }

    /// Returns a copy of all recorded calls.
    #[must_use]
    pub fn operations(&self) -> Vec<LockOp> {
        self.operations.lock().clone()
    }

    /// Returns the number of recorded acquisition attempts.
    #[must_use]
    pub fn acquire_count(&self) -> usize {
        self.operations.lock().iter().filter(|op| matches!(op, LockOp::Acquire { .. })).count()
    }

    /// Returns the number of recorded releases.
    #[must_use]
    pub fn release_count(&self) -> usize {
        self.operations.lock().iter().filter(|op| matches!(op, LockOp::Release(_))).count()
    }

    fn issue_token(&self) -> String {
        format!("mock-{}", self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    fn check(&self, op: LockOp) -> Result<()> {
        let fail = self.fail_when.lock().as_ref().is_some_and(|predicate| predicate(&op));
        let message = match &op {
            LockOp::Acquire { .. } => "mock: acquire failed",
            LockOp::Release(_) => "mock: release failed",
        };
        self.operations.lock().push(op);
        if fail { Err(Error::lock(message)) } else { Ok(()) }
    }
}

impl DistributedLock for MockLock {
    async fn try_acquire(&self, name: &str, wait: WaitPolicy, lease: Duration) -> Result<Option<LockLease>> {
        self.check(LockOp::Acquire {
            name: name.to_owned(),
            wait,
            lease,
        })?;

        let mut holders = self.holders.lock();
        if holders.contains_key(name) {
            return Ok(None);
        }
        let token = self.issue_token();
        holders.insert(name.to_owned(), token.clone());
        Ok(Some(LockLease::new(name, token, lease)))
    }

    async fn release(&self, lease: LockLease) -> Result<bool> {
        self.check(LockOp::Release(lease.name().to_owned()))?;

        let mut holders = self.holders.lock();
        if holders.get(lease.name()).is_some_and(|token| token == lease.token()) {
            holders.remove(lease.name());
            Ok(true)
        } else {
            Ok(false)
        }
    }
}
