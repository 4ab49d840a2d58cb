// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{sync::Arc, time::Duration};

use herdguard_tier::{CacheStore, DistributedLock, Error, ErrorKind, LockLease, Result, WaitPolicy};
use serde::{Serialize, de::DeserializeOwned};
use tick::{Clock, Stopwatch};

use crate::{
    RebuildExecutor,
    builder::{CacheClientBuilder, ClientOptions},
    codec::{self, Cached, Envelope, NULL_MARKER},
    telemetry::{Activity, ClientTelemetry, Operation},
};

/// Name identifying a client in telemetry.
pub type ClientName = &'static str;

/// Error type a loader may fail with.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A read-through cache client protecting a slow backing store.
///
/// The client reads from a shared [`CacheStore`] and, on a miss or a stale entry, calls a
/// caller-supplied loader to fetch the value from the backing store. Three read strategies are
/// offered:
///
/// - [`get_with_pass_through`](Self::get_with_pass_through) caches confirmed absence as a null
///   marker so repeated lookups of missing ids stop reaching the backing store.
/// - [`get_with_mutex`](Self::get_with_mutex) lets exactly one caller rebuild a missing entry
///   while the others wait and retry.
/// - [`get_with_logical_expire`](Self::get_with_logical_expire) never waits: stale entries are
///   served while a single background rebuild refreshes them.
///
/// Cross-caller coordination goes through the [`DistributedLock`], so the guarantees hold
/// across processes sharing the same store and lock backend. Cloning is cheap and clones share
/// configuration, executor and telemetry.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use herdguard::CacheClient;
/// use herdguard_tier::{InMemoryLock, InMemoryStore};
/// use serde::{Deserialize, Serialize};
/// use tick::Clock;
///
/// #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
/// struct Shop {
///     id: u64,
///     name: String,
/// }
///
/// # #[tokio::main]
/// # async fn main() -> herdguard::Result<()> {
/// let clock = Clock::new_tokio();
/// let client = CacheClient::builder(InMemoryStore::new(clock.clone()), InMemoryLock::new(clock.clone()), clock).build();
///
/// let shop = client
///     .get_with_mutex("cache:shop:", 1, "lock:shop:", Duration::from_secs(1800), |id: u64| async move {
///         Ok::<_, std::io::Error>(Some(Shop { id, name: "Tea House".to_owned() }))
///     })
///     .await?;
/// assert_eq!(shop.map(|s| s.name), Some("Tea House".to_owned()));
/// # Ok(())
/// # }
/// ```
pub struct CacheClient<S, L> {
    pub(crate) inner: Arc<ClientInner<S, L>>,
}

pub(crate) struct ClientInner<S, L> {
    pub(crate) name: ClientName,
    pub(crate) store: S,
    pub(crate) lock: L,
    pub(crate) clock: Clock,
    pub(crate) executor: RebuildExecutor,
    pub(crate) options: ClientOptions,
    pub(crate) telemetry: ClientTelemetry,
}

impl<S, L> Clone for CacheClient<S, L> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, L> std::fmt::Debug for CacheClient<S, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheClient")
            .field("name", &self.inner.name)
            .field("options", &self.inner.options)
            .field("executor", &self.inner.executor)
            .finish_non_exhaustive()
    }
}

impl<S, L> CacheClient<S, L>
where
    S: CacheStore,
    L: DistributedLock,
{
    /// Starts building a client over `store` and `lock`, measuring time on `clock`.
    #[must_use]
    pub fn builder(store: S, lock: L, clock: Clock) -> CacheClientBuilder<S, L> {
        CacheClientBuilder::new(store, lock, clock)
    }

    /// Returns the name identifying this client in telemetry.
    #[must_use]
    pub fn name(&self) -> ClientName {
        self.inner.name
    }

    /// Returns the clock used for logical expiry and retry delays.
    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.inner.clock
    }

    /// Returns the underlying cache store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.inner.store
    }

    /// Returns the underlying distributed lock.
    #[must_use]
    pub fn lock(&self) -> &L {
        &self.inner.lock
    }

    /// Returns the pool running background rebuilds.
    #[must_use]
    pub fn executor(&self) -> &RebuildExecutor {
        &self.inner.executor
    }

    /// Writes `value` under `key` with the physical `ttl`.
    ///
    /// Use this, or [`delete`](Self::delete), after updating the backing store.
    ///
    /// # Errors
    ///
    /// Returns a codec error when `value` cannot be encoded and a store error when the write fails.
    pub async fn set<V: Serialize + ?Sized>(&self, key: &str, value: &V, ttl: Duration) -> Result<()> {
        self.inner.write_value(key, value, ttl).await
    }

    /// Writes `value` under `key` in an envelope that goes stale after `logical_ttl`.
    ///
    /// The entry has no physical TTL; it is meant to be read with
    /// [`get_with_logical_expire`](Self::get_with_logical_expire).
    ///
    /// # Errors
    ///
    /// Returns a codec error when `value` cannot be encoded and a store error when the write fails.
    pub async fn set_with_logical_expire<V: Serialize + ?Sized>(&self, key: &str, value: &V, logical_ttl: Duration) -> Result<()> {
        self.inner.write_envelope(key, Some(value), logical_ttl).await
    }

    /// Removes `key` from the cache.
    ///
    /// # Errors
    ///
    /// Returns a store error when the delete fails.
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.inner.store.delete(key).await
    }

    /// Probes the lock `name` once, using the configured lease.
    ///
    /// # Errors
    ///
    /// Returns a lock error when the lock backend fails.
    pub async fn try_lock(&self, name: &str) -> Result<Option<LockLease>> {
        self.inner.acquire(name).await
    }

    /// Releases a lease obtained from [`try_lock`](Self::try_lock).
    ///
    /// Returns `false` when the lease had already expired.
    ///
    /// # Errors
    ///
    /// Returns a lock error when the lock backend fails.
    pub async fn unlock(&self, lease: LockLease) -> Result<bool> {
        self.inner.lock.release(lease).await
    }
}

impl<S, L> ClientInner<S, L>
where
    S: CacheStore,
    L: DistributedLock,
{
    pub(crate) fn record(&self, operation: Operation, activity: Activity, duration: Option<Duration>) {
        self.telemetry.record(self.name, operation, activity, duration);
    }

    /// Records the outcome of a strategy call and strips the activity from a successful result.
    pub(crate) fn finish<T>(&self, operation: Operation, stopwatch: &Stopwatch, result: Result<(T, Activity)>) -> Result<T> {
        let duration = Some(stopwatch.elapsed());
        match result {
            Ok((value, activity)) => {
                self.record(operation, activity, duration);
                Ok(value)
            }
            Err(error) => {
                let activity = if error.kind() == ErrorKind::LockTimeout {
                    Activity::LockTimeout
                } else {
                    Activity::Error
                };
                self.record(operation, activity, duration);
                Err(error)
            }
        }
    }

    pub(crate) async fn lookup<V: DeserializeOwned>(&self, key: &str) -> Result<Cached<V>> {
        let raw = self.store.get(key).await?;
        codec::decode_entry(raw.as_deref())
    }

    /// Reads an envelope; blank and missing entries both read as `None`.
    pub(crate) async fn read_envelope<V: DeserializeOwned>(&self, key: &str) -> Result<Option<Envelope<V>>> {
        match self.store.get(key).await? {
            Some(raw) if !codec::is_null_marker(&raw) => codec::decode_envelope(&raw).map(Some),
            _ => Ok(None),
        }
    }

    pub(crate) async fn write_value<V: Serialize + ?Sized>(&self, key: &str, value: &V, ttl: Duration) -> Result<()> {
        let raw = codec::encode(value)?;
        self.store.set(key, raw, Some(ttl)).await
    }

    pub(crate) async fn write_null_marker(&self, key: &str, ttl: Duration) -> Result<()> {
        let ttl = self.options.null_marker_ttl(ttl);
        self.store.set(key, NULL_MARKER.to_owned(), Some(ttl)).await
    }

    pub(crate) async fn write_envelope<V: Serialize + ?Sized>(&self, key: &str, data: Option<&V>, logical_ttl: Duration) -> Result<()> {
        let expire_time = self
            .clock
            .system_time()
            .checked_add(logical_ttl)
            .ok_or_else(|| Error::codec(format!("logical ttl {logical_ttl:?} is out of range")))?;
        let raw = codec::encode_envelope(data, expire_time)?;
        self.store.set(key, raw, None).await
    }

    pub(crate) async fn acquire(&self, name: &str) -> Result<Option<LockLease>> {
        self.lock.try_acquire(name, WaitPolicy::NoWait, self.options.lock_lease).await
    }

    /// Releases `lease`, logging instead of failing; lease expiry is the backstop.
    pub(crate) async fn release(&self, lease: LockLease) {
        let name = lease.name().to_owned();
        match self.lock.release(lease).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(lock = %name, "lock lease expired before release"),
            Err(error) => tracing::warn!(lock = %name, %error, "failed to release lock"),
        }
    }
}
