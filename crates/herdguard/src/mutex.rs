// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Reads that rebuild a missing entry under a distributed lock.

use std::{fmt::Display, panic::AssertUnwindSafe, time::Duration};

use futures::FutureExt;
use herdguard_tier::{CacheStore, DistributedLock, Error, Result};
use serde::{Serialize, de::DeserializeOwned};
use tick::Stopwatch;

use crate::{
    CacheClient,
    client::{BoxError, ClientInner},
    codec::Cached,
    pass_through::served,
    telemetry::{Activity, Operation},
};

impl<S, L> CacheClient<S, L>
where
    S: CacheStore,
    L: DistributedLock,
{
    /// Reads `key_prefix + id`, letting a single caller load it on a miss.
    ///
    /// On a miss the caller probes the lock `lock_prefix + id` without waiting. The winner
    /// checks the cache again, calls the loader if the entry is still missing, caches the value
    /// (or a null marker) with `ttl` and releases the lock. Everybody else sleeps for the
    /// configured retry delay and starts over, so they normally end up reading what the winner
    /// cached.
    ///
    /// The lock is released on every exit path, including loader errors and panics; a panic
    /// resumes after the release.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::LockTimeout`](herdguard_tier::ErrorKind::LockTimeout) when the lock
    /// stays busy beyond the configured maximum wait, and otherwise the store, lock, codec or
    /// loader error that interrupted the read.
    pub async fn get_with_mutex<V, I, F, Fut, E>(
        &self,
        key_prefix: &str,
        id: I,
        lock_prefix: &str,
        ttl: Duration,
        loader: F,
    ) -> Result<Option<V>>
    where
        V: Serialize + DeserializeOwned,
        I: Display,
        F: FnOnce(I) -> Fut,
        Fut: Future<Output = std::result::Result<Option<V>, E>>,
        E: Into<BoxError>,
    {
        let inner = &self.inner;
        let stopwatch = inner.clock.stopwatch();
        let key = format!("{key_prefix}{id}");
        let lock_name = format!("{lock_prefix}{id}");

        let result = inner.read_under_mutex(&key, &lock_name, id, ttl, loader, &stopwatch).await;

        inner.finish(Operation::Mutex, &stopwatch, result)
    }
}

impl<S, L> ClientInner<S, L>
where
    S: CacheStore,
    L: DistributedLock,
{
    async fn read_under_mutex<V, I, F, Fut, E>(
        &self,
        key: &str,
        lock_name: &str,
        id: I,
        ttl: Duration,
        loader: F,
        stopwatch: &Stopwatch,
    ) -> Result<(Option<V>, Activity)>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce(I) -> Fut,
        Fut: Future<Output = std::result::Result<Option<V>, E>>,
        E: Into<BoxError>,
    {
        let lease = loop {
            match self.lookup::<V>(key).await? {
                Cached::Missing => {}
                cached => return Ok(served(cached)),
            }

            if let Some(lease) = self.acquire(lock_name).await? {
                break lease;
            }

            let waited = stopwatch.elapsed();
            if waited >= self.options.max_lock_wait {
                return Err(Error::lock_timeout(lock_name, waited));
            }
            self.clock.delay(self.options.retry_delay).await;
        };

        let outcome = AssertUnwindSafe(async {
            match self.lookup::<V>(key).await? {
                Cached::Missing => self.load_and_store(key, id, ttl, loader).await,
                cached => Ok(served(cached)),
            }
        })
        .catch_unwind()
        .await;

        self.release(lease).await;

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}
