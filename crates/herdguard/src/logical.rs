// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Reads that never wait: stale entries are served while a background task rebuilds them.

use std::{fmt::Display, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt;
use herdguard_tier::{CacheStore, DistributedLock, Error, LockLease, Result};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    CacheClient,
    client::{BoxError, ClientInner},
    telemetry::{Activity, Operation},
};

impl<S, L> CacheClient<S, L>
where
    S: CacheStore + 'static,
    L: DistributedLock + 'static,
{
    /// Reads the envelope at `key_prefix + id`, refreshing it in the background once stale.
    ///
    /// - A missing entry returns `None`; populate hot keys up front with [`warm`](Self::warm).
    /// - A fresh envelope returns its value without touching the lock.
    /// - A stale envelope returns its value too, but first probes the lock `lock_prefix + id`
    ///   without waiting. The caller that gets the lock checks the envelope again and, if it is
    ///   still stale, submits a rebuild to the [`RebuildExecutor`](crate::RebuildExecutor). The
    ///   rebuild calls the loader, writes a new envelope fresh for `logical_ttl` and releases the
    ///   lock whatever happens.
    ///
    /// Rebuild failures never reach readers; they are logged and the next stale read tries again.
    /// That includes an executor that cannot spawn, such as the default Tokio executor used
    /// outside of a runtime: the lock is released and the stale value served.
    ///
    /// # Errors
    ///
    /// Returns the store or codec error of the foreground read. A failing lock probe is logged and
    /// the stale value served.
    pub async fn get_with_logical_expire<V, I, F, Fut, E>(
        &self,
        key_prefix: &str,
        id: I,
        lock_prefix: &str,
        logical_ttl: Duration,
        loader: F,
    ) -> Result<Option<V>>
    where
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
        I: Display + Send + 'static,
        F: FnOnce(I) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<Option<V>, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let stopwatch = self.inner.clock.stopwatch();
        let key = format!("{key_prefix}{id}");
        let lock_name = format!("{lock_prefix}{id}");

        let result = self.read_or_schedule(key, &lock_name, id, logical_ttl, loader).await;

        self.inner.finish(Operation::LogicalExpire, &stopwatch, result)
    }

    async fn read_or_schedule<V, I, F, Fut, E>(
        &self,
        key: String,
        lock_name: &str,
        id: I,
        logical_ttl: Duration,
        loader: F,
    ) -> Result<(Option<V>, Activity)>
    where
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
        I: Send + 'static,
        F: FnOnce(I) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<Option<V>, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        let inner = &self.inner;

        let Some(envelope) = inner.read_envelope::<V>(&key).await? else {
            return Ok((None, Activity::Miss));
        };
        if envelope.is_fresh(inner.clock.system_time()) {
            return Ok((envelope.into_data(), Activity::Hit));
        }

        let lease = match inner.acquire(lock_name).await {
            Ok(Some(lease)) => lease,
            Ok(None) => return Ok((envelope.into_data(), Activity::LockBusy)),
            Err(error) => {
                tracing::warn!(key = %key, %error, "lock probe failed, serving stale value");
                return Ok((envelope.into_data(), Activity::Stale));
            }
        };

        let current = match inner.read_envelope::<V>(&key).await {
            Ok(Some(current)) => current,
            Ok(None) => {
                inner.release(lease).await;
                return Ok((None, Activity::Miss));
            }
            Err(error) => {
                inner.release(lease).await;
                return Err(error);
            }
        };
        if current.is_fresh(inner.clock.system_time()) {
            inner.release(lease).await;
            return Ok((current.into_data(), Activity::Hit));
        }

        let rebuilder = Arc::clone(inner);
        let held = lease.clone();
        let scheduled = inner.executor.submit(async move {
            rebuilder.rebuild(&key, id, logical_ttl, loader, lease).await;
        });

        match scheduled {
            Ok(()) => Ok((current.into_data(), Activity::RebuildScheduled)),
            Err(error) => {
                // The rebuild and its copy of the lease were dropped unpolled.
                tracing::warn!(lock = %held.name(), %error, "cache rebuild not scheduled, serving stale value");
                inner.release(held).await;
                Ok((current.into_data(), Activity::RebuildFailed))
            }
        }
    }
}

impl<S, L> CacheClient<S, L>
where
    S: CacheStore,
    L: DistributedLock,
{
    /// Loads `id` and writes it into `key_prefix + id` as a fresh envelope.
    ///
    /// The entry goes stale after `logical_ttl` and has no physical TTL. A loader answering
    /// `None` writes an envelope without data, which readers see as `None` until it goes stale.
    /// Warming an already cached key replaces it.
    ///
    /// # Errors
    ///
    /// Returns the loader, codec or store error that interrupted the warm-up.
    pub async fn warm<V, I, F, Fut, E>(&self, key_prefix: &str, id: I, logical_ttl: Duration, loader: F) -> Result<()>
    where
        V: Serialize,
        I: Display,
        F: FnOnce(I) -> Fut,
        Fut: Future<Output = std::result::Result<Option<V>, E>>,
        E: Into<BoxError>,
    {
        let inner = &self.inner;
        let stopwatch = inner.clock.stopwatch();
        let key = format!("{key_prefix}{id}");

        let result = async {
            let value = loader(id).await.map_err(Error::loader)?;
            inner.write_envelope(&key, value.as_ref(), logical_ttl).await?;
            let activity = if value.is_some() { Activity::Loaded } else { Activity::LoadedAbsent };
            Ok(((), activity))
        }
        .await;

        inner.finish(Operation::Warm, &stopwatch, result)
    }
}

impl<S, L> ClientInner<S, L>
where
    S: CacheStore,
    L: DistributedLock,
{
    async fn rebuild<V, I, F, Fut, E>(&self, key: &str, id: I, logical_ttl: Duration, loader: F, lease: LockLease)
    where
        V: Serialize,
        F: FnOnce(I) -> Fut,
        Fut: Future<Output = std::result::Result<Option<V>, E>>,
        E: Into<BoxError>,
    {
        let stopwatch = self.clock.stopwatch();

        let outcome = AssertUnwindSafe(async {
            let value = loader(id).await.map_err(Error::loader)?;
            self.write_envelope(key, value.as_ref(), logical_ttl).await
        })
        .catch_unwind()
        .await;

        let activity = match outcome {
            Ok(Ok(())) => Activity::Rebuilt,
            Ok(Err(error)) => {
                tracing::warn!(key, %error, "cache rebuild failed");
                Activity::RebuildFailed
            }
            Err(_) => {
                tracing::error!(key, "cache rebuild panicked");
                Activity::RebuildFailed
            }
        };

        self.release(lease).await;
        self.record(Operation::Rebuild, activity, Some(stopwatch.elapsed()));
    }
}
