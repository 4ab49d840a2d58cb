// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Reads that cache confirmed absence.

use std::{fmt::Display, time::Duration};

use herdguard_tier::{CacheStore, DistributedLock, Error, Result};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    CacheClient,
    client::{BoxError, ClientInner},
    codec::Cached,
    telemetry::{Activity, Operation},
};

impl<S, L> CacheClient<S, L>
where
    S: CacheStore,
    L: DistributedLock,
{
    /// Reads `key_prefix + id`, loading and caching it on a miss.
    ///
    /// When the loader reports the id as absent, a null marker is cached in its place so that
    /// later reads answer `None` without calling the loader again until the marker expires.
    /// Concurrent misses may each call the loader once; use
    /// [`get_with_mutex`](Self::get_with_mutex) when that matters.
    ///
    /// # Errors
    ///
    /// Returns the store, codec or loader error that interrupted the read.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use herdguard::CacheClient;
    /// use herdguard_tier::{InMemoryLock, InMemoryStore};
    /// use tick::Clock;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> herdguard::Result<()> {
    /// let clock = Clock::new_tokio();
    /// let client = CacheClient::builder(InMemoryStore::new(clock.clone()), InMemoryLock::new(clock.clone()), clock).build();
    ///
    /// // Shop 7 does not exist: the first read asks the database, the second does not.
    /// for _ in 0..2 {
    ///     let shop = client
    ///         .get_with_pass_through("cache:shop:", 7, Duration::from_secs(60), |_id: u64| async {
    ///             Ok::<Option<String>, std::io::Error>(None)
    ///         })
    ///         .await?;
    ///     assert_eq!(shop, None);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn get_with_pass_through<V, I, F, Fut, E>(&self, key_prefix: &str, id: I, ttl: Duration, loader: F) -> Result<Option<V>>
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

        let result = async {
            match inner.lookup::<V>(&key).await? {
                Cached::Missing => inner.load_and_store(&key, id, ttl, loader).await,
                cached => Ok(served(cached)),
            }
        }
        .await;

        inner.finish(Operation::PassThrough, &stopwatch, result)
    }
}

/// Maps a cache read that needs no load onto the value returned to the caller.
pub(crate) fn served<V>(cached: Cached<V>) -> (Option<V>, Activity) {
    match cached {
        Cached::Value(value) => (Some(value), Activity::Hit),
        Cached::NullMarker => (None, Activity::NullHit),
        Cached::Missing => (None, Activity::Miss),
    }
}

impl<S, L> ClientInner<S, L>
where
    S: CacheStore,
    L: DistributedLock,
{
    /// Calls the loader and caches its answer: the value with `ttl`, or a null marker.
    pub(crate) async fn load_and_store<V, I, F, Fut, E>(&self, key: &str, id: I, ttl: Duration, loader: F) -> Result<(Option<V>, Activity)>
    where
        V: Serialize,
        F: FnOnce(I) -> Fut,
        Fut: Future<Output = std::result::Result<Option<V>, E>>,
        E: Into<BoxError>,
    {
        match loader(id).await.map_err(Error::loader)? {
            Some(value) => {
                self.write_value(key, &value, ttl).await?;
                Ok((Some(value), Activity::Loaded))
            }
            None => {
                self.write_null_marker(key, ttl).await?;
                Ok((None, Activity::LoadedAbsent))
            }
        }
    }
}
