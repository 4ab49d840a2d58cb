// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use herdguard_tier::{CacheStore, Error, Result};
use redis::aio::ConnectionManager;

use crate::px_millis;

/// A [`CacheStore`] backed by Redis strings.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Wraps an existing managed connection.
    #[must_use]
    pub fn new(connection: ConnectionManager) -> Self {
        Self { connection }
    }

    /// Connects to the Redis server at `url`.
    ///
    /// # Errors
    ///
    /// Returns a store error when the server cannot be reached.
    pub async fn connect(url: &str) -> Result<Self> {
        crate::connect(url).await.map(Self::new)
    }

    /// Returns a handle to the underlying connection, for sharing it with a [`RedisLock`](crate::RedisLock).
    #[must_use]
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }
}

impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut connection = self.connection.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async::<Option<String>>(&mut connection)
            .await
            .map_err(Error::store)
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let mut connection = self.connection.clone();
        let mut command = redis::cmd("SET");
        command.arg(key).arg(value);
        if let Some(ttl) = ttl {
            command.arg("PX").arg(px_millis(ttl));
        }
        command.query_async::<()>(&mut connection).await.map_err(Error::store)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut connection = self.connection.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<()>(&mut connection)
            .await
            .map_err(Error::store)
    }
}
