// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::time::Duration;

use herdguard_tier::{DistributedLock, Error, LockLease, Result, WaitPolicy};
use redis::{Script, aio::ConnectionManager};
use tick::Clock;

use crate::px_millis;

/// How often [`RedisLock`] re-tries a busy lock when the wait policy allows waiting.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

// Deletes the lock only while it still carries the caller's token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// A [`DistributedLock`] backed by Redis keys with a `PX` expiry.
///
/// Each acquisition stores a random token under the lock name. Release runs a script that only
/// deletes the key while it still holds that token.
#[derive(Clone)]
pub struct RedisLock {
    connection: ConnectionManager,
    clock: Clock,
    poll_interval: Duration,
    release_script: Script,
}

impl std::fmt::Debug for RedisLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLock")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl RedisLock {
    /// Creates a lock over `connection` that paces waiting on `clock`.
    #[must_use]
    pub fn new(connection: ConnectionManager, clock: Clock) -> Self {
        Self {
            connection,
            clock,
            poll_interval: DEFAULT_POLL_INTERVAL,
            release_script: Script::new(RELEASE_SCRIPT),
        }
    }

    /// Connects to the Redis server at `url`.
    ///
    /// # Errors
    ///
    /// Returns a store error when the server cannot be reached.
    pub async fn connect(url: &str, clock: Clock) -> Result<Self> {
        let connection = crate::connect(url).await?;
        Ok(Self::new(connection, clock))
    }

    /// Sets how often a busy lock is re-tried while waiting.
    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn acquire_once(&self, name: &str, lease: Duration) -> Result<Option<LockLease>> {
        let token = uuid::Uuid::new_v4().to_string();
        let mut connection = self.connection.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(name)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(px_millis(lease))
            .query_async(&mut connection)
            .await
            .map_err(Error::lock)?;

        Ok(reply.map(|_| LockLease::new(name, token, lease)))
    }
}

impl DistributedLock for RedisLock {
    async fn try_acquire(&self, name: &str, wait: WaitPolicy, lease: Duration) -> Result<Option<LockLease>> {
        let budget = wait.budget();
        let stopwatch = self.clock.stopwatch();

        loop {
            if let Some(acquired) = self.acquire_once(name, lease).await? {
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
        let mut connection = self.connection.clone();
        let deleted: i64 = self
            .release_script
            .key(lease.name())
            .arg(lease.token())
            .invoke_async(&mut connection)
            .await
            .map_err(Error::lock)?;

        if deleted == 0 {
            tracing::debug!(lock = lease.name(), "lock lease expired before release");
        }
        Ok(deleted == 1)
    }
}
