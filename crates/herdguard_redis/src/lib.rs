// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Redis implementations of the herdguard store and lock contracts.
//!
//! [`RedisStore`] maps [`CacheStore`](herdguard_tier::CacheStore) onto `GET`, `SET ... PX` and
//! `DEL`. [`RedisLock`] implements [`DistributedLock`](herdguard_tier::DistributedLock) with
//! `SET NX PX` and a compare-and-delete release script.
//!
//! Both types wrap a [`ConnectionManager`](redis::aio::ConnectionManager), which multiplexes
//! commands over one connection and reconnects on failure. Cloning is cheap.
//!
//! ```no_run
//! use herdguard_redis::{RedisLock, RedisStore};
//! use tick::Clock;
//!
//! # async fn example() -> herdguard_tier::Result<()> {
//! let store = RedisStore::connect("redis://127.0.0.1:6379").await?;
//! let lock = RedisLock::new(store.connection(), Clock::new_tokio());
//! # Ok(())
//! # }
//! ```

mod lock;
mod store;

pub use lock::{DEFAULT_POLL_INTERVAL, RedisLock};
pub use store::RedisStore;

use std::time::Duration;

use herdguard_tier::{Error, Result};
use redis::aio::ConnectionManager;

/// Opens a managed connection to the Redis server at `url`.
///
/// # Errors
///
/// Returns a store error when the URL is invalid or the server cannot be reached.
pub async fn connect(url: &str) -> Result<ConnectionManager> {
    let client = redis::Client::open(url).map_err(Error::store)?;
    let connection = client.get_connection_manager().await.map_err(Error::store)?;
    tracing::debug!(url, "connected to redis");
    Ok(connection)
}

/// Converts a duration to whole milliseconds for `PX`, which rejects zero.
pub(crate) fn px_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}
