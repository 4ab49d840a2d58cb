// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{sync::Arc, time::Duration};

use crate::Result;

/// Raw key/value access to the shared cache backend.
///
/// A store only moves strings in and out. Encoding, null markers and expiry envelopes are the
/// concern of the caller. Every method is fallible because real backends are remote.
///
/// # Implementing a store
///
/// ```
/// use std::{collections::HashMap, sync::Mutex, time::Duration};
///
/// use herdguard_tier::{CacheStore, Result};
///
/// struct MapStore(Mutex<HashMap<String, String>>);
///
/// impl CacheStore for MapStore {
///     async fn get(&self, key: &str) -> Result<Option<String>> {
///         Ok(self.0.lock().unwrap().get(key).cloned())
///     }
///
///     async fn set(&self, key: &str, value: String, _ttl: Option<Duration>) -> Result<()> {
///         self.0.lock().unwrap().insert(key.to_owned(), value);
///         Ok(())
///     }
///
///     async fn delete(&self, key: &str) -> Result<()> {
///         self.0.lock().unwrap().remove(key);
///         Ok(())
///     }
/// }
/// ```
pub trait CacheStore: Send + Sync {
    /// Reads the raw value stored under `key`, or `None` if nothing is cached.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send;

    /// Writes `value` under `key`, replacing any previous value.
    ///
    /// `ttl` is the physical time-to-live. `None` keeps the value until it is overwritten or
    /// deleted.
    fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> impl Future<Output = Result<()>> + Send;

    /// Removes `key`. Deleting a missing key succeeds.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;
}

impl<T: CacheStore> CacheStore for Arc<T> {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>>> + Send {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> impl Future<Output = Result<()>> + Send {
        (**self).set(key, value, ttl)
    }

    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send {
        (**self).delete(key)
    }
}
