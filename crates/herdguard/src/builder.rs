// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Configuration of a [`CacheClient`].

use std::{sync::Arc, time::Duration};

use herdguard_tier::{CacheStore, DistributedLock};
use opentelemetry::metrics::{Meter, MeterProvider};
use tick::Clock;

use crate::{
    RebuildExecutor,
    client::{CacheClient, ClientInner, ClientName},
    executor::DEFAULT_WORKERS,
    telemetry::{ClientTelemetry, metrics::create_meter},
};

/// Telemetry name used when none is configured.
pub const DEFAULT_NAME: ClientName = "herdguard";

/// Lease taken on every lock when none is configured.
pub const DEFAULT_LOCK_LEASE: Duration = Duration::from_secs(10);

/// Back-off between lock probes of the mutex strategy when none is configured.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ClientOptions {
    pub(crate) lock_lease: Duration,
    pub(crate) retry_delay: Duration,
    pub(crate) max_lock_wait: Duration,
    null_marker_cap: Option<Duration>,
}

impl ClientOptions {
    /// TTL of a null marker written by a call with the given value TTL.
    pub(crate) fn null_marker_ttl(&self, ttl: Duration) -> Duration {
        self.null_marker_cap.map_or(ttl, |cap| ttl.min(cap))
    }
}

/// Builder for [`CacheClient`].
///
/// Created by [`CacheClient::builder`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use herdguard::{CacheClient, RebuildExecutor};
/// use herdguard_tier::{InMemoryLock, InMemoryStore};
/// use tick::Clock;
///
/// # #[tokio::main]
/// # async fn main() {
/// let clock = Clock::new_tokio();
/// let client = CacheClient::builder(InMemoryStore::new(clock.clone()), InMemoryLock::new(clock.clone()), clock)
///     .name("shops")
///     .executor(RebuildExecutor::new_tokio(4))
///     .lock_lease(Duration::from_secs(5))
///     .retry_delay(Duration::from_millis(20))
///     .null_marker_ttl(Duration::from_secs(30))
///     .build();
/// assert_eq!(client.name(), "shops");
/// # }
/// ```
pub struct CacheClientBuilder<S, L> {
    name: ClientName,
    store: S,
    lock: L,
    clock: Clock,
    executor: Option<RebuildExecutor>,
    lock_lease: Duration,
    retry_delay: Duration,
    max_lock_wait: Option<Duration>,
    null_marker_cap: Option<Duration>,
    logs: bool,
    meter: Option<Meter>,
}

impl<S, L> std::fmt::Debug for CacheClientBuilder<S, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheClientBuilder")
            .field("name", &self.name)
            .field("executor", &self.executor)
            .field("lock_lease", &self.lock_lease)
            .field("retry_delay", &self.retry_delay)
            .field("max_lock_wait", &self.max_lock_wait)
            .field("null_marker_cap", &self.null_marker_cap)
            .field("logs", &self.logs)
            .field("metrics", &self.meter.is_some())
            .finish_non_exhaustive()
    }
}

impl<S, L> CacheClientBuilder<S, L>
where
    S: CacheStore,
    L: DistributedLock,
{
    pub(crate) fn new(store: S, lock: L, clock: Clock) -> Self {
        Self {
            name: DEFAULT_NAME,
            store,
            lock,
            clock,
            executor: None,
            lock_lease: DEFAULT_LOCK_LEASE,
            retry_delay: DEFAULT_RETRY_DELAY,
            max_lock_wait: None,
            null_marker_cap: None,
            logs: true,
            meter: None,
        }
    }

    /// Sets the name identifying this client in logs and metrics.
    #[must_use]
    pub fn name(mut self, name: ClientName) -> Self {
        self.name = name;
        self
    }

    /// Sets the pool that runs logical-expiration rebuilds.
    ///
    /// Defaults to a Tokio pool of [`DEFAULT_WORKERS`] workers. Pass a clone of an existing
    /// executor to share one pool between clients.
    #[must_use]
    pub fn executor(mut self, executor: RebuildExecutor) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Sets the lease of every lock this client takes.
    #[must_use]
    pub fn lock_lease(mut self, lease: Duration) -> Self {
        self.lock_lease = lease;
        self
    }

    /// Sets how long the mutex strategy sleeps between lock probes.
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sets how long the mutex strategy keeps retrying a busy lock before failing with
    /// [`ErrorKind::LockTimeout`](herdguard_tier::ErrorKind::LockTimeout).
    ///
    /// Defaults to the lock lease.
    #[must_use]
    pub fn max_lock_wait(mut self, wait: Duration) -> Self {
        self.max_lock_wait = Some(wait);
        self
    }

    /// Caps the TTL of null markers.
    ///
    /// A null marker normally lives as long as the TTL passed to the call that wrote it. With a
    /// cap it lives for the shorter of the two.
    #[must_use]
    pub fn null_marker_ttl(mut self, cap: Duration) -> Self {
        self.null_marker_cap = Some(cap);
        self
    }

    /// Enables or disables structured log events. Enabled by default.
    #[must_use]
    pub fn logs(mut self, enabled: bool) -> Self {
        self.logs = enabled;
        self
    }

    /// Records OpenTelemetry metrics through `meter_provider`.
    #[must_use]
    pub fn metrics(mut self, meter_provider: &dyn MeterProvider) -> Self {
        self.meter = Some(create_meter(meter_provider));
        self
    }

    /// Builds the client.
    ///
    /// Without an explicit [`executor`](Self::executor), rebuilds are spawned on the Tokio
    /// runtime current at the time of the stale read. Stale reads outside of a runtime keep
    /// serving the stale value without rebuilding it.
    #[must_use]
    pub fn build(self) -> CacheClient<S, L> {
        let options = ClientOptions {
            lock_lease: self.lock_lease,
            retry_delay: self.retry_delay,
            max_lock_wait: self.max_lock_wait.unwrap_or(self.lock_lease),
            null_marker_cap: self.null_marker_cap,
        };

        CacheClient {
            inner: Arc::new(ClientInner {
                name: self.name,
                store: self.store,
                lock: self.lock,
                clock: self.clock,
                executor: self.executor.unwrap_or_else(|| RebuildExecutor::new_tokio(DEFAULT_WORKERS)),
                options,
                telemetry: ClientTelemetry::new(self.logs, self.meter.as_ref()),
            }),
        }
    }
}
