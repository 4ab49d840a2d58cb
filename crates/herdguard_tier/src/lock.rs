// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{sync::Arc, time::Duration};

use crate::Result;

/// How long [`DistributedLock::try_acquire`] may wait for a busy lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitPolicy {
    /// Probe once and return immediately.
    NoWait,
    /// Keep trying for at most the given duration.
    For(Duration),
    /// Keep trying until the lock is acquired.
    UntilAvailable,
}

impl WaitPolicy {
    /// Returns the longest time an acquisition may wait, or `None` when unbounded.
    #[must_use]
    pub fn budget(self) -> Option<Duration> {
        match self {
            Self::NoWait => Some(Duration::ZERO),
            Self::For(limit) => Some(limit),
            Self::UntilAvailable => None,
        }
    }
}

/// Proof of a successful lock acquisition.
///
/// The token identifies this particular acquisition. Releasing with a stale lease never frees a
/// lock that somebody else acquired after the lease ran out.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct LockLease {
    name: String,
    token: String,
    lease: Duration,
}

impl LockLease {
    /// Creates a lease for the lock `name`, owned through `token`, valid for `lease`.
    #[must_use]
    pub fn new(name: impl Into<String>, token: impl Into<String>, lease: Duration) -> Self {
        Self {
            name: name.into(),
            token: token.into(),
            lease,
        }
    }

    /// Returns the name of the lock.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the ownership token of this acquisition.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Returns how long the lock is held before it expires on its own.
    #[must_use]
    pub fn lease(&self) -> Duration {
        self.lease
    }
}

/// Named mutual exclusion shared by every process that talks to the same cache.
///
/// Locks always carry a lease, so a holder that crashes never keeps a lock forever.
pub trait DistributedLock: Send + Sync {
    /// Tries to acquire the lock `name` for `lease`.
    ///
    /// Returns `Ok(Some(lease))` when acquired and `Ok(None)` when the lock stayed busy for
    /// the whole of `wait`.
    fn try_acquire(&self, name: &str, wait: WaitPolicy, lease: Duration) -> impl Future<Output = Result<Option<LockLease>>> + Send;

    /// Releases a previously acquired lock.
    ///
    /// Returns `Ok(false)` when the lease had already expired or the lock now belongs to
    /// another owner; the lock is left untouched in that case.
    fn release(&self, lease: LockLease) -> impl Future<Output = Result<bool>> + Send;
}

impl<T: DistributedLock> DistributedLock for Arc<T> {
    fn try_acquire(&self, name: &str, wait: WaitPolicy, lease: Duration) -> impl Future<Output = Result<Option<LockLease>>> + Send {
        (**self).try_acquire(name, wait, lease)
    }

    fn release(&self, lease: LockLease) -> impl Future<Output = Result<bool>> + Send {
        (**self).release(lease)
    }
}
