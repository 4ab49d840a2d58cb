// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for store, lock and loader operations.

use std::{fmt, time::Duration};

/// Broad category of an [`Error`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The cache store failed to read, write or delete an entry.
    #[default]
    Store,
    /// The distributed lock backend failed.
    Lock,
    /// The caller-supplied loader failed.
    Loader,
    /// A cached payload could not be encoded or decoded.
    Codec,
    /// A lock could not be acquired before the configured wait bound ran out.
    LockTimeout,
    /// Background work could not be scheduled.
    Executor,
}

impl ErrorKind {
    /// Returns a short, stable name for this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Store => "store",
            Self::Lock => "lock",
            Self::Loader => "loader",
            Self::Codec => "codec",
            Self::LockTimeout => "lock timeout",
            Self::Executor => "executor",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error from a cache store, distributed lock, loader, codec or executor.
///
/// The [`kind`](Error::kind) tells callers which collaborator failed. The underlying
/// cause is kept in the error chain and shown after the message.
///
/// # Example
///
/// ```
/// use herdguard_tier::{Error, ErrorKind};
///
/// let error = Error::store("connection reset");
/// assert_eq!(error.kind(), ErrorKind::Store);
/// ```
#[ohno::error]
#[display("herdguard {kind} error")]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    /// Creates a store error wrapping `cause`.
    pub fn store(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::Store, cause)
    }

    /// Creates a lock backend error wrapping `cause`.
    pub fn lock(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::Lock, cause)
    }

    /// Creates a loader error wrapping `cause`.
    pub fn loader(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::Loader, cause)
    }

    /// Creates an encode or decode error wrapping `cause`.
    pub fn codec(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::Codec, cause)
    }

    /// Creates an error reporting that background work could not be scheduled.
    pub fn executor(cause: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::caused_by(ErrorKind::Executor, cause)
    }

    /// Creates an error reporting that the lock `name` stayed busy for `waited`.
    #[must_use]
    pub fn lock_timeout(name: &str, waited: Duration) -> Self {
        Self::caused_by(ErrorKind::LockTimeout, format!("lock '{name}' still held after {waited:?}"))
    }

    /// Returns the category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// A specialized [`Result`] type for herdguard operations.
pub type Result<T> = std::result::Result<T, Error>;
