// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Collaborator contracts for the herdguard read-through cache.
//!
//! This crate defines the two seams a herdguard client talks through:
//!
//! - [`CacheStore`]: raw string GET, SET with an optional physical TTL, and DELETE against a
//!   shared cache backend.
//! - [`DistributedLock`]: named mutual exclusion with a lease, returning a [`LockLease`] whose
//!   token proves ownership on release.
//!
//! It also ships clock-driven in-process implementations ([`InMemoryStore`], [`InMemoryLock`])
//! and, behind the `test-util` feature, recording doubles in [`testing`].
//!
//! # Implementing a lock
//!
//! ```
//! use std::time::Duration;
//!
//! use herdguard_tier::{DistributedLock, LockLease, Result, WaitPolicy};
//!
//! struct AlwaysFree;
//!
//! impl DistributedLock for AlwaysFree {
//!     async fn try_acquire(&self, name: &str, _wait: WaitPolicy, lease: Duration) -> Result<Option<LockLease>> {
//!         Ok(Some(LockLease::new(name, "token", lease)))
//!     }
//!
//!     async fn release(&self, _lease: LockLease) -> Result<bool> {
//!         Ok(true)
//!     }
//! }
//! ```

pub mod error;
mod lock;
mod memory;
mod store;
#[cfg(any(feature = "test-util", test))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-util")))]
pub mod testing;

#[doc(inline)]
pub use error::{Error, ErrorKind, Result};
#[doc(inline)]
pub use lock::{DistributedLock, LockLease, WaitPolicy};
#[doc(inline)]
pub use memory::{DEFAULT_POLL_INTERVAL, InMemoryLock, InMemoryStore};
#[doc(inline)]
pub use store::CacheStore;
