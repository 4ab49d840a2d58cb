// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! A read-through cache client that keeps a slow backing store alive under hostile traffic.
//!
//! A [`CacheClient`] sits in front of a shared [`CacheStore`] and calls a per-call loader when
//! the cache cannot answer. Three failure modes of naive read-through caching are addressed:
//!
//! - **Penetration**: lookups of ids that do not exist upstream. The loader's `None` is cached as
//!   a null marker, so repeated misses stop at the cache
//!   ([`get_with_pass_through`](CacheClient::get_with_pass_through)).
//! - **Breakdown**: a popular entry expires and every concurrent reader hits the backing store.
//!   [`get_with_mutex`](CacheClient::get_with_mutex) elects one loader through a
//!   [`DistributedLock`] while the rest wait and retry.
//!   [`get_with_logical_expire`](CacheClient::get_with_logical_expire) never waits: entries carry
//!   their own expiry time, stale values are served and a single background rebuild refreshes
//!   them on the [`RebuildExecutor`].
//! - **Cold hot keys**: [`warm`](CacheClient::warm) preloads entries read by the logical strategy.
//!
//! Values are any serde type, sequences included, stored as JSON (see [`codec`]).
//!
//! # Examples
//!
//! ```
//! use std::time::Duration;
//!
//! use herdguard::{BoxError, CacheClient, RebuildExecutor};
//! use herdguard_tier::{InMemoryLock, InMemoryStore};
//! use tick::Clock;
//!
//! # #[tokio::main]
//! # async fn main() -> herdguard::Result<()> {
//! let clock = Clock::new_tokio();
//! let client = CacheClient::builder(InMemoryStore::new(clock.clone()), InMemoryLock::new(clock.clone()), clock)
//!     .name("shops")
//!     .executor(RebuildExecutor::new_tokio(4))
//!     .build();
//!
//! // Hot keys are warmed up front, then read without ever waiting on the backing store.
//! client
//!     .warm("cache:shop:", 1, Duration::from_secs(20), |_: u64| async { Ok::<_, BoxError>(Some("Tea House".to_owned())) })
//!     .await?;
//!
//! let name: Option<String> = client
//!     .get_with_logical_expire("cache:shop:", 1, "lock:shop:", Duration::from_secs(20), |_: u64| async {
//!         Ok::<_, BoxError>(Some("Tea House".to_owned()))
//!     })
//!     .await?;
//! assert_eq!(name.as_deref(), Some("Tea House"));
//! # Ok(())
//! # }
//! ```
//!
//! # Telemetry
//!
//! Each strategy call records one event, logged through `tracing` as `herdguard.event` and,
//! when [`CacheClientBuilder::metrics`] is configured, counted and timed through OpenTelemetry.

mod builder;
mod client;
pub mod codec;
mod executor;
mod logical;
mod mutex;
mod pass_through;
pub(crate) mod telemetry;

#[doc(inline)]
pub use builder::{CacheClientBuilder, DEFAULT_LOCK_LEASE, DEFAULT_NAME, DEFAULT_RETRY_DELAY};
#[doc(inline)]
pub use client::{BoxError, CacheClient, ClientName};
#[doc(inline)]
pub use executor::{DEFAULT_WORKERS, RebuildExecutor};
#[doc(inline)]
pub use herdguard_tier::{CacheStore, DistributedLock, Error, ErrorKind, LockLease, Result, WaitPolicy};
