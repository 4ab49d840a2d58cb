// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Behaviour every store and lock implementation in this crate shares.

use std::{sync::Arc, time::Duration};

use herdguard_tier::{CacheStore, DistributedLock, InMemoryLock, InMemoryStore, WaitPolicy};
use tick::ClockControl;

const LEASE: Duration = Duration::from_secs(10);

async fn store_round_trip(store: &impl CacheStore) {
    assert_eq!(store.get("shop:1").await.expect("get"), None);

    store.set("shop:1", "{\"id\":1}".to_owned(), None).await.expect("set");
    assert_eq!(store.get("shop:1").await.expect("get").as_deref(), Some("{\"id\":1}"));

    store.set("shop:1", String::new(), Some(Duration::from_secs(60))).await.expect("overwrite");
    assert_eq!(store.get("shop:1").await.expect("get").as_deref(), Some(""));

    store.delete("shop:1").await.expect("delete");
    assert_eq!(store.get("shop:1").await.expect("get"), None);
}

async fn lock_exclusion(lock: &impl DistributedLock) {
    let first = lock
        .try_acquire("lock:shop:1", WaitPolicy::NoWait, LEASE)
        .await
        .expect("acquire")
        .expect("free lock");
    let second = lock.try_acquire("lock:shop:1", WaitPolicy::NoWait, LEASE).await.expect("acquire");
    assert!(second.is_none());

    assert!(lock.release(first.clone()).await.expect("release"));
    assert!(!lock.release(first).await.expect("second release"));

    let third = lock.try_acquire("lock:shop:1", WaitPolicy::NoWait, LEASE).await.expect("acquire");
    assert!(third.is_some());
}

#[tokio::test]
async fn in_memory_store_contract() {
    store_round_trip(&InMemoryStore::new(ClockControl::new().to_clock())).await;
}

#[tokio::test]
async fn shared_store_contract() {
    store_round_trip(&Arc::new(InMemoryStore::new(ClockControl::new().to_clock()))).await;
}

#[tokio::test]
async fn in_memory_lock_contract() {
    lock_exclusion(&InMemoryLock::new(ClockControl::new().to_clock())).await;
}

#[tokio::test]
async fn shared_lock_contract() {
    lock_exclusion(&Arc::new(InMemoryLock::new(ClockControl::new().to_clock()))).await;
}
