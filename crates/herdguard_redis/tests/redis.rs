// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Integration tests against a live Redis server.
//!
//! Ignored by default; set `HERDGUARD_REDIS_URL` and run with `--ignored`.

use std::time::Duration;

use herdguard_redis::{RedisLock, RedisStore};
use herdguard_tier::{CacheStore, DistributedLock, WaitPolicy};
use tick::Clock;

fn redis_url() -> String {
    std::env::var("HERDGUARD_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_owned())
}

fn unique(prefix: &str) -> String {
    format!("{prefix}{}", nanos_since_epoch())
}

fn nanos_since_epoch() -> u128 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_nanos())
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires a running redis server"]
async fn store_set_get_delete() {
    let store = RedisStore::connect(&redis_url()).await.expect("connect");
    let key = unique("herdguard:test:shop:");

    store.set(&key, "{\"id\":7}".to_owned(), Some(Duration::from_secs(30))).await.expect("set");
    assert_eq!(store.get(&key).await.expect("get").as_deref(), Some("{\"id\":7}"));

    store.delete(&key).await.expect("delete");
    assert_eq!(store.get(&key).await.expect("get"), None);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires a running redis server"]
async fn store_ttl_expires_entry() {
    let store = RedisStore::connect(&redis_url()).await.expect("connect");
    let key = unique("herdguard:test:ttl:");

    store.set(&key, String::new(), Some(Duration::from_millis(100))).await.expect("set");
    assert_eq!(store.get(&key).await.expect("get").as_deref(), Some(""));

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(store.get(&key).await.expect("get"), None);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires a running redis server"]
async fn lock_is_exclusive_and_token_checked() {
    let store = RedisStore::connect(&redis_url()).await.expect("connect");
    let lock = RedisLock::new(store.connection(), Clock::new_tokio());
    let name = unique("herdguard:test:lock:");
    let lease = Duration::from_secs(5);

    let first = lock
        .try_acquire(&name, WaitPolicy::NoWait, lease)
        .await
        .expect("acquire")
        .expect("free lock");
    assert!(lock.try_acquire(&name, WaitPolicy::NoWait, lease).await.expect("acquire").is_none());

    assert!(lock.release(first.clone()).await.expect("release"));
    assert!(!lock.release(first).await.expect("stale release"));
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires a running redis server"]
async fn lock_wait_for_outlasts_short_lease() {
    let store = RedisStore::connect(&redis_url()).await.expect("connect");
    let lock = RedisLock::new(store.connection(), Clock::new_tokio()).with_poll_interval(Duration::from_millis(20));
    let name = unique("herdguard:test:lock:");

    let held = lock
        .try_acquire(&name, WaitPolicy::NoWait, Duration::from_millis(100))
        .await
        .expect("acquire");
    assert!(held.is_some());

    let waited = lock
        .try_acquire(&name, WaitPolicy::For(Duration::from_secs(2)), Duration::from_secs(1))
        .await
        .expect("acquire");
    assert!(waited.is_some());
}
