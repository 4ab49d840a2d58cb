// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! End-to-end behavior of the read strategies over the in-memory store and lock.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use herdguard::{BoxError, CacheClient, ErrorKind, RebuildExecutor, Result};
use herdguard_tier::{InMemoryLock, InMemoryStore};
use serde::{Deserialize, Serialize};
use tick::{Clock, ClockControl};

type Client = CacheClient<InMemoryStore, InMemoryLock>;

const LOGICAL_TTL: Duration = Duration::from_secs(20);

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct Shop {
    id: u64,
    name: String,
}

fn shop(id: u64) -> Shop {
    Shop {
        id,
        name: format!("shop {id}"),
    }
}

fn client_on(clock: Clock) -> Client {
    CacheClient::builder(InMemoryStore::new(clock.clone()), InMemoryLock::new(clock.clone()), clock)
        .retry_delay(Duration::from_millis(5))
        .executor(RebuildExecutor::new_tokio(4))
        .build()
}

async fn stale_shop(client: &Client, control: &ClockControl, id: u64) -> Result<()> {
    client
        .set_with_logical_expire(&format!("cache:shop:{id}"), &shop(id), LOGICAL_TTL)
        .await?;
    control.advance(LOGICAL_TTL + Duration::from_secs(1));
    Ok(())
}

async fn mutex_stampede(present: bool) -> Result<usize> {
    let client = client_on(Clock::new_tokio());
    let loads = Arc::new(AtomicUsize::new(0));

    let callers: Vec<_> = (0..50)
        .map(|_| {
            let client = client.clone();
            let loads = Arc::clone(&loads);
            tokio::spawn(async move {
                client
                    .get_with_mutex("cache:shop:", 1, "lock:shop:", Duration::from_secs(1800), move |id: u64| async move {
                        loads.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, BoxError>(present.then(|| shop(id)))
                    })
                    .await
            })
        })
        .collect();

    for caller in callers {
        let value = caller.await.expect("caller task panicked")?;
        assert_eq!(value, present.then(|| shop(1)));
    }

    Ok(loads.load(Ordering::SeqCst))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mutex_stampede_loads_once() -> Result<()> {
    assert_eq!(mutex_stampede(true).await?, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mutex_stampede_on_absent_id_loads_once() -> Result<()> {
    assert_eq!(mutex_stampede(false).await?, 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn logical_stampede_rebuilds_once() -> Result<()> {
    let control = ClockControl::new();
    let client = client_on(control.to_clock());
    stale_shop(&client, &control, 1).await?;
    let rebuilds = Arc::new(AtomicUsize::new(0));

    let callers: Vec<_> = (0..50)
        .map(|_| {
            let client = client.clone();
            let rebuilds = Arc::clone(&rebuilds);
            tokio::spawn(async move {
                client
                    .get_with_logical_expire("cache:shop:", 1, "lock:shop:", LOGICAL_TTL, move |id: u64| async move {
                        rebuilds.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, BoxError>(Some(Shop {
                            id,
                            name: "renamed".to_owned(),
                        }))
                    })
                    .await
            })
        })
        .collect();

    for caller in callers {
        let value: Option<Shop> = caller.await.expect("caller task panicked")?;
        assert_eq!(value.map(|s| s.id), Some(1));
    }
    client.executor().drain().await;

    assert_eq!(rebuilds.load(Ordering::SeqCst), 1);
    assert!(!client.lock().is_locked("lock:shop:1"));

    let value: Option<Shop> = client
        .get_with_logical_expire("cache:shop:", 1, "lock:shop:", LOGICAL_TTL, |_: u64| async {
            Err::<Option<Shop>, BoxError>("must not load".into())
        })
        .await?;
    assert_eq!(value.map(|s| s.name).as_deref(), Some("renamed"));
    Ok(())
}

#[tokio::test]
async fn null_marker_defeats_penetration_until_it_expires() -> Result<()> {
    let control = ClockControl::new();
    let client = client_on(control.to_clock());
    let loads = Arc::new(AtomicUsize::new(0));

    let get = || {
        let loads = Arc::clone(&loads);
        client.get_with_pass_through("cache:shop:", 404, Duration::from_secs(60), move |_: u64| async move {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok::<Option<Shop>, BoxError>(None)
        })
    };

    assert_eq!(get().await?, None);
    for _ in 0..1000 {
        assert_eq!(get().await?, None);
    }
    assert_eq!(loads.load(Ordering::SeqCst), 1);

    control.advance(Duration::from_secs(61));
    assert_eq!(get().await?, None);
    assert_eq!(loads.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn absent_shop_is_cached_as_null_marker() -> Result<()> {
    let control = ClockControl::new();
    let client = client_on(control.to_clock());
    let loads = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        let loads = Arc::clone(&loads);
        let value: Option<Shop> = client
            .get_with_pass_through("cache:shop:", 7, Duration::from_secs(60), move |_: u64| async move {
                loads.fetch_add(1, Ordering::SeqCst);
                Ok::<_, BoxError>(None)
            })
            .await?;
        assert_eq!(value, None);
    }

    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert_eq!(client.store().peek("cache:shop:7").as_deref(), Some(""));
    assert_eq!(client.store().time_to_live("cache:shop:7"), Some(Duration::from_secs(60)));
    Ok(())
}

#[tokio::test]
async fn stale_read_with_busy_lock_does_not_block() -> Result<()> {
    let control = ClockControl::new();
    let client = client_on(control.to_clock());
    stale_shop(&client, &control, 1).await?;
    let _held_elsewhere = client.try_lock("lock:shop:1").await?.expect("lock is free");

    let started = Instant::now();
    let value: Option<Shop> = client
        .get_with_logical_expire("cache:shop:", 1, "lock:shop:", LOGICAL_TTL, |_: u64| async {
            Err::<Option<Shop>, BoxError>("must not load".into())
        })
        .await?;
    let elapsed = started.elapsed();

    assert_eq!(value, Some(shop(1)));
    assert!(elapsed < Duration::from_millis(5), "stale read took {elapsed:?}");
    assert_eq!(client.executor().in_flight(), 0);
    Ok(())
}

#[tokio::test]
async fn mutex_loader_error_leaves_lock_free() -> Result<()> {
    let client = client_on(Clock::new_tokio());

    let error = client
        .get_with_mutex("cache:shop:", 1, "lock:shop:", Duration::from_secs(60), |_: u64| async {
            Err::<Option<Shop>, BoxError>("db down".into())
        })
        .await
        .expect_err("loader failure must surface");
    assert_eq!(error.kind(), ErrorKind::Loader);

    let lease = client.try_lock("lock:shop:1").await?;
    assert!(lease.is_some());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn logical_rebuild_error_leaves_lock_free_and_value_stale() -> Result<()> {
    let control = ClockControl::new();
    let client = client_on(control.to_clock());
    stale_shop(&client, &control, 1).await?;

    let value: Option<Shop> = client
        .get_with_logical_expire("cache:shop:", 1, "lock:shop:", LOGICAL_TTL, |_: u64| async {
            Err::<Option<Shop>, BoxError>("db down".into())
        })
        .await?;
    assert_eq!(value, Some(shop(1)));
    client.executor().drain().await;

    let lease = client.try_lock("lock:shop:1").await?;
    assert!(lease.is_some());

    let raw = client.store().peek("cache:shop:1").expect("stale entry kept");
    let envelope: herdguard::codec::Envelope<Shop> = herdguard::codec::decode_envelope(&raw)?;
    assert!(!envelope.is_fresh(client.clock().system_time()));
    assert_eq!(envelope.into_data(), Some(shop(1)));
    Ok(())
}

#[tokio::test]
async fn second_warm_wins() -> Result<()> {
    let control = ClockControl::new();
    let client = client_on(control.to_clock());

    for name in ["first", "second"] {
        client
            .warm("cache:shop:", 3, LOGICAL_TTL, move |id: u64| async move {
                Ok::<_, BoxError>(Some(Shop { id, name: name.to_owned() }))
            })
            .await?;
    }

    assert_eq!(client.store().time_to_live("cache:shop:3"), None);
    let value: Option<Shop> = client
        .get_with_logical_expire("cache:shop:", 3, "lock:shop:", LOGICAL_TTL, |_: u64| async {
            Err::<Option<Shop>, BoxError>("must not load".into())
        })
        .await?;
    assert_eq!(value.map(|s| s.name).as_deref(), Some("second"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn sequences_work_with_every_strategy() -> Result<()> {
    let control = ClockControl::new();
    let client = client_on(control.to_clock());
    let shops = || async { Ok::<_, BoxError>(Some(vec![shop(1), shop(2)])) };

    let listed = client
        .get_with_pass_through("cache:shops:", "all", Duration::from_secs(60), |_: &str| shops())
        .await?;
    assert_eq!(listed.as_deref(), Some(&[shop(1), shop(2)][..]));
    assert!(client.store().peek("cache:shops:all").is_some_and(|raw| raw.starts_with('[')));

    let listed = client
        .get_with_mutex("cache:type:", 1, "lock:type:", Duration::from_secs(60), |_: u64| shops())
        .await?;
    assert_eq!(listed.map(|shops| shops.len()), Some(2));

    client.warm("cache:near:", 1, LOGICAL_TTL, |_: u64| shops()).await?;
    let listed: Option<Vec<Shop>> = client
        .get_with_logical_expire("cache:near:", 1, "lock:near:", LOGICAL_TTL, |_: u64| async {
            Ok::<_, BoxError>(Some(Vec::new()))
        })
        .await?;
    assert_eq!(listed.map(|shops| shops.len()), Some(2));
    Ok(())
}
