//! Integration tests against a real Redis instance.
//!
//! These tests use testcontainers to start Redis and need a local Docker
//! daemon. Run with: cargo test --test redis_store_test -- --ignored

use cachegate_kv::{
    Cache, CacheConfig, CacheType, KvStore, ProbeOutcome, RedisStore, StoreConfig, StoreRole,
    SubjectIds,
};
use std::time::Duration;
use testcontainers::{runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

async fn redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");
            let port = container
                .get_host_port_ipv4(6379)
                .await
                .expect("get redis port");
            (container, format!("redis://127.0.0.1:{}", port))
        })
        .await;
    url.clone()
}

#[tokio::test]
#[ignore]
async fn test_redis_store_roundtrip_and_expiry() {
    let store = RedisStore::connect(&redis_url().await).await.unwrap();
    store.ping().await.unwrap();

    store
        .set("it:permanent", b"p".to_vec(), None)
        .await
        .unwrap();
    store
        .set("it:short", b"s".to_vec(), Some(Duration::from_millis(300)))
        .await
        .unwrap();

    assert_eq!(store.get("it:short").await.unwrap(), Some(b"s".to_vec()));
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(store.get("it:short").await.unwrap(), None);
    assert_eq!(store.get("it:permanent").await.unwrap(), Some(b"p".to_vec()));

    assert!(store.delete("it:permanent").await.unwrap());
    assert!(!store.delete("it:permanent").await.unwrap());
}

#[tokio::test]
#[ignore]
async fn test_cache_over_redis_primary() {
    let url = redis_url().await;
    let config = CacheConfig::builder()
        .base(CacheConfig::tiered_in_memory())
        .key_prefix("it-cache:")
        .stores(vec![
            StoreConfig::redis("primary", StoreRole::Primary, url),
            StoreConfig::memory("replica", StoreRole::Replica),
            StoreConfig::memory("hot", StoreRole::Ephemeral),
        ])
        .build();
    let cache = Cache::from_config(&config).await.unwrap();

    let results = cache.health_monitor().probe_all().await;
    assert!(results.iter().all(|r| r.healthy));

    cache
        .set(CacheType::Portfolio, "U", &vec!["SOL"], None)
        .await
        .unwrap();
    cache.set(CacheType::MainMenu, "U", &"menu", None).await.unwrap();
    assert!(cache.get::<Vec<String>>(CacheType::Portfolio, "U").await.is_some());

    let report = cache
        .invalidate("sell", &SubjectIds::user("U").with_wallet("W"))
        .await;
    assert!(report.deleted.contains(&cache.key(CacheType::MainMenu, "U")));
    assert!(cache.get::<String>(CacheType::MainMenu, "U").await.is_none());

    let primary = cache.router().primary().clone();
    cache
        .health_monitor()
        .record_probe(&primary, ProbeOutcome::failure("maintenance"));
    assert!(cache
        .set(CacheType::MainMenu, "U", &"menu", None)
        .await
        .is_err());

    cache.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn test_unreachable_redis_fails_startup() {
    let config = CacheConfig::builder()
        .stores(vec![StoreConfig::redis(
            "primary",
            StoreRole::Primary,
            "redis://127.0.0.1:1",
        )])
        .build();

    let result = tokio::time::timeout(Duration::from_secs(60), Cache::from_config(&config)).await;
    match result {
        Ok(Err(e)) => assert!(e.is_store_failure(), "unexpected error: {}", e),
        Ok(Ok(_)) => panic!("connecting to a closed port should fail"),
        Err(_) => panic!("connection attempt did not finish"),
    }
}
