//! Redis集成测试
//!
//! 测试Redis计数存储与连接管理的集成功能

use quotagate::{
    config::{GateConfig, QuotaConfig},
    connection::{ConnectionManager, ConnectionState},
    decision::DecisionSource,
    identity::CallerIdentity,
    limiter::RateLimiter,
    redis_storage::{RedisConfig, RedisCounterStore, RedisStoreFactory},
    storage::CounterStore,
};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const REDIS_URL: &str = "redis://localhost:6379";

fn unique_key(prefix: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("quotagate-test:{}:{}", prefix, nanos)
}

/// 测试Redis连接
#[tokio::test]
#[ignore] // 需要Redis服务器运行
async fn test_redis_connection() {
    let store = RedisCounterStore::new(RedisConfig::new(REDIS_URL)).unwrap();
    store.connect().await.unwrap();
    assert!(store.ping().await.unwrap());

    store.quit().await.unwrap();
}

/// 测试自增与过期
#[tokio::test]
#[ignore]
async fn test_redis_incr_and_expire() {
    let store = RedisCounterStore::new(RedisConfig::new(REDIS_URL)).unwrap();
    store.connect().await.unwrap();
    let key = unique_key("incr");

    assert_eq!(store.incr(&key).await.unwrap(), 1);
    assert!(store.expire(&key, 1).await.unwrap());
    assert_eq!(store.incr(&key).await.unwrap(), 2);

    tokio::time::sleep(Duration::from_millis(1_200)).await;
    assert_eq!(store.incr(&key).await.unwrap(), 1);
    assert!(!store.expire(&unique_key("missing"), 10).await.unwrap());
}

/// 测试未建立连接时的操作
#[tokio::test]
#[ignore]
async fn test_redis_requires_connect() {
    let store = RedisCounterStore::new(RedisConfig::new(REDIS_URL)).unwrap();
    assert!(store.incr(&unique_key("early")).await.is_err());
}

/// 测试连接管理器与限流器
#[tokio::test]
#[ignore]
async fn test_redis_backed_limiter() {
    let manager = ConnectionManager::new(
        Arc::new(RedisStoreFactory::new(RedisConfig::new(REDIS_URL))),
        Default::default(),
        Duration::from_secs(1),
    );
    manager.wait_ready(Duration::from_secs(5)).await.unwrap();

    let limiter = RateLimiter::builder(manager.clone())
        .namespace(unique_key("ns"))
        .quotas(QuotaConfig::new(2, 60))
        .build();
    let caller = CallerIdentity::new("203.0.113.9");

    assert!(limiter.check("GET", "/", &caller).await.allowed);
    assert!(limiter.check("GET", "/", &caller).await.allowed);
    let denied = limiter.check("GET", "/", &caller).await;
    assert!(!denied.allowed);
    assert_eq!(denied.source, DecisionSource::Counted);

    manager.close().await;
    assert_eq!(manager.state(), ConnectionState::Closed);
}

/// 测试不可达的Redis
#[tokio::test]
#[ignore]
async fn test_unreachable_redis_fails_open() {
    let mut config = GateConfig::default();
    config.store.url = "redis://127.0.0.1:1".to_string();
    config.store.connect_timeout_ms = 200;

    let manager = ConnectionManager::from_config(&config).unwrap();
    assert!(manager.wait_ready(Duration::from_secs(5)).await.is_err());
    assert_eq!(manager.state(), ConnectionState::Degraded);

    let limiter = RateLimiter::from_config(&config, manager);
    let decision = limiter
        .check("GET", "/", &CallerIdentity::new("203.0.113.9"))
        .await;
    assert!(decision.allowed);
    assert_eq!(decision.source, DecisionSource::FailOpen);
}
