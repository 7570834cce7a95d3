//! 端到端测试：固定窗口
//!
//! 测试场景：
//! 1. 窗口内配额耗尽
//! 2. 进入下一个窗口后计数重新开始
//! 3. 同一窗口内键保持不变，窗口之间键不同
//! 4. 长时间运行时旧窗口的键会被清理

use crate::common::*;
use quotagate::{
    clock::ManualClock,
    config::{IdentifierStrategy, QuotaConfig},
    key::{window_start, KeyBuilder},
    limiter::RateLimiter,
    storage::MemoryCounterStore,
};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_e2e_next_window_resets_quota() {
    let (limiter, store, clock) = memory_limiter(QuotaConfig::new(2, 60)).await;
    let ip = caller("192.0.2.10");

    assert!(limiter.check("GET", "/", &ip).await.allowed);
    assert!(limiter.check("GET", "/", &ip).await.allowed);
    clock.advance(59);
    assert!(!limiter.check("GET", "/", &ip).await.allowed);

    clock.advance(1);
    let decision = limiter.check("GET", "/", &ip).await;
    assert!(decision.allowed);
    assert_eq!(decision.remaining, 1);
    assert_eq!(decision.reset_at_epoch_secs, T0 + 120);

    // 两个窗口各自一个计数键
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn test_e2e_keys_are_stable_within_window() {
    let (limiter, store, clock) = memory_limiter(QuotaConfig::new(10, 60)).await;
    let ip = caller("192.0.2.10");

    limiter.check("GET", "/orders", &ip).await;
    clock.advance(30);
    limiter.check("GET", "/orders", &ip).await;

    let key = KeyBuilder::new("ratelimit").build(
        "GET",
        "/orders",
        IdentifierStrategy::ByIp,
        &ip,
        window_start(T0, 60),
    );
    assert_eq!(store.get(&key), Some(2));
    assert_eq!(store.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_e2e_old_window_keys_are_released() {
    let store = Arc::new(MemoryCounterStore::new().with_sweep_interval(64));
    let clock = ManualClock::new(T0);
    let limiter = RateLimiter::builder(ready_manager(store.clone()).await)
        .quotas(QuotaConfig::new(5, 1))
        .clock(clock.clone())
        .build();
    let ip = caller("192.0.2.10");

    for _ in 0..1000 {
        assert!(limiter.check("GET", "/", &ip).await.allowed);
        clock.advance(1);
        tokio::time::advance(Duration::from_secs(1)).await;
    }

    assert!(store.len() <= 64, "retained {} keys", store.len());
}
