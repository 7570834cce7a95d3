//! 连接管理集成测试
//!
//! 测试连接生命周期与决策路径之间的交互

use crate::common::*;
use quotagate::{
    config::QuotaConfig,
    connection::ConnectionState,
    decision::DecisionSource,
    error::QuotaGateError,
    storage::{CounterStore, StoreEvent},
};
use std::time::Duration;

#[tokio::test]
async fn test_first_request_before_ready_fails_open() {
    let store = FakeStore::new();
    let manager = manager_for(store.clone());
    let limiter = quotagate::limiter::RateLimiter::builder(manager.clone())
        .quotas(QuotaConfig::new(1, 60))
        .build();

    // 第一次请求触发连接，但连接尚未就绪
    let decision = limiter.check("GET", "/x", &caller("10.0.0.1")).await;
    assert_eq!(decision.source, DecisionSource::FailOpen);
    assert_eq!(store.incr_count(), 0);

    manager.wait_ready(Duration::from_secs(1)).await.unwrap();
    let decision = limiter.check("GET", "/x", &caller("10.0.0.1")).await;
    assert_eq!(decision.source, DecisionSource::Counted);
}

#[tokio::test]
async fn test_degraded_store_recovers_on_next_request() {
    let (limiter, store, _clock) = fake_limiter(QuotaConfig::new(10, 60)).await;
    let manager = limiter.connection().clone();

    store.set(&store.fail_ping, true);
    assert_eq!(
        limiter.check("GET", "/x", &caller("10.0.0.1")).await.source,
        DecisionSource::FailOpen
    );
    assert_eq!(manager.state(), ConnectionState::Degraded);

    // 存储恢复后，下一次请求触发重连
    store.set(&store.fail_ping, false);
    limiter.check("GET", "/x", &caller("10.0.0.1")).await;
    manager.wait_ready(Duration::from_secs(1)).await.unwrap();

    let decision = limiter.check("GET", "/x", &caller("10.0.0.1")).await;
    assert_eq!(decision.source, DecisionSource::Counted);
    assert_eq!(decision.remaining, 9);
    assert_eq!(manager.stats().total_connects, 2);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_store_gives_up_and_fails_open() {
    let store = FakeStore::new();
    store.set(&store.fail_connect, true);
    let manager = manager_for(store.clone());

    let result = manager.wait_ready(Duration::from_secs(10)).await;
    assert!(matches!(result, Err(QuotaGateError::StoreUnavailable(_))));

    let stats = manager.stats();
    assert_eq!(stats.state, ConnectionState::Degraded);
    assert_eq!(stats.attempts, 3);
    assert_eq!(stats.total_failures, 3);
    assert_eq!(stats.total_connects, 0);

    let limiter = quotagate::limiter::RateLimiter::builder(manager)
        .quotas(QuotaConfig::new(1, 60))
        .build();
    for _ in 0..10 {
        assert!(limiter.check("GET", "/x", &caller("10.0.0.1")).await.allowed);
    }
}

#[tokio::test]
async fn test_state_changes_are_observable() {
    let store = FakeStore::new();
    let manager = manager_for(store.clone());
    let mut rx = manager.subscribe();

    manager.get_client();
    manager.wait_ready(Duration::from_secs(1)).await.unwrap();
    assert_eq!(*rx.borrow_and_update(), ConnectionState::Ready);

    manager.handle_event(StoreEvent::Close);
    rx.changed().await.unwrap();
    assert_eq!(*rx.borrow(), ConnectionState::Degraded);
}

#[tokio::test]
async fn test_close_then_decisions_fail_open_until_ready() {
    let (limiter, store, _clock) = fake_limiter(QuotaConfig::new(10, 60)).await;
    let manager = limiter.connection().clone();

    manager.close().await;
    assert_eq!(manager.state(), ConnectionState::Closed);
    assert!(!store.ping().await.unwrap_or(false));

    let decision = limiter.check("GET", "/x", &caller("10.0.0.1")).await;
    assert_eq!(decision.source, DecisionSource::FailOpen);

    manager.wait_ready(Duration::from_secs(1)).await.unwrap();
    assert!(manager.is_available().await);
}

#[tokio::test]
async fn test_shutdown_hook_can_be_cancelled() {
    let manager = ready_manager(FakeStore::new()).await;
    let hook = manager.spawn_shutdown_hook();
    assert!(!hook.is_finished());
    hook.abort();
    assert_eq!(manager.state(), ConnectionState::Ready);
    assert_eq!(manager.stats().total_failures, 0);
}
