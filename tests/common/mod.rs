//! 测试通用工具模块
//!
//! 提供测试中常用的工具函数和辅助结构。

#![allow(dead_code)]

use async_trait::async_trait;
use dashmap::DashMap;
use quotagate::{
    clock::ManualClock,
    config::{ConnectionPolicy, QuotaConfig},
    connection::ConnectionManager,
    error::StorageError,
    identity::CallerIdentity,
    limiter::RateLimiter,
    storage::{CounterStore, MemoryCounterStore, SharedStoreFactory},
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// 与窗口边界对齐的时间戳（60秒和30秒窗口都对齐）
pub const T0: i64 = 1_700_000_040;

/// 可注入故障的计数存储
#[derive(Default)]
pub struct FakeStore {
    counters: DashMap<String, u64>,
    connected: AtomicBool,
    pub incr_calls: AtomicU64,
    pub expire_calls: AtomicU64,
    pub ping_calls: AtomicU64,
    pub fail_connect: AtomicBool,
    pub fail_ping: AtomicBool,
    pub fail_incr: AtomicBool,
    pub fail_expire: AtomicBool,
    /// 自增前等待的毫秒数
    pub incr_delay_ms: AtomicU64,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn count(&self, key: &str) -> Option<u64> {
        self.counters.get(key).map(|v| *v)
    }

    pub fn keys(&self) -> Vec<String> {
        self.counters.iter().map(|e| e.key().clone()).collect()
    }

    pub fn set(&self, flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::SeqCst);
    }

    pub fn expire_count(&self) -> u64 {
        self.expire_calls.load(Ordering::SeqCst)
    }

    pub fn incr_count(&self) -> u64 {
        self.incr_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CounterStore for FakeStore {
    fn name(&self) -> &str {
        "fake"
    }

    async fn connect(&self) -> Result<(), StorageError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(StorageError::ConnectionError("connection refused".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<u64, StorageError> {
        self.incr_calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.incr_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.fail_incr.load(Ordering::SeqCst) {
            return Err(StorageError::QueryError("INCR failed".to_string()));
        }

        let mut entry = self.counters.entry(key.to_string()).or_insert(0);
        *entry += 1;
        Ok(*entry)
    }

    async fn expire(&self, _key: &str, _seconds: u64) -> Result<bool, StorageError> {
        self.expire_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_expire.load(Ordering::SeqCst) {
            return Err(StorageError::QueryError("EXPIRE failed".to_string()));
        }
        Ok(true)
    }

    async fn ping(&self) -> Result<bool, StorageError> {
        self.ping_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_ping.load(Ordering::SeqCst) {
            return Err(StorageError::ConnectionError("socket closed".to_string()));
        }
        Ok(self.connected.load(Ordering::SeqCst))
    }

    async fn quit(&self) -> Result<(), StorageError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

/// 创建连接管理器（不等待就绪）
pub fn manager_for(store: Arc<dyn CounterStore>) -> ConnectionManager {
    ConnectionManager::new(
        Arc::new(SharedStoreFactory::new(store)),
        ConnectionPolicy::default(),
        Duration::from_millis(200),
    )
}

/// 创建已就绪的连接管理器
pub async fn ready_manager(store: Arc<dyn CounterStore>) -> ConnectionManager {
    let manager = manager_for(store);
    manager
        .wait_ready(Duration::from_secs(2))
        .await
        .expect("counter store should become ready");
    manager
}

/// 基于内存存储的限流器
pub async fn memory_limiter(quota: QuotaConfig) -> (RateLimiter, Arc<MemoryCounterStore>, ManualClock) {
    let store = Arc::new(MemoryCounterStore::new());
    let clock = ManualClock::new(T0);
    let limiter = RateLimiter::builder(ready_manager(store.clone()).await)
        .quotas(quota)
        .clock(clock.clone())
        .build();
    (limiter, store, clock)
}

/// 基于可注入故障存储的限流器
pub async fn fake_limiter(quota: QuotaConfig) -> (RateLimiter, Arc<FakeStore>, ManualClock) {
    let store = FakeStore::new();
    let clock = ManualClock::new(T0);
    let limiter = RateLimiter::builder(ready_manager(store.clone()).await)
        .quotas(quota)
        .clock(clock.clone())
        .build();
    (limiter, store, clock)
}

/// 匿名调用方
pub fn caller(ip: &str) -> CallerIdentity {
    CallerIdentity::new(ip)
}

/// 认证调用方
pub fn user(ip: &str, id: &str) -> CallerIdentity {
    CallerIdentity::new(ip).with_identity(id)
}
