//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 计数存储抽象层
//!
//! 定义计数存储接口（原子自增、键过期、存活探测以及连接生命周期操作）
//! 和基于内存的实现。

use crate::error::StorageError;
use async_trait::async_trait;
use dashmap::DashMap;
use crate::constants::DEFAULT_MEMORY_SWEEP_INTERVAL;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// 计数存储接口
///
/// 客户端在 [`StoreFactory::create`] 中同步构造（不做网络IO），
/// 之后由 [`crate::connection::ConnectionManager`] 调用 [`CounterStore::connect`] 建立连接。
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// 存储名称（用于日志）
    fn name(&self) -> &str;

    /// 建立连接
    async fn connect(&self) -> Result<(), StorageError>;

    /// 原子自增，返回自增后的值
    async fn incr(&self, key: &str) -> Result<u64, StorageError>;

    /// 设置键的过期时间，键不存在时返回 `false`
    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, StorageError>;

    /// 存活探测，只有收到肯定回复时返回 `true`
    async fn ping(&self) -> Result<bool, StorageError>;

    /// 优雅关闭（刷新并退出）
    async fn quit(&self) -> Result<(), StorageError>;

    /// 强制断开
    async fn disconnect(&self);
}

/// 存储客户端工厂
pub trait StoreFactory: Send + Sync {
    /// 同步构造新的客户端句柄
    fn create(&self) -> Result<Arc<dyn CounterStore>, StorageError>;
}

impl<F> StoreFactory for F
where
    F: Fn() -> Result<Arc<dyn CounterStore>, StorageError> + Send + Sync,
{
    fn create(&self) -> Result<Arc<dyn CounterStore>, StorageError> {
        self()
    }
}

/// 始终返回同一个客户端的工厂
///
/// 用于内存存储：重连后计数不丢失。
#[derive(Clone)]
pub struct SharedStoreFactory {
    store: Arc<dyn CounterStore>,
}

impl SharedStoreFactory {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }
}

impl StoreFactory for SharedStoreFactory {
    fn create(&self) -> Result<Arc<dyn CounterStore>, StorageError> {
        Ok(self.store.clone())
    }
}

/// 存储连接事件
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// 套接字已连接
    Connect,
    /// 可以接受命令
    Ready,
    /// 发生错误
    Error(StorageError),
    /// 连接关闭
    Close,
    /// 即将重连
    Reconnecting { attempt: u32, delay: Duration },
}

/// 计数条目
#[derive(Debug, Clone)]
struct CounterEntry {
    value: u64,
    expires_at: Option<Instant>,
}

impl CounterEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// 内存计数存储
///
/// 语义与 Redis 的 INCR / EXPIRE / PING 一致。过期键在访问时视为不存在，
/// 并且每 `sweep_interval` 次自增清理一次全部过期键（窗口起点是键的一部分，
/// 旧窗口的键不会再被访问）。
/// 仅适用于单进程部署和测试。
pub struct MemoryCounterStore {
    counters: DashMap<String, CounterEntry>,
    connected: AtomicBool,
    incr_ops: AtomicU64,
    sweep_interval: u64,
}

impl MemoryCounterStore {
    /// 创建新的内存存储
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
            connected: AtomicBool::new(false),
            incr_ops: AtomicU64::new(0),
            sweep_interval: DEFAULT_MEMORY_SWEEP_INTERVAL,
        }
    }

    /// 设置清理间隔（自增次数，0 按 1 处理）
    pub fn with_sweep_interval(mut self, interval: u64) -> Self {
        self.sweep_interval = interval.max(1);
        self
    }

    /// 读取当前计数（过期视为不存在）
    pub fn get(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        self.counters
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value)
    }

    /// 剩余存活时间，无过期时间或不存在时返回 `None`
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.counters
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// 清理过期键，返回清理数量
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.counters.len();
        self.counters.retain(|_, entry| !entry.is_expired(now));
        let purged = before.saturating_sub(self.counters.len());
        if purged > 0 {
            debug!("清理过期计数键: {}", purged);
        }
        purged
    }

    /// 键数量（含尚未清理的过期键）
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    fn ensure_connected(&self) -> Result<(), StorageError> {
        if self.connected.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StorageError::Closed)
        }
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn connect(&self) -> Result<(), StorageError> {
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<u64, StorageError> {
        self.ensure_connected()?;

        // 必须在持有条目引用之前清理，retain 会锁住所有分片
        let ops = self.incr_ops.fetch_add(1, Ordering::Relaxed) + 1;
        if ops % self.sweep_interval == 0 {
            self.purge_expired();
        }

        let now = Instant::now();
        let mut entry = self
            .counters
            .entry(key.to_string())
            .or_insert(CounterEntry {
                value: 0,
                expires_at: None,
            });

        // 过期键视为新键
        if entry.is_expired(now) {
            entry.value = 0;
            entry.expires_at = None;
        }

        entry.value = entry.value.saturating_add(1);
        trace!("INCR key={}, value={}", key, entry.value);
        Ok(entry.value)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, StorageError> {
        self.ensure_connected()?;

        let now = Instant::now();
        match self.counters.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(now + Duration::from_secs(seconds));
                trace!("EXPIRE key={}, seconds={}", key, seconds);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ping(&self) -> Result<bool, StorageError> {
        Ok(self.connected.load(Ordering::Acquire))
    }

    async fn quit(&self) -> Result<(), StorageError> {
        self.connected.store(false, Ordering::Release);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
    }
}
