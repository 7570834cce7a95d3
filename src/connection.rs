//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 连接生命周期管理
//!
//! 为整个进程提供唯一的、经过健康检查的计数存储句柄，并透明地从瞬时网络故障中恢复。
//!
//! # 状态转换
//!
//! ```text
//! Uninitialized ──get_client──▶ Connecting ──Ready──▶ Ready
//!                                   │  ▲                │
//!                      连续失败达到上限 │  │ get_client      │ 探测失败 / Close
//!                                   ▼  │                ▼
//!                                 Degraded ◀────────────┘
//!
//! 任意状态 ──close──▶ Closed ──get_client──▶ Connecting
//! ```
//!
//! 管理器由应用的组合根显式构造并注入，内部共享状态使用 `Arc`，克隆开销很小。
//! 每次重建客户端都会递增代数，过期代数的连接任务产生的事件会被忽略。

use crate::config::ConnectionPolicy;
#[cfg(feature = "redis")]
use crate::config::GateConfig;
use crate::constants::DEFAULT_IO_TIMEOUT_MS;
use crate::error::{QuotaGateError, StorageError};
#[cfg(feature = "redis")]
use crate::redis_storage::RedisStoreFactory;
use crate::storage::{CounterStore, MemoryCounterStore, SharedStoreFactory, StoreEvent, StoreFactory};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// 尚未创建客户端
    Uninitialized,
    /// 正在建立连接
    Connecting,
    /// 可以接受命令
    Ready,
    /// 连接异常，等待下一次触发重连
    Degraded,
    /// 已关闭
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Uninitialized => "uninitialized",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
            ConnectionState::Degraded => "degraded",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// 连接统计信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStats {
    /// 当前状态
    pub state: ConnectionState,
    /// 当前轮次的连续失败次数
    pub attempts: u32,
    /// 成功建立连接的总次数
    pub total_connects: u64,
    /// 失败总次数（连接失败和探测失败）
    pub total_failures: u64,
}

struct Inner {
    state: ConnectionState,
    client: Option<Arc<dyn CounterStore>>,
    generation: u64,
    attempts: u32,
    connect_in_flight: bool,
    last_error: Option<StorageError>,
}

struct Shared {
    factory: Arc<dyn StoreFactory>,
    policy: ConnectionPolicy,
    io_timeout: Duration,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
    total_connects: AtomicU64,
    total_failures: AtomicU64,
}

/// 连接生命周期管理器
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("policy", &self.shared.policy)
            .field("io_timeout", &self.shared.io_timeout)
            .finish()
    }
}

impl ConnectionManager {
    /// 创建连接管理器
    ///
    /// 不做任何网络IO，第一次调用 [`ConnectionManager::get_client`] 时才创建客户端。
    ///
    /// # 参数
    /// - `factory`: 存储客户端工厂
    /// - `policy`: 重连策略
    /// - `io_timeout`: 探测和关闭操作的超时
    pub fn new(
        factory: Arc<dyn StoreFactory>,
        policy: ConnectionPolicy,
        io_timeout: Duration,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Uninitialized);

        Self {
            shared: Arc::new(Shared {
                factory,
                policy,
                io_timeout,
                inner: Mutex::new(Inner {
                    state: ConnectionState::Uninitialized,
                    client: None,
                    generation: 0,
                    attempts: 0,
                    connect_in_flight: false,
                    last_error: None,
                }),
                state_tx,
                total_connects: AtomicU64::new(0),
                total_failures: AtomicU64::new(0),
            }),
        }
    }

    /// 使用内存存储（单进程部署和测试）
    pub fn in_memory() -> Self {
        let store: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
        Self::new(
            Arc::new(SharedStoreFactory::new(store)),
            ConnectionPolicy::default(),
            Duration::from_millis(DEFAULT_IO_TIMEOUT_MS),
        )
    }

    /// 根据配置创建Redis连接管理器
    #[cfg(feature = "redis")]
    pub fn from_config(config: &GateConfig) -> Result<Self, QuotaGateError> {
        config
            .connection
            .validate()
            .map_err(QuotaGateError::ConfigError)?;

        let redis_config = config.store.to_redis_config();
        info!("使用Redis计数存储: {:?}", redis_config);

        Ok(Self::new(
            Arc::new(RedisStoreFactory::new(redis_config)),
            config.connection.clone(),
            config.store.io_timeout(),
        ))
    }

    /// 当前状态
    pub fn state(&self) -> ConnectionState {
        self.shared.inner.lock().state
    }

    /// 订阅状态变化
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// 统计信息
    pub fn stats(&self) -> ConnectionStats {
        let inner = self.shared.inner.lock();
        ConnectionStats {
            state: inner.state,
            attempts: inner.attempts,
            total_connects: self.shared.total_connects.load(Ordering::Relaxed),
            total_failures: self.shared.total_failures.load(Ordering::Relaxed),
        }
    }

    /// 单次操作超时
    pub fn io_timeout(&self) -> Duration {
        self.shared.io_timeout
    }

    /// 获取客户端句柄
    ///
    /// - `Ready`: 返回当前句柄
    /// - `Uninitialized` / `Closed`: 同步创建新客户端，转为 `Connecting` 并在后台连接
    /// - `Connecting`: 返回正在连接的句柄，不会创建第二个连接
    /// - `Degraded`: 触发一轮新的重连，返回现有句柄
    ///
    /// 从不阻塞；返回的句柄可能尚未就绪，调用方应通过
    /// [`ConnectionManager::is_available`] 判断是否可用。
    pub fn get_client(&self) -> Option<Arc<dyn CounterStore>> {
        let mut inner = self.shared.inner.lock();
        let state = inner.state;

        match state {
            ConnectionState::Ready | ConnectionState::Connecting => inner.client.clone(),
            ConnectionState::Uninitialized | ConnectionState::Closed => {
                match self.shared.factory.create() {
                    Ok(client) => {
                        debug!("创建计数存储客户端: {}", client.name());
                        inner.generation += 1;
                        inner.client = Some(client.clone());
                        inner.attempts = 0;
                        self.start_connect(&mut inner);
                        Some(client)
                    }
                    Err(e) => {
                        error!("创建计数存储客户端失败: {}", e);
                        self.shared.total_failures.fetch_add(1, Ordering::Relaxed);
                        inner.last_error = Some(e);
                        self.set_state(&mut inner, ConnectionState::Degraded);
                        None
                    }
                }
            }
            ConnectionState::Degraded => {
                match inner.client.clone() {
                    Some(client) => {
                        if !inner.connect_in_flight {
                            info!("计数存储处于降级状态，尝试重新连接");
                            inner.attempts = 0;
                            self.start_connect(&mut inner);
                        }
                        Some(client)
                    }
                    None => {
                        // 客户端创建失败过，重新从头创建
                        self.set_state(&mut inner, ConnectionState::Uninitialized);
                        drop(inner);
                        self.get_client()
                    }
                }
            }
        }
    }

    /// 存活探测
    ///
    /// 只有状态为 `Ready` 且在超时内收到肯定回复时返回 `true`。
    /// 探测失败会记录一次错误事件并将状态转为 `Degraded`。
    pub async fn is_available(&self) -> bool {
        let (client, generation) = {
            let inner = self.shared.inner.lock();
            match (&inner.client, inner.state) {
                (Some(client), ConnectionState::Ready) => (client.clone(), inner.generation),
                (_, state) => {
                    debug!("计数存储未就绪: state={}", state);
                    return false;
                }
            }
        };

        let failure = match tokio::time::timeout(self.shared.io_timeout, client.ping()).await {
            Ok(Ok(true)) => return true,
            Ok(Ok(false)) => StorageError::ConnectionError("PING 未返回肯定回复".to_string()),
            Ok(Err(e)) => e,
            Err(_) => StorageError::TimeoutError(format!(
                "PING 超时 ({:?})",
                self.shared.io_timeout
            )),
        };

        self.apply_event(generation, StoreEvent::Error(failure));
        false
    }

    /// 处理来自存储客户端的事件
    ///
    /// 事件作用于当前代数的客户端。
    pub fn handle_event(&self, event: StoreEvent) {
        let generation = self.shared.inner.lock().generation;
        self.apply_event(generation, event);
    }

    /// 优雅关闭
    ///
    /// 先尝试 QUIT，失败或超时则强制断开。幂等；关闭后再次调用
    /// [`ConnectionManager::get_client`] 会从头重建。
    pub async fn close(&self) {
        let client = {
            let mut inner = self.shared.inner.lock();
            inner.generation += 1;
            inner.attempts = 0;
            inner.connect_in_flight = false;
            self.set_state(&mut inner, ConnectionState::Closed);
            inner.client.take()
        };

        let Some(client) = client else {
            debug!("计数存储连接已关闭，忽略重复关闭");
            return;
        };

        match tokio::time::timeout(self.shared.io_timeout, client.quit()).await {
            Ok(Ok(())) => info!("计数存储连接已关闭"),
            Ok(Err(e)) => {
                warn!("优雅关闭失败，强制断开: {}", e);
                client.disconnect().await;
            }
            Err(_) => {
                warn!("优雅关闭超时，强制断开");
                client.disconnect().await;
            }
        }
    }

    /// 等待连接就绪
    ///
    /// 用于启动阶段：要求计数存储可用时，在超时内未就绪或一轮重连全部失败
    /// 都返回 [`QuotaGateError::StoreUnavailable`]。
    pub async fn wait_ready(&self, timeout: Duration) -> Result<(), QuotaGateError> {
        let mut rx = self.subscribe();
        self.get_client();

        let wait = async {
            loop {
                let (state, in_flight) = {
                    let inner = self.shared.inner.lock();
                    (inner.state, inner.connect_in_flight)
                };

                match state {
                    ConnectionState::Ready => return Ok(()),
                    ConnectionState::Degraded if !in_flight => {
                        return Err(self.unavailable_error());
                    }
                    ConnectionState::Closed => {
                        return Err(QuotaGateError::StoreUnavailable(
                            "连接已关闭".to_string(),
                        ));
                    }
                    _ => {}
                }

                if rx.changed().await.is_err() {
                    return Err(self.unavailable_error());
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(QuotaGateError::StoreUnavailable(format!(
                "等待连接就绪超时 ({:?})",
                timeout
            ))),
        }
    }

    /// 在进程收到终止信号时关闭连接
    ///
    /// 监听 Ctrl-C 和（unix）SIGTERM。
    pub fn spawn_shutdown_hook(&self) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("收到终止信号，关闭计数存储连接");
            manager.close().await;
        })
    }

    fn unavailable_error(&self) -> QuotaGateError {
        let inner = self.shared.inner.lock();
        let reason = inner
            .last_error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| format!("state={}", inner.state));
        QuotaGateError::StoreUnavailable(reason)
    }

    fn set_state(&self, inner: &mut Inner, state: ConnectionState) {
        if inner.state != state {
            debug!("连接状态: {} -> {}", inner.state, state);
            inner.state = state;
            self.shared.state_tx.send_replace(state);
        }
    }

    /// 转为 `Connecting` 并启动后台连接任务
    fn start_connect(&self, inner: &mut Inner) {
        let Some(client) = inner.client.clone() else {
            return;
        };

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                error!("没有可用的 tokio 运行时，无法建立计数存储连接");
                self.set_state(inner, ConnectionState::Degraded);
                return;
            }
        };

        inner.connect_in_flight = true;
        self.set_state(inner, ConnectionState::Connecting);

        let manager = self.clone();
        let generation = inner.generation;
        handle.spawn(async move {
            manager.run_connect(client, generation).await;
        });
    }

    /// 连接循环
    ///
    /// 失败后等待 `min(attempt * base_delay, max_delay)` 再重试，
    /// 连续失败 `max_attempts` 次后停止并转为 `Degraded`。
    async fn run_connect(&self, client: Arc<dyn CounterStore>, generation: u64) {
        loop {
            match client.connect().await {
                Ok(()) => {
                    self.apply_event(generation, StoreEvent::Connect);
                    self.apply_event(generation, StoreEvent::Ready);
                    return;
                }
                Err(e) => {
                    if !self.apply_event(generation, StoreEvent::Error(e)) {
                        return;
                    }

                    let attempt = {
                        let inner = self.shared.inner.lock();
                        if inner.generation != generation || !inner.connect_in_flight {
                            return;
                        }
                        inner.attempts
                    };

                    let delay = self.shared.policy.backoff(attempt);
                    if !self.apply_event(generation, StoreEvent::Reconnecting { attempt, delay }) {
                        return;
                    }
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// 状态转换处理
    ///
    /// 返回 `false` 表示事件来自过期代数，已被忽略。
    fn apply_event(&self, generation: u64, event: StoreEvent) -> bool {
        let mut inner = self.shared.inner.lock();

        if inner.generation != generation {
            debug!("忽略过期连接事件: {:?}", event);
            return false;
        }

        match event {
            StoreEvent::Connect => {
                debug!("计数存储已连接");
            }
            StoreEvent::Ready => {
                inner.attempts = 0;
                inner.connect_in_flight = false;
                inner.last_error = None;
                self.shared.total_connects.fetch_add(1, Ordering::Relaxed);
                self.set_state(&mut inner, ConnectionState::Ready);
                info!("计数存储连接就绪");
            }
            StoreEvent::Error(e) => {
                self.shared.total_failures.fetch_add(1, Ordering::Relaxed);

                let state = inner.state;
                match state {
                    ConnectionState::Connecting => {
                        inner.attempts += 1;
                        warn!(
                            "计数存储连接失败 ({}/{}): {}",
                            inner.attempts, self.shared.policy.max_attempts, e
                        );
                        if inner.attempts >= self.shared.policy.max_attempts {
                            inner.connect_in_flight = false;
                            self.set_state(&mut inner, ConnectionState::Degraded);
                            warn!("连续失败次数达到上限，停止自动重连");
                        }
                    }
                    ConnectionState::Ready => {
                        warn!("计数存储异常，进入降级状态: {}", e);
                        self.set_state(&mut inner, ConnectionState::Degraded);
                    }
                    state => {
                        debug!("计数存储错误 (state={}): {}", state, e);
                    }
                }

                inner.last_error = Some(e);
            }
            StoreEvent::Close => {
                if inner.state == ConnectionState::Ready {
                    warn!("计数存储连接被关闭，进入降级状态");
                    self.set_state(&mut inner, ConnectionState::Degraded);
                }
            }
            StoreEvent::Reconnecting { attempt, delay } => {
                warn!("计数存储重连中: attempt={}, delay={:?}", attempt, delay);
                self.set_state(&mut inner, ConnectionState::Connecting);
            }
        }

        true
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("安装 Ctrl-C 信号处理失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("安装 SIGTERM 信号处理失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
