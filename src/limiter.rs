//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 窗口计数与决策引擎
//!
//! 为单个请求产生一个 [`RateLimitDecision`]：
//!
//! 1. 解析路由策略，按权限等级派生放大后的策略
//! 2. 策略需要认证身份而调用方未认证时，回退为按IP计数
//! 3. 计数存储不可用时按故障模式放行或拒绝
//! 4. 计算窗口起点并构建计数键，原子自增；自增结果为1时设置过期时间
//! 5. `allowed = count <= limit`，`remaining = max(0, limit - count)`
//!
//! 引擎本身每次调用无状态，跨请求的协调全部交给存储的原子操作。
//! 决策路径从不返回错误，任何存储故障都会转换为有效的决策。

use crate::clock::{Clock, SystemClock};
use crate::config::{FailMode, GateConfig, IdentifierStrategy, QuotaConfig};
use crate::connection::ConnectionManager;
use crate::constants::{DEFAULT_IO_TIMEOUT_MS, DEFAULT_KEY_NAMESPACE, DEFAULT_REJECTION_MESSAGE};
use crate::decision::RateLimitDecision;
use crate::error::StorageError;
use crate::identity::CallerIdentity;
use crate::key::{window_start, KeyBuilder};
use crate::policy::{NoMultiplier, PrivilegePolicy, QuotaResolver, RouteTable, TierMultipliers};
use crate::storage::StoreEvent;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, instrument, trace, warn};

/// 限流器
///
/// # 示例
/// ```rust
/// use quotagate::config::QuotaConfig;
/// use quotagate::connection::ConnectionManager;
/// use quotagate::identity::CallerIdentity;
/// use quotagate::limiter::RateLimiter;
///
/// # #[tokio::main]
/// # async fn main() {
/// let connection = ConnectionManager::in_memory();
/// connection.wait_ready(std::time::Duration::from_secs(1)).await.unwrap();
///
/// let limiter = RateLimiter::builder(connection)
///     .quotas(QuotaConfig::new(3, 60))
///     .build();
///
/// let decision = limiter.check("POST", "/api/sales", &CallerIdentity::new("10.0.0.1")).await;
/// assert!(decision.allowed);
/// assert_eq!(decision.remaining, 2);
/// # }
/// ```
pub struct RateLimiter {
    connection: ConnectionManager,
    quotas: Arc<dyn QuotaResolver>,
    privileges: Arc<dyn PrivilegePolicy>,
    clock: Arc<dyn Clock>,
    keys: KeyBuilder,
    fail_mode: FailMode,
    default_quota: QuotaConfig,
    default_message: String,
    io_timeout: Duration,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("connection", &self.connection)
            .field("namespace", &self.keys.namespace())
            .field("fail_mode", &self.fail_mode)
            .field("default_quota", &self.default_quota)
            .field("io_timeout", &self.io_timeout)
            .finish()
    }
}

impl RateLimiter {
    /// 创建构建器
    pub fn builder(connection: ConnectionManager) -> RateLimiterBuilder {
        RateLimiterBuilder::new(connection)
    }

    /// 从配置创建
    ///
    /// 路由策略使用 [`RouteTable`]，权限倍率使用 [`TierMultipliers`]。
    pub fn from_config(config: &GateConfig, connection: ConnectionManager) -> Self {
        Self::builder(connection)
            .quotas(RouteTable::from_config(config))
            .privileges(TierMultipliers::from_config(config))
            .namespace(config.namespace.clone())
            .fail_mode(config.fail_mode)
            .default_quota(config.default_quota.clone())
            .io_timeout(config.store.io_timeout())
            .build()
    }

    /// 连接管理器
    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// 故障模式
    pub fn fail_mode(&self) -> FailMode {
        self.fail_mode
    }

    /// 当前时间（与计数使用同一个时钟）
    pub fn now(&self) -> i64 {
        self.clock.now_epoch_secs()
    }

    /// 对单个请求做出限流决策
    ///
    /// # 参数
    /// - `method`: HTTP方法
    /// - `path`: 路由路径
    /// - `identity`: 调用方身份
    ///
    /// # 返回
    /// - 限流决策（从不失败）
    #[instrument(skip_all, fields(method = %method, path = %path))]
    pub async fn check(
        &self,
        method: &str,
        path: &str,
        identity: &CallerIdentity,
    ) -> RateLimitDecision {
        let now = self.clock.now_epoch_secs();
        let quota = self.effective_quota(method, path, identity);
        let strategy = effective_strategy(quota.strategy, identity);

        let Some(client) = self.connection.get_client() else {
            warn!("计数存储客户端不可用");
            return self.unavailable(&quota, now);
        };

        if !self.connection.is_available().await {
            warn!(state = %self.connection.state(), "计数存储不可用");
            return self.unavailable(&quota, now);
        }

        let bucket_start = window_start(now, quota.window_seconds);
        let key = self.keys.build(method, path, strategy, identity, bucket_start);
        trace!(key = %key, "计数键");

        let count = match tokio::time::timeout(self.io_timeout, client.incr(&key)).await {
            Ok(Ok(count)) => count,
            Ok(Err(e)) => {
                error!("计数自增失败: {}", e);
                return self.store_failed(e, &quota, now);
            }
            Err(_) => {
                error!("计数自增超时 ({:?})", self.io_timeout);
                return self.store_failed(
                    StorageError::TimeoutError("INCR".to_string()),
                    &quota,
                    now,
                );
            }
        };

        // 每个窗口只设置一次过期时间；失败不影响本次决策
        if count == 1 {
            match tokio::time::timeout(
                self.io_timeout,
                client.expire(&key, quota.window_seconds),
            )
            .await
            {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => warn!(key = %key, "设置过期时间失败: 键不存在"),
                Ok(Err(e)) => warn!(key = %key, "设置过期时间失败: {}", e),
                Err(_) => warn!(key = %key, "设置过期时间超时"),
            }
        }

        let decision =
            RateLimitDecision::counted(&quota, count, bucket_start, &self.default_message);

        if decision.allowed {
            trace!(count, limit = quota.limit, "请求放行");
        } else {
            debug!(count, limit = quota.limit, "请求被限流");
        }

        decision
    }

    /// 解析生效的策略
    fn effective_quota(&self, method: &str, path: &str, identity: &CallerIdentity) -> QuotaConfig {
        let base = match self.quotas.resolve_quota(method, path) {
            Some(quota) => match quota.validate() {
                Ok(()) => quota,
                Err(e) => {
                    warn!("路由策略无效（{}），使用默认策略", e);
                    self.default_quota.clone()
                }
            },
            None => self.default_quota.clone(),
        };

        match identity.privilege_tier.as_deref() {
            Some(tier) => self.privileges.apply_privilege_multiplier(&base, tier),
            None => base,
        }
    }

    fn unavailable(&self, quota: &QuotaConfig, now: i64) -> RateLimitDecision {
        match self.fail_mode {
            FailMode::Open => RateLimitDecision::fail_open(quota, now),
            FailMode::Closed => RateLimitDecision::fail_closed(quota, now),
        }
    }

    fn store_failed(&self, err: StorageError, quota: &QuotaConfig, now: i64) -> RateLimitDecision {
        if err.is_connection_failure() {
            self.connection.handle_event(StoreEvent::Error(err));
        }
        self.unavailable(quota, now)
    }
}

/// 需要认证身份但调用方未认证时回退为按IP
fn effective_strategy(strategy: IdentifierStrategy, identity: &CallerIdentity) -> IdentifierStrategy {
    if strategy.requires_identity() && !identity.is_authenticated() {
        debug!("调用方未认证，{} 策略回退为按IP计数", strategy.tag());
        IdentifierStrategy::ByIp
    } else {
        strategy
    }
}

/// 限流器构建器
pub struct RateLimiterBuilder {
    connection: ConnectionManager,
    quotas: Option<Arc<dyn QuotaResolver>>,
    privileges: Arc<dyn PrivilegePolicy>,
    clock: Arc<dyn Clock>,
    namespace: String,
    fail_mode: FailMode,
    default_quota: QuotaConfig,
    default_message: String,
    io_timeout: Option<Duration>,
}

impl RateLimiterBuilder {
    /// 创建新的构建器
    pub fn new(connection: ConnectionManager) -> Self {
        Self {
            connection,
            quotas: None,
            privileges: Arc::new(NoMultiplier),
            clock: Arc::new(SystemClock),
            namespace: DEFAULT_KEY_NAMESPACE.to_string(),
            fail_mode: FailMode::Open,
            default_quota: QuotaConfig::default(),
            default_message: DEFAULT_REJECTION_MESSAGE.to_string(),
            io_timeout: None,
        }
    }

    /// 路由策略解析
    pub fn quotas(mut self, quotas: impl QuotaResolver + 'static) -> Self {
        self.quotas = Some(Arc::new(quotas));
        self
    }

    /// 路由策略解析（共享实例）
    pub fn quotas_arc(mut self, quotas: Arc<dyn QuotaResolver>) -> Self {
        self.quotas = Some(quotas);
        self
    }

    /// 权限倍率
    pub fn privileges(mut self, privileges: impl PrivilegePolicy + 'static) -> Self {
        self.privileges = Arc::new(privileges);
        self
    }

    /// 时钟
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// 计数键命名空间
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// 故障模式
    pub fn fail_mode(mut self, fail_mode: FailMode) -> Self {
        self.fail_mode = fail_mode;
        self
    }

    /// 路由策略缺失或无效时使用的默认策略
    pub fn default_quota(mut self, quota: QuotaConfig) -> Self {
        self.default_quota = quota;
        self
    }

    /// 默认拒绝提示
    pub fn default_message(mut self, message: impl Into<String>) -> Self {
        self.default_message = message.into();
        self
    }

    /// 单次存储操作超时（默认与连接管理器一致）
    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }

    /// 构建限流器
    pub fn build(self) -> RateLimiter {
        let default_quota = match self.default_quota.validate() {
            Ok(()) => self.default_quota,
            Err(e) => {
                warn!("默认策略无效（{}），使用内置默认值", e);
                QuotaConfig::default()
            }
        };

        let io_timeout = self.io_timeout.unwrap_or_else(|| {
            let timeout = self.connection.io_timeout();
            if timeout.is_zero() {
                Duration::from_millis(DEFAULT_IO_TIMEOUT_MS)
            } else {
                timeout
            }
        });

        let quotas = self
            .quotas
            .unwrap_or_else(|| Arc::new(RouteTable::new(default_quota.clone())));

        RateLimiter {
            connection: self.connection,
            quotas,
            privileges: self.privileges,
            clock: self.clock,
            keys: KeyBuilder::new(self.namespace),
            fail_mode: self.fail_mode,
            default_quota,
            default_message: self.default_message,
            io_timeout,
        }
    }
}
