//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 配置模块
//!
//! 定义限流策略（[`QuotaConfig`]）以及整个准入控制层的配置结构（[`GateConfig`]）。
//! 配置可以从 YAML / TOML 文件加载，并可通过环境变量覆盖部分字段。

use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_IO_TIMEOUT_MS, DEFAULT_KEY_NAMESPACE,
    DEFAULT_MAX_CONNECT_ATTEMPTS, DEFAULT_QUOTA_LIMIT, DEFAULT_RECONNECT_BASE_DELAY_MS,
    DEFAULT_RECONNECT_MAX_DELAY_MS, DEFAULT_WINDOW_SECONDS, ENV_FAIL_MODE, ENV_NAMESPACE,
    ENV_REDIS_URL, ENV_REQUIRE_STORE,
};
use crate::error::QuotaGateError;
use ahash::AHashMap as HashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// 限流策略
// ============================================================================

/// 标识符策略
///
/// 决定计数器按网络来源、认证身份还是两者共同划分。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum IdentifierStrategy {
    /// 按IP
    #[default]
    ByIp,
    /// 按认证身份
    ByIdentity,
    /// 按IP和认证身份
    ByIpAndIdentity,
}

impl IdentifierStrategy {
    /// 写入计数键的策略标签
    pub fn tag(&self) -> &'static str {
        match self {
            IdentifierStrategy::ByIp => "ip",
            IdentifierStrategy::ByIdentity => "identity",
            IdentifierStrategy::ByIpAndIdentity => "ip-identity",
        }
    }

    /// 该策略是否需要认证身份
    pub fn requires_identity(&self) -> bool {
        !matches!(self, IdentifierStrategy::ByIp)
    }
}

impl FromStr for IdentifierStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "by-ip" | "ip" => Ok(IdentifierStrategy::ByIp),
            "by-identity" | "identity" => Ok(IdentifierStrategy::ByIdentity),
            "by-ip-and-identity" | "ip-identity" => Ok(IdentifierStrategy::ByIpAndIdentity),
            other => Err(format!("无效的标识符策略: {}", other)),
        }
    }
}

/// 单条路由的限流策略
///
/// 由外部配置按 (HTTP方法, 路径) 提供；核心只读取它，
/// 或通过倍率派生出一个新的副本，从不修改原值。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// 每个窗口内允许的最大请求数
    pub limit: u64,
    /// 窗口长度（秒）
    pub window_seconds: u64,
    /// 标识符策略
    #[serde(default)]
    pub strategy: IdentifierStrategy,
    /// 拒绝时返回的提示信息
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_message: Option<String>,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_QUOTA_LIMIT,
            window_seconds: DEFAULT_WINDOW_SECONDS,
            strategy: IdentifierStrategy::ByIp,
            rejection_message: None,
        }
    }
}

impl QuotaConfig {
    /// 创建新的限流策略
    ///
    /// # 参数
    /// - `limit`: 窗口内最大请求数
    /// - `window_seconds`: 窗口长度（秒）
    pub fn new(limit: u64, window_seconds: u64) -> Self {
        Self {
            limit,
            window_seconds,
            ..Default::default()
        }
    }

    /// 设置标识符策略
    pub fn with_strategy(mut self, strategy: IdentifierStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// 设置拒绝提示信息
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.rejection_message = Some(message.into());
        self
    }

    /// 校验策略
    pub fn validate(&self) -> Result<(), String> {
        if self.limit == 0 {
            return Err("限流阈值不能为0".to_string());
        }
        if self.window_seconds == 0 {
            return Err("窗口长度不能为0".to_string());
        }
        Ok(())
    }

    /// 按倍率派生新的策略（饱和乘法）
    pub fn scaled(&self, multiplier: u32) -> Self {
        Self {
            limit: self.limit.saturating_mul(u64::from(multiplier)),
            ..self.clone()
        }
    }
}

// ============================================================================
// 故障模式
// ============================================================================

/// 计数存储不可用时的处理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailMode {
    /// 放行（默认）
    #[default]
    Open,
    /// 拒绝
    Closed,
}

impl FromStr for FailMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "open" | "fail-open" => Ok(FailMode::Open),
            "closed" | "fail-closed" => Ok(FailMode::Closed),
            other => Err(format!("无效的故障模式: {}, 有效值: [\"open\", \"closed\"]", other)),
        }
    }
}

// ============================================================================
// 存储与连接配置
// ============================================================================

/// 计数存储配置段
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// 连接URL
    pub url: String,
    /// 数据库索引
    pub db: i64,
    /// 密码
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// 连接超时（毫秒）
    pub connect_timeout_ms: u64,
    /// 单次操作超时（毫秒）
    pub io_timeout_ms: u64,
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("url", &self.url)
            .field("db", &self.db)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("io_timeout_ms", &self.io_timeout_ms)
            .finish()
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            db: 0,
            password: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            io_timeout_ms: DEFAULT_IO_TIMEOUT_MS,
        }
    }
}

impl StoreConfig {
    /// 校验配置
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("存储URL不能为空".to_string());
        }
        if self.connect_timeout_ms == 0 {
            return Err("connect_timeout_ms 必须大于0".to_string());
        }
        if self.io_timeout_ms == 0 {
            return Err("io_timeout_ms 必须大于0".to_string());
        }
        Ok(())
    }

    /// 连接超时
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// 单次操作超时
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    /// 转换为Redis配置
    #[cfg(feature = "redis")]
    pub fn to_redis_config(&self) -> crate::redis_storage::RedisConfig {
        let config = crate::redis_storage::RedisConfig::new(self.url.clone())
            .db(self.db)
            .connection_timeout(self.connect_timeout())
            .io_timeout(self.io_timeout());
        match &self.password {
            Some(password) => config.password(password.clone()),
            None => config,
        }
    }
}

/// 重连策略
///
/// 第 N 次重连前等待 `min(N * base_delay, max_delay)`；
/// 连续失败 `max_attempts` 次后停止自动重试。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionPolicy {
    /// 连续失败多少次后停止自动重试
    pub max_attempts: u32,
    /// 基础退避时间（毫秒）
    pub base_delay_ms: u64,
    /// 最大退避时间（毫秒）
    pub max_delay_ms: u64,
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_CONNECT_ATTEMPTS,
            base_delay_ms: DEFAULT_RECONNECT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_RECONNECT_MAX_DELAY_MS,
        }
    }
}

impl ConnectionPolicy {
    /// 计算第 `attempt` 次失败后的退避时间
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self
            .base_delay_ms
            .saturating_mul(u64::from(attempt.max(1)))
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// 校验重连策略
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("最大重连次数不能为0".to_string());
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err("最大退避时间不能小于基础退避时间".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// 路由规则
// ============================================================================

/// 路由限流规则
///
/// `method` 为 `*` 时匹配任意方法；`path` 以 `/*` 结尾时按前缀匹配。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    pub method: String,
    pub path: String,
    pub limit: u64,
    pub window_seconds: u64,
    #[serde(default)]
    pub strategy: IdentifierStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RouteRule {
    /// 转换为限流策略
    pub fn quota(&self) -> QuotaConfig {
        QuotaConfig {
            limit: self.limit,
            window_seconds: self.window_seconds,
            strategy: self.strategy,
            rejection_message: self.message.clone(),
        }
    }

    /// 校验规则
    pub fn validate(&self) -> Result<(), String> {
        if self.method.is_empty() {
            return Err("HTTP方法不能为空".to_string());
        }
        if !self.path.starts_with('/') {
            return Err(format!("路径必须以 '/' 开头: {}", self.path));
        }
        self.quota().validate()
    }
}

// ============================================================================
// 总配置
// ============================================================================

/// 准入控制配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    pub version: String,
    /// 计数键命名空间前缀
    pub namespace: String,
    /// 存储不可用时的处理方式
    pub fail_mode: FailMode,
    /// 启动时是否要求计数存储可用（仅启动阶段使用，决策路径不读取）
    pub require_store: bool,
    pub store: StoreConfig,
    pub connection: ConnectionPolicy,
    /// 未配置路由使用的保守默认策略
    pub default_quota: QuotaConfig,
    pub routes: Vec<RouteRule>,
    /// 权限等级 -> 倍率
    pub tiers: HashMap<String, u32>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            namespace: DEFAULT_KEY_NAMESPACE.to_string(),
            fail_mode: FailMode::Open,
            require_store: false,
            store: StoreConfig::default(),
            connection: ConnectionPolicy::default(),
            default_quota: QuotaConfig::default(),
            routes: Vec::new(),
            tiers: HashMap::new(),
        }
    }
}

impl GateConfig {
    /// 校验配置
    pub fn validate(&self) -> Result<(), String> {
        if self.version.is_empty() {
            return Err("版本号不能为空".to_string());
        }

        if self.namespace.is_empty() || self.namespace.contains(':') {
            return Err(format!("无效的命名空间: {:?}", self.namespace));
        }

        self.store
            .validate()
            .map_err(|e| format!("存储配置校验失败: {}", e))?;
        self.connection.validate()?;

        self.default_quota
            .validate()
            .map_err(|e| format!("默认策略校验失败: {}", e))?;

        for (index, route) in self.routes.iter().enumerate() {
            route
                .validate()
                .map_err(|e| format!("路由[{}]校验失败: {}", index, e))?;
        }

        for (tier, multiplier) in &self.tiers {
            if *multiplier == 0 {
                return Err(format!("权限等级 {} 的倍率不能为0", tier));
            }
        }

        Ok(())
    }

    /// 从YAML字符串解析
    pub fn from_yaml_str(content: &str) -> Result<Self, QuotaGateError> {
        let config: GateConfig = serde_yaml::from_str(content)?;
        config.validate().map_err(QuotaGateError::ConfigError)?;
        Ok(config)
    }

    /// 从TOML字符串解析
    pub fn from_toml_str(content: &str) -> Result<Self, QuotaGateError> {
        let config: GateConfig = toml::from_str(content)?;
        config.validate().map_err(QuotaGateError::ConfigError)?;
        Ok(config)
    }

    /// 从文件加载（根据扩展名选择 YAML 或 TOML）
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, QuotaGateError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml_str(&content),
            Some("toml") => Self::from_toml_str(&content),
            _ => Err(QuotaGateError::ConfigError(format!(
                "不支持的配置文件格式: {}",
                path.display()
            ))),
        }
    }

    /// 使用进程环境变量覆盖配置
    pub fn apply_env(&mut self) -> Result<(), QuotaGateError> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// 使用给定的查找函数覆盖配置
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), QuotaGateError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_REDIS_URL) {
            self.store.url = url;
        }

        if let Some(required) = lookup(ENV_REQUIRE_STORE) {
            self.require_store = match required.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                other => {
                    return Err(QuotaGateError::ConfigError(format!(
                        "{} 的值无效: {}",
                        ENV_REQUIRE_STORE, other
                    )))
                }
            };
        }

        if let Some(mode) = lookup(ENV_FAIL_MODE) {
            self.fail_mode = mode.parse().map_err(QuotaGateError::ConfigError)?;
        }

        if let Some(namespace) = lookup(ENV_NAMESPACE) {
            self.namespace = namespace;
        }

        self.validate().map_err(QuotaGateError::ConfigError)
    }
}
