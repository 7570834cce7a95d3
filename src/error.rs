//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 错误类型定义
//!
//! 使用thiserror定义所有错误类型。
//!
//! 注意：决策路径（[`crate::limiter::RateLimiter::check`]）从不返回这些错误，
//! 所有存储故障都会被转换为一个有效的 [`crate::decision::RateLimitDecision`]。

use thiserror::Error;

/// QuotaGate 错误类型
#[derive(Error, Debug)]
pub enum QuotaGateError {
    /// 配置错误
    #[error("配置错误: {0}")]
    ConfigError(String),

    /// 存储错误
    #[error("存储错误: {0}")]
    StorageError(#[from] StorageError),

    /// 计数存储不可用（仅在启动阶段要求存储可用时返回）
    #[error("计数存储不可用: {0}")]
    StoreUnavailable(String),

    /// IO错误
    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),

    /// YAML解析错误
    #[error("YAML解析错误: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML解析错误
    #[error("TOML解析错误: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// 存储错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// 连接错误
    #[error("连接错误: {0}")]
    ConnectionError(String),

    /// 查询错误
    #[error("查询错误: {0}")]
    QueryError(String),

    /// 超时错误
    #[error("超时错误: {0}")]
    TimeoutError(String),

    /// 连接已关闭
    #[error("连接已关闭")]
    Closed,
}

impl StorageError {
    /// 是否为连接层面的故障（需要重新建立连接）
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            StorageError::ConnectionError(_) | StorageError::TimeoutError(_) | StorageError::Closed
        )
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StorageError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            StorageError::TimeoutError(err.to_string())
        } else if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            StorageError::ConnectionError(err.to_string())
        } else {
            StorageError::QueryError(err.to_string())
        }
    }
}
