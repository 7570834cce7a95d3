//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! Redis计数存储
//!
//! 基于Redis的计数存储实现，供多个无状态请求处理进程共享。
//!
//! # 特性
//!
//! - **同步构造**: 创建客户端不做网络IO，连接由连接生命周期管理器异步建立
//! - **连接复用**: 使用ConnectionManager管理底层连接
//! - **原子计数**: INCR / EXPIRE 保证跨进程的计数串行化
//! - **密码保护**: 密码使用 Secret 包装，不会出现在日志中
//!

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client, ConnectionInfo, IntoConnectionInfo};
use secrecy::{ExposeSecret, Secret};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, trace};

use crate::error::StorageError;
use crate::storage::{CounterStore, StoreFactory};

/// Redis配置
#[derive(Clone)]
pub struct RedisConfig {
    /// Redis连接URL
    pub url: String,
    /// 数据库索引
    pub db: i64,
    /// 密码（使用 Secret 包装以防止意外泄露）
    pub password: Option<Secret<String>>,
    /// 连接超时
    pub connection_timeout: Duration,
    /// 读写超时
    pub io_timeout: Duration,
}

impl std::fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConfig")
            .field("url", &self.url)
            .field("db", &self.db)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("connection_timeout", &self.connection_timeout)
            .field("io_timeout", &self.io_timeout)
            .finish()
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            db: 0,
            password: None,
            connection_timeout: Duration::from_secs(5),
            io_timeout: Duration::from_secs(1),
        }
    }
}

impl RedisConfig {
    /// 创建新的Redis配置
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// 设置数据库索引
    pub fn db(mut self, db: i64) -> Self {
        self.db = db;
        self
    }

    /// 设置密码
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(Secret::new(password.into()));
        self
    }

    /// 设置密码（使用 Secret）
    pub fn password_secret(mut self, password: Secret<String>) -> Self {
        self.password = Some(password);
        self
    }

    /// 设置连接超时
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// 设置IO超时
    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// 构建连接信息
    ///
    /// URL 中的认证信息会被配置中的密码覆盖。
    fn connection_info(&self) -> Result<ConnectionInfo, StorageError> {
        let mut info = self
            .url
            .as_str()
            .into_connection_info()
            .map_err(|e| StorageError::ConnectionError(format!("无效的Redis URL: {}", e)))?;

        info.redis.db = self.db;
        if let Some(password) = &self.password {
            info.redis.password = Some(password.expose_secret().clone());
        }

        Ok(info)
    }
}

/// Redis计数存储
pub struct RedisCounterStore {
    /// Redis客户端（不持有连接）
    client: Client,
    /// 配置
    config: RedisConfig,
    /// 连接管理器，连接建立前为 None
    conn_manager: RwLock<Option<ConnectionManager>>,
}

impl RedisCounterStore {
    /// 创建新的Redis计数存储
    ///
    /// 只校验配置并构造客户端，不建立连接。
    pub fn new(config: RedisConfig) -> Result<Self, StorageError> {
        let client = Client::open(config.connection_info()?)
            .map_err(|e| StorageError::ConnectionError(format!("创建Redis客户端失败: {}", e)))?;

        debug!("创建Redis客户端, URL: {}", config.url);

        Ok(Self {
            client,
            config,
            conn_manager: RwLock::new(None),
        })
    }

    /// 获取配置
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    /// 获取当前连接
    async fn connection(&self) -> Result<ConnectionManager, StorageError> {
        self.conn_manager
            .read()
            .await
            .clone()
            .ok_or_else(|| StorageError::ConnectionError("连接未初始化".to_string()))
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    fn name(&self) -> &str {
        "redis"
    }

    async fn connect(&self) -> Result<(), StorageError> {
        debug!("建立Redis连接");

        let conn_manager = tokio::time::timeout(
            self.config.connection_timeout,
            ConnectionManager::new(self.client.clone()),
        )
        .await
        .map_err(|_| {
            StorageError::TimeoutError(format!(
                "连接超时 ({:?})",
                self.config.connection_timeout
            ))
        })??;

        *self.conn_manager.write().await = Some(conn_manager);

        info!("Redis连接建立成功");
        Ok(())
    }

    async fn incr(&self, key: &str) -> Result<u64, StorageError> {
        let mut conn = self.connection().await?;

        let value: u64 = redis::cmd("INCR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                debug!("Redis INCR失败: {}", e);
                StorageError::from(e)
            })?;

        trace!("INCR key={}, value={}", key, value);
        Ok(value)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, StorageError> {
        let mut conn = self.connection().await?;

        let applied: bool = redis::cmd("EXPIRE")
            .arg(key)
            .arg(seconds)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                debug!("Redis EXPIRE失败: {}", e);
                StorageError::from(e)
            })?;

        trace!("EXPIRE key={}, seconds={}, applied={}", key, seconds, applied);
        Ok(applied)
    }

    async fn ping(&self) -> Result<bool, StorageError> {
        let mut conn = self.connection().await?;

        let reply: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(StorageError::from)?;

        Ok(reply == "PONG")
    }

    async fn quit(&self) -> Result<(), StorageError> {
        let mut conn = self.connection().await?;

        let _: () = redis::cmd("QUIT")
            .query_async(&mut conn)
            .await
            .map_err(StorageError::from)?;

        *self.conn_manager.write().await = None;
        info!("Redis连接已优雅关闭");
        Ok(())
    }

    async fn disconnect(&self) {
        // 丢弃最后一个 ConnectionManager 即关闭底层套接字
        *self.conn_manager.write().await = None;
        info!("Redis连接已强制断开");
    }
}

/// Redis客户端工厂
#[derive(Debug, Clone)]
pub struct RedisStoreFactory {
    config: RedisConfig,
}

impl RedisStoreFactory {
    pub fn new(config: RedisConfig) -> Self {
        Self { config }
    }
}

impl StoreFactory for RedisStoreFactory {
    fn create(&self) -> Result<Arc<dyn CounterStore>, StorageError> {
        Ok(Arc::new(RedisCounterStore::new(self.config.clone())?))
    }
}
