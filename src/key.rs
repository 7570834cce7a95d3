//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 计数键构建
//!
//! 键格式：`{namespace}:{METHOD}:{path}:{strategy}:{identifier...}:{window_start}`
//!
//! 每个组件都经过转义（`/` 改写为 `.`，`. : % ~` 及不可见字符按百分号编码），
//! 因此不同输入不会产生相同的键；缺失的身份组件使用以 `~` 开头的哨兵值，
//! 不会与任何真实值相撞。键构建是纯函数，不访问存储。

use crate::config::IdentifierStrategy;
use crate::constants::{ANONYMOUS_IDENTITY_SENTINEL, UNKNOWN_IP_SENTINEL};
use crate::identity::CallerIdentity;
use std::fmt::Write;

/// 计算窗口起始时间
///
/// `floor(now / window) * window`，负时间戳同样向下取整。
pub fn window_start(now_epoch_secs: i64, window_seconds: u64) -> i64 {
    let window = i64::try_from(window_seconds.max(1)).unwrap_or(i64::MAX);
    now_epoch_secs.div_euclid(window) * window
}

/// 转义键组件
fn escape_component(input: &str, out: &mut String) {
    for c in input.chars() {
        match c {
            '/' => out.push('.'),
            '.' | ':' | '%' | '~' => push_percent_encoded(c, out),
            c if c.is_control() || c.is_whitespace() => push_percent_encoded(c, out),
            c => out.push(c),
        }
    }
}

fn push_percent_encoded(c: char, out: &mut String) {
    let mut buf = [0u8; 4];
    for byte in c.encode_utf8(&mut buf).bytes() {
        // 写入 String 不会失败
        let _ = write!(out, "%{:02X}", byte);
    }
}

/// 键构建器
///
/// # 示例
/// ```rust
/// use quotagate::config::IdentifierStrategy;
/// use quotagate::identity::CallerIdentity;
/// use quotagate::key::KeyBuilder;
///
/// let builder = KeyBuilder::new("ratelimit");
/// let caller = CallerIdentity::new("10.0.0.1");
/// let key = builder.build("post", "/api/sales", IdentifierStrategy::ByIp, &caller, 1_700_000_040);
/// assert_eq!(key, "ratelimit:POST:.api.sales:ip:10%2E0%2E0%2E1:1700000040");
/// ```
#[derive(Debug, Clone)]
pub struct KeyBuilder {
    namespace: String,
}

impl KeyBuilder {
    /// 创建键构建器
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    /// 命名空间前缀
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// 构建计数键
    ///
    /// # 参数
    /// - `method`: HTTP方法（统一转为大写）
    /// - `path`: 路由路径
    /// - `strategy`: 标识符策略
    /// - `identity`: 调用方身份
    /// - `window_start`: 窗口起始时间戳
    pub fn build(
        &self,
        method: &str,
        path: &str,
        strategy: IdentifierStrategy,
        identity: &CallerIdentity,
        window_start: i64,
    ) -> String {
        let mut key = String::with_capacity(self.namespace.len() + path.len() + 64);

        key.push_str(&self.namespace);
        key.push(':');
        escape_component(&method.to_uppercase(), &mut key);
        key.push(':');
        escape_component(path, &mut key);
        key.push(':');
        key.push_str(strategy.tag());
        key.push(':');

        match strategy {
            IdentifierStrategy::ByIp => push_ip(identity, &mut key),
            IdentifierStrategy::ByIdentity => push_identity(identity, &mut key),
            IdentifierStrategy::ByIpAndIdentity => {
                push_ip(identity, &mut key);
                key.push(':');
                push_identity(identity, &mut key);
            }
        }

        key.push(':');
        let _ = write!(key, "{}", window_start);
        key
    }
}

fn push_ip(identity: &CallerIdentity, key: &mut String) {
    match identity.known_ip() {
        Some(ip) => escape_component(ip, key),
        None => key.push_str(UNKNOWN_IP_SENTINEL),
    }
}

fn push_identity(identity: &CallerIdentity, key: &mut String) {
    match identity.identity_id.as_deref().filter(|id| !id.is_empty()) {
        Some(id) => escape_component(id, key),
        None => key.push_str(ANONYMOUS_IDENTITY_SENTINEL),
    }
}

/// 使用给定命名空间构建计数键
pub fn build_key(
    namespace: &str,
    method: &str,
    path: &str,
    strategy: IdentifierStrategy,
    identity: &CallerIdentity,
    window_start: i64,
) -> String {
    KeyBuilder::new(namespace).build(method, path, strategy, identity, window_start)
}
