//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 调用方身份
//!
//! 从请求元数据中提取调用方 IP，并通过外部身份解析器获取认证身份和权限等级。
//! 身份只在单个请求内有效，从不持久化。
//!
//! 身份解析属于外部协作方：实现 [`IdentityResolver`] 即可接入任意认证体系，
//! 解析失败（或调用方未认证）时返回 `None`，这是合法且预期的结果。

use crate::constants::{HEADER_USER_ID, HEADER_USER_ROLE, UNKNOWN_IP};
use ahash::AHashMap as HashMap;
use std::net::IpAddr;

// ============================================================================
// 调用方身份
// ============================================================================

/// 调用方身份
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    /// 客户端IP，无法提取时为 `"unknown"`
    pub ip: String,
    /// 认证身份ID（仅认证调用方）
    pub identity_id: Option<String>,
    /// 权限等级（用于查找倍率）
    pub privilege_tier: Option<String>,
}

impl CallerIdentity {
    /// 以IP创建匿名调用方
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            identity_id: None,
            privilege_tier: None,
        }
    }

    /// IP未知的匿名调用方
    pub fn unknown() -> Self {
        Self::new(UNKNOWN_IP)
    }

    /// 设置认证身份
    pub fn with_identity(mut self, identity_id: impl Into<String>) -> Self {
        self.identity_id = Some(identity_id.into());
        self
    }

    /// 设置权限等级
    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.privilege_tier = Some(tier.into());
        self
    }

    /// 附加认证信息
    pub fn with_caller(mut self, caller: AuthenticatedCaller) -> Self {
        self.identity_id = Some(caller.identity_id);
        self.privilege_tier = caller.privilege_tier;
        self
    }

    /// 已知的IP（未知时返回 `None`）
    pub fn known_ip(&self) -> Option<&str> {
        let ip = self.ip.as_str();
        (!ip.is_empty() && ip != UNKNOWN_IP).then_some(ip)
    }

    /// 是否已认证
    pub fn is_authenticated(&self) -> bool {
        self.identity_id.as_deref().is_some_and(|id| !id.is_empty())
    }
}

/// 已认证调用方（身份解析器的输出）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedCaller {
    pub identity_id: String,
    pub privilege_tier: Option<String>,
}

impl AuthenticatedCaller {
    pub fn new(identity_id: impl Into<String>) -> Self {
        Self {
            identity_id: identity_id.into(),
            privilege_tier: None,
        }
    }

    pub fn with_tier(mut self, tier: impl Into<String>) -> Self {
        self.privilege_tier = Some(tier.into());
        self
    }
}

// ============================================================================
// 请求上下文
// ============================================================================

/// HTTP请求上下文
///
/// 与具体HTTP框架无关的请求表示，包含解析身份所需的信息。
#[derive(Clone, Default)]
pub struct RequestContext {
    /// 请求方法
    pub method: String,
    /// 请求路径
    pub path: String,
    /// 直连对端IP
    pub client_ip: Option<String>,
    /// HTTP头（键为小写）
    pub headers: HashMap<String, String>,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // 脱敏 headers
        let headers: HashMap<&str, &str> = self
            .headers
            .iter()
            .map(|(k, v)| {
                let sensitive =
                    k.contains("auth") || k.contains("cookie") || k.contains("key");
                (k.as_str(), if sensitive { "***" } else { v.as_str() })
            })
            .collect();

        f.debug_struct("RequestContext")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("client_ip", &self.client_ip)
            .field("headers", &headers)
            .finish()
    }
}

impl RequestContext {
    /// 创建新的请求上下文
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    /// 添加HTTP头
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.headers.insert(key.to_lowercase(), value.to_string());
        self
    }

    /// 设置客户端IP
    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }

    /// 获取HTTP头（不区分大小写）
    pub fn get_header(&self, key: &str) -> Option<&str> {
        self.headers.get(&key.to_lowercase()).map(String::as_str)
    }
}

// ============================================================================
// IP提取器
// ============================================================================

/// IP提取器
///
/// 依次从配置的转发头（按优先级）和直连对端地址中提取客户端IP。
/// 只应在受信任的反向代理之后配置转发头，否则客户端可以伪造。
#[derive(Debug, Clone)]
pub struct IpExtractor {
    /// HTTP头名称列表（按优先级顺序）
    header_names: Vec<String>,
    /// 是否验证IP格式
    validate: bool,
}

impl Default for IpExtractor {
    fn default() -> Self {
        Self::peer_only()
    }
}

impl IpExtractor {
    /// 创建新的IP提取器
    ///
    /// # 参数
    /// - `header_names`: HTTP头名称列表（按优先级顺序）
    /// - `validate`: 是否验证IP格式
    pub fn new(header_names: Vec<String>, validate: bool) -> Self {
        Self {
            header_names: header_names.into_iter().map(|h| h.to_lowercase()).collect(),
            validate,
        }
    }

    /// 只使用直连对端地址
    pub fn peer_only() -> Self {
        Self::new(vec![], true)
    }

    /// 创建从多个HTTP头提取的IP提取器（按优先级顺序）
    ///
    /// # 示例
    /// ```rust
    /// use quotagate::identity::IpExtractor;
    ///
    /// let extractor = IpExtractor::from_headers(vec!["X-Forwarded-For", "X-Real-IP"]);
    /// ```
    pub fn from_headers(header_names: Vec<&str>) -> Self {
        Self::new(header_names.iter().map(|s| s.to_string()).collect(), true)
    }

    /// 解析IP地址（支持 X-Forwarded-For 格式的列表）
    ///
    /// 列表格式为 `client, proxy1, proxy2`，取最左边的地址作为客户端IP。
    fn parse_ip(&self, value: &str) -> Option<String> {
        let ip = value.split(',').map(str::trim).find(|s| !s.is_empty())?;

        if self.validate && ip.parse::<IpAddr>().is_err() {
            return None;
        }

        Some(ip.to_string())
    }

    /// 从请求上下文中提取IP
    pub fn extract(&self, context: &RequestContext) -> Option<String> {
        for header_name in &self.header_names {
            if let Some(ip) = context
                .get_header(header_name)
                .and_then(|value| self.parse_ip(value))
            {
                return Some(ip);
            }
        }

        context
            .client_ip
            .as_deref()
            .and_then(|client_ip| self.parse_ip(client_ip))
    }

    /// 提取IP，失败时返回 `"unknown"`
    pub fn extract_or_unknown(&self, context: &RequestContext) -> String {
        self.extract(context)
            .unwrap_or_else(|| UNKNOWN_IP.to_string())
    }
}

// ============================================================================
// 身份解析器
// ============================================================================

/// 身份解析器 trait
///
/// 尽力而为的同步查找，不得 panic；未认证时返回 `None`。
pub trait IdentityResolver: Send + Sync {
    /// 从请求上下文中解析认证调用方
    fn resolve(&self, context: &RequestContext) -> Option<AuthenticatedCaller>;

    /// 获取解析器名称
    fn name(&self) -> &str;
}

/// 不解析任何身份（所有调用方视为匿名）
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousResolver;

impl IdentityResolver for AnonymousResolver {
    fn resolve(&self, _context: &RequestContext) -> Option<AuthenticatedCaller> {
        None
    }

    fn name(&self) -> &str {
        "AnonymousResolver"
    }
}

/// 从可信上游写入的HTTP头解析身份
///
/// 仅在网关/认证层会剥离并重写这些头时使用。
#[derive(Debug, Clone)]
pub struct HeaderIdentityResolver {
    user_header: String,
    role_header: String,
}

impl Default for HeaderIdentityResolver {
    fn default() -> Self {
        Self::new(HEADER_USER_ID, HEADER_USER_ROLE)
    }
}

impl HeaderIdentityResolver {
    pub fn new(user_header: &str, role_header: &str) -> Self {
        Self {
            user_header: user_header.to_lowercase(),
            role_header: role_header.to_lowercase(),
        }
    }
}

impl IdentityResolver for HeaderIdentityResolver {
    fn resolve(&self, context: &RequestContext) -> Option<AuthenticatedCaller> {
        let identity_id = context
            .get_header(&self.user_header)
            .map(str::trim)
            .filter(|id| !id.is_empty())?;

        let tier = context
            .get_header(&self.role_header)
            .map(str::trim)
            .filter(|tier| !tier.is_empty());

        Some(AuthenticatedCaller {
            identity_id: identity_id.to_string(),
            privilege_tier: tier.map(str::to_string),
        })
    }

    fn name(&self) -> &str {
        "HeaderIdentityResolver"
    }
}

/// 根据请求上下文组装调用方身份
pub fn resolve_caller(
    context: &RequestContext,
    ip_extractor: &IpExtractor,
    resolver: &dyn IdentityResolver,
) -> CallerIdentity {
    let identity = CallerIdentity::new(ip_extractor.extract_or_unknown(context));
    match resolver.resolve(context) {
        Some(caller) => identity.with_caller(caller),
        None => identity,
    }
}
