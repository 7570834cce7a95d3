//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! axum 中间件
//!
//! 将限流决策渲染为HTTP响应：
//! - 所有响应（放行或拒绝）都带有 `x-ratelimit-limit` / `x-ratelimit-remaining` / `x-ratelimit-reset`
//! - 拒绝时直接返回 `429`，附带 `retry-after` 头和 JSON 响应体
//!   `{"error": "...", "message": "...", "retryAfter": N}`
//!
//! # 示例
//! ```rust,no_run
//! use axum::{routing::post, Router};
//! use quotagate::config::QuotaConfig;
//! use quotagate::connection::ConnectionManager;
//! use quotagate::limiter::RateLimiter;
//! use quotagate::middleware::{rate_limit, RateLimitState};
//! use std::sync::Arc;
//!
//! let limiter = RateLimiter::builder(ConnectionManager::in_memory())
//!     .quotas(QuotaConfig::new(10, 60))
//!     .build();
//! let state = RateLimitState::new(Arc::new(limiter));
//!
//! let app: Router = Router::new()
//!     .route("/api/sales", post(|| async { "ok" }))
//!     .layer(axum::middleware::from_fn_with_state(state, rate_limit));
//! ```

use crate::constants::{
    HEADER_RATE_LIMIT_LIMIT, HEADER_RATE_LIMIT_REMAINING, HEADER_RATE_LIMIT_RESET,
    HEADER_RETRY_AFTER, REJECTION_ERROR_CATEGORY,
};
use crate::decision::RateLimitDecision;
use crate::identity::{
    AnonymousResolver, AuthenticatedCaller, CallerIdentity, IdentityResolver, IpExtractor,
    RequestContext,
};
use crate::limiter::RateLimiter;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// 中间件共享状态
#[derive(Clone)]
pub struct RateLimitState {
    limiter: Arc<RateLimiter>,
    identity: Arc<dyn IdentityResolver>,
    ip_extractor: IpExtractor,
}

impl RateLimitState {
    /// 创建中间件状态
    ///
    /// 默认只使用直连对端地址作为IP，身份只从请求扩展中的 [`AuthenticatedCaller`] 读取。
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self {
            limiter,
            identity: Arc::new(AnonymousResolver),
            ip_extractor: IpExtractor::peer_only(),
        }
    }

    /// 设置身份解析器（请求扩展中没有认证信息时使用）
    pub fn with_identity_resolver(mut self, resolver: impl IdentityResolver + 'static) -> Self {
        self.identity = Arc::new(resolver);
        self
    }

    /// 设置IP提取器
    pub fn with_ip_extractor(mut self, extractor: IpExtractor) -> Self {
        self.ip_extractor = extractor;
        self
    }

    /// 限流器
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// 从请求中解析调用方身份
    fn caller(&self, req: &Request) -> CallerIdentity {
        let context = request_context(req);
        let identity = CallerIdentity::new(self.ip_extractor.extract_or_unknown(&context));

        let authenticated = req
            .extensions()
            .get::<AuthenticatedCaller>()
            .cloned()
            .or_else(|| self.identity.resolve(&context));

        match authenticated {
            Some(caller) => identity.with_caller(caller),
            None => identity,
        }
    }
}

/// 拒绝响应体
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectionBody {
    pub error: String,
    pub message: String,
    #[serde(rename = "retryAfter")]
    pub retry_after: u64,
}

/// 限流中间件
pub async fn rate_limit(State(state): State<RateLimitState>, req: Request, next: Next) -> Response {
    let caller = state.caller(&req);
    let method = req.method().as_str().to_string();
    let path = req.uri().path().to_string();

    let decision = state.limiter.check(&method, &path, &caller).await;

    if !decision.allowed {
        debug!("拒绝请求: {} {}, ip={}", method, path, caller.ip);
        return rejection_response(&decision, state.limiter.now());
    }

    let mut response = next.run(req).await;
    apply_headers(response.headers_mut(), &decision);
    response
}

/// 写入限流头
pub fn apply_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(
        HeaderName::from_static(HEADER_RATE_LIMIT_LIMIT),
        HeaderValue::from(decision.limit),
    );
    headers.insert(
        HeaderName::from_static(HEADER_RATE_LIMIT_REMAINING),
        HeaderValue::from(decision.remaining),
    );
    headers.insert(
        HeaderName::from_static(HEADER_RATE_LIMIT_RESET),
        HeaderValue::from(decision.reset_at_epoch_secs),
    );
}

/// 构建拒绝响应体
pub fn rejection_body(decision: &RateLimitDecision, now: i64) -> RejectionBody {
    RejectionBody {
        error: REJECTION_ERROR_CATEGORY.to_string(),
        message: decision.rejection_message.clone().unwrap_or_default(),
        retry_after: decision.retry_after_secs(now),
    }
}

/// 构建 `429` 拒绝响应
pub fn rejection_response(decision: &RateLimitDecision, now: i64) -> Response {
    let body = rejection_body(decision, now);
    let retry_after = body.retry_after;

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    apply_headers(headers, decision);
    headers.insert(
        HeaderName::from_static(HEADER_RETRY_AFTER),
        HeaderValue::from(retry_after),
    );
    response
}

/// 从 axum 请求构建与框架无关的请求上下文
pub fn request_context(req: &Request) -> RequestContext {
    let mut context = RequestContext::new(req.method().as_str(), req.uri().path());

    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        context = context.with_client_ip(addr.ip().to_string());
    }

    for (name, value) in req.headers() {
        if let Ok(value) = value.to_str() {
            context = context.with_header(name.as_str(), value);
        }
    }

    context
}
