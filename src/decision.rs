//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 限流决策
//!
//! 每个请求构造一次、不可变、不跨请求缓存。

use crate::config::QuotaConfig;
use crate::constants::UNAVAILABLE_REJECTION_MESSAGE;
use serde::Serialize;

/// 决策来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionSource {
    /// 基于存储计数
    Counted,
    /// 存储不可用，默认放行
    FailOpen,
    /// 存储不可用，默认拒绝
    FailClosed,
}

/// 限流决策
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    /// 是否允许
    pub allowed: bool,
    /// 实际执行的阈值（已应用倍率）
    pub limit: u64,
    /// 剩余配额
    pub remaining: u64,
    /// 配额重置时间（Unix 秒）
    pub reset_at_epoch_secs: i64,
    /// 拒绝提示（仅在拒绝时存在）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_message: Option<String>,
    /// 决策来源
    pub source: DecisionSource,
}

impl RateLimitDecision {
    /// 基于计数值的决策
    ///
    /// # 参数
    /// - `quota`: 生效的策略
    /// - `count`: 自增后的计数
    /// - `window_start`: 窗口起始时间
    /// - `default_message`: 策略未配置提示时使用的信息
    pub fn counted(
        quota: &QuotaConfig,
        count: u64,
        window_start: i64,
        default_message: &str,
    ) -> Self {
        let allowed = count <= quota.limit;
        Self {
            allowed,
            limit: quota.limit,
            remaining: quota.limit.saturating_sub(count),
            reset_at_epoch_secs: window_start.saturating_add(window_secs(quota)),
            rejection_message: (!allowed).then(|| {
                quota
                    .rejection_message
                    .clone()
                    .unwrap_or_else(|| default_message.to_string())
            }),
            source: DecisionSource::Counted,
        }
    }

    /// 存储不可用时放行
    pub fn fail_open(quota: &QuotaConfig, now: i64) -> Self {
        Self {
            allowed: true,
            limit: quota.limit,
            remaining: quota.limit,
            reset_at_epoch_secs: now.saturating_add(window_secs(quota)),
            rejection_message: None,
            source: DecisionSource::FailOpen,
        }
    }

    /// 存储不可用时拒绝
    pub fn fail_closed(quota: &QuotaConfig, now: i64) -> Self {
        Self {
            allowed: false,
            limit: quota.limit,
            remaining: 0,
            reset_at_epoch_secs: now.saturating_add(window_secs(quota)),
            rejection_message: Some(UNAVAILABLE_REJECTION_MESSAGE.to_string()),
            source: DecisionSource::FailClosed,
        }
    }

    /// 距离重置的秒数，不小于0
    pub fn retry_after_secs(&self, now: i64) -> u64 {
        u64::try_from(self.reset_at_epoch_secs.saturating_sub(now)).unwrap_or(0)
    }

    /// 是否基于真实计数
    pub fn is_counted(&self) -> bool {
        self.source == DecisionSource::Counted
    }
}

fn window_secs(quota: &QuotaConfig) -> i64 {
    i64::try_from(quota.window_seconds).unwrap_or(i64::MAX)
}
