//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 限流策略协作方
//!
//! 决策引擎只通过两个接口读取策略：
//! - [`QuotaResolver`]: (HTTP方法, 路径) -> 基础策略
//! - [`PrivilegePolicy`]: 按权限等级派生放大后的策略
//!
//! 本模块同时提供基于 [`GateConfig`] 的默认实现 [`RouteTable`] 和 [`TierMultipliers`]。

use crate::config::{GateConfig, QuotaConfig, RouteRule};
use ahash::AHashMap as HashMap;
use tracing::{debug, warn};

/// 路由策略解析接口
pub trait QuotaResolver: Send + Sync {
    /// 解析 (方法, 路径) 对应的策略，未配置时返回 `None`
    fn resolve_quota(&self, method: &str, path: &str) -> Option<QuotaConfig>;
}

/// 单一策略应用于所有路由
impl QuotaResolver for QuotaConfig {
    fn resolve_quota(&self, _method: &str, _path: &str) -> Option<QuotaConfig> {
        Some(self.clone())
    }
}

/// 权限倍率接口
pub trait PrivilegePolicy: Send + Sync {
    /// 按权限等级派生新的策略
    ///
    /// 决策引擎原样使用返回的 `limit`，不做任何修正。
    fn apply_privilege_multiplier(&self, config: &QuotaConfig, tier: &str) -> QuotaConfig;
}

/// 不放大任何策略
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMultiplier;

impl PrivilegePolicy for NoMultiplier {
    fn apply_privilege_multiplier(&self, config: &QuotaConfig, _tier: &str) -> QuotaConfig {
        config.clone()
    }
}

/// 权限等级倍率表
///
/// 等级名不区分大小写；未知等级返回原策略。
#[derive(Debug, Clone, Default)]
pub struct TierMultipliers {
    multipliers: HashMap<String, u32>,
}

impl TierMultipliers {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加等级倍率
    pub fn with_tier(mut self, tier: &str, multiplier: u32) -> Self {
        self.multipliers.insert(tier.to_lowercase(), multiplier);
        self
    }

    /// 从配置构建，忽略倍率为0的等级
    pub fn from_config(config: &GateConfig) -> Self {
        let mut table = Self::new();
        for (tier, multiplier) in &config.tiers {
            if *multiplier == 0 {
                warn!("忽略无效的权限倍率: tier={}, multiplier=0", tier);
                continue;
            }
            table = table.with_tier(tier, *multiplier);
        }
        table
    }

    /// 查询倍率
    pub fn multiplier(&self, tier: &str) -> Option<u32> {
        self.multipliers.get(&tier.to_lowercase()).copied()
    }
}

impl PrivilegePolicy for TierMultipliers {
    fn apply_privilege_multiplier(&self, config: &QuotaConfig, tier: &str) -> QuotaConfig {
        match self.multiplier(tier) {
            Some(multiplier) => config.scaled(multiplier),
            None => config.clone(),
        }
    }
}

/// 路由匹配方式
#[derive(Debug, Clone, PartialEq, Eq)]
enum PathPattern {
    Exact(String),
    /// `/api/admin/*` 存储为 `/api/admin`
    Prefix(String),
}

impl PathPattern {
    fn parse(path: &str) -> Self {
        match path.strip_suffix("/*") {
            Some(prefix) => PathPattern::Prefix(prefix.to_string()),
            None => PathPattern::Exact(path.to_string()),
        }
    }

    /// 匹配得分，越大越具体；不匹配时返回 `None`
    fn score(&self, path: &str) -> Option<usize> {
        match self {
            PathPattern::Exact(exact) => (exact == path).then_some(usize::MAX),
            PathPattern::Prefix(prefix) => {
                let matched = path == prefix
                    || (path.starts_with(prefix.as_str())
                        && path.as_bytes().get(prefix.len()) == Some(&b'/'));
                matched.then_some(prefix.len())
            }
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRoute {
    /// 大写方法名，`None` 表示 `*`
    method: Option<String>,
    pattern: PathPattern,
    quota: QuotaConfig,
}

/// 路由策略表
///
/// 匹配顺序：精确路径优先于前缀；前缀越长越优先；同等路径下精确方法优先于 `*`；
/// 均不匹配时使用默认策略。无效的规则在构建时被丢弃，因此未知路由总是落到保守的默认策略上。
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<CompiledRoute>,
    default_quota: QuotaConfig,
}

impl RouteTable {
    /// 创建只有默认策略的路由表
    pub fn new(default_quota: QuotaConfig) -> Self {
        let default_quota = match default_quota.validate() {
            Ok(()) => default_quota,
            Err(e) => {
                warn!("默认策略无效（{}），使用内置默认值", e);
                QuotaConfig::default()
            }
        };

        Self {
            routes: Vec::new(),
            default_quota,
        }
    }

    /// 从配置构建
    pub fn from_config(config: &GateConfig) -> Self {
        config
            .routes
            .iter()
            .fold(Self::new(config.default_quota.clone()), |table, rule| {
                table.with_rule(rule)
            })
    }

    /// 添加路由规则，无效规则被丢弃
    pub fn with_rule(mut self, rule: &RouteRule) -> Self {
        if let Err(e) = rule.validate() {
            warn!("丢弃无效的路由规则 {} {}: {}", rule.method, rule.path, e);
            return self;
        }

        let method = match rule.method.trim() {
            "*" => None,
            m => Some(m.to_uppercase()),
        };

        self.routes.push(CompiledRoute {
            method,
            pattern: PathPattern::parse(&rule.path),
            quota: rule.quota(),
        });
        self
    }

    /// 添加路由（便捷方法）
    pub fn route(self, method: &str, path: &str, quota: QuotaConfig) -> Self {
        self.with_rule(&RouteRule {
            method: method.to_string(),
            path: path.to_string(),
            limit: quota.limit,
            window_seconds: quota.window_seconds,
            strategy: quota.strategy,
            message: quota.rejection_message,
        })
    }

    /// 默认策略
    pub fn default_quota(&self) -> &QuotaConfig {
        &self.default_quota
    }

    /// 规则数量
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    fn best_match(&self, method: &str, path: &str) -> Option<&CompiledRoute> {
        let method = method.to_uppercase();

        self.routes
            .iter()
            .filter_map(|route| {
                let method_exact = match &route.method {
                    Some(m) if *m == method => true,
                    Some(_) => return None,
                    None => false,
                };
                let path_score = route.pattern.score(path)?;
                Some(((path_score, method_exact), route))
            })
            // 同分时保留先声明的规则
            .fold(None, |best: Option<((usize, bool), &CompiledRoute)>, candidate| {
                match best {
                    Some(current) if current.0 >= candidate.0 => Some(current),
                    _ => Some(candidate),
                }
            })
            .map(|(_, route)| route)
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new(QuotaConfig::default())
    }
}

impl QuotaResolver for RouteTable {
    fn resolve_quota(&self, method: &str, path: &str) -> Option<QuotaConfig> {
        match self.best_match(method, path) {
            Some(route) => Some(route.quota.clone()),
            None => {
                debug!("路由未配置，使用默认策略: {} {}", method, path);
                Some(self.default_quota.clone())
            }
        }
    }
}
