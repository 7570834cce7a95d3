//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 日志初始化
//!
//! 库代码只通过 `tracing` 宏输出事件；宿主进程可以用这里的辅助函数安装
//! `tracing-subscriber` 的 fmt 订阅器。
//!
//! # 示例
//!
//! ```rust
//! use quotagate::telemetry::init_logging;
//!
//! // RUST_LOG 优先，未设置时使用给定指令
//! init_logging("quotagate=info");
//! ```

use tracing::info;
use tracing_subscriber::EnvFilter;

/// 构建日志过滤器
///
/// `RUST_LOG` 存在且合法时使用它，否则使用 `default_directive`；
/// 两者都无法解析时退回 `info`。
pub fn build_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// 安装全局日志订阅器
///
/// # 返回
/// - `true`: 安装成功
/// - `false`: 已经存在全局订阅器（重复调用是安全的）
pub fn init_logging(default_directive: &str) -> bool {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(build_filter(default_directive))
        .with_target(true)
        .try_init()
        .is_ok();

    if installed {
        info!("日志系统初始化完成");
    }
    installed
}
