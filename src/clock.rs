//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 时钟抽象
//!
//! 窗口计算使用 Unix 纪元秒。生产环境使用 [`SystemClock`]，
//! 测试中使用 [`ManualClock`] 精确控制时间推进。

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// 时钟 trait
pub trait Clock: Send + Sync {
    /// 当前 Unix 时间戳（秒）
    fn now_epoch_secs(&self) -> i64;
}

/// 系统时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_secs(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// 手动时钟
///
/// 所有克隆共享同一个时间值。
///
/// # 示例
/// ```rust
/// use quotagate::clock::{Clock, ManualClock};
///
/// let clock = ManualClock::new(1_700_000_000);
/// clock.advance(30);
/// assert_eq!(clock.now_epoch_secs(), 1_700_000_030);
/// ```
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    /// 以给定时间戳创建
    pub fn new(epoch_secs: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(epoch_secs)),
        }
    }

    /// 时间前进 `secs` 秒
    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    /// 设置为指定时间戳
    pub fn set(&self, epoch_secs: i64) {
        self.now.store(epoch_secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_epoch_secs(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
