//! 端到端测试：配额边界
//!
//! 测试场景：
//! 1. 配额3次/60秒
//! 2. 前三次请求放行，剩余次数依次为 2、1、0
//! 3. 第四次请求被拒绝，重试等待时间在窗口范围内

use crate::common::*;
use quotagate::config::QuotaConfig;

#[tokio::test]
async fn test_e2e_limit_boundary() {
    let (limiter, _store, clock) = memory_limiter(QuotaConfig::new(3, 60)).await;
    // 窗口中途
    clock.advance(17);
    let ip = caller("198.51.100.4");

    for expected in [2, 1, 0] {
        let decision = limiter.check("GET", "/api/items", &ip).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, expected);
    }

    let denied = limiter.check("GET", "/api/items", &ip).await;
    assert!(!denied.allowed);
    assert_eq!(denied.remaining, 0);
    assert_eq!(denied.reset_at_epoch_secs, T0 + 60);

    let retry = denied.retry_after_secs(limiter.now());
    assert_eq!(retry, 43);
    assert!((0..=60).contains(&retry));
}

#[tokio::test]
async fn test_e2e_limit_of_one() {
    let (limiter, _store, _clock) = memory_limiter(QuotaConfig::new(1, 60)).await;
    let ip = caller("198.51.100.4");

    let first = limiter.check("GET", "/", &ip).await;
    assert!(first.allowed);
    assert_eq!(first.remaining, 0);
    assert!(!limiter.check("GET", "/", &ip).await.allowed);
}
