//! 集成测试模块
//!
//! 需要外部服务的集成测试

#[cfg(feature = "redis")]
mod redis_test;
