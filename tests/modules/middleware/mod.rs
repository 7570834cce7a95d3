//! 中间件模块测试

pub mod integration;
