//! 存储模块测试
//!
//! 包含计数存储后端的集成测试
