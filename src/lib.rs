//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! QuotaGate - Request Admission Control
//!
//! Decides, per incoming HTTP request, whether to let it proceed or reject it with a
//! retry hint, based on a fixed-window quota consumed from a shared counter store.
//!
//! # API Layers
//!
//! ## Prelude (Quick Start)
//!
//! Use `use quotagate::prelude::*;` to import all commonly used types.
//!
//! ## Core API
//!
//! - [`RateLimiter`] - Window counter & decision engine
//! - [`ConnectionManager`] - Counter store connection lifecycle manager
//! - [`KeyBuilder`] - Deterministic counter key construction
//! - [`RateLimitDecision`] - Decision result of one check
//! - [`QuotaGateError`] - Error types
//!
//! ## Collaborators
//!
//! - [`QuotaResolver`] / [`PrivilegePolicy`] - per-route quota and tier multipliers
//! - [`IdentityResolver`] - caller identity lookup
//!
//! ## Extensions (feature-gated)
//!
//! - Redis counter store (requires `redis` feature)
//! - axum middleware (requires `http` feature)
//! - Logging setup (requires `telemetry` feature)
//!
//! # Examples
//!
//! ```rust
//! use quotagate::prelude::*;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let connection = ConnectionManager::in_memory();
//!     connection.wait_ready(Duration::from_secs(1)).await.unwrap();
//!
//!     let limiter = RateLimiter::builder(connection)
//!         .quotas(QuotaConfig::new(100, 60))
//!         .build();
//!
//!     let decision = limiter
//!         .check("GET", "/api/items", &CallerIdentity::new("203.0.113.7"))
//!         .await;
//!     assert!(decision.allowed);
//! }
//! ```
//!
//! # Failure semantics
//!
//! The decision path never returns an error. When the counter store is unreachable,
//! slow or failing, [`RateLimiter::check`] answers according to the configured
//! [`FailMode`]: admit (default) or reject with "rate limiter unavailable".

pub mod prelude;

pub mod clock;
pub mod config;
pub mod connection;
pub mod constants;
pub mod decision;
pub mod error;
pub mod identity;
pub mod key;
pub mod limiter;
#[cfg(feature = "http")]
pub mod middleware;
pub mod policy;
#[cfg(feature = "redis")]
pub mod redis_storage;
pub mod storage;
#[cfg(feature = "telemetry")]
pub mod telemetry;

// 重新导出常用类型
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    ConnectionPolicy, FailMode, GateConfig, IdentifierStrategy, QuotaConfig, RouteRule,
    StoreConfig,
};
pub use connection::{ConnectionManager, ConnectionState, ConnectionStats};
pub use decision::{DecisionSource, RateLimitDecision};
pub use error::{QuotaGateError, StorageError};
pub use identity::{
    AnonymousResolver, AuthenticatedCaller, CallerIdentity, HeaderIdentityResolver,
    IdentityResolver, IpExtractor, RequestContext,
};
pub use key::{build_key, window_start, KeyBuilder};
pub use limiter::{RateLimiter, RateLimiterBuilder};
#[cfg(feature = "http")]
pub use middleware::{rate_limit, RateLimitState, RejectionBody};
pub use policy::{NoMultiplier, PrivilegePolicy, QuotaResolver, RouteTable, TierMultipliers};
#[cfg(feature = "redis")]
pub use redis_storage::{RedisConfig, RedisCounterStore, RedisStoreFactory};
pub use storage::{CounterStore, MemoryCounterStore, SharedStoreFactory, StoreEvent, StoreFactory};
