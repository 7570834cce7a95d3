//! Prelude module - Commonly used types for quick imports
//!
//! This module re-exports the most commonly used types from QuotaGate,
//! allowing users to import them with a single `use quotagate::prelude::*;`
//! statement instead of importing each type individually.

// Core types - always available
pub use crate::config::{FailMode, GateConfig, IdentifierStrategy, QuotaConfig};
pub use crate::connection::{ConnectionManager, ConnectionState};
pub use crate::decision::RateLimitDecision;
pub use crate::error::{QuotaGateError, StorageError};
pub use crate::limiter::RateLimiter;

// Caller identity
pub use crate::identity::{
    AuthenticatedCaller, CallerIdentity, HeaderIdentityResolver, IdentityResolver, IpExtractor,
};

// Policy collaborators
pub use crate::policy::{PrivilegePolicy, QuotaResolver, RouteTable, TierMultipliers};

// Counter stores
pub use crate::storage::{CounterStore, MemoryCounterStore};

// Feature-gated exports
#[cfg(feature = "redis")]
pub use crate::redis_storage::{RedisConfig, RedisCounterStore};

#[cfg(feature = "http")]
pub use crate::middleware::{rate_limit, RateLimitState};
