//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! Centralized configuration constants for QuotaGate.
//!
//! All magic numbers and fixed strings used on the decision path live here.

// ============================================================================
// Key Namespace Constants
// ============================================================================

/// Default namespace prefix of every counter key.
pub const DEFAULT_KEY_NAMESPACE: &str = "ratelimit";

/// Sentinel used when the caller's IP cannot be determined.
///
/// Starts with `~`, which the key builder always escapes inside real values,
/// so it can never collide with an actual address.
pub const UNKNOWN_IP_SENTINEL: &str = "~unknown";

/// Sentinel used when an identity is required by the strategy but absent.
pub const ANONYMOUS_IDENTITY_SENTINEL: &str = "~anonymous";

/// Fallback IP string reported in [`crate::identity::CallerIdentity`] when
/// no address could be extracted from request metadata.
pub const UNKNOWN_IP: &str = "unknown";

// ============================================================================
// Quota Constants
// ============================================================================

/// Conservative default quota applied when a route has no (valid) policy.
pub const DEFAULT_QUOTA_LIMIT: u64 = 100;

/// Default window length in seconds.
pub const DEFAULT_WINDOW_SECONDS: u64 = 60;

/// Default human message in rejection payloads.
pub const DEFAULT_REJECTION_MESSAGE: &str = "Too many requests, please try again later.";

/// Message used when the limiter itself is unavailable in fail-closed mode.
pub const UNAVAILABLE_REJECTION_MESSAGE: &str = "rate limiter unavailable";

/// Fixed category string of the `error` field in rejection payloads.
pub const REJECTION_ERROR_CATEGORY: &str = "Too Many Requests";

// ============================================================================
// Connection Lifecycle Constants
// ============================================================================

/// Consecutive connect failures before auto-retry stops and the manager
/// stays degraded until the next explicit request for a client.
pub const DEFAULT_MAX_CONNECT_ATTEMPTS: u32 = 3;

/// Base reconnect delay (multiplied by the attempt number).
pub const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 100;

/// Ceiling for the reconnect delay (2 seconds).
pub const DEFAULT_RECONNECT_MAX_DELAY_MS: u64 = 2_000;

/// Default connect timeout for the counter store (5 seconds).
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Default per-operation timeout for store calls on the decision path.
pub const DEFAULT_IO_TIMEOUT_MS: u64 = 1_000;

/// Number of INCR calls between sweeps of expired keys in the in-memory store.
pub const DEFAULT_MEMORY_SWEEP_INTERVAL: u64 = 256;

// ============================================================================
// HTTP Header Constants
// ============================================================================

/// Quota ceiling header.
pub const HEADER_RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";

/// Remaining requests header.
pub const HEADER_RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";

/// Reset epoch seconds header.
pub const HEADER_RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

/// Retry-After header (rejections only).
pub const HEADER_RETRY_AFTER: &str = "retry-after";

/// Header carrying an authenticated user id (trusted upstream only).
pub const HEADER_USER_ID: &str = "x-user-id";

/// Header carrying the caller's privilege tier (trusted upstream only).
pub const HEADER_USER_ROLE: &str = "x-user-role";

// ============================================================================
// Environment Variables
// ============================================================================

/// Overrides `store.url`.
pub const ENV_REDIS_URL: &str = "QUOTAGATE_REDIS_URL";

/// Overrides `require_store`.
pub const ENV_REQUIRE_STORE: &str = "QUOTAGATE_REQUIRE_STORE";

/// Overrides `fail_mode` (`open` / `closed`).
pub const ENV_FAIL_MODE: &str = "QUOTAGATE_FAIL_MODE";

/// Overrides `namespace`.
pub const ENV_NAMESPACE: &str = "QUOTAGATE_NAMESPACE";
