// =============================================================================
// Rate Limiter — sliding 60 s windows per (identity, route, method)
// =============================================================================
//
// Window counters live in the KV store under
// `ratelimit:<identity>:<routePattern>:<method>`. Updates are plain
// read-modify-write; a race at the window boundary may admit one or two
// extra requests, which is accepted for this tier.
// =============================================================================

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::kv::{ratelimit_key, KvStore};

/// Window length in milliseconds.
pub const WINDOW_MS: i64 = 60_000;

/// Per-route request budgets per window.
pub fn route_limit(route_pattern: &str, method: &str) -> u32 {
    match (route_pattern, method) {
        ("/sync", "POST") => 10,
        ("/sync/:userId", "GET") => 60,
        ("/sync/:userId", "DELETE") => 5,
        ("/auth/register", "POST") => 5,
        ("/auth/login", "POST") => 10,
        ("/auth/refresh", "POST") => 10,
        _ => 60,
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WindowState {
    count: u32,
    reset_at: i64,
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Seconds until the window resets; meaningful when denied.
    pub retry_after_secs: u64,
}

/// KV-backed sliding-window limiter.
#[derive(Clone)]
pub struct RateLimiter {
    kv: Arc<dyn KvStore>,
}

impl RateLimiter {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Count one request against `(identity, route_pattern, method)`.
    pub fn check(
        &self,
        identity: &str,
        route_pattern: &str,
        method: &str,
        now_ms: i64,
    ) -> RateDecision {
        let limit = route_limit(route_pattern, method);
        let key = ratelimit_key(identity, route_pattern, method);

        let state = self
            .kv
            .get(&key)
            .and_then(|v| serde_json::from_value::<WindowState>(v).ok())
            .filter(|s| s.reset_at > now_ms);

        let mut state = state.unwrap_or(WindowState {
            count: 0,
            reset_at: now_ms + WINDOW_MS,
        });
        state.count += 1;

        let allowed = state.count <= limit;
        let retry_after_secs = ((state.reset_at - now_ms).max(0) as u64).div_ceil(1000);

        if let Ok(value) = serde_json::to_value(&state) {
            self.kv.put(&key, value);
        }

        if !allowed {
            warn!(
                identity,
                route = route_pattern,
                method,
                count = state.count,
                limit,
                "rate limit exceeded"
            );
        }

        RateDecision {
            allowed,
            retry_after_secs,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::kv::MemoryKv;
    use serde_json::json;

    fn limiter() -> RateLimiter {
        RateLimiter::new(Arc::new(MemoryKv::new()))
    }

    #[test]
    fn limits_per_route_table() {
        assert_eq!(route_limit("/sync", "POST"), 10);
        assert_eq!(route_limit("/sync/:userId", "GET"), 60);
        assert_eq!(route_limit("/sync/:userId", "DELETE"), 5);
        assert_eq!(route_limit("/auth/register", "POST"), 5);
        assert_eq!(route_limit("/unknown", "GET"), 60);
    }

    #[test]
    fn allows_up_to_limit_then_denies() {
        let limiter = limiter();
        for _ in 0..10 {
            assert!(limiter.check("alice", "/sync", "POST", 0).allowed);
        }
        let denied = limiter.check("alice", "/sync", "POST", 0);
        assert!(!denied.allowed);
        assert!(denied.retry_after_secs > 0 && denied.retry_after_secs <= 60);
    }

    #[test]
    fn window_expiry_resets_the_count() {
        let limiter = limiter();
        for _ in 0..=10 {
            limiter.check("alice", "/sync", "POST", 0);
        }
        assert!(!limiter.check("alice", "/sync", "POST", 1).allowed);
        // One window later the identity is fresh again.
        assert!(limiter.check("alice", "/sync", "POST", WINDOW_MS + 1).allowed);
    }

    #[test]
    fn identities_and_routes_are_independent() {
        let limiter = limiter();
        for _ in 0..10 {
            limiter.check("alice", "/sync", "POST", 0);
        }
        assert!(!limiter.check("alice", "/sync", "POST", 0).allowed);
        assert!(limiter.check("bob", "/sync", "POST", 0).allowed);
        assert!(limiter.check("alice", "/sync/:userId", "GET", 0).allowed);
    }

    #[test]
    fn preseeded_counter_denies_next_request() {
        let kv = Arc::new(MemoryKv::new());
        kv.put(
            &ratelimit_key("alice", "/sync/:userId", "GET"),
            json!({ "count": 60, "resetAt": WINDOW_MS }),
        );
        let limiter = RateLimiter::new(kv);
        let decision = limiter.check("alice", "/sync/:userId", "GET", 0);
        assert!(!decision.allowed);
    }
}
