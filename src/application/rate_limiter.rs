//! Daily per-user rate limiting over the TTL key-value store.
//!
//! Fixed wall-clock window: counters live under `rate_limit:<user>` and
//! expire at the next UTC midnight. The check is increment-first: the
//! backend increments atomically, and an increment that lands past the
//! limit is handed back with a decrement so concurrent callers can never
//! jointly exceed the quota. A get-then-set sequence would race here.
//!
//! When the backing store is down the limiter fails OPEN: requests are
//! allowed and a degraded-mode warning is logged. Availability over
//! strictness, and never silent.

use std::sync::Arc;
use std::time::Duration;

use crate::config::LimitsConfig;
use crate::domain::{Timestamp, UserId};
use crate::ports::KeyValueStore;

const KEY_PREFIX: &str = "rate_limit";

/// Outcome of a consume attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// The quota that applied.
    pub limit: u32,
    /// When the window resets (next UTC midnight).
    pub reset_at: Timestamp,
}

/// Read-only usage snapshot for display purposes.
#[derive(Debug, Clone, PartialEq)]
pub struct Usage {
    pub usage: u32,
    pub limit: u32,
}

/// Atomic daily counter gate, one counter per user id.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    limits: LimitsConfig,
}

impl RateLimiter {
    /// Creates a limiter over the given store and quota configuration.
    pub fn new(store: Arc<dyn KeyValueStore>, limits: LimitsConfig) -> Self {
        Self { store, limits }
    }

    fn key(user_id: &UserId) -> String {
        format!("{}:{}", KEY_PREFIX, user_id)
    }

    fn window(now: Timestamp) -> (Timestamp, Duration) {
        let reset_at = now.next_utc_midnight();
        let ttl = Duration::from_secs(now.seconds_until_next_utc_midnight());
        (reset_at, ttl)
    }

    /// Checks the caller's quota and consumes one unit if headroom remains.
    pub async fn check_and_consume(
        &self,
        user_id: &UserId,
        is_anonymous: bool,
    ) -> RateLimitDecision {
        let limit = self.limits.daily_limit(is_anonymous);
        let (reset_at, ttl) = Self::window(Timestamp::now());
        let key = Self::key(user_id);

        let count = match self.store.increment(&key, ttl).await {
            Ok(count) => count,
            Err(e) => {
                // Fail open: availability over strictness when the store is down.
                tracing::warn!(user = %user_id, error = %e, "rate limiter degraded, allowing request");
                return RateLimitDecision {
                    allowed: true,
                    limit,
                    reset_at,
                };
            }
        };

        if count > i64::from(limit) {
            // Our increment overshot; hand it back so the counter stays honest.
            if let Err(e) = self.store.decrement(&key).await {
                tracing::warn!(user = %user_id, error = %e, "failed to return overshoot increment");
            }
            return RateLimitDecision {
                allowed: false,
                limit,
                reset_at,
            };
        }

        RateLimitDecision {
            allowed: true,
            limit,
            reset_at,
        }
    }

    /// Current usage without consuming quota. Never mutates state.
    pub async fn usage(&self, user_id: &UserId, is_anonymous: bool) -> Usage {
        let limit = self.limits.daily_limit(is_anonymous);
        let usage = match self.store.get(&Self::key(user_id)).await {
            Ok(Some(value)) => value.parse::<u32>().unwrap_or(0),
            Ok(None) => 0,
            Err(e) => {
                tracing::warn!(user = %user_id, error = %e, "usage read failed, reporting zero");
                0
            }
        };
        Usage { usage, limit }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryKeyValueStore;

    fn limiter_with(anon: u32, auth: u32) -> (RateLimiter, Arc<InMemoryKeyValueStore>) {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let limits = LimitsConfig {
            anonymous_daily: anon,
            authenticated_daily: auth,
            ..Default::default()
        };
        (RateLimiter::new(store.clone(), limits), store)
    }

    fn user(id: &str) -> UserId {
        UserId::new(id).unwrap()
    }

    #[tokio::test]
    async fn allows_up_to_the_limit_then_rejects() {
        let (limiter, _) = limiter_with(10, 50);
        let u = user("anon-1");

        for _ in 0..10 {
            let decision = limiter.check_and_consume(&u, true).await;
            assert!(decision.allowed);
            assert_eq!(decision.limit, 10);
        }

        let denied = limiter.check_and_consume(&u, true).await;
        assert!(!denied.allowed);
        assert_eq!(denied.limit, 10);
        assert!(denied.reset_at.is_after(&Timestamp::now()));
    }

    #[tokio::test]
    async fn exhausted_quota_does_not_keep_counting_up() {
        let (limiter, store) = limiter_with(2, 50);
        let u = user("anon-2");

        for _ in 0..5 {
            limiter.check_and_consume(&u, true).await;
        }

        // Overshoot increments were returned, so the counter sits at the limit.
        let stored = store.get("rate_limit:anon-2").await.unwrap().unwrap();
        assert_eq!(stored, "2");
    }

    #[tokio::test]
    async fn authenticated_callers_get_the_higher_quota() {
        let (limiter, _) = limiter_with(1, 3);
        let u = user("member");

        for _ in 0..3 {
            assert!(limiter.check_and_consume(&u, false).await.allowed);
        }
        assert!(!limiter.check_and_consume(&u, false).await.allowed);
    }

    #[tokio::test]
    async fn concurrent_consumers_never_exceed_remaining_headroom() {
        let (limiter, _) = limiter_with(10, 50);
        let u = user("racer");

        // Burn 7 of 10, leaving exactly 3 units of headroom.
        for _ in 0..7 {
            limiter.check_and_consume(&u, true).await;
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = limiter.clone();
            let u = u.clone();
            handles.push(tokio::spawn(async move {
                limiter.check_and_consume(&u, true).await.allowed
            }));
        }

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 3);
    }

    #[tokio::test]
    async fn fails_open_when_store_is_down() {
        let (limiter, store) = limiter_with(10, 50);
        store.fail_all(true);

        let decision = limiter.check_and_consume(&user("anon-3"), true).await;
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn usage_is_read_only() {
        let (limiter, _) = limiter_with(10, 50);
        let u = user("reader");

        limiter.check_and_consume(&u, true).await;
        limiter.check_and_consume(&u, true).await;

        let before = limiter.usage(&u, true).await;
        let after = limiter.usage(&u, true).await;
        assert_eq!(before, Usage { usage: 2, limit: 10 });
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn usage_for_unknown_user_is_zero() {
        let (limiter, _) = limiter_with(10, 50);
        let usage = limiter.usage(&user("nobody"), false).await;
        assert_eq!(usage, Usage { usage: 0, limit: 50 });
    }
}
