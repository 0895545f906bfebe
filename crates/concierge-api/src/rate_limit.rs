//! Fixed-window rate limiter middleware.
//!
//! Counts requests per wall-clock second across the whole API and rejects
//! the excess with 429. The window second and its count share one atomic
//! word, so a rollover and a concurrent acquire cannot lose a permit.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Extension, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::error::ApiError;

/// Shared limiter state. Clones share the same window.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    max_per_sec: u32,
    /// Low 32 bits of the window second in the high half, permits taken in
    /// that window in the low half.
    state: Arc<AtomicU64>,
}

impl RateLimiter {
    pub fn new(max_per_sec: u64) -> Self {
        Self {
            max_per_sec: u32::try_from(max_per_sec).unwrap_or(u32::MAX),
            state: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Take a permit in the window for epoch second `now`.
    fn try_acquire_at(&self, now: u64) -> bool {
        let window = now as u32;
        let mut state = self.state.load(Ordering::Acquire);
        loop {
            let taken = if (state >> 32) as u32 == window {
                state as u32
            } else {
                0
            };
            if taken >= self.max_per_sec {
                return false;
            }
            let next = (u64::from(window) << 32) | u64::from(taken + 1);
            match self
                .state
                .compare_exchange_weak(state, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(actual) => state = actual,
            }
        }
    }

    pub fn try_acquire(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.try_acquire_at(now)
    }
}

/// Axum middleware that enforces the rate limit.
pub async fn rate_limit_middleware(
    Extension(limiter): Extension<RateLimiter>,
    req: Request,
    next: Next,
) -> Response {
    if limiter.try_acquire() {
        next.run(req).await
    } else {
        debug!(path = %req.uri().path(), "Rate limit exceeded");
        ApiError::TooManyRequests("Rate limit exceeded".to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_allows_up_to_limit() {
        let limiter = RateLimiter::new(3);
        assert!(limiter.try_acquire_at(100));
        assert!(limiter.try_acquire_at(100));
        assert!(limiter.try_acquire_at(100));
        assert!(!limiter.try_acquire_at(100));
    }

    #[test]
    fn test_new_window_resets_count() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.try_acquire_at(100));
        assert!(!limiter.try_acquire_at(100));
        assert!(limiter.try_acquire_at(101));
    }

    #[test]
    fn test_concurrent_acquires_across_rollover_are_exact() {
        let limiter = RateLimiter::new(50);
        assert!(limiter.try_acquire_at(1));

        let granted: usize = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| {
                    let limiter = limiter.clone();
                    scope.spawn(move || (0..20).filter(|_| limiter.try_acquire_at(2)).count())
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).sum()
        });
        assert_eq!(granted, 50);
        assert!(!limiter.try_acquire_at(2));
    }

    #[test]
    fn test_zero_limit_rejects_everything() {
        let limiter = RateLimiter::new(0);
        assert!(!limiter.try_acquire_at(5));
        assert!(!limiter.try_acquire_at(6));
    }

    #[test]
    fn test_clones_share_window() {
        let limiter = RateLimiter::new(1);
        let other = limiter.clone();
        assert!(limiter.try_acquire_at(7));
        assert!(!other.try_acquire_at(7));
    }
}
