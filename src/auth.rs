//! Per-caller request limiting for the proxy boundary.
//!
//! Callers are keyed by the peer IP address of the connection. Client
//! headers such as `x-user-id` only attribute usage entries and never
//! pick the limiter key. This bounds how fast one client can burn
//! upstream quota; it is not authentication.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

struct Windows {
    /// Caller → request timestamps inside the current window.
    callers: HashMap<String, Vec<Instant>>,
    last_prune: Instant,
}

/// Sliding-window rate limiter per caller identity.
pub struct RateLimiter {
    windows: Mutex<Windows>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window_secs: u64) -> Self {
        Self {
            windows: Mutex::new(Windows {
                callers: HashMap::new(),
                last_prune: Instant::now(),
            }),
            max_requests: max_requests.max(1),
            window: Duration::from_secs(window_secs),
        }
    }

    /// `Ok(())` if the caller may proceed, `Err(secs)` with the time until
    /// the oldest request in the window expires.
    ///
    /// Idle callers are swept at most once per window, so the map stays
    /// bounded by the callers seen in the last two windows.
    pub fn check(&self, caller: &str) -> Result<(), u64> {
        // A poisoned map only loses bookkeeping; keep serving.
        let mut windows = self.windows.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();
        let window = self.window;

        if now.duration_since(windows.last_prune) >= window {
            let before = windows.callers.len();
            windows
                .callers
                .retain(|_, ts| ts.iter().any(|t| now.duration_since(*t) < window));
            windows.last_prune = now;
            let pruned = before - windows.callers.len();
            if pruned > 0 {
                debug!(pruned, "Pruned idle rate-limit windows");
            }
        }

        let timestamps = windows.callers.entry(caller.to_string()).or_default();
        timestamps.retain(|t| now.duration_since(*t) < window);

        if timestamps.len() >= self.max_requests {
            let remaining = timestamps
                .first()
                .map(|oldest| window.saturating_sub(now.duration_since(*oldest)).as_secs().max(1))
                .unwrap_or(1);
            return Err(remaining);
        }

        timestamps.push(now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracked(limiter: &RateLimiter) -> usize {
        limiter.windows.lock().unwrap().callers.len()
    }

    #[test]
    fn test_rate_limiter_allows_within_limit() {
        let limiter = RateLimiter::new(3, 60);
        assert!(limiter.check("10.0.0.1").is_ok());
        assert!(limiter.check("10.0.0.1").is_ok());
        assert!(limiter.check("10.0.0.1").is_ok());
    }

    #[test]
    fn test_rate_limiter_blocks_over_limit() {
        let limiter = RateLimiter::new(2, 60);
        assert!(limiter.check("10.0.0.1").is_ok());
        assert!(limiter.check("10.0.0.1").is_ok());
        let retry = limiter.check("10.0.0.1").unwrap_err();
        assert!((1..=60).contains(&retry));
    }

    #[test]
    fn test_rate_limiter_per_caller() {
        let limiter = RateLimiter::new(1, 60);
        assert!(limiter.check("10.0.0.1").is_ok());
        assert!(limiter.check("10.0.0.1").is_err());
        assert!(limiter.check("10.0.0.2").is_ok());
    }

    #[test]
    fn test_idle_callers_are_swept_by_check() {
        // Zero-length window: every call sweeps, and nothing stays in-window.
        let limiter = RateLimiter::new(1, 0);
        for i in 0..50 {
            assert!(limiter.check(&format!("10.0.0.{}", i)).is_ok());
        }
        assert_eq!(tracked(&limiter), 1);
    }

    #[test]
    fn test_sweep_waits_for_a_full_window() {
        let limiter = RateLimiter::new(5, 60);
        for i in 0..10 {
            assert!(limiter.check(&format!("10.0.0.{}", i)).is_ok());
        }
        assert_eq!(tracked(&limiter), 10);
    }
}
