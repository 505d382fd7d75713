use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Sliding-window attempt limiter keyed by an arbitrary string
/// (e.g. `login_<ip>`).
///
/// Each key tracks the timestamps of its recent attempts; timestamps older
/// than the window are pruned before counting. Attempts per key are bounded
/// by the configured maximum, so the per-check cost stays constant-factor.
///
/// Concurrent checks for the same key from the same session can race and lose
/// an increment; that is an accepted relaxation for best-effort throttling.
pub struct RateLimiter {
    attempts: DashMap<String, Vec<Instant>>,
    max_keys: usize,
}

impl RateLimiter {
    pub fn new(max_keys: usize) -> Self {
        Self {
            attempts: DashMap::new(),
            max_keys,
        }
    }

    /// Check whether `key` has exceeded `max_attempts` within `window`.
    ///
    /// Returns true (limited) without recording a new attempt when the limit
    /// is already reached; otherwise records the current attempt and returns
    /// false.
    pub fn is_limited(&self, key: &str, max_attempts: u32, window: Duration) -> bool {
        self.check(key, max_attempts, window, Instant::now())
    }

    fn check(&self, key: &str, max_attempts: u32, window: Duration, now: Instant) -> bool {
        // Capacity check to prevent memory exhaustion from key churn
        if !self.attempts.contains_key(key) && self.attempts.len() >= self.max_keys {
            self.cleanup_stale(window);
            if self.attempts.len() >= self.max_keys {
                warn!(
                    tracked_keys = self.attempts.len(),
                    "rate limiter at capacity, limiting unknown key"
                );
                // Fail closed: treat an untrackable key as limited
                return true;
            }
        }

        let mut attempts = self.attempts.entry(key.to_string()).or_default();
        attempts.retain(|t| now.duration_since(*t) < window);

        if attempts.len() >= max_attempts as usize {
            return true;
        }

        attempts.push(now);
        false
    }

    /// Clear the attempt list for a key (after a successful auth).
    pub fn reset(&self, key: &str) {
        if self.attempts.remove(key).is_some() {
            debug!(key = %key, "rate limit reset");
        }
    }

    /// Remove keys whose every attempt has aged out of `max_age`.
    /// Called opportunistically and by the capacity check above.
    pub fn cleanup_stale(&self, max_age: Duration) {
        let now = Instant::now();
        let before = self.attempts.len();
        self.attempts.retain(|_, attempts| {
            attempts.retain(|t| now.duration_since(*t) < max_age);
            !attempts.is_empty()
        });
        let removed = before.saturating_sub(self.attempts.len());
        if removed > 0 {
            debug!(removed, remaining = self.attempts.len(), "rate limiter stale cleanup");
        }
    }

    /// Current number of tracked keys.
    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    /// Whether no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(100_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_attempts_pass_then_limit() {
        let limiter = RateLimiter::default();
        let window = Duration::from_secs(900);
        for i in 0..5 {
            assert!(
                !limiter.is_limited("login_1.2.3.4", 5, window),
                "attempt {} should pass",
                i + 1
            );
        }
        assert!(limiter.is_limited("login_1.2.3.4", 5, window));
        // Still limited; the limited check must not have recorded an attempt
        assert!(limiter.is_limited("login_1.2.3.4", 5, window));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::default();
        let window = Duration::from_secs(900);
        for _ in 0..5 {
            assert!(!limiter.is_limited("login_1.2.3.4", 5, window));
        }
        assert!(limiter.is_limited("login_1.2.3.4", 5, window));
        assert!(!limiter.is_limited("login_5.6.7.8", 5, window));
    }

    #[test]
    fn test_reset_clears_key() {
        let limiter = RateLimiter::default();
        let window = Duration::from_secs(900);
        for _ in 0..5 {
            limiter.is_limited("k", 5, window);
        }
        assert!(limiter.is_limited("k", 5, window));
        limiter.reset("k");
        assert!(!limiter.is_limited("k", 5, window));
    }

    #[test]
    fn test_window_expiry_forgets_old_attempts() {
        let limiter = RateLimiter::default();
        let now = Instant::now();
        let window = Duration::from_millis(100);
        for _ in 0..3 {
            assert!(!limiter.check("k", 3, window, now));
        }
        assert!(limiter.check("k", 3, window, now));
        // Re-evaluate after the window has fully elapsed
        let later = now + Duration::from_millis(150);
        assert!(!limiter.check("k", 3, window, later));
    }

    #[test]
    fn test_partial_window_expiry() {
        let limiter = RateLimiter::default();
        let now = Instant::now();
        let window = Duration::from_secs(10);
        // Two old attempts, one recent
        assert!(!limiter.check("k", 3, window, now));
        assert!(!limiter.check("k", 3, window, now + Duration::from_secs(1)));
        assert!(!limiter.check("k", 3, window, now + Duration::from_secs(9)));
        // All three still inside the window at t=9
        assert!(limiter.check("k", 3, window, now + Duration::from_secs(9)));
        // At t=11 the first attempt has aged out, freeing one slot
        assert!(!limiter.check("k", 3, window, now + Duration::from_secs(11)));
    }

    #[test]
    fn test_capacity_fails_closed_for_new_keys() {
        let limiter = RateLimiter::new(2);
        let window = Duration::from_secs(900);
        assert!(!limiter.is_limited("a", 5, window));
        assert!(!limiter.is_limited("b", 5, window));
        // Third distinct key cannot be tracked and is treated as limited
        assert!(limiter.is_limited("c", 5, window));
        // Existing keys keep working
        assert!(!limiter.is_limited("a", 5, window));
    }

    #[test]
    fn test_cleanup_stale_removes_empty_keys() {
        let limiter = RateLimiter::default();
        limiter.is_limited("k", 5, Duration::from_millis(10));
        assert_eq!(limiter.len(), 1);
        std::thread::sleep(Duration::from_millis(30));
        limiter.cleanup_stale(Duration::from_millis(10));
        assert!(limiter.is_empty());
    }
}
