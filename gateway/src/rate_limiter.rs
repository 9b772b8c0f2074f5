//! Fixed-window admission control for accounting requests
//!
//! Bounds accepted packets per one-second window. Lock-free, O(1) per check.
//!
//! The window is fixed, not continuously sliding: a burst straddling a
//! window boundary can briefly reach twice the configured rate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Window length in milliseconds
pub const WINDOW_MS: u64 = 1000;

const COUNT_BITS: u32 = 24;
const COUNT_MASK: u64 = (1 << COUNT_BITS) - 1;

/// Largest enforceable limit
///
/// The window count saturates at `2^24 - 1`, one above this limit, so a
/// saturated window always reads as over the limit.
pub const MAX_TPS: u32 = (COUNT_MASK - 1) as u32;

/// What to do with a request over the limit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RateLimitPolicy {
    /// Drop the request, the NAS retransmits
    #[default]
    Reject,
    /// Process the request anyway, only count it as excess
    AdmitAndCount,
}

impl std::str::FromStr for RateLimitPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reject" | "drop" => Ok(RateLimitPolicy::Reject),
            "admit" | "admit_and_count" => Ok(RateLimitPolicy::AdmitAndCount),
            other => Err(format!("unknown rate limit policy '{other}'")),
        }
    }
}

/// Result of one admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Within the limit
    Admitted,
    /// Over the limit but let through by [`RateLimitPolicy::AdmitAndCount`]
    Exceeded,
    /// Over the limit and dropped
    Rejected,
}

impl Admission {
    /// Whether the request should be processed
    pub fn is_admitted(self) -> bool {
        !matches!(self, Admission::Rejected)
    }
}

/// Fixed one-second window rate limiter
///
/// Window start (ms since creation) and request count share one atomic
/// word, so a reset and the first admission of the new window are a
/// single CAS. The count saturates at 2^24 - 1.
pub struct RateLimiter {
    max_per_window: u64,
    policy: RateLimitPolicy,
    /// `(window_start_ms << 24) | count`
    window: AtomicU64,
    admitted: AtomicU64,
    rejected: AtomicU64,
    start: Instant,
}

impl RateLimiter {
    /// Create a limiter admitting `max_tps` requests per second
    ///
    /// A limit of 0 admits nothing under [`RateLimitPolicy::Reject`].
    /// Limits above [`MAX_TPS`] are clamped to it.
    pub fn new(max_tps: u32, policy: RateLimitPolicy) -> Self {
        Self {
            max_per_window: u64::from(max_tps.min(MAX_TPS)),
            policy,
            window: AtomicU64::new(0),
            admitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            start: Instant::now(),
        }
    }

    /// Check one request against the current window
    pub fn check(&self) -> Admission {
        let within = self.try_acquire_at(self.now_ms());

        let admission = match (within, self.policy) {
            (true, _) => Admission::Admitted,
            (false, RateLimitPolicy::AdmitAndCount) => Admission::Exceeded,
            (false, RateLimitPolicy::Reject) => Admission::Rejected,
        };

        if within {
            self.admitted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
        admission
    }

    /// Count the request in the window containing `now_ms`
    ///
    /// Returns true if the post-increment count is within the limit.
    fn try_acquire_at(&self, now_ms: u64) -> bool {
        loop {
            let current = self.window.load(Ordering::Acquire);
            let window_start = current >> COUNT_BITS;
            let count = current & COUNT_MASK;

            let (next_start, next_count) = if now_ms.saturating_sub(window_start) > WINDOW_MS {
                (now_ms, 1)
            } else {
                (window_start, (count + 1).min(COUNT_MASK))
            };

            let next = (next_start << COUNT_BITS) | next_count;
            if self
                .window
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return next_count <= self.max_per_window;
            }
        }
    }

    fn now_ms(&self) -> u64 {
        // The epoch is 0 so the very first check always opens a window.
        WINDOW_MS + 1 + self.start.elapsed().as_millis() as u64
    }

    /// Configured requests per window
    pub fn max_tps(&self) -> u64 {
        self.max_per_window
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    /// Requests counted within the limit
    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    /// Requests counted over the limit, whether dropped or let through
    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Requests counted in the current window
    pub fn current_count(&self) -> u64 {
        self.window.load(Ordering::Acquire) & COUNT_MASK
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("max_tps", &self.max_per_window)
            .field("policy", &self.policy)
            .field("admitted", &self.admitted())
            .field("rejected", &self.rejected())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_admits_up_to_limit() {
        let limiter = RateLimiter::new(500, RateLimitPolicy::Reject);

        let admitted = (0..600)
            .filter(|_| limiter.try_acquire_at(10_000))
            .count();

        assert_eq!(admitted, 500);
        assert_eq!(600 - admitted, 100);
        assert_eq!(limiter.current_count(), 600);
    }

    #[test]
    fn test_check_counts_every_request() {
        let limiter = RateLimiter::new(500, RateLimitPolicy::Reject);

        let admitted = (0..600)
            .filter(|_| limiter.check().is_admitted())
            .count();

        // A window boundary inside the loop could allow a second window.
        assert!(admitted >= 500, "admitted {admitted}");
        assert_eq!(limiter.admitted() + limiter.rejected(), 600);
        assert_eq!(limiter.admitted() as usize, admitted);
    }

    #[test]
    fn test_limit_above_max_is_clamped() {
        let limiter = RateLimiter::new(u32::MAX, RateLimitPolicy::Reject);
        assert_eq!(limiter.max_tps(), u64::from(MAX_TPS));
    }

    #[test]
    fn test_saturated_window_rejects_at_max_limit() {
        let limiter = RateLimiter::new(MAX_TPS, RateLimitPolicy::Reject);
        let start = 10_000u64;
        limiter.try_acquire_at(start);
        // Jump the window to one below the limit
        limiter.window.store(
            (start << COUNT_BITS) | (u64::from(MAX_TPS) - 1),
            Ordering::Release,
        );

        assert!(limiter.try_acquire_at(start));
        assert!(!limiter.try_acquire_at(start));
        assert_eq!(limiter.current_count(), COUNT_MASK);
        // Saturated: stays over the limit instead of wrapping
        assert!(!limiter.try_acquire_at(start + 500));
        assert_eq!(limiter.current_count(), COUNT_MASK);
    }

    #[test]
    fn test_window_resets_after_one_second() {
        let limiter = RateLimiter::new(2, RateLimitPolicy::Reject);

        assert!(limiter.try_acquire_at(5_000));
        assert!(limiter.try_acquire_at(5_100));
        assert!(!limiter.try_acquire_at(5_900));
        // Exactly one window later is still the same window
        assert!(!limiter.try_acquire_at(6_000));
        assert!(limiter.try_acquire_at(6_001));
        assert_eq!(limiter.current_count(), 1);
    }

    #[test]
    fn test_zero_limit_rejects_everything() {
        let limiter = RateLimiter::new(0, RateLimitPolicy::Reject);
        for _ in 0..10 {
            assert_eq!(limiter.check(), Admission::Rejected);
        }
        assert_eq!(limiter.admitted(), 0);
        assert_eq!(limiter.rejected(), 10);
    }

    #[test]
    fn test_admit_and_count_policy() {
        let limiter = RateLimiter::new(1, RateLimitPolicy::AdmitAndCount);

        let first = limiter.check();
        let second = limiter.check();

        assert_eq!(first, Admission::Admitted);
        assert!(matches!(second, Admission::Exceeded | Admission::Admitted));
        assert!(second.is_admitted());
    }

    #[test]
    fn test_concurrent_checks_never_over_admit() {
        let limiter = Arc::new(RateLimiter::new(1_000, RateLimitPolicy::Reject));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || {
                    (0..500)
                        .filter(|_| limiter.try_acquire_at(10_000))
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(admitted, 1_000);
        assert_eq!(limiter.current_count(), 4_000);
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!("reject".parse::<RateLimitPolicy>().unwrap(), RateLimitPolicy::Reject);
        assert_eq!(
            "ADMIT".parse::<RateLimitPolicy>().unwrap(),
            RateLimitPolicy::AdmitAndCount
        );
        assert!("maybe".parse::<RateLimitPolicy>().is_err());
    }
}
