//! Circuit breaker guarding the publish path
//!
//! Pure state, no I/O. Callers check [`CircuitBreaker::is_open`] before an
//! attempt and report exactly one of `record_success` / `record_failure`
//! afterwards; [`super::Delivery`] does both.
//!
//! ```text
//!            failures >= threshold
//!   CLOSED ─────────────────────────► OPEN
//!     ▲                                │
//!     │ success                        │ timeout elapsed (next is_open)
//!     │                                ▼
//!     └──────────────────────────── HALF_OPEN ──► OPEN (on failure)
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{info, warn};

const STATE_BITS: u32 = 2;
const STATE_MASK: u64 = (1 << STATE_BITS) - 1;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation, attempts pass through
    Closed,
    /// Publisher failing, attempts short-circuit
    Open,
    /// Timeout elapsed, trial calls allowed
    HalfOpen,
}

impl CircuitState {
    /// Gauge value: 0 closed, 1 open, 2 half-open
    pub fn as_u8(self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::Open => 1,
            CircuitState::HalfOpen => 2,
        }
    }

    fn from_bits(bits: u64) -> Self {
        match bits {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for the circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before allowing a trial call
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// Lock-free circuit breaker
///
/// State and the opening time share one atomic word,
/// `(opened_at_ms << 2) | state`, with `opened_at_ms` measured from the
/// breaker's creation. A reader never pairs OPEN with a stale timestamp.
///
/// Concurrent callers in HALF_OPEN are all let through as trial calls.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    word: AtomicU64,
    consecutive_failures: AtomicU32,
    start: Instant,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            word: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            start: Instant::now(),
        }
    }

    /// Whether attempts should be short-circuited
    ///
    /// An OPEN circuit whose timeout has elapsed moves to HALF_OPEN here,
    /// and the caller that observes it is let through.
    pub fn is_open(&self) -> bool {
        loop {
            let word = self.word.load(Ordering::Acquire);
            match CircuitState::from_bits(word & STATE_MASK) {
                CircuitState::Closed | CircuitState::HalfOpen => return false,
                CircuitState::Open => {
                    let opened_at = word >> STATE_BITS;
                    let elapsed = self.now_ms().saturating_sub(opened_at);
                    if u128::from(elapsed) < self.config.reset_timeout.as_millis() {
                        return true;
                    }

                    let half_open = (opened_at << STATE_BITS) | CircuitState::HalfOpen as u64;
                    if self
                        .word
                        .compare_exchange(word, half_open, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        info!(
                            open_ms = elapsed,
                            "Circuit breaker half-open, allowing trial calls"
                        );
                        crate::metrics::try_set_circuit_state(CircuitState::HalfOpen);
                        return false;
                    }
                    // Lost the race; re-read the new state
                }
            }
        }
    }

    /// Record a successful attempt
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);

        let previous = self
            .word
            .swap(CircuitState::Closed as u64, Ordering::AcqRel);
        let previous = CircuitState::from_bits(previous & STATE_MASK);
        if previous != CircuitState::Closed {
            info!(from = %previous, "Circuit breaker closed");
            crate::metrics::try_set_circuit_state(CircuitState::Closed);
        }
    }

    /// Record a failed attempt
    ///
    /// Opens the circuit once the threshold is reached from CLOSED, and
    /// reopens it with a fresh timestamp on a failed HALF_OPEN trial call.
    pub fn record_failure(&self) {
        let failures = self
            .consecutive_failures
            .fetch_add(1, Ordering::AcqRel)
            .saturating_add(1);

        if failures < self.config.failure_threshold {
            return;
        }

        loop {
            let word = self.word.load(Ordering::Acquire);
            let state = CircuitState::from_bits(word & STATE_MASK);
            if state == CircuitState::Open {
                return;
            }

            let open = (self.now_ms() << STATE_BITS) | CircuitState::Open as u64;
            if self
                .word
                .compare_exchange(word, open, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                warn!(
                    from = %state,
                    consecutive_failures = failures,
                    reset_timeout_secs = self.config.reset_timeout.as_secs(),
                    "Circuit breaker opened"
                );
                crate::metrics::try_set_circuit_state(CircuitState::Open);
                return;
            }
        }
    }

    /// Current state, without triggering the OPEN to HALF_OPEN transition
    pub fn state(&self) -> CircuitState {
        CircuitState::from_bits(self.word.load(Ordering::Acquire) & STATE_MASK)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("state", &self.state())
            .field("consecutive_failures", &self.consecutive_failures())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn breaker(threshold: u32, timeout: Duration) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout: timeout,
        })
    }

    #[test]
    fn test_starts_closed() {
        let cb = breaker(5, Duration::from_secs(60));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(!cb.is_open());
        assert_eq!(cb.consecutive_failures(), 0);
    }

    #[test]
    fn test_opens_at_threshold() {
        let cb = breaker(5, Duration::from_secs(60));

        for _ in 0..4 {
            cb.record_failure();
            assert!(!cb.is_open());
        }
        cb.record_failure();

        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.is_open());
        assert_eq!(cb.consecutive_failures(), 5);
    }

    #[test]
    fn test_success_resets_counter() {
        let cb = breaker(3, Duration::from_secs(60));
        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        cb.record_failure();
        cb.record_failure();

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 2);
    }

    #[test]
    fn test_half_open_after_timeout() {
        let cb = breaker(1, Duration::from_millis(20));
        cb.record_failure();
        assert!(cb.is_open());

        std::thread::sleep(Duration::from_millis(40));

        assert!(!cb.is_open());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        // Concurrent trial calls are not serialized
        assert!(!cb.is_open());
    }

    #[test]
    fn test_success_closes_from_half_open() {
        let cb = breaker(2, Duration::from_millis(10));
        cb.record_failure();
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(20));
        assert!(!cb.is_open());

        cb.record_success();

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
    }

    #[test]
    fn test_success_closes_from_open() {
        let cb = breaker(1, Duration::from_secs(60));
        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);

        cb.record_success();

        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(!cb.is_open());
    }

    #[test]
    fn test_failed_trial_call_reopens() {
        let cb = breaker(2, Duration::from_millis(30));
        cb.record_failure();
        cb.record_failure();
        std::thread::sleep(Duration::from_millis(50));
        assert!(!cb.is_open());

        cb.record_failure();

        assert_eq!(cb.state(), CircuitState::Open);
        // Fresh opening time: still open right after the failed trial call
        assert!(cb.is_open());
    }

    #[test]
    fn test_concurrent_failures_open_once() {
        let cb = Arc::new(breaker(10, Duration::from_secs(60)));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cb = Arc::clone(&cb);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        cb.record_failure();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cb.consecutive_failures(), 100);
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
