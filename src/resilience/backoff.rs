//! Fibonacci backoff with a reset ceiling.
//!
//! Delays grow 0, 1, 1, 2, 3, 5, 8, 13, 21, 34 seconds. Once a counter's delay
//! passes the ceiling the counter drops back to its baseline so a client that
//! has been disconnected for a long time keeps re-probing instead of waiting
//! ever longer.

use std::time::Duration;

/// Fibonacci number `F(n)` in seconds.
///
/// Returns `None` for negative `n`. Large `n` saturates at `u64::MAX`.
pub fn fib_delay(n: i64) -> Option<u64> {
    if n < 0 {
        return None;
    }
    if n == 0 {
        return Some(0);
    }

    let (mut a, mut b) = (0u64, 1u64);
    for _ in 1..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    Some(b)
}

/// Backoff policy for one retry counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FibonacciBackoff {
    /// Counter value the policy resets to.
    pub baseline: u32,
    /// Delay in seconds above which the counter resets.
    pub ceiling_secs: u64,
}

impl FibonacciBackoff {
    pub fn new(baseline: u32, ceiling_secs: u64) -> Self {
        Self {
            baseline,
            ceiling_secs,
        }
    }

    /// Delay in whole seconds for counter `n`.
    pub fn delay_secs(&self, n: u32) -> u64 {
        fib_delay(i64::from(n)).unwrap_or(u64::MAX)
    }

    /// Delay for counter `n`.
    pub fn delay(&self, n: u32) -> Duration {
        Duration::from_secs(self.delay_secs(n))
    }

    /// Whether `delay(n)` has passed the reset ceiling.
    pub fn exceeds_ceiling(&self, n: u32) -> bool {
        self.delay_secs(n) > self.ceiling_secs
    }

    /// Counter value to use after an attempt made with counter `n`.
    pub fn advance(&self, n: u32) -> u32 {
        if self.exceeds_ceiling(n) {
            self.baseline
        } else {
            n.saturating_add(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fib_base_cases() {
        assert_eq!(fib_delay(0), Some(0));
        assert_eq!(fib_delay(1), Some(1));
        assert_eq!(fib_delay(2), Some(1));
        assert_eq!(fib_delay(3), Some(2));
        assert_eq!(fib_delay(10), Some(55));
    }

    #[test]
    fn test_fib_rejects_negative() {
        assert_eq!(fib_delay(-1), None);
        assert_eq!(fib_delay(i64::MIN), None);
    }

    #[test]
    fn test_fib_recurrence() {
        for n in 3..60 {
            let expected = fib_delay(n - 1).unwrap() + fib_delay(n - 2).unwrap();
            assert_eq!(fib_delay(n), Some(expected), "F({n})");
        }
    }

    #[test]
    fn test_fib_saturates() {
        assert_eq!(fib_delay(500), Some(u64::MAX));
    }

    #[test]
    fn test_advance_resets_past_ceiling() {
        let policy = FibonacciBackoff::new(3, 30);

        // F(8) = 21, F(9) = 34
        assert_eq!(policy.advance(8), 9);
        assert!(policy.exceeds_ceiling(9));
        assert_eq!(policy.advance(9), 3);
    }

    #[test]
    fn test_ceiling_is_exclusive() {
        // F(8) = 21 sits exactly on a 21s ceiling and must not reset.
        let policy = FibonacciBackoff::new(0, 21);
        assert!(!policy.exceeds_ceiling(8));
        assert_eq!(policy.advance(8), 9);
    }

    #[test]
    fn test_delay_duration() {
        let policy = FibonacciBackoff::new(3, 30);
        assert_eq!(policy.delay(3), Duration::from_secs(2));
        assert_eq!(policy.delay(7), Duration::from_secs(13));
    }
}
