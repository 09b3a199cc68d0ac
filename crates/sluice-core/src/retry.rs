//! Retry policy: explicit attempt-count state and backoff decisions.

use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::TransferError;

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry this error.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Exponential backoff policy with caps, plus a floor for provider
/// rate-limit waits.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts per part (including the first).
    pub max_attempts: u32,
    /// Base delay for backoff.
    pub base_delay: Duration,
    /// Upper bound on backoff delay.
    pub max_delay: Duration,
    /// Minimum wait on a rate-limit signal; provider hints below this are rounded up.
    pub rate_limit_floor: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            rate_limit_floor: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            base_delay: Duration::from_secs_f64(cfg.base_delay_secs.max(0.0)),
            max_delay: Duration::from_secs(cfg.max_delay_secs),
            rate_limit_floor: Duration::from_secs(cfg.rate_limit_floor_secs),
        }
    }

    /// Compute the retry decision for a given attempt and error.
    ///
    /// `attempt` is 1-based (1 = first attempt). Rate-limit signals always
    /// yield a wait (they carry the provider's own pacing, not a failure of
    /// ours) and callers are expected not to count them against `attempt`.
    pub fn decide(&self, attempt: u32, err: &TransferError) -> RetryDecision {
        match err {
            TransferError::RateLimited { retry_after } => {
                RetryDecision::RetryAfter(self.rate_limit_delay(*retry_after))
            }
            TransferError::Fatal(_) | TransferError::Cancelled => RetryDecision::NoRetry,
            TransferError::Transient(_) | TransferError::Corrupt(_) => {
                if attempt >= self.max_attempts {
                    return RetryDecision::NoRetry;
                }
                // Exponential backoff: base * 2^(attempt-1), capped.
                let exp = 1u32.saturating_mul(1 << attempt.saturating_sub(1).min(8));
                let raw = self.base_delay.saturating_mul(exp);
                RetryDecision::RetryAfter(raw.min(self.max_delay))
            }
        }
    }

    /// Wait duration after a rate-limit signal: the provider hint when
    /// present, bounded below by the configured floor.
    pub fn rate_limit_delay(&self, hint: Option<Duration>) -> Duration {
        hint.unwrap_or(self.rate_limit_floor).max(self.rate_limit_floor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_retry_for_fatal_or_cancelled() {
        let p = RetryPolicy::default();
        assert_eq!(
            p.decide(1, &TransferError::fatal("403")),
            RetryDecision::NoRetry
        );
        assert_eq!(p.decide(1, &TransferError::Cancelled), RetryDecision::NoRetry);
    }

    #[test]
    fn exponential_backoff_grows_and_is_capped() {
        let mut p = RetryPolicy::default();
        // Allow many attempts so we can observe capping behaviour.
        p.max_attempts = 20;
        let err = TransferError::transient("reset");
        let d1 = match p.decide(1, &err) {
            RetryDecision::RetryAfter(d) => d,
            _ => panic!("expected retry"),
        };
        let d2 = match p.decide(2, &err) {
            RetryDecision::RetryAfter(d) => d,
            _ => panic!("expected retry"),
        };
        assert!(d2 >= d1);

        let d_last = match p.decide(10, &err) {
            RetryDecision::RetryAfter(d) => d,
            _ => panic!("expected retry"),
        };
        assert!(d_last <= p.max_delay);
    }

    #[test]
    fn respects_max_attempts() {
        let mut p = RetryPolicy::default();
        p.max_attempts = 3;
        let err = TransferError::transient("timeout");
        assert!(matches!(p.decide(1, &err), RetryDecision::RetryAfter(_)));
        assert!(matches!(p.decide(2, &err), RetryDecision::RetryAfter(_)));
        assert_eq!(p.decide(3, &err), RetryDecision::NoRetry);
    }

    #[test]
    fn rate_limit_uses_hint_with_floor() {
        let p = RetryPolicy::default();
        // Hint above the floor wins.
        assert_eq!(
            p.decide(
                1,
                &TransferError::RateLimited {
                    retry_after: Some(Duration::from_secs(40))
                }
            ),
            RetryDecision::RetryAfter(Duration::from_secs(40))
        );
        // Hint below the floor is rounded up.
        assert_eq!(
            p.decide(
                1,
                &TransferError::RateLimited {
                    retry_after: Some(Duration::from_secs(1))
                }
            ),
            RetryDecision::RetryAfter(p.rate_limit_floor)
        );
        // Missing hint falls back to the floor, even past max_attempts.
        assert_eq!(
            p.decide(99, &TransferError::RateLimited { retry_after: None }),
            RetryDecision::RetryAfter(p.rate_limit_floor)
        );
    }

    #[test]
    fn corrupt_is_retried_like_transient() {
        let p = RetryPolicy::default();
        assert!(matches!(
            p.decide(1, &TransferError::Corrupt("length mismatch".into())),
            RetryDecision::RetryAfter(_)
        ));
    }
}
