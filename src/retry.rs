//! Retry policy (C5): a pure function of `(attempts, max_attempts,
//! error_kind)`. This module is the only place the backoff constants live.

use std::time::Duration;

use crate::errors::ErrorKind;

/// `base` in `delay = min(cap, base * 2^(attempts-1)) * rand(0.5, 1.5)`.
const BASE_DELAY: Duration = Duration::from_secs(30);
/// `cap` in the same formula.
const CAP_DELAY: Duration = Duration::from_secs(3600);

/// The retry policy's verdict for one failure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryDecision {
    pub retryable: bool,
    pub delay: Option<Duration>,
}

impl RetryDecision {
    fn terminal() -> Self {
        Self {
            retryable: false,
            delay: None,
        }
    }
}

/// Decides whether a queue item should be retried after its
/// `attempts`-th failure of kind `error_kind`, given `max_attempts`.
///
/// `attempts` is the count *after* this failure is recorded: the caller
/// increments `attempts` before consulting this function.
pub fn decide(attempts: i64, max_attempts: i64, error_kind: ErrorKind) -> RetryDecision {
    match error_kind {
        ErrorKind::Cancelled => RetryDecision::terminal(),
        ErrorKind::NotFound | ErrorKind::PrivateOrForbidden | ErrorKind::Format => {
            RetryDecision::terminal()
        }
        ErrorKind::Network | ErrorKind::Unknown => {
            if attempts >= max_attempts {
                RetryDecision::terminal()
            } else {
                RetryDecision {
                    retryable: true,
                    delay: Some(backoff_delay(attempts)),
                }
            }
        }
        // Conflict/Validation/Fatal never originate from an external client
        // call and never reach the retry policy in practice; treat them as
        // terminal.
        ErrorKind::Conflict | ErrorKind::Validation | ErrorKind::Fatal => RetryDecision::terminal(),
    }
}

fn backoff_delay(attempts: i64) -> Duration {
    let exponent = (attempts - 1).max(0);
    let unjittered = BASE_DELAY.saturating_mul(1u32.checked_shl(exponent as u32).unwrap_or(u32::MAX));
    let capped = unjittered.min(CAP_DELAY);
    let jitter = 0.5 + fastrand::f64();
    capped.mul_f64(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_never_retried() {
        let d = decide(1, 5, ErrorKind::Cancelled);
        assert!(!d.retryable);
        assert!(d.delay.is_none());
    }

    #[test]
    fn not_found_private_format_are_terminal() {
        for kind in [
            ErrorKind::NotFound,
            ErrorKind::PrivateOrForbidden,
            ErrorKind::Format,
        ] {
            assert!(!decide(1, 5, kind).retryable);
        }
    }

    #[test]
    fn network_retries_until_max_attempts() {
        for attempts in 1..5 {
            let d = decide(attempts, 5, ErrorKind::Network);
            assert!(d.retryable, "attempt {attempts} should be retryable");
            let delay = d.delay.unwrap();
            assert!(delay >= Duration::from_secs(15) || attempts > 1);
        }
        let terminal = decide(5, 5, ErrorKind::Network);
        assert!(!terminal.retryable);
    }

    #[test]
    fn delay_is_exponential_with_jitter_bounds() {
        // attempts=1 -> base * 2^0 = 30s, jitter in [0.5, 1.5) -> [15s, 45s)
        for _ in 0..50 {
            let d = decide(1, 10, ErrorKind::Network).delay.unwrap();
            assert!(d >= Duration::from_secs(15) && d < Duration::from_secs(45));
        }
    }

    #[test]
    fn delay_is_capped() {
        // attempts=10 -> base * 2^9 = 15360s, capped to 3600s before jitter
        let d = decide(10, 20, ErrorKind::Network).delay.unwrap();
        assert!(d <= Duration::from_secs_f64(3600.0 * 1.5));
    }

    #[test]
    fn unknown_behaves_like_network() {
        let d = decide(2, 5, ErrorKind::Unknown);
        assert!(d.retryable);
        assert!(d.delay.is_some());
    }
}
