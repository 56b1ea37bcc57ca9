use std::collections::HashSet;
use std::time::Duration;

use crate::RequestError;

/// Governs how many times, and with what delay, a failed request is reattempted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Flat delay between attempts.
    FixedDelay { max_attempts: usize, delay_ms: u64 },
    /// Delay doubles with every retry: `base_delay_ms × 2^retry_index`.
    ExponentialBackoff {
        max_attempts: usize,
        base_delay_ms: u64,
    },
    /// Retries only responses whose status is in `retryable_statuses`.
    ConditionalStatus {
        max_attempts: usize,
        retryable_statuses: HashSet<u16>,
        delay_ms: u64,
    },
}

impl RetryPolicy {
    pub fn fixed(max_attempts: usize, delay_ms: u64) -> Self {
        Self::FixedDelay {
            max_attempts,
            delay_ms,
        }
    }

    pub fn exponential(max_attempts: usize, base_delay_ms: u64) -> Self {
        Self::ExponentialBackoff {
            max_attempts,
            base_delay_ms,
        }
    }

    pub fn conditional<I>(max_attempts: usize, retryable_statuses: I, delay_ms: u64) -> Self
    where
        I: IntoIterator<Item = u16>,
    {
        Self::ConditionalStatus {
            max_attempts,
            retryable_statuses: retryable_statuses.into_iter().collect(),
            delay_ms,
        }
    }

    pub fn max_attempts(&self) -> usize {
        match self {
            Self::FixedDelay { max_attempts, .. }
            | Self::ExponentialBackoff { max_attempts, .. }
            | Self::ConditionalStatus { max_attempts, .. } => *max_attempts,
        }
    }

    pub(crate) fn validate(&self) -> Result<(), RequestError> {
        if self.max_attempts() == 0 {
            return Err(RequestError::InvalidRequest(
                "retry policy must allow at least one attempt".to_owned(),
            ));
        }
        Ok(())
    }

    /// Wait before attempt `attempt` (0-indexed; attempt 0 never waits).
    pub fn delay_before(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let delay_ms = match self {
            Self::FixedDelay { delay_ms, .. } | Self::ConditionalStatus { delay_ms, .. } => {
                *delay_ms
            }
            Self::ExponentialBackoff { base_delay_ms, .. } => {
                let exp = (attempt - 1).min(32) as u32;
                base_delay_ms.saturating_mul(1u64 << exp)
            }
        };
        Duration::from_millis(delay_ms)
    }

    /// Whether `err` from a failed attempt may be retried under this policy.
    ///
    /// Cancellation, malformed requests and non-transient transport faults
    /// are never retried.
    pub fn should_retry(&self, err: &RequestError) -> bool {
        match err {
            RequestError::Canceled | RequestError::InvalidRequest(_) => false,
            RequestError::Network(err) if !err.is_transient() => false,
            _ => match self {
                Self::FixedDelay { .. } | Self::ExponentialBackoff { .. } => true,
                Self::ConditionalStatus {
                    retryable_statuses,
                    ..
                } => matches!(
                    err,
                    RequestError::HttpStatus { status, .. } if retryable_statuses.contains(status)
                ),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::RetryPolicy;
    use crate::{RequestError, TransportError, TransportErrorKind};

    fn http(status: u16) -> RequestError {
        RequestError::HttpStatus {
            status,
            body: String::new(),
        }
    }

    #[test]
    fn fixed_delay_is_flat() {
        let policy = RetryPolicy::fixed(4, 25);
        assert_eq!(policy.delay_before(0), Duration::ZERO);
        assert_eq!(policy.delay_before(1), Duration::from_millis(25));
        assert_eq!(policy.delay_before(3), Duration::from_millis(25));
    }

    #[test]
    fn exponential_delay_doubles() {
        let policy = RetryPolicy::exponential(5, 100);
        assert_eq!(policy.delay_before(1), Duration::from_millis(100));
        assert_eq!(policy.delay_before(2), Duration::from_millis(200));
        assert_eq!(policy.delay_before(4), Duration::from_millis(800));
    }

    #[test]
    fn exponential_delay_saturates() {
        let policy = RetryPolicy::exponential(usize::MAX, u64::MAX / 2);
        assert_eq!(policy.delay_before(200), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn conditional_retries_only_listed_statuses() {
        let policy = RetryPolicy::conditional(3, [502, 503], 10);
        assert!(policy.should_retry(&http(503)));
        assert!(!policy.should_retry(&http(404)));
        assert!(!policy.should_retry(&RequestError::Network(TransportError::connect(
            "refused"
        ))));
        assert!(!policy.should_retry(&RequestError::Timeout { timeout_ms: 5 }));
    }

    #[test]
    fn fixed_retries_network_but_never_cancellation() {
        let policy = RetryPolicy::fixed(3, 0);
        assert!(policy.should_retry(&RequestError::Network(TransportError::connect(
            "reset"
        ))));
        assert!(policy.should_retry(&http(404)));
        assert!(!policy.should_retry(&RequestError::Canceled));
    }

    #[test]
    fn non_transient_transport_faults_are_terminal() {
        let malformed = RequestError::Network(TransportError::new(
            TransportErrorKind::Malformed,
            "builder error",
        ));
        let other = RequestError::Network(TransportError::new(TransportErrorKind::Other, "redirect loop"));
        for policy in [RetryPolicy::fixed(3, 1), RetryPolicy::exponential(3, 1)] {
            assert!(!policy.should_retry(&malformed));
            assert!(!policy.should_retry(&other));
        }
    }

    #[test]
    fn zero_attempts_rejected() {
        assert!(RetryPolicy::fixed(0, 10).validate().is_err());
        assert!(RetryPolicy::exponential(1, 10).validate().is_ok());
    }
}
