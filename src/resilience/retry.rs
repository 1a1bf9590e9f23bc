//! Transport retry policy.
//!
//! Only one failure signature is retried: the server tearing down a reused multiplexed
//! connection (HTTP/2 GOAWAY, or a reset/close on a pooled connection). Everything else is
//! surfaced to the caller on the first attempt.

use crate::transport::TransportError;
use std::error::Error as StdError;
use std::time::Duration;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Linear backoff step: attempt `n` (1-based) waits `n * base_delay`.
    #[serde(with = "crate::config::duration_secs")]
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    pub fn with_base_delay(mut self, d: Duration) -> Self {
        self.base_delay = d;
        self
    }

    /// Delay before the next attempt, or `None` when the error is not retryable or the
    /// attempts are used up. `attempt` is the 1-based number of the attempt that failed.
    pub fn should_retry(&self, attempt: u32, error: &TransportError) -> Option<Duration> {
        if attempt >= self.max_attempts || !is_stale_connection(error) {
            return None;
        }
        Some(self.base_delay.saturating_mul(attempt))
    }
}

const STALE_CONNECTION_MARKERS: &[&str] = &[
    "goaway",
    "connection reset",
    "connection closed before message completed",
    "broken pipe",
];

/// Whether a transport failure looks like a stale connection being torn down by the server.
pub fn is_stale_connection(error: &TransportError) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(error);
    while let Some(err) = current {
        let msg = err.to_string().to_ascii_lowercase();
        if STALE_CONNECTION_MARKERS.iter().any(|m| msg.contains(m)) {
            return true;
        }
        current = err.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_backoff_for_goaway() {
        let policy = RetryPolicy::new();
        let err = TransportError::Other("http2 error: connection error received: server sent GOAWAY".into());
        assert_eq!(policy.should_retry(1, &err), Some(Duration::from_secs(1)));
        assert_eq!(policy.should_retry(2, &err), Some(Duration::from_secs(2)));
        assert_eq!(policy.should_retry(3, &err), None);
    }

    #[test]
    fn test_other_transport_errors_are_not_retried() {
        let policy = RetryPolicy::new().with_max_attempts(5);
        let err = TransportError::Other("dns error: failed to lookup address".into());
        assert!(!is_stale_connection(&err));
        assert_eq!(policy.should_retry(1, &err), None);
    }

    #[test]
    fn test_reset_connection_is_stale() {
        assert!(is_stale_connection(&TransportError::Other(
            "connection reset by peer".into()
        )));
        assert!(is_stale_connection(&TransportError::Other(
            "connection closed before message completed".into()
        )));
    }

    #[test]
    fn test_policy_clamps_attempts() {
        let policy = RetryPolicy::new().with_max_attempts(0);
        assert_eq!(policy.max_attempts, 1);
    }
}
