//! Retry strategy for provisioning API calls.
//!
//! Pure policy object: the client asks it how to treat a response and how long
//! to wait, and it never touches the network itself. Backoff is linear in the
//! attempt number (1-based).

use reqwest::StatusCode;

use crate::prelude::*;

/// How the client should react to an HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
  Success,
  /// Provider overload (503). Retried without error accounting.
  Congested,
  /// Retried after backoff, escalates once attempts run out.
  Transient,
  /// Surfaced to the caller as a typed provider error.
  Fatal,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  pub base_delay: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self { max_attempts: 3, base_delay: Duration::from_secs(2) }
  }
}

impl RetryPolicy {
  pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
    Self { max_attempts: max_attempts.max(1), base_delay }
  }

  pub fn backoff(&self, attempt: u32) -> Duration {
    self.base_delay * attempt.max(1)
  }

  /// Whether another attempt may follow `attempt` (1-based).
  pub fn can_retry(&self, attempt: u32) -> bool {
    attempt < self.max_attempts
  }

  pub fn classify(&self, status: StatusCode) -> Verdict {
    if status.is_success() {
      Verdict::Success
    } else if status == StatusCode::SERVICE_UNAVAILABLE {
      Verdict::Congested
    } else if status.is_server_error()
      || status == StatusCode::REQUEST_TIMEOUT
      || status == StatusCode::TOO_MANY_REQUESTS
    {
      Verdict::Transient
    } else {
      Verdict::Fatal
    }
  }

  /// Delay after a 503: the provider's hint wins over computed backoff.
  pub fn congestion_delay(
    &self,
    attempt: u32,
    retry_after: Option<&str>,
  ) -> Duration {
    retry_after
      .and_then(parse_retry_after)
      .unwrap_or_else(|| self.backoff(attempt))
  }
}

/// Parses the delta-seconds form of `Retry-After`.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
  value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_linear_backoff() {
    let policy = RetryPolicy::new(3, Duration::from_millis(2000));

    assert_eq!(policy.backoff(1), Duration::from_millis(2000));
    assert_eq!(policy.backoff(2), Duration::from_millis(4000));
    assert_eq!(policy.backoff(3), Duration::from_millis(6000));
  }

  #[test]
  fn test_can_retry() {
    let policy = RetryPolicy::default();

    assert!(policy.can_retry(1));
    assert!(policy.can_retry(2));
    assert!(!policy.can_retry(3));
  }

  #[test]
  fn test_classify() {
    let policy = RetryPolicy::default();

    assert_eq!(policy.classify(StatusCode::OK), Verdict::Success);
    assert_eq!(
      policy.classify(StatusCode::SERVICE_UNAVAILABLE),
      Verdict::Congested
    );
    assert_eq!(policy.classify(StatusCode::BAD_GATEWAY), Verdict::Transient);
    assert_eq!(
      policy.classify(StatusCode::TOO_MANY_REQUESTS),
      Verdict::Transient
    );
    assert_eq!(policy.classify(StatusCode::BAD_REQUEST), Verdict::Fatal);
    assert_eq!(policy.classify(StatusCode::UNAUTHORIZED), Verdict::Fatal);
  }

  #[test]
  fn test_congestion_delay_prefers_hint() {
    let policy = RetryPolicy::new(3, Duration::from_secs(2));

    assert_eq!(policy.congestion_delay(1, Some("7")), Duration::from_secs(7));
    assert_eq!(policy.congestion_delay(2, None), Duration::from_secs(4));
    // HTTP-date form falls back to backoff
    assert_eq!(
      policy.congestion_delay(1, Some("Wed, 21 Oct 2015 07:28:00 GMT")),
      Duration::from_secs(2)
    );
  }
}
