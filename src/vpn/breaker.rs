//! Circuit breaker guarding the provisioning API.
//!
//! CLOSED counts outcomes in a rolling window and trips to OPEN once the
//! failure share crosses the threshold. OPEN rejects every call until the
//! reset timeout passes, then a single probe runs in HALF_OPEN: success closes
//! the circuit, failure opens it again.

use std::{collections::VecDeque, future::Future, sync::Mutex, time::Instant};

use serde::Serialize;

use crate::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
  Closed,
  Open,
  HalfOpen,
}

#[derive(Debug, Clone)]
pub struct BreakerSettings {
  pub error_threshold_percent: u32,
  /// Minimum calls in the window before the breaker may trip.
  pub volume_threshold: usize,
  pub reset_timeout: Duration,
  pub rolling_window: Duration,
  pub call_timeout: Duration,
}

impl Default for BreakerSettings {
  fn default() -> Self {
    Self {
      error_threshold_percent: 50,
      volume_threshold: 5,
      reset_timeout: Duration::from_secs(30),
      rolling_window: Duration::from_secs(60),
      call_timeout: Duration::from_secs(15),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Permit {
  Normal,
  Probe,
}

#[derive(Debug)]
struct Inner {
  state: State,
  opened_at: Option<Instant>,
  probe_started: Option<Instant>,
  /// (when, failed)
  window: VecDeque<(Instant, bool)>,
}

#[derive(Debug)]
pub struct CircuitBreaker {
  name: &'static str,
  settings: BreakerSettings,
  inner: Mutex<Inner>,
}

impl CircuitBreaker {
  pub fn new(name: &'static str, settings: BreakerSettings) -> Self {
    Self {
      name,
      settings,
      inner: Mutex::new(Inner {
        state: State::Closed,
        opened_at: None,
        probe_started: None,
        window: VecDeque::new(),
      }),
    }
  }

  pub fn state(&self) -> State {
    self.lock().state
  }

  /// Runs `fut` through the breaker.
  ///
  /// Returns `None` without polling `fut` when the circuit rejects the call.
  /// A call exceeding the call timeout is aborted and counted as a failure.
  pub async fn call<T, F>(&self, fut: F) -> Option<Result<T>>
  where
    F: Future<Output = Result<T>>,
  {
    let permit = self.acquire()?;

    let result = match time::timeout(self.settings.call_timeout, fut).await {
      Ok(result) => result,
      Err(_) => Err(Error::ProvisioningUnavailable(format!(
        "{} call timed out after {:?}",
        self.name, self.settings.call_timeout
      ))),
    };

    self.record(permit, result.is_err());
    Some(result)
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
    // state stays consistent even if a holder panicked
    self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn acquire(&self) -> Option<Permit> {
    let mut inner = self.lock();
    let now = Instant::now();

    match inner.state {
      State::Closed => Some(Permit::Normal),
      State::Open => {
        let cooled = inner
          .opened_at
          .is_none_or(|at| now.duration_since(at) >= self.settings.reset_timeout);
        if !cooled {
          return None;
        }
        warn!("{} circuit breaker HALF-OPEN, probing", self.name);
        inner.state = State::HalfOpen;
        inner.probe_started = Some(now);
        Some(Permit::Probe)
      }
      State::HalfOpen => {
        // a probe that never reported back (dropped future) is replaced
        let stale = inner.probe_started.is_none_or(|at| {
          now.duration_since(at) >= self.settings.call_timeout
        });
        if !stale {
          return None;
        }
        inner.probe_started = Some(now);
        Some(Permit::Probe)
      }
    }
  }

  fn record(&self, permit: Permit, failed: bool) {
    let mut inner = self.lock();
    let now = Instant::now();

    if permit == Permit::Probe {
      inner.probe_started = None;
      if failed {
        error!("{} circuit breaker OPENED (probe failed)", self.name);
        inner.state = State::Open;
        inner.opened_at = Some(now);
      } else {
        info!("{} circuit breaker CLOSED", self.name);
        inner.state = State::Closed;
        inner.opened_at = None;
        inner.window.clear();
      }
      return;
    }

    // outcome of a call admitted before a concurrent transition
    if inner.state != State::Closed {
      return;
    }

    inner.window.push_back((now, failed));
    let horizon = self.settings.rolling_window;
    while let Some(&(at, _)) = inner.window.front() {
      if now.duration_since(at) > horizon {
        inner.window.pop_front();
      } else {
        break;
      }
    }

    let total = inner.window.len();
    let failures = inner.window.iter().filter(|(_, failed)| *failed).count();
    if failed
      && total >= self.settings.volume_threshold
      && failures * 100 >= total * self.settings.error_threshold_percent as usize
    {
      error!(
        failures,
        total, "{} circuit breaker OPENED", self.name
      );
      inner.state = State::Open;
      inner.opened_at = Some(now);
      inner.window.clear();
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicU32, Ordering};

  use super::*;

  fn settings() -> BreakerSettings {
    BreakerSettings {
      error_threshold_percent: 50,
      volume_threshold: 2,
      reset_timeout: Duration::from_millis(40),
      rolling_window: Duration::from_secs(60),
      call_timeout: Duration::from_secs(1),
    }
  }

  async fn fail(breaker: &CircuitBreaker) -> Option<Result<()>> {
    breaker.call(async { Err(Error::ProvisioningUnavailable("boom".into())) }).await
  }

  async fn succeed(breaker: &CircuitBreaker) -> Option<Result<()>> {
    breaker.call(async { Ok(()) }).await
  }

  #[tokio::test]
  async fn test_opens_after_threshold() {
    let breaker = CircuitBreaker::new("test", settings());

    assert!(fail(&breaker).await.is_some());
    assert_eq!(breaker.state(), State::Closed);
    assert!(fail(&breaker).await.is_some());
    assert_eq!(breaker.state(), State::Open);
  }

  #[tokio::test]
  async fn test_open_short_circuits_without_polling() {
    let breaker = CircuitBreaker::new("test", settings());
    fail(&breaker).await;
    fail(&breaker).await;

    let polled = AtomicU32::new(0);
    let result = breaker
      .call(async {
        polled.fetch_add(1, Ordering::SeqCst);
        Ok(())
      })
      .await;

    assert!(result.is_none());
    assert_eq!(polled.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_successes_keep_circuit_closed() {
    let breaker = CircuitBreaker::new("test", settings());

    succeed(&breaker).await;
    succeed(&breaker).await;
    fail(&breaker).await;

    // 1 of 3 failed, under 50%
    assert_eq!(breaker.state(), State::Closed);
  }

  #[tokio::test]
  async fn test_probe_after_cooldown_closes() {
    let breaker = CircuitBreaker::new("test", settings());
    fail(&breaker).await;
    fail(&breaker).await;
    assert!(succeed(&breaker).await.is_none());

    time::sleep(Duration::from_millis(60)).await;

    assert!(matches!(succeed(&breaker).await, Some(Ok(()))));
    assert_eq!(breaker.state(), State::Closed);
  }

  #[tokio::test]
  async fn test_failed_probe_reopens() {
    let breaker = CircuitBreaker::new("test", settings());
    fail(&breaker).await;
    fail(&breaker).await;

    time::sleep(Duration::from_millis(60)).await;

    assert!(fail(&breaker).await.is_some());
    assert_eq!(breaker.state(), State::Open);
    assert!(succeed(&breaker).await.is_none());
  }

  #[tokio::test]
  async fn test_single_probe_in_half_open() {
    let breaker = CircuitBreaker::new("test", settings());
    fail(&breaker).await;
    fail(&breaker).await;
    time::sleep(Duration::from_millis(60)).await;

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let probe = breaker.call(async {
      let _ = rx.await;
      Ok(())
    });
    let second = async {
      // let the probe take the permit first
      tokio::task::yield_now().await;
      let rejected = succeed(&breaker).await.is_none();
      let _ = tx.send(());
      rejected
    };

    let (probe, rejected) = tokio::join!(probe, second);
    assert!(matches!(probe, Some(Ok(()))));
    assert!(rejected);
    assert_eq!(breaker.state(), State::Closed);
  }

  #[tokio::test]
  async fn test_call_timeout_counts_as_failure() {
    let breaker = CircuitBreaker::new(
      "test",
      BreakerSettings {
        volume_threshold: 1,
        call_timeout: Duration::from_millis(10),
        ..settings()
      },
    );

    let result = breaker
      .call(async {
        time::sleep(Duration::from_secs(5)).await;
        Ok(())
      })
      .await;

    assert!(matches!(result, Some(Err(Error::ProvisioningUnavailable(_)))));
    assert_eq!(breaker.state(), State::Open);
  }
}
