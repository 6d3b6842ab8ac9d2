//! Circuit breaker wrapping every outbound exchange REST call (spec §5
//! "bounded retries and timeouts"). `BinanceConnector`/`BitgetConnector` each
//! own one instance keyed by connector name, so a run of failed calls to one
//! exchange trips independently of the other.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass straight through to the exchange.
    Closed,
    /// Failure threshold breached; calls are rejected without reaching the exchange.
    Open,
    /// Timeout elapsed since opening; a limited number of calls are allowed through to probe recovery.
    HalfOpen,
}

/// Trips open after `failure_threshold` consecutive failed exchange calls,
/// stays open for `timeout`, then allows calls through one at a time until
/// `success_threshold` consecutive successes close it again.
pub struct CircuitBreaker {
    state: Arc<RwLock<CircuitBreakerState>>,
    failure_threshold: usize,
    success_threshold: usize,
    timeout: Duration,
    name: String,
}

struct CircuitBreakerState {
    state: CircuitState,
    failure_count: usize,
    success_count: usize,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, failure_threshold: usize, success_threshold: usize, timeout: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(CircuitBreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                opened_at: None,
            })),
            failure_threshold,
            success_threshold,
            timeout,
            name: name.into(),
        }
    }

    /// Runs `f` (a signed REST call against an exchange) if the breaker
    /// permits it, recording the outcome either way.
    pub async fn call<F, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: std::future::Future<Output = Result<T, E>>,
    {
        {
            let mut state = self.state.write().await;
            if state.state == CircuitState::Open {
                let opened_at = state.opened_at.expect("Open state always carries opened_at");
                if opened_at.elapsed() > self.timeout {
                    info!(breaker = %self.name, "circuit breaker timeout elapsed, probing exchange");
                    state.state = CircuitState::HalfOpen;
                    state.success_count = 0;
                } else {
                    let retry_in = self.timeout - opened_at.elapsed();
                    return Err(CircuitBreakerError::Open {
                        connector: self.name.clone(),
                        retry_in,
                    });
                }
            }
        }

        match f.await {
            Ok(result) => {
                self.on_success().await;
                Ok(result)
            }
            Err(e) => {
                self.on_failure().await;
                Err(CircuitBreakerError::Inner(e))
            }
        }
    }

    async fn on_success(&self) {
        let mut state = self.state.write().await;
        match state.state {
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.success_threshold {
                    info!(breaker = %self.name, successes = state.success_count, "exchange recovered, circuit breaker closing");
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                    state.opened_at = None;
                }
            }
            CircuitState::Closed => {
                state.failure_count = 0;
            }
            CircuitState::Open => {
                warn!(breaker = %self.name, "success recorded while circuit breaker was open");
            }
        }
    }

    async fn on_failure(&self) {
        let mut state = self.state.write().await;
        state.failure_count += 1;

        match state.state {
            CircuitState::Closed => {
                if state.failure_count >= self.failure_threshold {
                    error!(breaker = %self.name, failures = state.failure_count, "exchange call failures crossed threshold, opening circuit breaker");
                    state.state = CircuitState::Open;
                    state.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                warn!(breaker = %self.name, "exchange call failed during recovery probe, reopening circuit breaker");
                state.state = CircuitState::Open;
                state.opened_at = Some(Instant::now());
                state.success_count = 0;
            }
            CircuitState::Open => {
                state.opened_at = Some(Instant::now());
            }
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.state.read().await.state
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("circuit breaker for {connector} is open, retry in {retry_in:?}")]
    Open { connector: String, retry_in: Duration },

    #[error(transparent)]
    Inner(E),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_after_consecutive_exchange_failures() {
        let cb = CircuitBreaker::new("binance-rest", 3, 2, Duration::from_secs(1));

        for _ in 0..3 {
            let result = cb.call(async { Err::<(), &str>("exchange unreachable") }).await;
            assert!(result.is_err());
        }

        assert_eq!(cb.state().await, CircuitState::Open);

        let result = cb.call(async { Ok::<(), &str>(()) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::Open { .. })));
    }

    #[tokio::test]
    async fn recovers_after_timeout_and_probe_successes() {
        let cb = CircuitBreaker::new("bitget-rest", 2, 2, Duration::from_millis(100));

        for _ in 0..2 {
            let _ = cb.call(async { Err::<(), &str>("exchange unreachable") }).await;
        }
        assert_eq!(cb.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(cb.call(async { Ok::<(), &str>(()) }).await.is_ok());
        assert!(cb.call(async { Ok::<(), &str>(()) }).await.is_ok());
        assert_eq!(cb.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn reopens_on_failed_recovery_probe() {
        let cb = CircuitBreaker::new("binance-rest", 2, 2, Duration::from_millis(100));

        for _ in 0..2 {
            let _ = cb.call(async { Err::<(), &str>("exchange unreachable") }).await;
        }
        tokio::time::sleep(Duration::from_millis(150)).await;

        let _ = cb.call(async { Err::<(), &str>("exchange unreachable") }).await;

        assert_eq!(cb.state().await, CircuitState::Open);
    }
}
