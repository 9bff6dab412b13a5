//! Retrying call executor.
//!
//! Wraps a single remote operation and absorbs the cloud's eventual
//! consistency: the operation is attempted until it reports success, fails
//! with a non-retryable error, or the policy's step budget is exhausted. This
//! is the only place in the workspace that sleeps between attempts.

use std::fmt;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::backoff::BackoffPolicy;
use crate::error::Error;
use crate::result::Result;
use crate::resource::Call;

/// Result of one attempt at a remote operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    /// The operation converged with a value.
    Done(T),
    /// The cloud has not converged yet; try again later.
    Pending,
}

/// Source of delays between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync + fmt::Debug {
    async fn sleep(&self, delay: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Records requested delays and returns immediately.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays requested so far, in order.
    #[must_use]
    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .map(|delays| delays.clone())
            .unwrap_or_default()
    }

    /// Number of sleeps requested so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.delays.lock().map(|delays| delays.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, delay: Duration) {
        if let Ok(mut delays) = self.delays.lock() {
            delays.push(delay);
        }
    }
}

/// Attempt `operation` under `policy` until it converges.
///
/// # Errors
/// - the operation's own error, immediately, when it is not retryable;
/// - `Error::ConvergenceTimeout` once `policy.steps` attempts have neither
///   succeeded nor failed hard.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &BackoffPolicy,
    sleeper: &dyn Sleeper,
    call: &Call,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<Attempt<T>>> + Send,
{
    let mut last_error: Option<String> = None;
    let mut attempts = 0u32;

    while attempts < policy.steps {
        if attempts > 0 {
            let delay = policy.delay(attempts);
            debug!(
                call = %call,
                attempt = attempts.saturating_add(1),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Retrying after delay"
            );
            sleeper.sleep(delay).await;
        }
        attempts = attempts.saturating_add(1);

        match operation().await {
            Ok(Attempt::Done(value)) => {
                if attempts > 1 {
                    debug!(call = %call, attempts, "Operation converged after retry");
                }
                return Ok(value);
            }
            Ok(Attempt::Pending) => {
                debug!(call = %call, attempt = attempts, "Operation not converged yet");
            }
            Err(e) if e.is_retryable() => {
                warn!(
                    call = %call,
                    attempt = attempts,
                    remaining = policy.steps.saturating_sub(attempts),
                    error = %e,
                    "Retryable failure"
                );
                last_error = Some(e.to_string());
            }
            Err(e) => return Err(e),
        }
    }

    warn!(call = %call, attempts, "Hit maximum retries without converging");
    Err(Error::convergence_timeout(call, attempts, last_error))
}

/// Run a fallible call once per attempt, treating success as convergence.
///
/// Convenience wrapper for the common "call, retry on transport failure"
/// shape where there is no pending state.
///
/// # Errors
/// See [`retry_with_backoff`].
pub async fn retry_call<T, F, Fut>(
    policy: &BackoffPolicy,
    sleeper: &dyn Sleeper,
    call: &Call,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T>> + Send,
{
    retry_with_backoff(policy, sleeper, call, || {
        let fut = operation();
        async move { fut.await.map(Attempt::Done) }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceKind;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn call() -> Call {
        Call::get(ResourceKind::FloatingIp, "fip-1")
    }

    #[tokio::test]
    async fn test_pending_forever_times_out_after_steps() {
        let policy = BackoffPolicy::new(Duration::from_secs(1), 1.5, 0.1, 3);
        let sleeper = RecordingSleeper::new();
        let attempts = AtomicU32::new(0);

        let result: Result<()> = retry_with_backoff(&policy, &sleeper, &call(), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Ok(Attempt::Pending) }
        })
        .await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(matches!(
            result,
            Err(Error::ConvergenceTimeout {
                attempts: 3,
                last_error: None,
                ..
            })
        ));
        // Two gaps between three attempts, each inside its jitter window.
        let delays = sleeper.delays();
        assert_eq!(delays.len(), 2);
        let first = delays.first().copied().unwrap_or_default();
        let second = delays.get(1).copied().unwrap_or_default();
        assert!(first >= Duration::from_secs(1) && first < Duration::from_millis(1100));
        assert!(second >= Duration::from_millis(1500) && second < Duration::from_millis(1650));
    }

    #[tokio::test]
    async fn test_success_returns_immediately() {
        let sleeper = RecordingSleeper::new();
        let result = retry_with_backoff(&BackoffPolicy::read(), &sleeper, &call(), || async {
            Ok(Attempt::Done(42))
        })
        .await;
        assert_eq!(result.ok(), Some(42));
        assert_eq!(sleeper.count(), 0);
    }

    #[tokio::test]
    async fn test_non_retryable_error_aborts_remaining_attempts() {
        let sleeper = RecordingSleeper::new();
        let attempts = AtomicU32::new(0);
        let result: Result<()> = retry_with_backoff(&BackoffPolicy::write(), &sleeper, &call(), || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::conflict(&call(), "port in use")) }
        })
        .await;

        assert!(result.as_ref().is_err_and(Error::is_conflict));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(sleeper.count(), 0);
    }

    #[tokio::test]
    async fn test_retryable_error_then_success() {
        let sleeper = RecordingSleeper::new();
        let attempts = AtomicU32::new(0);
        let result = retry_call(&BackoffPolicy::read(), &sleeper, &call(), || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::transport(&call(), "connection reset"))
                } else {
                    Ok("converged")
                }
            }
        })
        .await;

        assert_eq!(result.ok(), Some("converged"));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(sleeper.count(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retryable_errors_surface_as_timeout_with_context() {
        let sleeper = RecordingSleeper::new();
        let policy = BackoffPolicy::read().with_steps(2);
        let result: Result<()> = retry_call(&policy, &sleeper, &call(), || async {
            Err(Error::transport(&call(), "503"))
        })
        .await;

        assert!(matches!(
            &result,
            Err(Error::ConvergenceTimeout { attempts: 2, last_error: Some(e), .. }) if e.contains("503")
        ));
    }
}
