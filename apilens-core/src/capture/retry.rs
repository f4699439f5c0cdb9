use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::diagnose::classify_message;

/// Exponential backoff parameters. `max_retries` counts retries, so an
/// operation runs at most `max_retries + 1` times.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(10_000),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Base delay before a retry, zero-indexed at the first retry.
    pub fn delay_for(&self, retry: usize) -> Duration {
        let factor = self.backoff_multiplier.powi(retry as i32);
        let millis = (self.initial_delay.as_millis() as f64 * factor)
            .min(self.max_delay.as_millis() as f64);
        Duration::from_millis(millis as u64)
    }

    /// Adds jitter drawn uniformly from `[0, base / 4]`.
    fn jittered(&self, base: Duration) -> Duration {
        let spread = base.as_millis() as u64 / 4;
        if spread == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
    }

    /// Runs `operation` under this policy. The callback receives the
    /// zero-based attempt index.
    ///
    /// The predicate defaults to the error classifier's retryable signal on
    /// the error's display text. Cancellation aborts a pending wait and
    /// surfaces as `RetryError::Cancelled`, distinct from any operation
    /// error; exhaustion surfaces the last attempt's error unmodified.
    pub async fn run<F, Fut, T, E>(
        &self,
        mut options: RetryOptions<E>,
        mut operation: F,
    ) -> Result<RetryOutcome<T>, RetryError<E>>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0usize;
        loop {
            if let Some(cancel) = options.cancel.as_ref() {
                if cancel.is_cancelled() {
                    return Err(RetryError::Cancelled);
                }
            }
            match operation(attempt).await {
                Ok(result) => {
                    return Ok(RetryOutcome {
                        result,
                        attempts: attempt + 1,
                    });
                }
                Err(error) => {
                    let wants_retry = match options.should_retry.as_mut() {
                        Some(predicate) => predicate(&error),
                        None => classify_message(&error.to_string()).retryable,
                    };
                    if attempt >= self.max_retries || !wants_retry {
                        return Err(RetryError::Operation(error));
                    }

                    let delay = self.jittered(self.delay_for(attempt));
                    if let Some(on_retry) = options.on_retry.as_mut() {
                        on_retry(attempt + 1, self.max_retries, delay, &error);
                    }
                    debug!(
                        retry = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "operation failed, retrying"
                    );
                    match options.cancel.as_ref() {
                        Some(cancel) => {
                            tokio::select! {
                                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                                _ = sleep(delay) => {}
                            }
                        }
                        None => sleep(delay).await,
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    pub result: T,
    pub attempts: usize,
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("operation cancelled")]
    Cancelled,
    #[error("{0}")]
    Operation(E),
}

impl<E> RetryError<E> {
    pub fn into_operation(self) -> Option<E> {
        match self {
            RetryError::Operation(error) => Some(error),
            RetryError::Cancelled => None,
        }
    }
}

/// Per-call knobs for `RetryPolicy::run`. All optional.
pub struct RetryOptions<E> {
    should_retry: Option<Box<dyn FnMut(&E) -> bool + Send>>,
    on_retry: Option<Box<dyn FnMut(usize, usize, Duration, &E) + Send>>,
    cancel: Option<CancellationToken>,
}

impl<E> Default for RetryOptions<E> {
    fn default() -> Self {
        Self {
            should_retry: None,
            on_retry: None,
            cancel: None,
        }
    }
}

impl<E> RetryOptions<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_should_retry<F>(mut self, predicate: F) -> Self
    where
        F: FnMut(&E) -> bool + Send + 'static,
    {
        self.should_retry = Some(Box::new(predicate));
        self
    }

    /// Observability hook, called once per scheduled retry before the wait
    /// with `(retry, max_retries, delay, error)`. Must not affect control
    /// flow.
    pub fn with_on_retry<F>(mut self, hook: F) -> Self
    where
        F: FnMut(usize, usize, Duration, &E) + Send + 'static,
    {
        self.on_retry = Some(Box::new(hook));
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}
