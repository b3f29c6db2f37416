// Copyright (c) 2025 - Cowboy AI, Inc.
//! Retry manager with bounded exponential backoff

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::errors::{MessagingError, MessagingResult};

/// Bounds for the retry loop
///
/// Construct with [`RetryConfig::new`], which rejects invalid bounds. The
/// fields are read-only so a validated config cannot be broken afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_factor: f64,
}

impl RetryConfig {
    /// Validate and build a retry configuration
    ///
    /// Requires `max_attempts >= 1`, `max_delay >= initial_delay` and
    /// `backoff_factor > 1`.
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        max_delay: Duration,
        backoff_factor: f64,
    ) -> MessagingResult<Self> {
        if max_attempts == 0 {
            return Err(MessagingError::Validation(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if max_delay < initial_delay {
            return Err(MessagingError::Validation(format!(
                "max_delay ({:?}) must not be less than initial_delay ({:?})",
                max_delay, initial_delay
            )));
        }
        if !backoff_factor.is_finite() || backoff_factor <= 1.0 {
            return Err(MessagingError::Validation(format!(
                "backoff_factor must be greater than 1, got {}",
                backoff_factor
            )));
        }
        Ok(Self {
            max_attempts,
            initial_delay,
            max_delay,
            backoff_factor,
        })
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        let scaled = delay.as_secs_f64() * self.backoff_factor;
        if scaled >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(scaled)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(10),
            backoff_factor: 2.0,
        }
    }
}

/// A failed attempt that is about to be retried
#[derive(Debug)]
pub struct RetryAttempt<'a> {
    /// The attempt that failed (1-based)
    pub attempt: u32,
    /// Wait before the next attempt
    pub delay: Duration,
    /// Why the attempt failed
    pub error: &'a MessagingError,
}

/// Executes fallible async operations with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryManager {
    config: RetryConfig,
    sleep_between_attempts: bool,
}

impl RetryManager {
    /// Retry manager that waits between attempts
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            sleep_between_attempts: true,
        }
    }

    /// Retry manager that never waits, for deterministic runs
    pub fn immediate(config: RetryConfig) -> Self {
        Self {
            config,
            sleep_between_attempts: false,
        }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` until it succeeds or attempts are exhausted
    pub async fn execute<F, Fut, T>(&self, operation: F) -> MessagingResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = MessagingResult<T>>,
    {
        self.execute_observed(operation, |_| {}).await
    }

    /// Like [`execute`](Self::execute), reporting each retried failure
    ///
    /// Non-retryable errors are returned unchanged without further
    /// attempts. When the last attempt fails the result is
    /// `RetryExhausted`, carrying the attempt count and the last error.
    pub async fn execute_observed<F, Fut, T, O>(
        &self,
        mut operation: F,
        mut on_retry: O,
    ) -> MessagingResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = MessagingResult<T>>,
        O: FnMut(RetryAttempt<'_>),
    {
        let mut attempt = 1;
        let mut delay = self.config.initial_delay;

        loop {
            let error = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation recovered after retry");
                    }
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                return Err(error);
            }

            if attempt >= self.config.max_attempts {
                warn!(attempts = attempt, error = %error, "retry attempts exhausted");
                return Err(MessagingError::RetryExhausted {
                    attempts: attempt,
                    last_error: error.to_string(),
                    source: Box::new(error),
                });
            }

            debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "attempt failed, retrying"
            );
            on_retry(RetryAttempt {
                attempt,
                delay,
                error: &error,
            });

            if self.sleep_between_attempts && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            delay = self.config.next_delay(delay);
            attempt += 1;
        }
    }
}
