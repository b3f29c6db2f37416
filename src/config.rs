// Copyright (c) 2025 - Cowboy AI, Inc.
//! Configuration for the resilient event service
//!
//! Everything tunable is supplied through [`MessagingConfig`] at
//! construction. [`MessagingConfig::from_env`] reads it from the process
//! environment:
//!
//! | Variable | Default |
//! |---|---|
//! | `MESSAGING_BROKER_HOST` / `MESSAGING_BROKER_PORT` | `localhost` / `4222` |
//! | `MESSAGING_CLIENT_NAME` | `cim-messaging` |
//! | `MESSAGING_SUBJECT_PREFIX` | `events` |
//! | `CIRCUIT_FAILURE_THRESHOLD` | `5` |
//! | `CIRCUIT_RESET_TIMEOUT_MS` | `60000` |
//! | `CIRCUIT_SUCCESS_THRESHOLD` | `2` |
//! | `RETRY_MAX_ATTEMPTS` | `3` |
//! | `RETRY_INITIAL_DELAY_MS` | `1000` |
//! | `RETRY_MAX_DELAY_MS` | `10000` |
//! | `RETRY_BACKOFF_FACTOR` | `2.0` |
//! | `DLQ_CAPACITY` | `1000` |
//! | `DLQ_RECORDED_HANDLER_ATTEMPTS` | `3` |

use std::str::FromStr;
use std::time::Duration;

use crate::errors::{MessagingError, MessagingResult};
use crate::resilience::{CircuitBreakerConfig, RetryConfig, DEFAULT_DLQ_CAPACITY};
use crate::subjects::DEFAULT_SUBJECT_PREFIX;
use crate::transport::NatsConfig;

/// Retry count recorded on dead letters produced by failing handlers
///
/// The subscribe path does not re-run handlers; this value is stored for
/// diagnostics and re-delivery happens through reprocessing.
pub const DEFAULT_RECORDED_HANDLER_ATTEMPTS: u32 = 3;

const DEFAULT_BROKER_HOST: &str = "localhost";
const DEFAULT_BROKER_PORT: u16 = 4222;

/// Dead letter queue settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterConfig {
    /// Maximum retained entries
    pub capacity: usize,
    /// Retry count stored on dead letters from failing handlers
    pub recorded_handler_attempts: u32,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_DLQ_CAPACITY,
            recorded_handler_attempts: DEFAULT_RECORDED_HANDLER_ATTEMPTS,
        }
    }
}

/// Complete configuration for a resilient event service
#[derive(Debug, Clone, PartialEq)]
pub struct MessagingConfig {
    pub nats: NatsConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub retry: RetryConfig,
    pub dead_letter: DeadLetterConfig,
    /// Root of every event subject
    pub subject_prefix: String,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            nats: NatsConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            dead_letter: DeadLetterConfig::default(),
            subject_prefix: DEFAULT_SUBJECT_PREFIX.to_string(),
        }
    }
}

impl MessagingConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> MessagingResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> MessagingResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let default_retry = &defaults.retry;

        let host = lookup("MESSAGING_BROKER_HOST").unwrap_or_else(|| DEFAULT_BROKER_HOST.to_string());
        let port = parse(&lookup, "MESSAGING_BROKER_PORT", DEFAULT_BROKER_PORT)?;
        let mut nats = NatsConfig::default().with_broker(&host, port);
        if let Some(name) = lookup("MESSAGING_CLIENT_NAME") {
            nats.name = name;
        }

        let circuit_breaker = CircuitBreakerConfig {
            failure_threshold: parse(
                &lookup,
                "CIRCUIT_FAILURE_THRESHOLD",
                defaults.circuit_breaker.failure_threshold,
            )?,
            reset_timeout: Duration::from_millis(parse(
                &lookup,
                "CIRCUIT_RESET_TIMEOUT_MS",
                defaults.circuit_breaker.reset_timeout.as_millis() as u64,
            )?),
            success_threshold: parse(
                &lookup,
                "CIRCUIT_SUCCESS_THRESHOLD",
                defaults.circuit_breaker.success_threshold,
            )?,
        };

        let retry = RetryConfig::new(
            parse(&lookup, "RETRY_MAX_ATTEMPTS", default_retry.max_attempts())?,
            Duration::from_millis(parse(
                &lookup,
                "RETRY_INITIAL_DELAY_MS",
                default_retry.initial_delay().as_millis() as u64,
            )?),
            Duration::from_millis(parse(
                &lookup,
                "RETRY_MAX_DELAY_MS",
                default_retry.max_delay().as_millis() as u64,
            )?),
            parse(&lookup, "RETRY_BACKOFF_FACTOR", default_retry.backoff_factor())?,
        )?;

        let dead_letter = DeadLetterConfig {
            capacity: parse(&lookup, "DLQ_CAPACITY", defaults.dead_letter.capacity)?,
            recorded_handler_attempts: parse(
                &lookup,
                "DLQ_RECORDED_HANDLER_ATTEMPTS",
                defaults.dead_letter.recorded_handler_attempts,
            )?,
        };

        let config = Self {
            nats,
            circuit_breaker,
            retry,
            dead_letter,
            subject_prefix: lookup("MESSAGING_SUBJECT_PREFIX").unwrap_or(defaults.subject_prefix),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check every section that is not validated by its own constructor
    pub fn validate(&self) -> MessagingResult<()> {
        self.circuit_breaker.validate()?;
        if self.dead_letter.capacity == 0 {
            return Err(MessagingError::Validation(
                "dead letter queue capacity must be at least 1".to_string(),
            ));
        }
        if self.nats.servers.is_empty() {
            return Err(MessagingError::Configuration(
                "at least one broker server is required".to_string(),
            ));
        }
        crate::subjects::validate_subject_prefix(&self.subject_prefix)
    }
}

fn parse<F, T>(lookup: &F, key: &str, default: T) -> MessagingResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e| {
            MessagingError::Configuration(format!("invalid value for {}: '{}' ({})", key, raw, e))
        }),
    }
}
