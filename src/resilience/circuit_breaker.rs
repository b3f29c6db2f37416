// Copyright (c) 2025 - Cowboy AI, Inc.
//! Circuit breaker guarding a single broker dependency
//!
//! # States
//!
//! ```text
//!              failures >= failure_threshold
//!   ┌────────┐ ─────────────────────────────► ┌────────┐
//!   │ CLOSED │                                │  OPEN  │ ◄──┐
//!   └────────┘ ◄──────────┐                   └────────┘    │
//!                         │                        │        │ any failure
//!     successes >= success_threshold     reset_timeout      │
//!                         │                        ▼        │
//!                         │                  ┌───────────┐  │
//!                         └───────────────── │ HALF-OPEN │ ─┘
//!                                            └───────────┘
//! ```
//!
//! No other transitions exist. While open, calls are rejected with
//! [`MessagingError::CircuitOpen`] and the guarded operation is never run.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::{MessagingError, MessagingResult};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow through
    Closed,
    /// Calls are rejected without reaching the dependency
    Open,
    /// Probing whether the dependency recovered
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures in Closed that open the circuit
    pub failure_threshold: u32,
    /// Time to wait in Open before allowing a probe
    pub reset_timeout: Duration,
    /// Successes in HalfOpen that close the circuit
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            success_threshold: 2,
        }
    }
}

impl CircuitBreakerConfig {
    /// Reject thresholds that would make the breaker meaningless
    pub fn validate(&self) -> MessagingResult<()> {
        if self.failure_threshold == 0 {
            return Err(MessagingError::Validation(
                "failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.success_threshold == 0 {
            return Err(MessagingError::Validation(
                "success_threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// A state change reported to listeners
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitTransition {
    /// Breaker that changed state
    pub breaker: String,
    /// Previous state
    pub from: CircuitState,
    /// New state
    pub to: CircuitState,
    /// When the transition happened
    pub at: DateTime<Utc>,
}

/// Observer notified on every state transition
pub type StateChangeListener = Arc<dyn Fn(&CircuitTransition) + Send + Sync>;

/// Point-in-time view of a breaker for monitoring
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
}

struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
}

/// Failure-isolation state machine for one logical dependency
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    listeners: RwLock<Vec<StateChangeListener>>,
}

impl CircuitBreaker {
    /// Create a closed breaker, validating the configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> MessagingResult<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_time: None,
            }),
            listeners: RwLock::new(Vec::new()),
        })
    }

    /// Name of the guarded dependency
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Breaker configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state
    pub fn state(&self) -> CircuitState {
        self.state.lock().state
    }

    /// Consecutive failures counted in Closed
    pub fn failure_count(&self) -> u32 {
        self.state.lock().failure_count
    }

    /// Successes counted in HalfOpen
    pub fn success_count(&self) -> u32 {
        self.state.lock().success_count
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let state = self.state.lock();
        CircuitBreakerStats {
            name: self.name.clone(),
            state: state.state,
            failure_count: state.failure_count,
            success_count: state.success_count,
        }
    }

    /// Register a listener for state transitions
    ///
    /// Listeners run synchronously on the task that caused the transition,
    /// after the breaker's own lock has been released.
    pub fn on_state_change<F>(&self, listener: F)
    where
        F: Fn(&CircuitTransition) + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(listener));
    }

    /// Run `operation` through the breaker
    ///
    /// The operation's own error is returned unchanged. When the circuit is
    /// open the operation is not invoked and `CircuitOpen` is returned.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> MessagingResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = MessagingResult<T>>,
    {
        self.acquire()?;

        let result = operation().await;
        match &result {
            Ok(_) => self.record_success(),
            Err(e) => self.record_failure(e),
        }
        result
    }

    /// Admit a call, moving Open to HalfOpen once the reset timeout elapsed
    fn acquire(&self) -> MessagingResult<()> {
        let transition = {
            let mut state = self.state.lock();
            if state.state != CircuitState::Open {
                return Ok(());
            }

            let elapsed = state
                .last_failure_time
                .map(|t| t.elapsed())
                .unwrap_or(self.config.reset_timeout);

            if elapsed < self.config.reset_timeout {
                debug!(breaker = %self.name, "circuit open, rejecting call");
                return Err(MessagingError::CircuitOpen {
                    breaker: self.name.clone(),
                    retry_after: self.config.reset_timeout - elapsed,
                });
            }

            state.success_count = 0;
            self.transition(&mut state, CircuitState::HalfOpen)
        };

        if let Some(transition) = transition {
            info!(breaker = %self.name, "circuit breaker half-open, probing dependency");
            self.notify(&transition);
        }
        Ok(())
    }

    fn record_success(&self) {
        let transition = {
            let mut state = self.state.lock();
            match state.state {
                CircuitState::Closed => {
                    state.failure_count = 0;
                    None
                }
                CircuitState::HalfOpen => {
                    state.success_count += 1;
                    if state.success_count >= self.config.success_threshold {
                        state.failure_count = 0;
                        state.success_count = 0;
                        self.transition(&mut state, CircuitState::Closed)
                    } else {
                        None
                    }
                }
                // A call admitted before another probe re-opened the circuit
                CircuitState::Open => None,
            }
        };

        if let Some(transition) = transition {
            info!(breaker = %self.name, "circuit breaker closed, dependency recovered");
            self.notify(&transition);
        }
    }

    fn record_failure(&self, error: &MessagingError) {
        let transition = {
            let mut state = self.state.lock();
            match state.state {
                CircuitState::Closed => {
                    state.failure_count += 1;
                    if state.failure_count >= self.config.failure_threshold {
                        state.last_failure_time = Some(Instant::now());
                        self.transition(&mut state, CircuitState::Open)
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    state.success_count = 0;
                    state.last_failure_time = Some(Instant::now());
                    self.transition(&mut state, CircuitState::Open)
                }
                CircuitState::Open => None,
            }
        };

        if let Some(transition) = transition {
            warn!(
                breaker = %self.name,
                from = %transition.from,
                error = %error,
                "circuit breaker opened"
            );
            self.notify(&transition);
        }
    }

    fn transition(&self, state: &mut BreakerState, to: CircuitState) -> Option<CircuitTransition> {
        if state.state == to {
            return None;
        }
        let from = state.state;
        state.state = to;
        Some(CircuitTransition {
            breaker: self.name.clone(),
            from,
            to,
            at: Utc::now(),
        })
    }

    fn notify(&self, transition: &CircuitTransition) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener(transition);
        }
    }
}
