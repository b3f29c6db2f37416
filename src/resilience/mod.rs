// Copyright (c) 2025 - Cowboy AI, Inc.
//! Resilience primitives for broker calls
//!
//! - **CircuitBreaker**: fail fast while a dependency is unhealthy
//! - **RetryManager**: bounded exponential backoff for transient failures
//! - **DeadLetterQueue**: bounded capture of permanently failed messages
//!
//! The resilient event service composes them as
//! `breaker.execute(|| retry.execute(|| transport.publish(..)))`, so one
//! exhausted retry sequence counts as a single breaker failure.

pub mod circuit_breaker;
pub mod dead_letter;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState, CircuitTransition,
    StateChangeListener,
};
pub use dead_letter::{DeadLetterEntry, DeadLetterQueue, DEFAULT_DLQ_CAPACITY};
pub use retry::{RetryAttempt, RetryConfig, RetryManager};
