// Copyright (c) 2025 - Cowboy AI, Inc.

//! Subject naming for event topics
//!
//! Every event type travels on its own subject under a shared prefix:
//!
//! ```text
//! {prefix}.{event_type}
//! ```
//!
//! Each subscription covers exactly one type (`events.USER_CREATED`).
//!
//! # Examples
//!
//! ```rust
//! use cim_messaging_resilience::subjects::SubjectBuilder;
//!
//! let subject = SubjectBuilder::new()
//!     .event_type("USER_CREATED")
//!     .build()
//!     .unwrap();
//! assert_eq!(subject, "events.USER_CREATED");
//! ```

use crate::errors::{MessagingError, MessagingResult};

/// Default root namespace for event subjects
pub const DEFAULT_SUBJECT_PREFIX: &str = "events";

/// Check that an event type can be used as a subject token
///
/// Event types must be non-empty, contain no whitespace or NATS wildcards,
/// and must not begin or end with a `.` separator.
pub fn validate_event_type(event_type: &str) -> MessagingResult<()> {
    validate_token("event type", event_type)
}

/// Check that a subject prefix is usable ahead of building any subject
pub fn validate_subject_prefix(prefix: &str) -> MessagingResult<()> {
    validate_token("subject prefix", prefix)
}

fn validate_token(what: &str, value: &str) -> MessagingResult<()> {
    if value.is_empty() {
        return Err(MessagingError::Validation(format!("{what} must not be empty")));
    }
    if let Some(c) = value
        .chars()
        .find(|c| c.is_whitespace() || *c == '*' || *c == '>')
    {
        return Err(MessagingError::Validation(format!(
            "{what} '{value}' contains invalid character {c:?}"
        )));
    }
    if value.starts_with('.') || value.ends_with('.') || value.contains("..") {
        return Err(MessagingError::Validation(format!(
            "{what} '{value}' has an empty subject token"
        )));
    }
    Ok(())
}

/// Builder for event subjects
#[derive(Debug, Clone)]
pub struct SubjectBuilder {
    prefix: String,
    event_type: Option<String>,
}

impl SubjectBuilder {
    /// Create a new subject builder using the default prefix
    pub fn new() -> Self {
        Self {
            prefix: DEFAULT_SUBJECT_PREFIX.to_string(),
            event_type: None,
        }
    }

    /// Set the subject prefix
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the event type
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Build the subject for the configured event type
    pub fn build(self) -> MessagingResult<String> {
        validate_subject_prefix(&self.prefix)?;
        let event_type = self
            .event_type
            .ok_or_else(|| MessagingError::Validation("event type not set".to_string()))?;
        validate_event_type(&event_type)?;
        Ok(format!("{}.{}", self.prefix, event_type))
    }
}

impl Default for SubjectBuilder {
    fn default() -> Self {
        Self::new()
    }
}
