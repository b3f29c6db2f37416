// Copyright (c) 2025 - Cowboy AI, Inc.
//! Event envelope carried over the message bus

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::MessagingResult;

/// A domain event as published by application code
///
/// The id is a UUID v7 string: a millisecond timestamp followed by random
/// bits, so ids sort by creation time and never collide across publishers.
/// It is also the dead letter queue key for the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event ID
    pub id: String,

    /// Event type name
    #[serde(rename = "type")]
    pub event_type: String,

    /// Event data
    pub payload: serde_json::Value,

    /// When the event was created
    pub timestamp: DateTime<Utc>,
}

impl Event {
    /// Create a new event with a fresh id and the current time
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            event_type: event_type.into(),
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Serialize to JSON bytes for the transport
    pub fn to_bytes(&self) -> MessagingResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize from JSON bytes delivered by the transport
    pub fn from_bytes(bytes: &[u8]) -> MessagingResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
