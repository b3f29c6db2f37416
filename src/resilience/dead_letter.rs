// Copyright (c) 2025 - Cowboy AI, Inc.
//! Dead Letter Queue
//!
//! Bounded in-memory store for events whose processing failed permanently.
//! Entries are keyed by event id and remembered in insertion order; when the
//! queue is full the oldest entry is evicted to make room (FIFO, regardless
//! of topic or error). Nothing expires on its own.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::errors::{MessagingError, MessagingResult};
use crate::event::Event;

/// Default number of entries retained
pub const DEFAULT_DLQ_CAPACITY: usize = 1000;

/// A failed message with metadata about the failure
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadLetterEntry {
    pub message_id: String,
    pub original_message: Event,
    /// Error message from the failure
    pub error: String,
    /// Attempts recorded for the failed delivery
    pub retry_count: u32,
    /// Queue (event type) the message was delivered on
    pub original_queue: String,
    /// When the message was dead-lettered
    pub timestamp: DateTime<Utc>,
}

struct Entries {
    by_id: HashMap<String, (u64, DeadLetterEntry)>,
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

impl Entries {
    fn remove(&mut self, id: &str) -> Option<DeadLetterEntry> {
        let (seq, entry) = self.by_id.remove(id)?;
        self.order.remove(&seq);
        Some(entry)
    }

    fn evict_oldest(&mut self) -> Option<DeadLetterEntry> {
        let (_, id) = self.order.pop_first()?;
        self.by_id.remove(&id).map(|(_, entry)| entry)
    }

    fn ordered(&self) -> impl Iterator<Item = &DeadLetterEntry> {
        self.order
            .values()
            .filter_map(|id| self.by_id.get(id).map(|(_, entry)| entry))
    }
}

/// Capacity-bounded dead letter store
pub struct DeadLetterQueue {
    entries: Mutex<Entries>,
    capacity: usize,
    total_evicted: AtomicU64,
}

impl DeadLetterQueue {
    /// Create a queue holding at most `capacity` entries
    pub fn new(capacity: usize) -> MessagingResult<Self> {
        if capacity == 0 {
            return Err(MessagingError::Validation(
                "dead letter queue capacity must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            entries: Mutex::new(Entries {
                by_id: HashMap::new(),
                order: BTreeMap::new(),
                next_seq: 0,
            }),
            capacity,
            total_evicted: AtomicU64::new(0),
        })
    }

    /// Store a failed message, evicting the oldest entry when full
    ///
    /// Adding an id that is already present replaces that entry and makes it
    /// the newest; nothing is evicted in that case.
    pub fn add_message(
        &self,
        id: impl Into<String>,
        message: Event,
        error: impl Into<String>,
        retry_count: u32,
        original_queue: impl Into<String>,
    ) {
        let entry = DeadLetterEntry {
            message_id: id.into(),
            original_message: message,
            error: error.into(),
            retry_count,
            original_queue: original_queue.into(),
            timestamp: Utc::now(),
        };
        self.insert(entry);
    }

    /// Put a previously taken entry back unchanged, as the newest entry
    pub fn restore(&self, entry: DeadLetterEntry) {
        self.insert(entry);
    }

    fn insert(&self, entry: DeadLetterEntry) {
        let mut entries = self.entries.lock();
        let replaced = entries.remove(&entry.message_id).is_some();

        if !replaced && entries.by_id.len() >= self.capacity {
            if let Some(evicted) = entries.evict_oldest() {
                self.total_evicted.fetch_add(1, Ordering::Relaxed);
                warn!(
                    message_id = %evicted.message_id,
                    queue = %evicted.original_queue,
                    capacity = self.capacity,
                    "dead letter queue full, evicted oldest entry"
                );
            }
        }

        let seq = entries.next_seq;
        entries.next_seq += 1;
        entries.order.insert(seq, entry.message_id.clone());

        debug!(
            message_id = %entry.message_id,
            queue = %entry.original_queue,
            "message dead-lettered"
        );
        entries.by_id.insert(entry.message_id.clone(), (seq, entry));
    }

    pub fn get_message(&self, id: &str) -> Option<DeadLetterEntry> {
        self.entries.lock().by_id.get(id).map(|(_, entry)| entry.clone())
    }

    /// Snapshot of every entry, oldest first
    pub fn get_all_messages(&self) -> Vec<DeadLetterEntry> {
        self.entries.lock().ordered().cloned().collect()
    }

    /// Entries dead-lettered from one queue, oldest first
    pub fn messages_for_queue(&self, queue: &str) -> Vec<DeadLetterEntry> {
        self.entries
            .lock()
            .ordered()
            .filter(|entry| entry.original_queue == queue)
            .cloned()
            .collect()
    }

    /// Distinct original queues, sorted
    pub fn queues(&self) -> Vec<String> {
        let entries = self.entries.lock();
        let queues: BTreeSet<&str> = entries
            .by_id
            .values()
            .map(|(_, entry)| entry.original_queue.as_str())
            .collect();
        queues.into_iter().map(str::to_string).collect()
    }

    pub fn remove_message(&self, id: &str) -> Option<DeadLetterEntry> {
        self.entries.lock().remove(id)
    }

    /// Take an entry out for reprocessing
    ///
    /// The caller is responsible for republishing the returned message.
    pub fn retry_message(&self, id: &str) -> Option<DeadLetterEntry> {
        let entry = self.remove_message(id);
        if entry.is_some() {
            debug!(message_id = %id, "dead letter taken for reprocessing");
        }
        entry
    }

    /// Remove every entry from one queue, returning how many were removed
    pub fn remove_queue(&self, queue: &str) -> usize {
        let mut entries = self.entries.lock();
        let ids: Vec<String> = entries
            .ordered()
            .filter(|entry| entry.original_queue == queue)
            .map(|entry| entry.message_id.clone())
            .collect();
        for id in &ids {
            entries.remove(id);
        }
        ids.len()
    }

    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.by_id.clear();
        entries.order.clear();
    }

    pub fn size(&self) -> usize {
        self.entries.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries dropped because the queue was full
    pub fn total_evicted(&self) -> u64 {
        self.total_evicted.load(Ordering::Relaxed)
    }
}
