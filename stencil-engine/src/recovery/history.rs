//! Bounded, append-only error history.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

use stencil_core::{ErrorKind, TemplateName};

use crate::lock;

/// How a recorded failure was handled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedOutcome {
    pub success: bool,
    pub strategy: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub id: u64,
    pub kind: ErrorKind,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<TemplateName>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RecordedOutcome>,
}

/// Oldest records are dropped once `capacity` is reached.
pub struct ErrorHistory {
    records: Mutex<VecDeque<ErrorRecord>>,
    capacity: usize,
    next_id: AtomicU64,
}

impl ErrorHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        ErrorHistory {
            records: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a record stamped `timestamp`; returns its id.
    pub fn append(
        &self,
        kind: ErrorKind,
        template: Option<TemplateName>,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut records = lock(&self.records);
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(ErrorRecord {
            id,
            kind,
            timestamp,
            template,
            message: message.into(),
            outcome: None,
        });
        id
    }

    /// Attach an outcome to record `id`. Returns `false` if it was already
    /// dropped from the history.
    pub fn set_outcome(&self, id: u64, outcome: RecordedOutcome) -> bool {
        let mut records = lock(&self.records);
        match records.iter_mut().rev().find(|r| r.id == id) {
            Some(record) => {
                record.outcome = Some(outcome);
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> Vec<ErrorRecord> {
        lock(&self.records).iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock(&self.records).clear();
    }
}
