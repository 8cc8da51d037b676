//! Bounded message log
//!
//! Keeps the most recent command/response exchanges. The oldest entry is
//! evicted once capacity is reached; the sequence counter never resets.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use vxi_core::DeviceErrorCode;

/// One logged exchange
#[derive(Debug, Clone, Serialize)]
pub struct MessageLogEntry {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<DeviceErrorCode>,
}

/// Circular log of exchanges
#[derive(Debug)]
pub struct MessageLog {
    capacity: usize,
    entries: VecDeque<MessageLogEntry>,
    counter: u64,
}

impl MessageLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
            counter: 0,
        }
    }

    /// Append an exchange, returning the new message count
    pub fn push(
        &mut self,
        command: &str,
        response: Option<&str>,
        error: Option<DeviceErrorCode>,
    ) -> u64 {
        self.counter += 1;
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(MessageLogEntry {
            sequence: self.counter,
            timestamp: Utc::now(),
            command: command.to_string(),
            response: response.map(str::to_string),
            error,
        });
        self.counter
    }

    /// Total number of exchanges ever logged
    pub fn count(&self) -> u64 {
        self.counter
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries oldest first
    pub fn entries(&self) -> impl Iterator<Item = &MessageLogEntry> {
        self.entries.iter()
    }
}
