//! Write/read conversation gate
//!
//! A write puts the gate into `Busy` while its commands execute, then
//! leaves either the buffered reply, the error of the failing command, or
//! nothing. Reads drain the reply in chunks. A read against an idle gate
//! times out immediately; a read against a busy gate waits up to its I/O
//! timeout.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use vxi_core::{DeviceErrorCode, ReadReason};

/// Split a write payload into individual commands
///
/// Commands are separated by newline, carriage return or `;`. Blank
/// segments are dropped.
pub fn split_commands(payload: &str) -> Vec<&str> {
    payload
        .split(['\n', '\r', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Debug)]
enum GateState {
    Idle,
    Busy,
    Ready { data: Vec<u8>, offset: usize },
    Failed(DeviceErrorCode),
}

/// Result of a read against the gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutcome {
    pub error: DeviceErrorCode,
    pub reason: ReadReason,
    pub data: Vec<u8>,
}

impl ReadOutcome {
    fn error(error: DeviceErrorCode) -> Self {
        Self {
            error,
            reason: ReadReason::NONE,
            data: Vec::new(),
        }
    }
}

/// Conversation state of one link
#[derive(Debug)]
pub struct Conversation {
    state: Mutex<GateState>,
    changed: Notify,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GateState::Idle),
            changed: Notify::new(),
        }
    }

    /// A write started; any unread reply is discarded
    pub fn begin(&self) {
        *self.state.lock() = GateState::Busy;
    }

    /// The write finished; an empty reply leaves the gate idle
    pub fn complete(&self, reply: Vec<u8>) {
        *self.state.lock() = if reply.is_empty() {
            GateState::Idle
        } else {
            GateState::Ready {
                data: reply,
                offset: 0,
            }
        };
        self.changed.notify_waiters();
    }

    /// The write failed; the next read reports `error`
    pub fn fail(&self, error: DeviceErrorCode) {
        *self.state.lock() = GateState::Failed(error);
        self.changed.notify_waiters();
    }

    /// Drop pending output (device clear)
    pub fn reset(&self) {
        *self.state.lock() = GateState::Idle;
        self.changed.notify_waiters();
    }

    /// Read up to `request_size` bytes
    ///
    /// With `term_char` set the chunk stops after the first occurrence of
    /// that byte; otherwise `'\n'` is only used to report `TERM_CHAR`.
    pub async fn read(
        &self,
        request_size: usize,
        io_timeout: Duration,
        term_char: Option<u8>,
    ) -> ReadOutcome {
        let deadline = Instant::now() + io_timeout;
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(outcome) = self.try_read(request_size, term_char) {
                return outcome;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return ReadOutcome::error(DeviceErrorCode::IoTimeout);
            }
        }
    }

    /// `None` while a write is still running
    fn try_read(&self, request_size: usize, term_char: Option<u8>) -> Option<ReadOutcome> {
        let mut state = self.state.lock();
        let outcome = match &mut *state {
            GateState::Busy => return None,
            GateState::Idle => ReadOutcome::error(DeviceErrorCode::IoTimeout),
            GateState::Failed(error) => {
                let outcome = ReadOutcome::error(*error);
                *state = GateState::Idle;
                outcome
            }
            GateState::Ready { data, offset } => {
                let remaining = &data[*offset..];
                let mut len = request_size.min(remaining.len());
                if let Some(term) = term_char {
                    if let Some(pos) = remaining[..len].iter().position(|b| *b == term) {
                        len = pos + 1;
                    }
                }
                let chunk = remaining[..len].to_vec();
                let end = len == remaining.len();

                let mut reason = ReadReason::NONE;
                if len == request_size || end {
                    reason |= ReadReason::REQUEST_COUNT;
                }
                if chunk.last() == Some(&term_char.unwrap_or(b'\n')) {
                    reason |= ReadReason::TERM_CHAR;
                }
                if end {
                    reason |= ReadReason::END;
                    *state = GateState::Idle;
                } else {
                    *offset += len;
                }

                ReadOutcome {
                    error: DeviceErrorCode::NoError,
                    reason,
                    data: chunk,
                }
            }
        };
        Some(outcome)
    }
}
