//! Instrument events and service request notifications

use serde::{Deserialize, Serialize};

use super::link::LinkId;

/// Largest interrupt handle a client may register with `device_enable_srq`
pub const MAX_INTERRUPT_HANDLE_LEN: usize = 40;

/// Origin of a status change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSource {
    /// Raised synchronously while handling a call (a command, clear, ...)
    Command,
    /// Raised by the background operation with this id
    Operation(u64),
}

/// Events published by an instrument to its subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstrumentEvent {
    /// Status byte changed
    StatusChanged {
        /// New status byte value
        status: u8,
        /// `status & SRE` is non-zero and the request-service latch is set
        service_requested: bool,
        /// What caused the change
        source: StatusSource,
    },
    /// A background operation was started
    OperationStarted {
        /// Id carried by the operation's later status changes
        id: u64,
    },
    /// A new exchange was appended to the message log
    MessageLogged {
        /// Total number of exchanges logged so far
        count: u64,
    },
}

/// Service request to be pushed to a client over its interrupt channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRequest {
    /// Link whose call raised the request
    pub link_id: LinkId,
    /// Device the request originates from
    pub device: String,
    /// Handle registered with `device_enable_srq`
    pub handle: Vec<u8>,
    /// Status byte at the time the request was raised
    pub status: u8,
}
