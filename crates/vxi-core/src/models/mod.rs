//! Data models shared by the device server and instruments

mod event;
mod flags;
mod link;
mod procedures;
pub mod status;

pub use event::{InstrumentEvent, ServiceRequest, StatusSource, MAX_INTERRUPT_HANDLE_LEN};
pub use flags::{OperationFlags, ReadReason};
pub use link::{ClientId, ConnectionId, LinkId};
pub use procedures::*;
