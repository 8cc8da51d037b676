//! Instrument trait - the abstraction a device server delegates to

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::address::DeviceAddress;
use crate::error::{InstrumentError, InstrumentResult};
use crate::models::InstrumentEvent;

/// `device_docmd` command codes for IEEE 488.1 bus primitives
pub mod docmd {
    /// Send raw command bytes with ATN asserted
    pub const SEND_COMMAND: u32 = 0x020000;
    /// Query a bus status item (selected by the request data)
    pub const BUS_STATUS: u32 = 0x020001;
    /// Assert or release ATN
    pub const ATN_CONTROL: u32 = 0x020002;
    /// Assert or release REN
    pub const REN_CONTROL: u32 = 0x020003;
    /// Pass controller-in-charge to another address
    pub const PASS_CONTROL: u32 = 0x020004;
    /// Set the interface's own bus address
    pub const BUS_ADDRESS: u32 = 0x02000A;
    /// Pulse interface clear
    pub const IFC_CONTROL: u32 = 0x020010;

    /// Items selectable with [`BUS_STATUS`]
    pub mod bus_status {
        pub const REMOTE: u16 = 1;
        pub const SRQ: u16 = 2;
        pub const NDAC: u16 = 3;
        pub const SYSTEM_CONTROLLER: u16 = 4;
        pub const CONTROLLER_IN_CHARGE: u16 = 5;
        pub const TALKER: u16 = 6;
        pub const LISTENER: u16 = 7;
        pub const BUS_ADDRESS: u16 = 8;
    }
}

/// Thin pass-through for IEEE 488.1 bus primitives
///
/// Unknown or unsupported command codes yield an empty response rather
/// than an error.
pub trait BusInterface: Send + Sync {
    /// Execute a bus command
    ///
    /// # Arguments
    /// * `cmd` - command code from [`docmd`]
    /// * `network_order` - multi-byte values in `data` are big-endian
    /// * `data` - command argument bytes
    fn execute(&self, cmd: u32, network_order: bool, data: &[u8]) -> Vec<u8>;
}

/// The core trait implemented by every instrument behind the server.
///
/// The device server owns link bookkeeping, locking and reply buffering;
/// an instrument only interprets commands and maintains its registers.
#[async_trait]
pub trait Instrument: Send + Sync {
    /// Device name the instrument was created for
    fn name(&self) -> &str;

    /// Identity string reported by `*IDN?`
    fn identity(&self) -> &str;

    /// Execute a single SCPI command
    ///
    /// Returns `Some(reply)` for queries and `None` for plain commands.
    fn execute(&self, command: &str) -> InstrumentResult<Option<String>>;

    /// Destructive status byte read
    ///
    /// Returns the status byte (with the request-service bit set if a
    /// service request was latched) and clears the register.
    fn read_status_byte(&self) -> u8;

    /// Group execute trigger
    fn trigger(&self) -> InstrumentResult<()> {
        Err(InstrumentError::NotSupported("trigger".to_string()))
    }

    /// Selected device clear
    fn clear(&self) -> InstrumentResult<()>;

    /// Place the instrument in (or take it out of) remote state
    fn set_remote_enabled(&self, enabled: bool);

    /// Whether the instrument is in remote state
    fn is_remote_enabled(&self) -> bool;

    /// Bus interface for `device_docmd`, if the instrument has one
    fn interface(&self) -> Option<&dyn BusInterface> {
        None
    }

    /// Subscribe to status and log events
    fn subscribe(&self) -> broadcast::Receiver<InstrumentEvent>;

    /// Cancel any in-flight long operation and wait for it to stop
    ///
    /// Fails with [`InstrumentError::Io`] if the operation is still running
    /// when `timeout` elapses.
    async fn abort(&self, timeout: Duration) -> InstrumentResult<()>;
}

/// Creates instruments for device names
///
/// The server caches what the factory returns, so `create` is called at
/// most once per instrument key.
pub trait InstrumentFactory: Send + Sync {
    /// Create the instrument serving `address`, or `None` if nothing matches
    fn create(&self, address: &DeviceAddress) -> Option<Arc<dyn Instrument>>;
}
