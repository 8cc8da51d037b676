//! Integration tests for the VXI-11 device server
//!
//! The tests drive [`DeviceCore`] the way an RPC transport would, with
//! simulated instruments behind it.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p vxi-tests
//! ```
//!
//! # Test Structure
//!
//! - `link_test.rs` - link lifecycle, id allocation, connection loss
//! - `lock_test.rs` - lock leases and WaitLock bounds
//! - `conversation_test.rs` - write/read scenarios and status reporting
//! - `operation_test.rs` - long operations, abort, service requests, docmd

use std::sync::Arc;

use vxi_core::{
    ClientId, CreateLinkParams, DeviceErrorCode, DeviceGenericParams, DeviceReadParams,
    DeviceReadResponse, DeviceWriteParams, LinkId, OperationFlags,
};
use vxi_device::{DeviceCore, DeviceServerConfig};
use vxi_instrument::{GpibConfig, InstrumentConfig, SimulatedInstrumentFactory};

pub const IDENTITY: &str = "ACME,Model 42,SN0001,1.0";

/// Instrument set used by most tests: `inst0` and a GPIB gateway `gpib0`
pub fn instruments() -> Vec<InstrumentConfig> {
    let mut inst = InstrumentConfig::named("inst0");
    inst.identity = IDENTITY.to_string();
    inst.measurement_ms = 1000;
    let mut gpib = InstrumentConfig::named("gpib0");
    gpib.gpib = Some(GpibConfig::default());
    vec![inst, gpib]
}

/// A device core with its factory, shared by the tests
pub struct Bench {
    pub core: Arc<DeviceCore>,
}

impl Bench {
    pub fn new() -> Self {
        Self::with(DeviceServerConfig::default(), instruments())
    }

    pub fn with(config: DeviceServerConfig, instruments: Vec<InstrumentConfig>) -> Self {
        let factory = Arc::new(SimulatedInstrumentFactory::new(instruments));
        Self {
            core: Arc::new(DeviceCore::new(config, factory)),
        }
    }

    /// Create a link and assert it succeeded
    pub async fn link(&self, client: u32, device: &str) -> LinkId {
        let response = self.core.create_link(link_params(client, device)).await;
        assert_eq!(response.error, DeviceErrorCode::NoError, "create_link {}", device);
        response.link_id
    }

    /// Write `text` with END set
    pub async fn write(&self, link_id: LinkId, text: &str) -> DeviceErrorCode {
        self.core.device_write(write_params(link_id, text)).await.error
    }

    pub async fn read(&self, link_id: LinkId) -> DeviceReadResponse {
        self.core.device_read(read_params(link_id)).await
    }

    /// Write a query and return the reply without its terminator
    pub async fn query(&self, link_id: LinkId, text: &str) -> String {
        assert_eq!(self.write(link_id, text).await, DeviceErrorCode::NoError, "write {}", text);
        let response = self.read(link_id).await;
        assert_eq!(response.error, DeviceErrorCode::NoError, "read after {}", text);
        String::from_utf8_lossy(&response.data).trim_end().to_string()
    }
}

impl Default for Bench {
    fn default() -> Self {
        Self::new()
    }
}

pub fn link_params(client: u32, device: &str) -> CreateLinkParams {
    CreateLinkParams {
        client_id: ClientId(client),
        lock_device: false,
        lock_timeout_ms: 0,
        device: device.to_string(),
    }
}

pub fn write_params(link_id: LinkId, text: &str) -> DeviceWriteParams {
    DeviceWriteParams {
        link_id,
        io_timeout_ms: 1000,
        lock_timeout_ms: 0,
        flags: OperationFlags::END,
        data: text.as_bytes().to_vec(),
    }
}

pub fn read_params(link_id: LinkId) -> DeviceReadParams {
    DeviceReadParams {
        link_id,
        request_size: 1024,
        io_timeout_ms: 1000,
        lock_timeout_ms: 0,
        flags: OperationFlags::NONE,
        term_char: 0,
    }
}

pub fn generic_params(link_id: LinkId) -> DeviceGenericParams {
    DeviceGenericParams {
        link_id,
        flags: OperationFlags::NONE,
        lock_timeout_ms: 0,
        io_timeout_ms: 1000,
    }
}
