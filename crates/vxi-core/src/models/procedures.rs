//! Request and response records for the VXI-11 core channel procedures
//!
//! These mirror the `Create_LinkParms`, `Device_WriteParms`, ... structures
//! of the protocol. Encoding them on the wire is the transport's job.

use serde::{Deserialize, Serialize};

use super::flags::{OperationFlags, ReadReason};
use super::link::{ClientId, LinkId};
use crate::error::DeviceErrorCode;

/// `create_link` arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateLinkParams {
    pub client_id: ClientId,
    /// Acquire the device lock as part of link creation
    pub lock_device: bool,
    /// Lock lease (and wait bound) in milliseconds
    pub lock_timeout_ms: u32,
    /// Device name, e.g. `inst0` or `gpib0,5`
    pub device: String,
}

/// `create_link` result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateLinkResponse {
    pub error: DeviceErrorCode,
    pub link_id: LinkId,
    /// Port of the abort channel
    pub abort_port: u16,
    /// Largest `device_write` payload accepted
    pub max_receive_size: u32,
}

/// `device_write` arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceWriteParams {
    pub link_id: LinkId,
    pub io_timeout_ms: u32,
    pub lock_timeout_ms: u32,
    pub flags: OperationFlags,
    pub data: Vec<u8>,
}

/// `device_write` result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceWriteResponse {
    pub error: DeviceErrorCode,
    /// Bytes accepted
    pub size: u32,
}

/// `device_read` arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceReadParams {
    pub link_id: LinkId,
    pub request_size: u32,
    pub io_timeout_ms: u32,
    pub lock_timeout_ms: u32,
    pub flags: OperationFlags,
    /// Only significant with [`OperationFlags::TERM_CHAR_SET`]
    pub term_char: u8,
}

/// `device_read` result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceReadResponse {
    pub error: DeviceErrorCode,
    pub reason: ReadReason,
    pub data: Vec<u8>,
}

/// `device_readstb` result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceReadStbResponse {
    pub error: DeviceErrorCode,
    pub stb: u8,
}

/// Arguments shared by `device_readstb`, `device_trigger`, `device_clear`,
/// `device_remote` and `device_local`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceGenericParams {
    pub link_id: LinkId,
    pub flags: OperationFlags,
    pub lock_timeout_ms: u32,
    pub io_timeout_ms: u32,
}

/// `device_lock` arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceLockParams {
    pub link_id: LinkId,
    pub flags: OperationFlags,
    /// Lease length, also the bound on waiting for a contended lock
    pub lock_timeout_ms: u32,
}

/// `device_enable_srq` arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEnableSrqParams {
    pub link_id: LinkId,
    pub enable: bool,
    /// Opaque handle echoed back in service request notifications
    pub handle: Vec<u8>,
}

/// `device_docmd` arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDocmdParams {
    pub link_id: LinkId,
    pub flags: OperationFlags,
    pub io_timeout_ms: u32,
    pub lock_timeout_ms: u32,
    /// Command code, see [`crate::docmd`]
    pub cmd: u32,
    pub network_order: bool,
    /// Size of each datum in `data_in`
    pub data_size: u32,
    pub data_in: Vec<u8>,
}

/// `device_docmd` result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDocmdResponse {
    pub error: DeviceErrorCode,
    pub data_out: Vec<u8>,
}

/// Result of procedures that only report an error code
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceError {
    pub error: DeviceErrorCode,
}

impl From<DeviceErrorCode> for DeviceError {
    fn from(error: DeviceErrorCode) -> Self {
        Self { error }
    }
}
