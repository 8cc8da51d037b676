//! vxi-core - Core traits and types for VXI-11 device servers
//!
//! This crate provides the protocol vocabulary shared by the device server
//! and the instruments it fronts: error codes, request/response records,
//! the device-name grammar and the [`Instrument`] abstraction.

pub mod address;
pub mod error;
pub mod instrument;
pub mod models;

pub use address::{DeviceAddress, DeviceFamily};
pub use error::{DeviceErrorCode, InstrumentError, InstrumentResult};
pub use instrument::{docmd, BusInterface, Instrument, InstrumentFactory};
pub use models::*;
