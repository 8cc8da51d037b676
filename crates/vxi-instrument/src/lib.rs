//! vxi-instrument - Simulated SCPI instrument
//!
//! Provides an instrument that can sit behind a VXI-11 device server for
//! development and testing.
//!
//! # Modules
//!
//! - [`config`] - Instrument configuration (TOML)
//! - [`registers`] - IEEE 488.2 status/event register state machine
//! - [`log`] - Bounded message log
//! - [`scpi`] - SCPI header parsing and mnemonic matching
//! - [`gpib`] - IEEE 488.1 bus interface stub
//! - [`instrument`] - [`SimulatedInstrument`] and its command table
//! - [`factory`] - Config-driven [`vxi_core::InstrumentFactory`]

pub mod config;
pub mod factory;
pub mod gpib;
pub mod instrument;
pub mod log;
pub mod registers;
pub mod scpi;

mod commands;
mod measurement;

pub use config::{GpibConfig, InstrumentConfig};
pub use factory::SimulatedInstrumentFactory;
pub use gpib::GpibInterface;
pub use instrument::SimulatedInstrument;
pub use log::{MessageLog, MessageLogEntry};
pub use registers::{ScpiError, StatusChange, StatusRegisters};
