//! Simulated instrument configuration
//!
//! Instruments are declared as `[[instrument]]` tables:
//!
//! ```toml
//! [[instrument]]
//! name = "inst0"
//! identity = "ACME,Model 42,SN0001,1.0"
//! measurement_ms = 250
//!
//! [[instrument]]
//! name = "gpib0"
//! [instrument.gpib]
//! address = 0
//! ```

use serde::{Deserialize, Serialize};

/// Configuration for one simulated instrument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentConfig {
    /// Instrument key, e.g. `inst0` or `gpib0`
    pub name: String,

    /// Identity reported by `*IDN?`
    #[serde(default = "default_identity")]
    pub identity: String,

    /// Number of exchanges kept in the message log
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,

    /// SCPI error queue depth
    #[serde(default = "default_error_queue_capacity")]
    pub error_queue_capacity: usize,

    /// Duration of a triggered measurement in milliseconds
    #[serde(default = "default_measurement_ms")]
    pub measurement_ms: u64,

    /// Time a cancelled measurement needs to wind down, in milliseconds
    #[serde(default)]
    pub abort_latency_ms: u64,

    /// Voltage range after power-on and `*RST`
    #[serde(default = "default_voltage_range")]
    pub voltage_range: f64,

    /// Largest voltage range accepted by `CONFigure:VOLTage`
    #[serde(default = "default_max_voltage_range")]
    pub max_voltage_range: f64,

    /// GPIB interface, for instruments reached through a bus gateway
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpib: Option<GpibConfig>,
}

fn default_identity() -> String {
    "VXI,Simulated Instrument,0,1.0".to_string()
}

fn default_log_capacity() -> usize {
    100
}

fn default_error_queue_capacity() -> usize {
    16
}

fn default_measurement_ms() -> u64 {
    500
}

fn default_voltage_range() -> f64 {
    10.0
}

fn default_max_voltage_range() -> f64 {
    1000.0
}

impl InstrumentConfig {
    /// Configuration with defaults for everything but the name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identity: default_identity(),
            log_capacity: default_log_capacity(),
            error_queue_capacity: default_error_queue_capacity(),
            measurement_ms: default_measurement_ms(),
            abort_latency_ms: 0,
            voltage_range: default_voltage_range(),
            max_voltage_range: default_max_voltage_range(),
            gpib: None,
        }
    }
}

/// GPIB interface settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpibConfig {
    /// Interface's own bus address
    #[serde(default)]
    pub address: u8,

    /// Whether the interface is system controller
    #[serde(default = "default_true")]
    pub system_controller: bool,
}

impl Default for GpibConfig {
    fn default() -> Self {
        Self {
            address: 0,
            system_controller: true,
        }
    }
}

fn default_true() -> bool {
    true
}
