//! Console configuration file
//!
//! ```toml
//! [server]
//! mode = "multi-client"
//! max_receive_size = 1024
//!
//! [[instrument]]
//! name = "inst0"
//! identity = "ACME,Model 42,SN0001,1.0"
//!
//! [[instrument]]
//! name = "gpib0"
//! [instrument.gpib]
//! address = 0
//! ```

use std::path::Path;

use serde::Deserialize;
use vxi_device::DeviceServerConfig;
use vxi_instrument::{GpibConfig, InstrumentConfig};

#[derive(Debug, Clone, Deserialize)]
pub struct ConsoleConfig {
    #[serde(default)]
    pub server: DeviceServerConfig,

    #[serde(default = "default_instruments", rename = "instrument")]
    pub instruments: Vec<InstrumentConfig>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            server: DeviceServerConfig::default(),
            instruments: default_instruments(),
        }
    }
}

/// One plain instrument and one behind a GPIB gateway
fn default_instruments() -> Vec<InstrumentConfig> {
    let mut gpib = InstrumentConfig::named("gpib0");
    gpib.gpib = Some(GpibConfig::default());
    vec![InstrumentConfig::named("inst0"), gpib]
}

impl ConsoleConfig {
    /// Load and validate a TOML configuration file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.server.validate()?;
        if config.instruments.is_empty() {
            anyhow::bail!("at least one [[instrument]] is required");
        }
        Ok(config)
    }
}
