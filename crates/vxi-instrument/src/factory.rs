//! Config-driven instrument factory

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;
use vxi_core::{DeviceAddress, Instrument, InstrumentFactory};

use crate::config::InstrumentConfig;
use crate::instrument::SimulatedInstrument;

/// Creates [`SimulatedInstrument`]s for configured instrument keys
///
/// `gpib0,5` and `gpib0,7` share the key `gpib0` and therefore one
/// instrument; the device server caches what is created here.
#[derive(Debug, Default)]
pub struct SimulatedInstrumentFactory {
    configs: HashMap<String, InstrumentConfig>,
}

impl SimulatedInstrumentFactory {
    pub fn new(configs: impl IntoIterator<Item = InstrumentConfig>) -> Self {
        let configs = configs
            .into_iter()
            .map(|config| (config.name.to_ascii_lowercase(), config))
            .collect();
        Self { configs }
    }

    /// Configured instrument keys, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.configs.keys().cloned().collect();
        names.sort();
        names
    }
}

impl InstrumentFactory for SimulatedInstrumentFactory {
    fn create(&self, address: &DeviceAddress) -> Option<Arc<dyn Instrument>> {
        let key = address.instrument_key();
        let Some(config) = self.configs.get(&key) else {
            debug!(device = %address, key = %key, "No instrument configured");
            return None;
        };
        Some(Arc::new(SimulatedInstrument::new(key, config.clone())))
    }
}
