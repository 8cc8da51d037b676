//! IEEE 488.1 bus interface stub
//!
//! Tracks the interface lines and controller state a `device_docmd` caller
//! can observe. Nothing is put on a physical bus.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use vxi_core::docmd::{self, bus_status};
use vxi_core::BusInterface;

use crate::config::GpibConfig;
use crate::instrument::InstrumentState;

const MAX_BUS_ADDRESS: u32 = 30;

#[derive(Debug)]
struct GpibState {
    atn: bool,
    address: u8,
    controller_in_charge: bool,
}

/// GPIB interface attached to a simulated instrument
pub struct GpibInterface {
    system_controller: bool,
    bus: Mutex<GpibState>,
    instrument: Arc<Mutex<InstrumentState>>,
    /// REN line, shared with the instrument's remote flag
    remote: Arc<AtomicBool>,
}

impl GpibInterface {
    pub(crate) fn new(
        config: &GpibConfig,
        instrument: Arc<Mutex<InstrumentState>>,
        remote: Arc<AtomicBool>,
    ) -> Self {
        Self {
            system_controller: config.system_controller,
            bus: Mutex::new(GpibState {
                atn: false,
                address: config.address.min(MAX_BUS_ADDRESS as u8),
                controller_in_charge: config.system_controller,
            }),
            instrument,
            remote,
        }
    }

    pub fn address(&self) -> u8 {
        self.bus.lock().address
    }

    pub fn is_controller_in_charge(&self) -> bool {
        self.bus.lock().controller_in_charge
    }

    pub fn is_attention_asserted(&self) -> bool {
        self.bus.lock().atn
    }

    fn bus_status(&self, item: u16) -> Option<u16> {
        let bus = self.bus.lock();
        let value = match item {
            bus_status::REMOTE => self.remote.load(Ordering::SeqCst) as u16,
            bus_status::SRQ => self.instrument.lock().registers.is_request_service_latched() as u16,
            bus_status::NDAC => 0,
            bus_status::SYSTEM_CONTROLLER => self.system_controller as u16,
            bus_status::CONTROLLER_IN_CHARGE => bus.controller_in_charge as u16,
            bus_status::TALKER | bus_status::LISTENER => 0,
            bus_status::BUS_ADDRESS => bus.address as u16,
            _ => return None,
        };
        Some(value)
    }
}

fn read_u16(data: &[u8], network_order: bool) -> Option<u16> {
    let bytes: [u8; 2] = data.get(..2)?.try_into().ok()?;
    Some(if network_order {
        u16::from_be_bytes(bytes)
    } else {
        u16::from_le_bytes(bytes)
    })
}

fn read_u32(data: &[u8], network_order: bool) -> Option<u32> {
    let bytes: [u8; 4] = data.get(..4)?.try_into().ok()?;
    Some(if network_order {
        u32::from_be_bytes(bytes)
    } else {
        u32::from_le_bytes(bytes)
    })
}

fn write_u16(value: u16, network_order: bool) -> Vec<u8> {
    if network_order {
        value.to_be_bytes().to_vec()
    } else {
        value.to_le_bytes().to_vec()
    }
}

impl BusInterface for GpibInterface {
    fn execute(&self, cmd: u32, network_order: bool, data: &[u8]) -> Vec<u8> {
        debug!(cmd, len = data.len(), "Bus command");
        match cmd {
            docmd::SEND_COMMAND => {
                if !self.bus.lock().controller_in_charge {
                    return Vec::new();
                }
                data.to_vec()
            }
            docmd::BUS_STATUS => read_u16(data, network_order)
                .and_then(|item| self.bus_status(item))
                .map(|value| write_u16(value, network_order))
                .unwrap_or_default(),
            docmd::ATN_CONTROL => match read_u16(data, network_order) {
                Some(value) => {
                    self.bus.lock().atn = value != 0;
                    data[..2].to_vec()
                }
                None => Vec::new(),
            },
            docmd::REN_CONTROL => match read_u16(data, network_order) {
                Some(value) if self.system_controller => {
                    self.remote.store(value != 0, Ordering::SeqCst);
                    data[..2].to_vec()
                }
                _ => Vec::new(),
            },
            docmd::PASS_CONTROL => match read_u32(data, network_order) {
                Some(address) if address <= MAX_BUS_ADDRESS => {
                    let mut bus = self.bus.lock();
                    let own = bus.address as u32;
                    bus.controller_in_charge = address == own;
                    data[..4].to_vec()
                }
                _ => Vec::new(),
            },
            docmd::BUS_ADDRESS => match read_u32(data, network_order) {
                Some(address) if address <= MAX_BUS_ADDRESS => {
                    self.bus.lock().address = address as u8;
                    data[..4].to_vec()
                }
                _ => Vec::new(),
            },
            docmd::IFC_CONTROL => {
                if self.system_controller {
                    let mut bus = self.bus.lock();
                    bus.controller_in_charge = true;
                    bus.atn = false;
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }
}
