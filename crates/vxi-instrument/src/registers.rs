//! IEEE 488.2 status reporting
//!
//! Holds the Standard Event Status Register, the status byte, their enable
//! masks, the request-service latch and the SCPI error queue. Every mutation
//! that changes the status byte returns a [`StatusChange`] so the owner can
//! publish it.

use std::collections::VecDeque;

use vxi_core::status::{event_status, status_byte};

/// SCPI error queue entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScpiError {
    pub code: i16,
    pub message: String,
}

impl ScpiError {
    pub fn new(code: i16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ScpiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{},\"{}\"", self.code, self.message)
    }
}

/// Status byte transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub status: u8,
    pub service_requested: bool,
}

/// Status and event registers of one instrument
#[derive(Debug)]
pub struct StatusRegisters {
    event_status: u8,
    event_enable: u8,
    status: u8,
    service_request_enable: u8,
    request_service_latched: bool,
    opc_armed: bool,
    errors: VecDeque<ScpiError>,
    error_capacity: usize,
}

impl StatusRegisters {
    pub fn new(error_capacity: usize) -> Self {
        Self {
            event_status: event_status::POWER_ON,
            event_enable: 0,
            status: 0,
            service_request_enable: 0,
            request_service_latched: false,
            opc_armed: false,
            errors: VecDeque::new(),
            error_capacity: error_capacity.max(1),
        }
    }

    pub fn event_status(&self) -> u8 {
        self.event_status
    }

    pub fn event_enable(&self) -> u8 {
        self.event_enable
    }

    pub fn service_request_enable(&self) -> u8 {
        self.service_request_enable
    }

    pub fn is_request_service_latched(&self) -> bool {
        self.request_service_latched
    }

    /// Status byte as reported by `*STB?` (non-destructive)
    ///
    /// Bit 6 is the master summary: set when any enabled bit is set.
    pub fn status_byte(&self) -> u8 {
        let summary = self.status & self.service_request_enable & !status_byte::REQUEST_SERVICE;
        if summary != 0 || self.request_service_latched {
            self.status | status_byte::REQUEST_SERVICE
        } else {
            self.status
        }
    }

    /// Destructive status byte read (`device_readstb`)
    ///
    /// Returns the register OR'd with the request-service bit when a
    /// service request was latched, then clears both.
    pub fn take_status_byte(&mut self) -> u8 {
        let mut value = self.status;
        if self.request_service_latched {
            value |= status_byte::REQUEST_SERVICE;
        }
        self.request_service_latched = false;
        self.status = 0;
        value
    }

    /// Destructive event register read (`*ESR?`)
    pub fn take_event_status(&mut self) -> (u8, Option<StatusChange>) {
        let value = self.event_status;
        self.event_status = 0;
        let change = self.refresh_summary();
        (value, change)
    }

    /// Set bits in the event register
    pub fn set_event(&mut self, bits: u8) -> Option<StatusChange> {
        self.event_status |= bits;
        self.refresh_summary()
    }

    /// `*ESE <mask>`
    pub fn set_event_enable(&mut self, mask: u8) -> Option<StatusChange> {
        self.event_enable = mask;
        self.refresh_summary()
    }

    /// `*SRE <mask>`; bit 6 cannot be enabled
    pub fn set_service_request_enable(&mut self, mask: u8) -> Option<StatusChange> {
        self.service_request_enable = mask & !status_byte::REQUEST_SERVICE;
        // Re-evaluate against the current byte without changing it
        self.evaluate_service_request()
    }

    /// Set bits in the status byte
    pub fn set_status_bits(&mut self, bits: u8) -> Option<StatusChange> {
        self.update_status(self.status | bits)
    }

    /// Clear bits in the status byte
    pub fn clear_status_bits(&mut self, bits: u8) -> Option<StatusChange> {
        self.update_status(self.status & !bits)
    }

    /// Queue a SCPI error and flag it in the event register
    pub fn push_error(&mut self, error: ScpiError, event_bit: u8) -> Option<StatusChange> {
        if self.errors.len() >= self.error_capacity {
            self.errors.pop_back();
            self.errors.push_back(ScpiError::new(-350, "Queue overflow"));
        } else {
            self.errors.push_back(error);
        }
        self.event_status |= event_bit;
        let summary = self.summary_bits();
        self.update_status(summary | status_byte::ERROR_QUEUE)
    }

    /// Pop the oldest SCPI error (`SYSTem:ERRor?`)
    pub fn next_error(&mut self) -> (ScpiError, Option<StatusChange>) {
        let error = self
            .errors
            .pop_front()
            .unwrap_or_else(|| ScpiError::new(0, "No error"));
        let change = if self.errors.is_empty() {
            self.clear_status_bits(status_byte::ERROR_QUEUE)
        } else {
            None
        };
        (error, change)
    }

    pub fn pending_errors(&self) -> usize {
        self.errors.len()
    }

    /// `*OPC`: report completion now, or when the running operation ends
    pub fn arm_operation_complete(&mut self, operation_running: bool) -> Option<StatusChange> {
        if operation_running {
            self.opc_armed = true;
            None
        } else {
            self.set_event(event_status::OPERATION_COMPLETE)
        }
    }

    /// A pending operation finished
    pub fn operation_finished(&mut self) -> Option<StatusChange> {
        if std::mem::take(&mut self.opc_armed) {
            self.set_event(event_status::OPERATION_COMPLETE)
        } else {
            None
        }
    }

    /// `*CLS`: clear event register, status byte, error queue and latch
    pub fn clear(&mut self) -> Option<StatusChange> {
        self.event_status = 0;
        self.errors.clear();
        self.opc_armed = false;
        self.request_service_latched = false;
        self.update_status(0)
    }

    /// `*RST` only forgets a pending `*OPC`; registers survive a reset
    pub fn reset(&mut self) {
        self.opc_armed = false;
    }

    fn summary_bits(&self) -> u8 {
        if self.event_status & self.event_enable != 0 {
            self.status | status_byte::EVENT_SUMMARY
        } else {
            self.status & !status_byte::EVENT_SUMMARY
        }
    }

    fn refresh_summary(&mut self) -> Option<StatusChange> {
        let status = self.summary_bits();
        self.update_status(status)
    }

    fn update_status(&mut self, status: u8) -> Option<StatusChange> {
        if status == self.status {
            return None;
        }
        self.status = status;
        self.evaluate_service_request().or(Some(StatusChange {
            status,
            service_requested: false,
        }))
    }

    fn evaluate_service_request(&mut self) -> Option<StatusChange> {
        if self.status & self.service_request_enable != 0 {
            self.request_service_latched = true;
            Some(StatusChange {
                status: self.status,
                service_requested: true,
            })
        } else {
            None
        }
    }
}
