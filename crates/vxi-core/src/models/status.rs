//! IEEE 488.2 status register bits

/// Standard Event Status Register bits (`*ESR?`, `*ESE`)
pub mod event_status {
    pub const OPERATION_COMPLETE: u8 = 0x01;
    pub const REQUEST_CONTROL: u8 = 0x02;
    pub const QUERY_ERROR: u8 = 0x04;
    pub const DEVICE_ERROR: u8 = 0x08;
    pub const EXECUTION_ERROR: u8 = 0x10;
    pub const COMMAND_ERROR: u8 = 0x20;
    pub const USER_REQUEST: u8 = 0x40;
    pub const POWER_ON: u8 = 0x80;
}

/// Status byte bits (`*STB?`, `*SRE`, `device_readstb`)
pub mod status_byte {
    /// Error/event queue not empty
    pub const ERROR_QUEUE: u8 = 0x04;
    pub const QUESTIONABLE: u8 = 0x08;
    pub const MESSAGE_AVAILABLE: u8 = 0x10;
    /// Summary of `ESR & ESE`
    pub const EVENT_SUMMARY: u8 = 0x20;
    /// Request service (RQS) / master summary
    pub const REQUEST_SERVICE: u8 = 0x40;
    pub const OPERATION: u8 = 0x80;
}
