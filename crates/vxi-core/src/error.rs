//! Error codes returned in-band by every VXI-11 procedure

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for instrument operations
pub type InstrumentResult<T> = Result<T, InstrumentError>;

/// VXI-11 device error codes
///
/// Every procedure reports exactly one of these in its response record.
/// Numeric values follow the VXI-11 `Device_ErrorCode` table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum DeviceErrorCode {
    #[default]
    NoError = 0,
    SyntaxError = 1,
    DeviceNotAccessible = 3,
    InvalidLinkIdentifier = 4,
    ParameterError = 5,
    ChannelNotEstablished = 6,
    OperationNotSupported = 8,
    OutOfResources = 9,
    DeviceLockedByAnotherLink = 11,
    NoLockHeldByThisLink = 12,
    IoTimeout = 15,
    IoError = 17,
    Abort = 23,
    ChannelAlreadyEstablished = 29,
}

impl DeviceErrorCode {
    /// Numeric wire value
    pub fn code(self) -> u32 {
        self as u32
    }

    /// True for [`DeviceErrorCode::NoError`]
    pub fn is_ok(self) -> bool {
        self == DeviceErrorCode::NoError
    }

    /// Human-readable description
    pub fn description(self) -> &'static str {
        match self {
            DeviceErrorCode::NoError => "no error",
            DeviceErrorCode::SyntaxError => "syntax error",
            DeviceErrorCode::DeviceNotAccessible => "device not accessible",
            DeviceErrorCode::InvalidLinkIdentifier => "invalid link identifier",
            DeviceErrorCode::ParameterError => "parameter error",
            DeviceErrorCode::ChannelNotEstablished => "channel not established",
            DeviceErrorCode::OperationNotSupported => "operation not supported",
            DeviceErrorCode::OutOfResources => "out of resources",
            DeviceErrorCode::DeviceLockedByAnotherLink => "device locked by another link",
            DeviceErrorCode::NoLockHeldByThisLink => "no lock held by this link",
            DeviceErrorCode::IoTimeout => "I/O timeout",
            DeviceErrorCode::IoError => "I/O error",
            DeviceErrorCode::Abort => "abort",
            DeviceErrorCode::ChannelAlreadyEstablished => "channel already established",
        }
    }
}

impl std::fmt::Display for DeviceErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.description(), self.code())
    }
}

impl TryFrom<u32> for DeviceErrorCode {
    type Error = u32;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        let code = match value {
            0 => DeviceErrorCode::NoError,
            1 => DeviceErrorCode::SyntaxError,
            3 => DeviceErrorCode::DeviceNotAccessible,
            4 => DeviceErrorCode::InvalidLinkIdentifier,
            5 => DeviceErrorCode::ParameterError,
            6 => DeviceErrorCode::ChannelNotEstablished,
            8 => DeviceErrorCode::OperationNotSupported,
            9 => DeviceErrorCode::OutOfResources,
            11 => DeviceErrorCode::DeviceLockedByAnotherLink,
            12 => DeviceErrorCode::NoLockHeldByThisLink,
            15 => DeviceErrorCode::IoTimeout,
            17 => DeviceErrorCode::IoError,
            23 => DeviceErrorCode::Abort,
            29 => DeviceErrorCode::ChannelAlreadyEstablished,
            other => return Err(other),
        };
        Ok(code)
    }
}

/// Errors raised inside an instrument while handling a command
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InstrumentError {
    /// Command header not present in the command table
    #[error("Undefined header: {0}")]
    UndefinedHeader(String),

    /// Header exists but not as a query (or not as a command)
    #[error("Header {0} not valid in this form")]
    KindMismatch(String),

    /// Handler rejected its arguments
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Numeric argument outside the accepted range
    #[error("Data out of range: {0}")]
    DataOutOfRange(String),

    /// Hardware or background task failure
    #[error("I/O error: {0}")]
    Io(String),

    /// Operation not offered by this instrument
    #[error("Operation not supported: {0}")]
    NotSupported(String),
}

impl From<InstrumentError> for DeviceErrorCode {
    fn from(err: InstrumentError) -> Self {
        match err {
            InstrumentError::UndefinedHeader(_) | InstrumentError::KindMismatch(_) => {
                DeviceErrorCode::SyntaxError
            }
            InstrumentError::InvalidParameter(_) | InstrumentError::DataOutOfRange(_) => {
                DeviceErrorCode::ParameterError
            }
            InstrumentError::Io(_) => DeviceErrorCode::IoError,
            InstrumentError::NotSupported(_) => DeviceErrorCode::OperationNotSupported,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_wire_values() {
        assert_eq!(DeviceErrorCode::NoError.code(), 0);
        assert_eq!(DeviceErrorCode::DeviceLockedByAnotherLink.code(), 11);
        assert_eq!(DeviceErrorCode::IoTimeout.code(), 15);
        assert_eq!(DeviceErrorCode::ChannelAlreadyEstablished.code(), 29);
    }

    #[test]
    fn test_try_from_round_trips_known_codes() {
        for value in [0u32, 1, 3, 4, 5, 6, 8, 9, 11, 12, 15, 17, 23, 29] {
            let code = DeviceErrorCode::try_from(value).unwrap();
            assert_eq!(code.code(), value);
        }
        assert_eq!(DeviceErrorCode::try_from(2), Err(2));
        assert_eq!(DeviceErrorCode::try_from(21), Err(21));
        assert_eq!(DeviceErrorCode::try_from(100), Err(100));
    }

    #[test]
    fn test_instrument_error_mapping() {
        let code: DeviceErrorCode = InstrumentError::UndefinedHeader("FOO:BAR".into()).into();
        assert_eq!(code, DeviceErrorCode::SyntaxError);

        let code: DeviceErrorCode = InstrumentError::KindMismatch("*IDN".into()).into();
        assert_eq!(code, DeviceErrorCode::SyntaxError);

        let code: DeviceErrorCode = InstrumentError::InvalidParameter("x".into()).into();
        assert_eq!(code, DeviceErrorCode::ParameterError);

        let code: DeviceErrorCode = InstrumentError::Io("stuck".into()).into();
        assert_eq!(code, DeviceErrorCode::IoError);

        let code: DeviceErrorCode = InstrumentError::NotSupported("trigger".into()).into();
        assert_eq!(code, DeviceErrorCode::OperationNotSupported);
    }

    #[test]
    fn test_display() {
        assert_eq!(
            DeviceErrorCode::ChannelNotEstablished.to_string(),
            "channel not established (6)"
        );
    }
}
