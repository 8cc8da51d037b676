//! Device server errors

use thiserror::Error;
use vxi_core::{ClientId, DeviceErrorCode, LinkId};

/// Link registry errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Link id already assigned to a live link
    #[error("Link {0} already in use")]
    LinkInUse(LinkId),

    /// Client already owns a link
    #[error("Client {0} already has a link")]
    ClientAlreadyLinked(ClientId),

    /// No live link with this id
    #[error("Unknown link {0}")]
    UnknownLink(LinkId),

    /// Another link on the same device holds the lease
    #[error("Device locked by link {holder}")]
    LockedByAnotherLink { holder: LinkId },

    /// Unlock requested by a link that holds no lease
    #[error("Link {0} holds no lock")]
    NoLockHeld(LinkId),

    /// Every usable link id is taken
    #[error("No link ids available")]
    Exhausted,
}

impl From<RegistryError> for DeviceErrorCode {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::LinkInUse(_) | RegistryError::Exhausted => DeviceErrorCode::OutOfResources,
            RegistryError::ClientAlreadyLinked(_) => DeviceErrorCode::ChannelAlreadyEstablished,
            RegistryError::UnknownLink(_) => DeviceErrorCode::ChannelNotEstablished,
            RegistryError::LockedByAnotherLink { .. } => DeviceErrorCode::DeviceLockedByAnotherLink,
            RegistryError::NoLockHeld(_) => DeviceErrorCode::NoLockHeldByThisLink,
        }
    }
}

/// Service request delivery errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InterruptError {
    /// The receiving side is gone
    #[error("Interrupt channel closed")]
    Closed,
}

/// Server configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
