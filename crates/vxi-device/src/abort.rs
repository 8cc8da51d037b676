//! Abort channel
//!
//! The abort channel is served separately from the core channel so an
//! abort can reach an instrument while a core call on the same link is in
//! flight. It offers `device_abort` and nothing else.

use std::sync::Arc;

use vxi_core::{DeviceError, LinkId};

use crate::server::DeviceCore;

/// Cloneable handle exposing only `device_abort`
#[derive(Clone)]
pub struct AbortChannel {
    core: Arc<DeviceCore>,
}

impl AbortChannel {
    pub fn new(core: Arc<DeviceCore>) -> Self {
        Self { core }
    }

    /// Port advertised in `create_link` responses
    pub fn port(&self) -> u16 {
        self.core.config().abort_port
    }

    pub async fn device_abort(&self, link_id: LinkId) -> DeviceError {
        self.core.device_abort(link_id).await
    }
}
