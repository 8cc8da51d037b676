//! Waiting out lock leases
//!
//! Leases are not OS mutexes: a waiter sleeps until the holder unlocks,
//! the holder's link goes away, the lease expires, or its own deadline
//! passes, whichever comes first.

use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};
use tracing::debug;
use vxi_core::LinkId;

use crate::error::RegistryError;
use crate::registry::ClientLinkRegistry;

/// Wakes lock waiters when a lease is released
#[derive(Debug, Default)]
pub struct LockWaiter {
    released: Notify,
}

impl LockWaiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wake every waiter to re-check the registry
    pub fn notify_released(&self) {
        self.released.notify_waiters();
    }

    /// Wait until no link other than `requester` holds a lease on `device`
    ///
    /// Without `wait` a contended device fails immediately. With `wait`
    /// the call gives up at `deadline`.
    pub async fn wait_for_release(
        &self,
        registry: &ClientLinkRegistry,
        device: &str,
        requester: Option<LinkId>,
        wait: bool,
        deadline: Instant,
    ) -> Result<(), RegistryError> {
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let now = Instant::now();
            let Some((holder, expiry)) = registry.contending_holder(device, requester, now) else {
                return Ok(());
            };
            if !wait || now >= deadline {
                return Err(RegistryError::LockedByAnotherLink { holder });
            }

            debug!(device, holder = %holder, "Waiting for lock release");
            tokio::select! {
                _ = &mut notified => {}
                _ = sleep_until(expiry.min(deadline)) => {}
            }
        }
    }

    /// Wait for contention to clear, then take the lease
    pub async fn acquire(
        &self,
        registry: &ClientLinkRegistry,
        link_id: LinkId,
        device: &str,
        wait: bool,
        deadline: Instant,
        lease: std::time::Duration,
    ) -> Result<(), RegistryError> {
        loop {
            self.wait_for_release(registry, device, Some(link_id), wait, deadline)
                .await?;
            match registry.acquire_lock(link_id, lease, Instant::now()) {
                // Someone else got in between; wait again
                Err(RegistryError::LockedByAnotherLink { .. }) => continue,
                other => return other,
            }
        }
    }
}
