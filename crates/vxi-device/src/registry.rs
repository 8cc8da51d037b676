//! Client/link registry
//!
//! Bookkeeping of which client owns which link, which device each link is
//! bound to and which link holds a lock lease. A single mutex guards both
//! indexes so every mutation is linearizable.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;
use vxi_core::{ClientId, ConnectionId, LinkId};

use crate::error::RegistryError;

/// A live link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Client {
    pub client_id: ClientId,
    pub link_id: LinkId,
    /// Instrument key the link is bound to
    pub device: String,
    /// Transport connection the link was created on
    pub connection: ConnectionId,
    pub lock_requested: bool,
    pub lock_timeout: Duration,
    pub lock_release: Instant,
    pub interrupt_enabled: bool,
    pub interrupt_handle: Vec<u8>,
}

impl Client {
    /// The lease is held while requested and not yet expired
    pub fn holds_lock(&self, now: Instant) -> bool {
        self.lock_requested && self.lock_release > now
    }
}

/// Parameters for [`ClientLinkRegistry::add_client`]
#[derive(Debug, Clone)]
pub struct NewClient {
    pub client_id: ClientId,
    pub link_id: LinkId,
    pub device: String,
    pub connection: ConnectionId,
    pub lock_requested: bool,
    pub lock_timeout: Duration,
}

#[derive(Debug, Default)]
struct RegistryState {
    links: HashMap<LinkId, Client>,
    clients: HashMap<ClientId, LinkId>,
    active: Option<LinkId>,
}

/// Registry of live links
#[derive(Debug, Default)]
pub struct ClientLinkRegistry {
    state: Mutex<RegistryState>,
}

impl ClientLinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new link and make it the active client
    pub fn add_client(&self, new: NewClient, now: Instant) -> Result<(), RegistryError> {
        let mut state = self.state.lock();
        if state.links.contains_key(&new.link_id) {
            return Err(RegistryError::LinkInUse(new.link_id));
        }
        if state.clients.contains_key(&new.client_id) {
            return Err(RegistryError::ClientAlreadyLinked(new.client_id));
        }

        let lock_release = if new.lock_requested {
            now + new.lock_timeout
        } else {
            now
        };
        let client = Client {
            client_id: new.client_id,
            link_id: new.link_id,
            device: new.device,
            connection: new.connection,
            lock_requested: new.lock_requested,
            lock_timeout: new.lock_timeout,
            lock_release,
            interrupt_enabled: false,
            interrupt_handle: Vec::new(),
        };

        debug!(
            link_id = %client.link_id,
            client_id = %client.client_id,
            device = %client.device,
            locked = client.lock_requested,
            "Link registered"
        );
        state.clients.insert(client.client_id, client.link_id);
        state.active = Some(client.link_id);
        state.links.insert(client.link_id, client);
        Ok(())
    }

    /// Make `link_id` the active client
    ///
    /// Clears the active client and returns false if the link is unknown.
    pub fn try_select_client(&self, link_id: LinkId) -> bool {
        let mut state = self.state.lock();
        if state.links.contains_key(&link_id) {
            state.active = Some(link_id);
            true
        } else {
            state.active = None;
            false
        }
    }

    /// Remove a link, releasing its lease and interrupt registration
    pub fn remove_client(&self, link_id: LinkId) -> Option<Client> {
        let mut state = self.state.lock();
        let client = state.links.remove(&link_id)?;
        state.clients.remove(&client.client_id);
        if state.active == Some(link_id) {
            state.active = None;
        }
        debug!(link_id = %link_id, client_id = %client.client_id, "Link removed");
        Some(client)
    }

    /// Remove every link created on `connection`
    pub fn remove_connection(&self, connection: ConnectionId) -> Vec<Client> {
        let mut state = self.state.lock();
        let doomed: Vec<LinkId> = state
            .links
            .values()
            .filter(|c| c.connection == connection)
            .map(|c| c.link_id)
            .collect();

        let mut removed = Vec::with_capacity(doomed.len());
        for link_id in doomed {
            if let Some(client) = state.links.remove(&link_id) {
                state.clients.remove(&client.client_id);
                if state.active == Some(link_id) {
                    state.active = None;
                }
                removed.push(client);
            }
        }
        removed
    }

    pub fn is_link_created(&self, link_id: LinkId) -> bool {
        self.state.lock().links.contains_key(&link_id)
    }

    pub fn is_client_linked(&self, client_id: ClientId) -> bool {
        self.state.lock().clients.contains_key(&client_id)
    }

    /// Register or clear the link's interrupt handle
    pub fn enable_interrupt(
        &self,
        link_id: LinkId,
        enable: bool,
        handle: &[u8],
    ) -> Result<(), RegistryError> {
        let mut state = self.state.lock();
        let client = state
            .links
            .get_mut(&link_id)
            .ok_or(RegistryError::UnknownLink(link_id))?;
        client.interrupt_enabled = enable;
        client.interrupt_handle = if enable { handle.to_vec() } else { Vec::new() };
        Ok(())
    }

    /// Link currently holding a lease on `device`, with its expiry
    pub fn lock_holder(&self, device: &str, now: Instant) -> Option<(LinkId, Instant)> {
        self.state
            .lock()
            .links
            .values()
            .find(|c| c.device == device && c.holds_lock(now))
            .map(|c| (c.link_id, c.lock_release))
    }

    /// Lease holder on `device` other than `requester`
    pub fn contending_holder(
        &self,
        device: &str,
        requester: Option<LinkId>,
        now: Instant,
    ) -> Option<(LinkId, Instant)> {
        self.state
            .lock()
            .links
            .values()
            .find(|c| c.device == device && Some(c.link_id) != requester && c.holds_lock(now))
            .map(|c| (c.link_id, c.lock_release))
    }

    /// Take (or renew) a lease of `timeout` on the link's device
    pub fn acquire_lock(
        &self,
        link_id: LinkId,
        timeout: Duration,
        now: Instant,
    ) -> Result<(), RegistryError> {
        let mut state = self.state.lock();
        let device = state
            .links
            .get(&link_id)
            .map(|c| c.device.clone())
            .ok_or(RegistryError::UnknownLink(link_id))?;

        if let Some(holder) = state
            .links
            .values()
            .find(|c| c.device == device && c.link_id != link_id && c.holds_lock(now))
        {
            return Err(RegistryError::LockedByAnotherLink {
                holder: holder.link_id,
            });
        }

        if let Some(client) = state.links.get_mut(&link_id) {
            client.lock_requested = true;
            client.lock_timeout = timeout;
            client.lock_release = now + timeout;
        }
        Ok(())
    }

    /// Drop the link's lease
    pub fn release_lock(&self, link_id: LinkId, now: Instant) -> Result<(), RegistryError> {
        let mut state = self.state.lock();
        let client = state
            .links
            .get_mut(&link_id)
            .ok_or(RegistryError::UnknownLink(link_id))?;
        if !client.holds_lock(now) {
            return Err(RegistryError::NoLockHeld(link_id));
        }
        client.lock_requested = false;
        client.lock_release = now;
        Ok(())
    }

    /// Copy of a link's record
    pub fn snapshot(&self, link_id: LinkId) -> Option<Client> {
        self.state.lock().links.get(&link_id).cloned()
    }

    /// Copy of the active client's record
    pub fn active_client(&self) -> Option<Client> {
        let state = self.state.lock();
        state.active.and_then(|id| state.links.get(&id).cloned())
    }

    /// Live link ids, sorted
    pub fn link_ids(&self) -> Vec<LinkId> {
        let mut ids: Vec<_> = self.state.lock().links.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.state.lock().links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().links.is_empty()
    }
}

/// Hands out link ids
///
/// Ids increase monotonically and wrap from `u32::MAX - 1` back to 1. The
/// sentinel 0 and `u32::MAX` are never produced, and ids still live are
/// skipped.
#[derive(Debug)]
pub struct LinkIdAllocator {
    next: AtomicU32,
}

impl Default for LinkIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

const MAX_ALLOCATION_ATTEMPTS: usize = 1 << 16;

impl LinkIdAllocator {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Allocator whose next candidate is `first`
    pub fn starting_at(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first),
        }
    }

    fn advance(current: u32) -> u32 {
        if current >= u32::MAX - 1 {
            1
        } else {
            current + 1
        }
    }

    /// Next id for which `in_use` is false
    pub fn allocate(&self, in_use: impl Fn(LinkId) -> bool) -> Result<LinkId, RegistryError> {
        for _ in 0..MAX_ALLOCATION_ATTEMPTS {
            let candidate = self
                .next
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| {
                    Some(Self::advance(cur))
                })
                .unwrap_or_else(|cur| cur);
            let id = LinkId(candidate);
            if id.is_none() || candidate == u32::MAX || in_use(id) {
                continue;
            }
            return Ok(id);
        }
        Err(RegistryError::Exhausted)
    }
}
