//! VXI-11 core channel procedures
//!
//! Every procedure follows the same steps:
//!
//! 1. unknown link: `ChannelNotEstablished`
//! 2. no instrument bound: `DeviceNotAccessible`
//! 3. select the link as active client
//! 4. for lock-sensitive procedures, wait for (or fail on) a lease held by
//!    another link on the same device
//! 5. delegate to the instrument or its bus interface
//! 6. remember the result as the last device error
//!
//! Step 5 runs as an exchange: service requests the instrument raises
//! during the call are sent on behalf of the calling link. A request raised
//! later by a background operation goes to the link that started it.
//!
//! No procedure returns a Rust error; every outcome is encoded in the
//! response record.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use vxi_core::{
    ClientId, ConnectionId, CreateLinkParams, CreateLinkResponse, DeviceAddress, DeviceDocmdParams,
    DeviceDocmdResponse, DeviceEnableSrqParams, DeviceError, DeviceErrorCode,
    DeviceGenericParams, DeviceLockParams, DeviceReadParams, DeviceReadResponse,
    DeviceReadStbResponse, DeviceWriteParams, DeviceWriteResponse, Instrument, InstrumentEvent,
    InstrumentFactory, LinkId, OperationFlags, ServiceRequest, StatusSource,
    MAX_INTERRUPT_HANDLE_LEN,
};

use crate::abort::AbortChannel;
use crate::config::DeviceServerConfig;
use crate::conversation::{split_commands, Conversation};
use crate::error::RegistryError;
use crate::lock::LockWaiter;
use crate::registry::{Client, ClientLinkRegistry, LinkIdAllocator, NewClient};

fn millis(ms: u32) -> Duration {
    Duration::from_millis(ms as u64)
}

/// A cached instrument
struct InstrumentSlot {
    instrument: Arc<dyn Instrument>,
    /// Held while a procedure delegates to the instrument
    exchange: Mutex<()>,
    /// Running operation id and the link whose call started it
    operation_owner: Mutex<Option<(u64, LinkId)>>,
}

/// Instrument and conversation bound to a link
#[derive(Clone)]
struct LinkBinding {
    slot: Arc<InstrumentSlot>,
    conversation: Arc<Conversation>,
}

/// Push a service request to `link_id` if it has interrupts enabled
fn raise_service_request(
    registry: &ClientLinkRegistry,
    requests: &broadcast::Sender<ServiceRequest>,
    link_id: LinkId,
    status: u8,
) {
    let Some(client) = registry.snapshot(link_id) else {
        debug!(link_id = %link_id, status, "Service request for a closed link dropped");
        return;
    };
    if !client.interrupt_enabled {
        return;
    }
    debug!(device = %client.device, link_id = %link_id, status, "Service requested");
    let _ = requests.send(ServiceRequest {
        link_id,
        device: client.device,
        handle: client.interrupt_handle,
        status,
    });
}

/// Lock handling for step 4
#[derive(Clone, Copy)]
enum LockPolicy {
    Ignore,
    Respect { flags: OperationFlags, timeout_ms: u32 },
}

/// The device server core
pub struct DeviceCore {
    config: DeviceServerConfig,
    factory: Arc<dyn InstrumentFactory>,
    registry: Arc<ClientLinkRegistry>,
    link_ids: LinkIdAllocator,
    locks: LockWaiter,
    /// Instruments by key, created on first use
    instruments: Mutex<HashMap<String, Arc<InstrumentSlot>>>,
    links: Mutex<HashMap<LinkId, LinkBinding>>,
    /// Serialises link-table mutations in multi-client mode
    server_lock: tokio::sync::Mutex<()>,
    last_error: Mutex<DeviceErrorCode>,
    service_requests: broadcast::Sender<ServiceRequest>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
}

impl DeviceCore {
    pub fn new(config: DeviceServerConfig, factory: Arc<dyn InstrumentFactory>) -> Self {
        let (service_requests, _) = broadcast::channel(config.service_request_capacity.max(1));
        info!(
            mode = ?config.mode,
            max_receive_size = config.max_receive_size,
            abort_port = config.abort_port,
            "Device core created"
        );
        Self {
            config,
            factory,
            registry: Arc::new(ClientLinkRegistry::new()),
            link_ids: LinkIdAllocator::new(),
            locks: LockWaiter::new(),
            instruments: Mutex::new(HashMap::new()),
            links: Mutex::new(HashMap::new()),
            server_lock: tokio::sync::Mutex::new(()),
            last_error: Mutex::new(DeviceErrorCode::NoError),
            service_requests,
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &DeviceServerConfig {
        &self.config
    }

    pub fn registry(&self) -> &ClientLinkRegistry {
        &self.registry
    }

    /// Result code of the most recent procedure
    pub fn last_device_error(&self) -> DeviceErrorCode {
        *self.last_error.lock()
    }

    /// Subscribe to service requests for the interrupt channel
    pub fn subscribe_service_requests(&self) -> broadcast::Receiver<ServiceRequest> {
        self.service_requests.subscribe()
    }

    /// Handle for the abort channel
    pub fn abort_channel(self: &Arc<Self>) -> AbortChannel {
        AbortChannel::new(self.clone())
    }

    /// Instrument already created for `device`, if any
    pub fn instrument(&self, device: &str) -> Option<Arc<dyn Instrument>> {
        let key = DeviceAddress::parse(device).instrument_key();
        self.instruments
            .lock()
            .get(&key)
            .map(|slot| slot.instrument.clone())
    }

    fn record(&self, procedure: &'static str, link_id: LinkId, code: DeviceErrorCode) -> DeviceErrorCode {
        *self.last_error.lock() = code;
        if code.is_ok() {
            debug!(procedure, link_id = %link_id, "Completed");
        } else {
            debug!(procedure, link_id = %link_id, error = %code, "Failed");
        }
        code
    }

    async fn serialize(&self) -> Option<MutexGuard<'_, ()>> {
        if self.config.is_single_client() {
            None
        } else {
            Some(self.server_lock.lock().await)
        }
    }

    /// Steps 1 to 4 of the procedure pattern
    async fn prepare(
        &self,
        link_id: LinkId,
        policy: LockPolicy,
    ) -> Result<(Client, LinkBinding), DeviceErrorCode> {
        let client = self
            .registry
            .snapshot(link_id)
            .ok_or(DeviceErrorCode::ChannelNotEstablished)?;
        let binding = self
            .links
            .lock()
            .get(&link_id)
            .cloned()
            .ok_or(DeviceErrorCode::DeviceNotAccessible)?;
        if !self.registry.try_select_client(link_id) {
            return Err(DeviceErrorCode::ChannelNotEstablished);
        }

        if let LockPolicy::Respect { flags, timeout_ms } = policy {
            let deadline = Instant::now() + millis(timeout_ms);
            self.locks
                .wait_for_release(
                    &self.registry,
                    &client.device,
                    Some(link_id),
                    flags.wait_lock(),
                    deadline,
                )
                .await?;
        }
        Ok((client, binding))
    }

    /// Find or create the instrument serving `address`
    fn resolve_instrument(&self, address: &DeviceAddress) -> Option<Arc<InstrumentSlot>> {
        let key = address.instrument_key();
        let mut instruments = self.instruments.lock();
        if let Some(slot) = instruments.get(&key) {
            return Some(slot.clone());
        }
        let slot = Arc::new(InstrumentSlot {
            instrument: self.factory.create(address)?,
            exchange: Mutex::new(()),
            operation_owner: Mutex::new(None),
        });
        self.spawn_listener(key.clone(), &slot);
        instruments.insert(key, slot.clone());
        Some(slot)
    }

    /// Send service requests raised by background operations to the link
    /// that started the operation
    fn spawn_listener(&self, device: String, slot: &Arc<InstrumentSlot>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(device = %device, "No runtime, service requests disabled");
            return;
        };
        let mut events = slot.instrument.subscribe();
        let slot: Weak<InstrumentSlot> = Arc::downgrade(slot);
        let registry = self.registry.clone();
        let requests = self.service_requests.clone();

        let handle = runtime.spawn(async move {
            loop {
                match events.recv().await {
                    Ok(InstrumentEvent::StatusChanged {
                        status,
                        service_requested: true,
                        source: StatusSource::Operation(id),
                    }) => {
                        let Some(slot) = slot.upgrade() else {
                            break;
                        };
                        // Wait out an exchange still recording the owner
                        let owner = {
                            let _exchange = slot.exchange.lock();
                            *slot.operation_owner.lock()
                        };
                        match owner {
                            Some((owner_id, link_id)) if owner_id == id => {
                                raise_service_request(&registry, &requests, link_id, status);
                            }
                            _ => debug!(device = %device, operation = id, "No owner for service request"),
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => {
                        warn!(device = %device, skipped = n, "Instrument event listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        self.listeners.lock().push(handle);
    }

    /// Step 5: run `f` against the link's instrument
    ///
    /// Service requests raised during the call go to `link_id`, and so
    /// does ownership of any operation the call started.
    fn exchange<T>(
        &self,
        link_id: LinkId,
        binding: &LinkBinding,
        f: impl FnOnce(&dyn Instrument) -> T,
    ) -> T {
        let slot = &binding.slot;
        let _exchange = slot.exchange.lock();
        let mut events = slot.instrument.subscribe();
        let value = f(slot.instrument.as_ref());

        loop {
            match events.try_recv() {
                Ok(InstrumentEvent::OperationStarted { id }) => {
                    *slot.operation_owner.lock() = Some((id, link_id));
                }
                Ok(InstrumentEvent::StatusChanged {
                    status,
                    service_requested: true,
                    source: StatusSource::Command,
                }) => raise_service_request(&self.registry, &self.service_requests, link_id, status),
                Ok(_) => {}
                Err(TryRecvError::Lagged(n)) => {
                    warn!(link_id = %link_id, skipped = n, "Exchange missed instrument events");
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        value
    }

    /// `create_link` from an in-process caller
    pub async fn create_link(&self, params: CreateLinkParams) -> CreateLinkResponse {
        self.create_link_on(ConnectionId::LOCAL, params).await
    }

    /// `create_link` arriving over transport connection `connection`
    pub async fn create_link_on(
        &self,
        connection: ConnectionId,
        params: CreateLinkParams,
    ) -> CreateLinkResponse {
        let mut response = CreateLinkResponse {
            error: DeviceErrorCode::NoError,
            link_id: LinkId::NONE,
            abort_port: self.config.abort_port,
            max_receive_size: self.config.max_receive_size,
        };
        match self.open_link(connection, &params).await {
            Ok((link_id, error)) => {
                response.link_id = link_id;
                response.error = error;
            }
            Err(error) => response.error = error,
        }
        self.record("create_link", response.link_id, response.error);
        response
    }

    async fn open_link(
        &self,
        connection: ConnectionId,
        params: &CreateLinkParams,
    ) -> Result<(LinkId, DeviceErrorCode), DeviceErrorCode> {
        let client_id: ClientId = params.client_id;
        if self.registry.is_client_linked(client_id) {
            return Err(DeviceErrorCode::ChannelAlreadyEstablished);
        }
        if self.config.is_single_client() && !self.registry.is_empty() {
            warn!(client_id = %client_id, "Single-client server already has a link");
            return Err(DeviceErrorCode::OutOfResources);
        }

        let address = DeviceAddress::parse(&params.device);
        let slot = self.resolve_instrument(&address).ok_or_else(|| {
            warn!(device = %params.device, "No instrument for device");
            DeviceErrorCode::DeviceNotAccessible
        })?;
        let device = address.instrument_key();
        let lease = millis(params.lock_timeout_ms);
        let deadline = Instant::now() + lease;

        let link_id = loop {
            if params.lock_device {
                self.locks
                    .wait_for_release(&self.registry, &device, None, true, deadline)
                    .await?;
            }

            let _guard = self.serialize().await;
            if self.config.is_single_client() && !self.registry.is_empty() {
                return Err(DeviceErrorCode::OutOfResources);
            }
            let link_id = self
                .link_ids
                .allocate(|id| self.registry.is_link_created(id))?;
            self.registry.add_client(
                NewClient {
                    client_id,
                    link_id,
                    device: device.clone(),
                    connection,
                    lock_requested: false,
                    lock_timeout: lease,
                },
                Instant::now(),
            )?;
            if !params.lock_device {
                break link_id;
            }
            match self.registry.acquire_lock(link_id, lease, Instant::now()) {
                Ok(()) => break link_id,
                Err(RegistryError::LockedByAnotherLink { holder }) => {
                    // Lost the lease to `holder` after the wait; wait again
                    self.registry.remove_client(link_id);
                    debug!(client_id = %client_id, holder = %holder, "Lock taken before link creation");
                }
                Err(e) => {
                    self.registry.remove_client(link_id);
                    return Err(e.into());
                }
            }
        };

        self.links.lock().insert(
            link_id,
            LinkBinding {
                slot: slot.clone(),
                conversation: Arc::new(Conversation::new()),
            },
        );
        slot.instrument.set_remote_enabled(true);

        info!(
            link_id = %link_id,
            client_id = %client_id,
            device = %params.device,
            connection = %connection,
            locked = params.lock_device,
            "Link created"
        );

        let error = if address.valid {
            DeviceErrorCode::NoError
        } else {
            warn!(link_id = %link_id, device = %params.device, "Device name does not parse");
            DeviceErrorCode::InvalidLinkIdentifier
        };
        Ok((link_id, error))
    }

    /// `destroy_link`
    pub async fn destroy_link(&self, link_id: LinkId) -> DeviceError {
        let _guard = self.serialize().await;
        let code = match self.registry.remove_client(link_id) {
            Some(client) => {
                self.links.lock().remove(&link_id);
                self.locks.notify_released();
                info!(link_id = %link_id, client_id = %client.client_id, "Link destroyed");
                DeviceErrorCode::NoError
            }
            None => DeviceErrorCode::ChannelNotEstablished,
        };
        self.record("destroy_link", link_id, code).into()
    }

    /// Tear down every link opened over a broken transport connection
    ///
    /// Returns the number of links released.
    pub async fn connection_lost(&self, connection: ConnectionId) -> usize {
        let _guard = self.serialize().await;
        let removed = self.registry.remove_connection(connection);
        {
            let mut links = self.links.lock();
            for client in &removed {
                links.remove(&client.link_id);
            }
        }
        if !removed.is_empty() {
            self.locks.notify_released();
        }
        info!(connection = %connection, links = removed.len(), "Connection lost");
        removed.len()
    }

    /// `device_write`
    ///
    /// The returned size is the full payload length even when a command
    /// part way through fails.
    pub async fn device_write(&self, params: DeviceWriteParams) -> DeviceWriteResponse {
        let link_id = params.link_id;
        let policy = LockPolicy::Respect {
            flags: params.flags,
            timeout_ms: params.lock_timeout_ms,
        };
        let (_, binding) = match self.prepare(link_id, policy).await {
            Ok(prepared) => prepared,
            Err(code) => {
                return DeviceWriteResponse {
                    error: self.record("device_write", link_id, code),
                    size: 0,
                }
            }
        };

        if params.data.len() > self.config.max_receive_size as usize {
            warn!(
                link_id = %link_id,
                len = params.data.len(),
                max = self.config.max_receive_size,
                "Write exceeds maximum receive size"
            );
            return DeviceWriteResponse {
                error: self.record("device_write", link_id, DeviceErrorCode::ParameterError),
                size: 0,
            };
        }

        let payload = String::from_utf8_lossy(&params.data);
        let conversation = &binding.conversation;
        conversation.begin();

        let (replies, failure) = self.exchange(link_id, &binding, |instrument| {
            let mut replies = Vec::new();
            for command in split_commands(&payload) {
                match instrument.execute(command) {
                    Ok(Some(reply)) => replies.push(reply),
                    Ok(None) => {}
                    Err(e) => return (replies, Some(DeviceErrorCode::from(e))),
                }
            }
            (replies, None)
        });

        let code = match failure {
            Some(code) => {
                conversation.fail(code);
                code
            }
            None => {
                let reply = if replies.is_empty() {
                    Vec::new()
                } else {
                    format!("{}\n", replies.join(";")).into_bytes()
                };
                conversation.complete(reply);
                DeviceErrorCode::NoError
            }
        };

        DeviceWriteResponse {
            error: self.record("device_write", link_id, code),
            size: params.data.len() as u32,
        }
    }

    /// `device_read`
    pub async fn device_read(&self, params: DeviceReadParams) -> DeviceReadResponse {
        let link_id = params.link_id;
        let policy = LockPolicy::Respect {
            flags: params.flags,
            timeout_ms: params.lock_timeout_ms,
        };
        let (_, binding) = match self.prepare(link_id, policy).await {
            Ok(prepared) => prepared,
            Err(code) => {
                return DeviceReadResponse {
                    error: self.record("device_read", link_id, code),
                    ..Default::default()
                }
            }
        };

        let term_char = params.flags.term_char_set().then_some(params.term_char);
        let outcome = binding
            .conversation
            .read(
                params.request_size as usize,
                millis(params.io_timeout_ms),
                term_char,
            )
            .await;

        DeviceReadResponse {
            error: self.record("device_read", link_id, outcome.error),
            reason: outcome.reason,
            data: outcome.data,
        }
    }

    /// `device_readstb`: destructive status byte read
    pub async fn device_readstb(&self, params: DeviceGenericParams) -> DeviceReadStbResponse {
        let link_id = params.link_id;
        match self.prepare(link_id, Self::respect(&params)).await {
            Ok((_, binding)) => DeviceReadStbResponse {
                stb: self.exchange(link_id, &binding, |instrument| instrument.read_status_byte()),
                error: self.record("device_readstb", link_id, DeviceErrorCode::NoError),
            },
            Err(code) => DeviceReadStbResponse {
                error: self.record("device_readstb", link_id, code),
                stb: 0,
            },
        }
    }

    /// `device_trigger`
    pub async fn device_trigger(&self, params: DeviceGenericParams) -> DeviceError {
        let link_id = params.link_id;
        let code = match self.prepare(link_id, Self::respect(&params)).await {
            Ok((_, binding)) => match self.exchange(link_id, &binding, |instrument| instrument.trigger()) {
                Ok(()) => DeviceErrorCode::NoError,
                Err(e) => e.into(),
            },
            Err(code) => code,
        };
        self.record("device_trigger", link_id, code).into()
    }

    /// `device_clear`: selected device clear, drops pending output
    pub async fn device_clear(&self, params: DeviceGenericParams) -> DeviceError {
        let link_id = params.link_id;
        let code = match self.prepare(link_id, Self::respect(&params)).await {
            Ok((_, binding)) => {
                let _guard = self.serialize().await;
                binding.conversation.reset();
                match self.exchange(link_id, &binding, |instrument| instrument.clear()) {
                    Ok(()) => DeviceErrorCode::NoError,
                    Err(e) => e.into(),
                }
            }
            Err(code) => code,
        };
        self.record("device_clear", link_id, code).into()
    }

    /// `device_remote`
    pub async fn device_remote(&self, params: DeviceGenericParams) -> DeviceError {
        self.set_remote("device_remote", params, true).await
    }

    /// `device_local`
    pub async fn device_local(&self, params: DeviceGenericParams) -> DeviceError {
        self.set_remote("device_local", params, false).await
    }

    async fn set_remote(
        &self,
        procedure: &'static str,
        params: DeviceGenericParams,
        remote: bool,
    ) -> DeviceError {
        let link_id = params.link_id;
        let code = match self.prepare(link_id, Self::respect(&params)).await {
            Ok((_, binding)) => {
                self.exchange(link_id, &binding, |instrument| {
                    instrument.set_remote_enabled(remote)
                });
                DeviceErrorCode::NoError
            }
            Err(code) => code,
        };
        self.record(procedure, link_id, code).into()
    }

    /// `device_lock`: take or renew a lease of `lock_timeout_ms`
    pub async fn device_lock(&self, params: DeviceLockParams) -> DeviceError {
        let link_id = params.link_id;
        let code = match self.prepare(link_id, LockPolicy::Ignore).await {
            Ok((client, _)) => {
                let lease = millis(params.lock_timeout_ms);
                match self
                    .locks
                    .acquire(
                        &self.registry,
                        link_id,
                        &client.device,
                        params.flags.wait_lock(),
                        Instant::now() + lease,
                        lease,
                    )
                    .await
                {
                    Ok(()) => {
                        info!(link_id = %link_id, device = %client.device, lease_ms = params.lock_timeout_ms, "Lock acquired");
                        DeviceErrorCode::NoError
                    }
                    Err(e) => e.into(),
                }
            }
            Err(code) => code,
        };
        self.record("device_lock", link_id, code).into()
    }

    /// `device_unlock`
    pub async fn device_unlock(&self, link_id: LinkId) -> DeviceError {
        let code = match self.prepare(link_id, LockPolicy::Ignore).await {
            Ok(_) => match self.registry.release_lock(link_id, Instant::now()) {
                Ok(()) => {
                    self.locks.notify_released();
                    info!(link_id = %link_id, "Lock released");
                    DeviceErrorCode::NoError
                }
                Err(e) => e.into(),
            },
            Err(code) => code,
        };
        self.record("device_unlock", link_id, code).into()
    }

    /// `device_enable_srq`
    pub async fn device_enable_srq(&self, params: DeviceEnableSrqParams) -> DeviceError {
        let link_id = params.link_id;
        let code = match self.prepare(link_id, LockPolicy::Ignore).await {
            Ok(_) if params.handle.len() > MAX_INTERRUPT_HANDLE_LEN => {
                warn!(link_id = %link_id, len = params.handle.len(), "Interrupt handle too long");
                DeviceErrorCode::ParameterError
            }
            Ok(_) => match self
                .registry
                .enable_interrupt(link_id, params.enable, &params.handle)
            {
                Ok(()) => {
                    debug!(link_id = %link_id, enable = params.enable, "Interrupts updated");
                    DeviceErrorCode::NoError
                }
                Err(e) => e.into(),
            },
            Err(code) => code,
        };
        self.record("device_enable_srq", link_id, code).into()
    }

    /// `device_docmd`: pass a bus command to the instrument's interface
    pub async fn device_docmd(&self, params: DeviceDocmdParams) -> DeviceDocmdResponse {
        let link_id = params.link_id;
        let policy = LockPolicy::Respect {
            flags: params.flags,
            timeout_ms: params.lock_timeout_ms,
        };
        let (code, data_out) = match self.prepare(link_id, policy).await {
            Ok((_, binding)) => self.exchange(link_id, &binding, |instrument| {
                match instrument.interface() {
                    Some(interface) => (
                        DeviceErrorCode::NoError,
                        interface.execute(params.cmd, params.network_order, &params.data_in),
                    ),
                    None => (DeviceErrorCode::OperationNotSupported, Vec::new()),
                }
            }),
            Err(code) => (code, Vec::new()),
        };
        DeviceDocmdResponse {
            error: self.record("device_docmd", link_id, code),
            data_out,
        }
    }

    /// `device_abort`: stop the instrument's long operation
    pub async fn device_abort(&self, link_id: LinkId) -> DeviceError {
        let code = match self.prepare(link_id, LockPolicy::Ignore).await {
            Ok((_, binding)) => {
                let timeout = Duration::from_millis(self.config.abort_timeout_ms);
                match binding.slot.instrument.abort(timeout).await {
                    Ok(()) => DeviceErrorCode::NoError,
                    Err(e) => {
                        warn!(link_id = %link_id, error = %e, "Abort failed");
                        e.into()
                    }
                }
            }
            Err(code) => code,
        };
        self.record("device_abort", link_id, code).into()
    }

    fn respect(params: &DeviceGenericParams) -> LockPolicy {
        LockPolicy::Respect {
            flags: params.flags,
            timeout_ms: params.lock_timeout_ms,
        }
    }
}

impl Drop for DeviceCore {
    fn drop(&mut self) {
        for handle in self.listeners.lock().drain(..) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use vxi_core::ReadReason;
    use vxi_instrument::{GpibConfig, InstrumentConfig, SimulatedInstrumentFactory};

    fn factory() -> Arc<SimulatedInstrumentFactory> {
        let mut inst = InstrumentConfig::named("inst0");
        inst.identity = "ACME,Model 42,SN0001,1.0".to_string();
        let mut gpib = InstrumentConfig::named("gpib0");
        gpib.gpib = Some(GpibConfig::default());
        Arc::new(SimulatedInstrumentFactory::new([inst, gpib]))
    }

    fn core(config: DeviceServerConfig) -> DeviceCore {
        DeviceCore::new(config, factory())
    }

    fn link_params(client: u32, device: &str) -> CreateLinkParams {
        CreateLinkParams {
            client_id: ClientId(client),
            lock_device: false,
            lock_timeout_ms: 0,
            device: device.to_string(),
        }
    }

    fn write(link_id: LinkId, data: &[u8]) -> DeviceWriteParams {
        DeviceWriteParams {
            link_id,
            io_timeout_ms: 1000,
            lock_timeout_ms: 0,
            flags: OperationFlags::END,
            data: data.to_vec(),
        }
    }

    fn read(link_id: LinkId) -> DeviceReadParams {
        DeviceReadParams {
            link_id,
            request_size: 1024,
            io_timeout_ms: 1000,
            lock_timeout_ms: 0,
            flags: OperationFlags::NONE,
            term_char: 0,
        }
    }

    fn generic(link_id: LinkId) -> DeviceGenericParams {
        DeviceGenericParams {
            link_id,
            flags: OperationFlags::NONE,
            lock_timeout_ms: 0,
            io_timeout_ms: 1000,
        }
    }

    #[tokio::test]
    async fn test_create_and_destroy_link() {
        let core = core(DeviceServerConfig::default());
        let response = core.create_link(link_params(1, "inst0")).await;
        assert_eq!(response.error, DeviceErrorCode::NoError);
        assert!(!response.link_id.is_none());
        assert_eq!(response.max_receive_size, 1024);
        assert!(core.registry().is_link_created(response.link_id));
        assert!(core.instrument("inst0").unwrap().is_remote_enabled());

        let destroyed = core.destroy_link(response.link_id).await;
        assert_eq!(destroyed.error, DeviceErrorCode::NoError);
        assert!(core.registry().is_empty());
        assert_eq!(
            core.destroy_link(response.link_id).await.error,
            DeviceErrorCode::ChannelNotEstablished
        );
        assert_eq!(core.last_device_error(), DeviceErrorCode::ChannelNotEstablished);
    }

    #[tokio::test]
    async fn test_create_link_rejections() {
        let core = core(DeviceServerConfig::default());
        assert_eq!(
            core.create_link(link_params(1, "inst9")).await.error,
            DeviceErrorCode::DeviceNotAccessible
        );
        assert!(core.registry().is_empty());

        core.create_link(link_params(1, "inst0")).await;
        let again = core.create_link(link_params(1, "inst0")).await;
        assert_eq!(again.error, DeviceErrorCode::ChannelAlreadyEstablished);
        assert!(again.link_id.is_none());
        assert_eq!(core.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_name_still_links() {
        let core = core(DeviceServerConfig::default());
        let response = core.create_link(link_params(1, "gpib0,abc")).await;
        assert_eq!(response.error, DeviceErrorCode::InvalidLinkIdentifier);
        assert!(core.registry().is_link_created(response.link_id));
    }

    #[tokio::test]
    async fn test_single_client_mode() {
        let config = DeviceServerConfig {
            mode: crate::config::ServerMode::SingleClient,
            ..Default::default()
        };
        let core = core(config);
        let first = core.create_link(link_params(1, "inst0")).await;
        assert_eq!(first.error, DeviceErrorCode::NoError);
        assert_eq!(
            core.create_link(link_params(2, "inst0")).await.error,
            DeviceErrorCode::OutOfResources
        );
        core.destroy_link(first.link_id).await;
        assert_eq!(
            core.create_link(link_params(2, "inst0")).await.error,
            DeviceErrorCode::NoError
        );
    }

    #[tokio::test]
    async fn test_write_then_read_identity() {
        let core = core(DeviceServerConfig::default());
        let link = core.create_link(link_params(1, "inst0")).await.link_id;

        let written = core.device_write(write(link, b"*IDN?\n")).await;
        assert_eq!(written.error, DeviceErrorCode::NoError);
        assert_eq!(written.size, 6);

        let response = core.device_read(read(link)).await;
        assert_eq!(response.error, DeviceErrorCode::NoError);
        assert_eq!(response.data, b"ACME,Model 42,SN0001,1.0\n".to_vec());
        assert_eq!(
            response.reason,
            ReadReason::REQUEST_COUNT | ReadReason::TERM_CHAR | ReadReason::END
        );

        // Nothing left to read
        assert_eq!(core.device_read(read(link)).await.error, DeviceErrorCode::IoTimeout);
    }

    #[tokio::test]
    async fn test_compound_write_joins_replies() {
        let core = core(DeviceServerConfig::default());
        let link = core.create_link(link_params(1, "inst0")).await.link_id;
        core.device_write(write(link, b"*ESE 4;*ESE?;*SRE?\n")).await;
        let response = core.device_read(read(link)).await;
        assert_eq!(response.data, b"4;0\n".to_vec());
    }

    #[tokio::test]
    async fn test_failed_write_is_reported_and_queued() {
        let core = core(DeviceServerConfig::default());
        let link = core.create_link(link_params(1, "inst0")).await.link_id;

        let written = core.device_write(write(link, b"FOO:BAR\n")).await;
        assert_eq!(written.error, DeviceErrorCode::SyntaxError);
        assert_eq!(written.size, 8);
        assert_eq!(core.device_read(read(link)).await.error, DeviceErrorCode::SyntaxError);

        core.device_write(write(link, b"SYST:ERR?\n")).await;
        let response = core.device_read(read(link)).await;
        assert_eq!(response.data, b"-113,\"Undefined header\"\n".to_vec());
    }

    #[tokio::test]
    async fn test_oversize_write_rejected() {
        let config = DeviceServerConfig {
            max_receive_size: 8,
            ..Default::default()
        };
        let core = core(config);
        let link = core.create_link(link_params(1, "inst0")).await.link_id;
        let written = core.device_write(write(link, b"*IDN?;*IDN?\n")).await;
        assert_eq!(written.error, DeviceErrorCode::ParameterError);
        assert_eq!(written.size, 0);
        assert_eq!(core.device_read(read(link)).await.error, DeviceErrorCode::IoTimeout);
    }

    #[tokio::test]
    async fn test_unknown_link() {
        let core = core(DeviceServerConfig::default());
        let ghost = LinkId(77);
        assert_eq!(
            core.device_write(write(ghost, b"*IDN?")).await.error,
            DeviceErrorCode::ChannelNotEstablished
        );
        assert_eq!(
            core.device_readstb(generic(ghost)).await.error,
            DeviceErrorCode::ChannelNotEstablished
        );
        assert_eq!(
            core.device_abort(ghost).await.error,
            DeviceErrorCode::ChannelNotEstablished
        );
        assert!(core.registry().active_client().is_none());
    }

    #[tokio::test]
    async fn test_lock_contention() {
        let core = core(DeviceServerConfig::default());
        let a = core.create_link(link_params(1, "inst0")).await.link_id;
        let b = core.create_link(link_params(2, "inst0")).await.link_id;

        let lock = DeviceLockParams {
            link_id: a,
            flags: OperationFlags::NONE,
            lock_timeout_ms: 60_000,
        };
        assert_eq!(core.device_lock(lock.clone()).await.error, DeviceErrorCode::NoError);
        // Renewal by the holder
        assert_eq!(core.device_lock(lock).await.error, DeviceErrorCode::NoError);

        assert_eq!(
            core.device_write(write(b, b"*CLS")).await.error,
            DeviceErrorCode::DeviceLockedByAnotherLink
        );
        assert_eq!(
            core.device_lock(DeviceLockParams {
                link_id: b,
                flags: OperationFlags::NONE,
                lock_timeout_ms: 100,
            })
            .await
            .error,
            DeviceErrorCode::DeviceLockedByAnotherLink
        );
        assert_eq!(core.device_unlock(b).await.error, DeviceErrorCode::NoLockHeldByThisLink);

        // The holder is not blocked by its own lease
        assert_eq!(core.device_write(write(a, b"*CLS")).await.error, DeviceErrorCode::NoError);

        assert_eq!(core.device_unlock(a).await.error, DeviceErrorCode::NoError);
        assert_eq!(core.device_write(write(b, b"*CLS")).await.error, DeviceErrorCode::NoError);
    }

    #[tokio::test]
    async fn test_destroy_releases_lock() {
        let core = core(DeviceServerConfig::default());
        let mut params = link_params(1, "inst0");
        params.lock_device = true;
        params.lock_timeout_ms = 60_000;
        let a = core.create_link(params).await.link_id;
        assert_eq!(
            core.registry().lock_holder("inst0", Instant::now()).map(|(id, _)| id),
            Some(a)
        );
        let b = core.create_link(link_params(2, "inst0")).await.link_id;

        core.destroy_link(a).await;
        assert_eq!(core.device_trigger(generic(b)).await.error, DeviceErrorCode::NoError);
    }

    #[tokio::test]
    async fn test_enable_srq_handle_length() {
        let core = core(DeviceServerConfig::default());
        let link = core.create_link(link_params(1, "inst0")).await.link_id;
        let mut params = DeviceEnableSrqParams {
            link_id: link,
            enable: true,
            handle: vec![0xAB; MAX_INTERRUPT_HANDLE_LEN + 1],
        };
        assert_eq!(
            core.device_enable_srq(params.clone()).await.error,
            DeviceErrorCode::ParameterError
        );

        params.handle.truncate(MAX_INTERRUPT_HANDLE_LEN);
        assert_eq!(core.device_enable_srq(params).await.error, DeviceErrorCode::NoError);
        assert!(core.registry().snapshot(link).unwrap().interrupt_enabled);
    }

    #[tokio::test]
    async fn test_service_request_sent_during_write() {
        let core = core(DeviceServerConfig::default());
        let mut requests = core.subscribe_service_requests();
        let a = core.create_link(link_params(1, "inst0")).await.link_id;
        let b = core.create_link(link_params(2, "inst0")).await.link_id;
        for (link, handle) in [(a, b"A"), (b, b"B")] {
            core.device_enable_srq(DeviceEnableSrqParams {
                link_id: link,
                enable: true,
                handle: handle.to_vec(),
            })
            .await;
        }

        core.device_write(write(a, b"*CLS;*ESE 1;*SRE 32\n")).await;
        core.device_write(write(a, b"*OPC\n")).await;
        // Already queued when the write returns
        let request = requests.try_recv().unwrap();
        core.device_remote(generic(b)).await;

        assert_eq!(request.link_id, a);
        assert_eq!(request.device, "inst0");
        assert_eq!(request.handle, b"A".to_vec());
        assert!(requests.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_service_request_needs_interrupts_enabled() {
        let core = core(DeviceServerConfig::default());
        let mut requests = core.subscribe_service_requests();
        let a = core.create_link(link_params(1, "inst0")).await.link_id;
        core.device_write(write(a, b"*CLS;*ESE 1;*SRE 32;*OPC\n")).await;
        assert!(requests.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_remote_and_local() {
        let core = core(DeviceServerConfig::default());
        let link = core.create_link(link_params(1, "inst0")).await.link_id;
        let inst = core.instrument("inst0").unwrap();

        core.device_local(generic(link)).await;
        assert!(!inst.is_remote_enabled());
        core.device_remote(generic(link)).await;
        assert!(inst.is_remote_enabled());
    }

    #[tokio::test]
    async fn test_clear_drops_pending_reply() {
        let core = core(DeviceServerConfig::default());
        let link = core.create_link(link_params(1, "inst0")).await.link_id;
        core.device_write(write(link, b"*IDN?")).await;
        assert_eq!(core.device_clear(generic(link)).await.error, DeviceErrorCode::NoError);
        assert_eq!(core.device_read(read(link)).await.error, DeviceErrorCode::IoTimeout);
    }

    #[tokio::test]
    async fn test_docmd_requires_interface() {
        let core = core(DeviceServerConfig::default());
        let inst = core.create_link(link_params(1, "inst0")).await.link_id;
        let gpib = core.create_link(link_params(2, "gpib0,5")).await.link_id;

        let mut params = DeviceDocmdParams {
            link_id: inst,
            flags: OperationFlags::NONE,
            io_timeout_ms: 1000,
            lock_timeout_ms: 0,
            cmd: vxi_core::docmd::SEND_COMMAND,
            network_order: true,
            data_size: 1,
            data_in: vec![0x3F],
        };
        assert_eq!(
            core.device_docmd(params.clone()).await.error,
            DeviceErrorCode::OperationNotSupported
        );

        params.link_id = gpib;
        let response = core.device_docmd(params).await;
        assert_eq!(response.error, DeviceErrorCode::NoError);
        assert_eq!(response.data_out, vec![0x3F]);
    }

    #[tokio::test]
    async fn test_connection_lost() {
        let core = core(DeviceServerConfig::default());
        let connection = ConnectionId(9);
        core.create_link_on(connection, link_params(1, "inst0")).await;
        core.create_link_on(connection, link_params(2, "gpib0")).await;
        let kept = core.create_link(link_params(3, "inst0")).await.link_id;

        assert_eq!(core.connection_lost(connection).await, 2);
        assert_eq!(core.registry().link_ids(), vec![kept]);
        assert_eq!(core.connection_lost(connection).await, 0);
    }

    #[tokio::test]
    async fn test_abort_without_operation() {
        let core = Arc::new(core(DeviceServerConfig::default()));
        let link = core.create_link(link_params(1, "inst0")).await.link_id;
        let abort = core.abort_channel();
        assert_eq!(abort.port(), 0);
        assert_eq!(abort.device_abort(link).await.error, DeviceErrorCode::NoError);
    }
}
