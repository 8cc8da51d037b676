//! Console session: one link driven from text input

use std::sync::Arc;

use vxi_core::{
    CreateLinkParams, DeviceDocmdParams, DeviceEnableSrqParams, DeviceErrorCode,
    DeviceGenericParams, DeviceLockParams, DeviceReadParams, DeviceWriteParams, LinkId,
    OperationFlags, ReadReason,
};
use vxi_device::{AbortChannel, DeviceCore};

/// Largest chunk requested per `device_read`
const READ_CHUNK: u32 = 1024;

/// Interrupt handle registered by `:srq on`
pub const SRQ_HANDLE: &[u8] = b"vxi-console";

/// One line of console input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// SCPI text sent with `device_write`; queries are read back
    Scpi(String),
    ReadStb,
    Trigger,
    Clear,
    Remote,
    Local,
    Lock(Option<u32>),
    Unlock,
    Srq(bool),
    Abort,
    Docmd { cmd: u32, data: Vec<u8> },
    Links,
    Help,
    Quit,
}

impl ConsoleCommand {
    /// Parse a line; `None` for blank input
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let Some(rest) = line.strip_prefix(':') else {
            return Ok(Some(Self::Scpi(line.to_string())));
        };

        let mut words = rest.split_whitespace();
        let verb = words.next().unwrap_or_default().to_ascii_lowercase();
        let command = match verb.as_str() {
            "stb" => Self::ReadStb,
            "trigger" | "trg" => Self::Trigger,
            "clear" | "dcl" => Self::Clear,
            "remote" => Self::Remote,
            "local" => Self::Local,
            "lock" => {
                let timeout = words
                    .next()
                    .map(|ms| ms.parse::<u32>().map_err(|_| format!("bad lock timeout '{}'", ms)))
                    .transpose()?;
                Self::Lock(timeout)
            }
            "unlock" => Self::Unlock,
            "srq" => match words.next().map(str::to_ascii_lowercase).as_deref() {
                Some("on") => Self::Srq(true),
                Some("off") => Self::Srq(false),
                _ => return Err("usage: :srq on|off".to_string()),
            },
            "abort" => Self::Abort,
            "docmd" => {
                let cmd = words
                    .next()
                    .ok_or_else(|| "usage: :docmd <cmd> [bytes...]".to_string())?;
                let cmd = parse_u32(cmd)?;
                let data = words
                    .map(|b| parse_u32(b).and_then(|v| u8::try_from(v).map_err(|e| e.to_string())))
                    .collect::<Result<Vec<u8>, _>>()?;
                Self::Docmd { cmd, data }
            }
            "links" => Self::Links,
            "help" | "?" => Self::Help,
            "quit" | "exit" | "q" => Self::Quit,
            other => return Err(format!("unknown console command ':{}'", other)),
        };
        Ok(Some(command))
    }
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("bad number '{}': {}", s, e))
}

pub const HELP: &str = "\
SCPI text is written to the instrument; queries are read back.
  :stb               destructive status byte read
  :trigger           device trigger
  :clear             device clear
  :remote | :local   remote state
  :lock [ms]         take the device lock
  :unlock            release the device lock
  :srq on|off        service request notifications
  :abort             abort the running operation
  :docmd <cmd> [b..] bus command (gpib devices)
  :links             live links (* marks the active one)
  :quit";

/// A link owned by the console
pub struct Session {
    core: Arc<DeviceCore>,
    abort: AbortChannel,
    link_id: LinkId,
    io_timeout_ms: u32,
    lock_timeout_ms: u32,
}

impl Session {
    /// Create the console's link to `device`
    pub async fn open(
        core: Arc<DeviceCore>,
        client_id: u32,
        device: &str,
        lock: bool,
    ) -> anyhow::Result<Self> {
        let lock_timeout_ms = core.config().default_lock_timeout_ms;
        let response = core
            .create_link(CreateLinkParams {
                client_id: vxi_core::ClientId(client_id),
                lock_device: lock,
                lock_timeout_ms,
                device: device.to_string(),
            })
            .await;
        match response.error {
            DeviceErrorCode::NoError => {}
            DeviceErrorCode::InvalidLinkIdentifier if !response.link_id.is_none() => {
                tracing::warn!(device, "Device name is not well formed");
            }
            error => anyhow::bail!("create_link to {} failed: {}", device, error),
        }

        Ok(Self {
            abort: core.abort_channel(),
            io_timeout_ms: core.config().default_io_timeout_ms,
            lock_timeout_ms,
            link_id: response.link_id,
            core,
        })
    }

    pub fn link_id(&self) -> LinkId {
        self.link_id
    }

    fn generic(&self) -> DeviceGenericParams {
        DeviceGenericParams {
            link_id: self.link_id,
            flags: OperationFlags::WAIT_LOCK,
            lock_timeout_ms: self.lock_timeout_ms,
            io_timeout_ms: self.io_timeout_ms,
        }
    }

    /// Run one command and render its outcome
    pub async fn run(&self, command: ConsoleCommand) -> String {
        match command {
            ConsoleCommand::Scpi(text) => self.scpi(&text).await,
            ConsoleCommand::ReadStb => {
                let response = self.core.device_readstb(self.generic()).await;
                outcome(response.error, || format!("STB {:#04x}", response.stb))
            }
            ConsoleCommand::Trigger => status(self.core.device_trigger(self.generic()).await.error),
            ConsoleCommand::Clear => status(self.core.device_clear(self.generic()).await.error),
            ConsoleCommand::Remote => status(self.core.device_remote(self.generic()).await.error),
            ConsoleCommand::Local => status(self.core.device_local(self.generic()).await.error),
            ConsoleCommand::Lock(timeout) => {
                let params = DeviceLockParams {
                    link_id: self.link_id,
                    flags: OperationFlags::WAIT_LOCK,
                    lock_timeout_ms: timeout.unwrap_or(self.lock_timeout_ms),
                };
                status(self.core.device_lock(params).await.error)
            }
            ConsoleCommand::Unlock => status(self.core.device_unlock(self.link_id).await.error),
            ConsoleCommand::Srq(enable) => {
                let params = DeviceEnableSrqParams {
                    link_id: self.link_id,
                    enable,
                    handle: SRQ_HANDLE.to_vec(),
                };
                status(self.core.device_enable_srq(params).await.error)
            }
            ConsoleCommand::Abort => status(self.abort.device_abort(self.link_id).await.error),
            ConsoleCommand::Docmd { cmd, data } => {
                let params = DeviceDocmdParams {
                    link_id: self.link_id,
                    flags: OperationFlags::WAIT_LOCK,
                    io_timeout_ms: self.io_timeout_ms,
                    lock_timeout_ms: self.lock_timeout_ms,
                    cmd,
                    network_order: true,
                    data_size: 1,
                    data_in: data,
                };
                let response = self.core.device_docmd(params).await;
                outcome(response.error, || format!("{:02X?}", response.data_out))
            }
            ConsoleCommand::Links => {
                let registry = self.core.registry();
                let active = registry.active_client().map(|client| client.link_id);
                let ids: Vec<String> = registry
                    .link_ids()
                    .iter()
                    .map(|id| {
                        if Some(*id) == active {
                            format!("{}*", id)
                        } else {
                            id.to_string()
                        }
                    })
                    .collect();
                format!("links: {}", ids.join(", "))
            }
            ConsoleCommand::Help => HELP.to_string(),
            ConsoleCommand::Quit => String::new(),
        }
    }

    async fn scpi(&self, text: &str) -> String {
        let written = self
            .core
            .device_write(DeviceWriteParams {
                link_id: self.link_id,
                io_timeout_ms: self.io_timeout_ms,
                lock_timeout_ms: self.lock_timeout_ms,
                flags: OperationFlags::WAIT_LOCK | OperationFlags::END,
                data: format!("{}\n", text).into_bytes(),
            })
            .await;
        if !written.error.is_ok() {
            return format!("error: {}", written.error);
        }
        if !text.contains('?') {
            return "ok".to_string();
        }

        let mut reply = Vec::new();
        loop {
            let response = self
                .core
                .device_read(DeviceReadParams {
                    link_id: self.link_id,
                    request_size: READ_CHUNK,
                    io_timeout_ms: self.io_timeout_ms,
                    lock_timeout_ms: self.lock_timeout_ms,
                    flags: OperationFlags::WAIT_LOCK,
                    term_char: b'\n',
                })
                .await;
            if !response.error.is_ok() {
                return format!("error: {}", response.error);
            }
            reply.extend_from_slice(&response.data);
            if response.reason.contains(ReadReason::END) {
                break;
            }
        }
        String::from_utf8_lossy(&reply).trim_end().to_string()
    }

    /// Destroy the link
    pub async fn close(self) {
        let result = self.core.destroy_link(self.link_id).await;
        if !result.error.is_ok() {
            tracing::warn!(link_id = %self.link_id, error = %result.error, "destroy_link failed");
        }
    }
}

fn status(error: DeviceErrorCode) -> String {
    outcome(error, || "ok".to_string())
}

fn outcome(error: DeviceErrorCode, ok: impl FnOnce() -> String) -> String {
    if error.is_ok() {
        ok()
    } else {
        format!("error: {}", error)
    }
}
