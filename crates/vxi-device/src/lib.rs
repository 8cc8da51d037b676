//! vxi-device - VXI-11 device server core
//!
//! Implements the core channel procedures on top of an
//! [`InstrumentFactory`](vxi_core::InstrumentFactory). The RPC transport
//! decodes requests, calls into [`DeviceCore`] and encodes the response
//! records it gets back.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                     DeviceCore                       │
//! │  ┌──────────────────┐  ┌────────────┐  ┌──────────┐  │
//! │  │ClientLinkRegistry│  │Conversation│  │LockWaiter│  │
//! │  │ (links, leases)  │  │ (per link) │  │ (Notify) │  │
//! │  └──────────────────┘  └────────────┘  └──────────┘  │
//! │            │                                         │
//! │     ┌──────┴──────┐          ┌──────────────────┐    │
//! │     │ Instrument  │──event──▶│ ServiceRequest   │    │
//! │     │ BusInterface│          │ broadcast        │    │
//! │     └─────────────┘          └────────┬─────────┘    │
//! └───────────────────────────────────────┼──────────────┘
//!          AbortChannel           InterruptDispatcher
//! ```

pub mod abort;
pub mod config;
pub mod conversation;
pub mod error;
pub mod interrupt;
pub mod lock;
pub mod registry;
pub mod server;

pub use abort::AbortChannel;
pub use config::{DeviceServerConfig, ServerMode};
pub use conversation::{split_commands, Conversation, ReadOutcome};
pub use error::{ConfigError, InterruptError, RegistryError};
pub use interrupt::{ChannelSink, InterruptDispatcher, InterruptSink};
pub use lock::LockWaiter;
pub use registry::{Client, ClientLinkRegistry, LinkIdAllocator, NewClient};
pub use server::DeviceCore;
