//! Channel capability.
//!
//! A channel carries encoded containers to the tunnel provider and hands
//! back at most one response per message. The monitor is written against
//! [`Channel`] only. Two implementations exist:
//! - [`LoopbackChannel`]: in-process, synchronous, dispatches to its own
//!   [`Router`](crate::Router)
//! - [`SocketChannel`]: a Unix domain socket connection to a provider host,
//!   asynchronous

mod loopback;
mod socket;

pub use loopback::{Configurator, LoopbackChannel};
pub use socket::SocketChannel;

use crate::error::ChannelError;
use crate::router::Responder;
use crate::status::ChannelStatus;
use std::collections::HashMap;
use std::path::PathBuf;

/// Options passed to a channel when it is started.
pub type StartOptions = HashMap<String, String>;

/// Transport to the tunnel provider.
pub trait Channel: Send + Sync {
    /// Current connection status.
    fn status(&self) -> ChannelStatus;

    /// Begin connecting. May return before the channel is connected.
    fn start(&self, options: Option<&StartOptions>) -> Result<(), ChannelError>;

    /// Begin disconnecting.
    fn stop(&self);

    /// Send an encoded container. The responder is resolved at most once,
    /// possibly on another task; an error means it will never be resolved
    /// with a payload.
    fn send_message(&self, message: Vec<u8>, responder: Responder) -> Result<(), ChannelError>;
}

/// Which channel implementation to create. See
/// [`ProviderManager::from_kind`](crate::provider::ProviderManager::from_kind).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelKind {
    /// In-process loop-back double
    Loopback,
    /// Unix domain socket connection to a provider host
    Socket { path: PathBuf },
}

