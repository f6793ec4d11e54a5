//! Tunnel Monitor IPC Library
//!
//! This crate lets a controller process exchange typed request/response
//! messages with a tunnel provider process over an opaque channel, and poll
//! that provider at a fixed interval for status updates.
//!
//! The pieces, leaves first:
//! - [`container`]: the envelope carried over every channel
//! - [`router`]: type-tag keyed handler table on the receiving side
//! - [`channel`]: the channel capability, with a loop-back double and a
//!   Unix socket adapter
//! - [`monitor`]: single sends and the periodic poll loop
//! - [`provider`]: provider lifecycle and the managers that drive it

pub mod channel;
pub mod codec;
pub mod container;
pub mod error;
pub mod messages;
pub mod monitor;
pub mod provider;
pub mod router;
pub mod status;
pub mod transport;

/// Re-export common types for convenience
pub use channel::{Channel, ChannelKind, LoopbackChannel, SocketChannel, StartOptions};
pub use container::{Container, Message};
pub use error::{ChannelError, CommunicationError, RouterError};
pub use monitor::Monitor;
pub use router::{Responder, ResponseReceiver, Router};
pub use status::ChannelStatus;
