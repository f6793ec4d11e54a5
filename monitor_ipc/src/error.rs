//! Error types for channel and monitor operations.

use crate::codec::CodecError;
use crate::status::ChannelStatus;
use crate::transport::IpcError;
use std::io;
use thiserror::Error;

/// Result type for monitor sends
pub type CommunicationResult<T> = Result<T, CommunicationError>;

/// Why a request to the tunnel provider did not produce a response.
///
/// Every [`Monitor::send`](crate::Monitor::send) resolves to exactly one
/// success value or exactly one of these.
#[derive(Error, Debug)]
pub enum CommunicationError {
    /// No channel is bound to the monitor
    #[error("no channel is bound to the monitor")]
    InvalidExtension,

    /// The channel is bound but not connected
    #[error("the channel is not in a state in which it can be communicated with: {0}")]
    InvalidState(ChannelStatus),

    /// The provider answered without a payload
    #[error("the provider response was empty")]
    NilResponse,

    /// The response payload does not decode as the expected type
    #[error("failed to decode response: {0}")]
    ResponseDecoding(#[source] CodecError),

    /// The outgoing request could not be serialized
    #[error("failed to serialize outgoing message: {0}")]
    ContainerSerialization(#[source] CodecError),

    /// The channel refused to transmit the request
    #[error("failed to send message: {0}")]
    SendFailure(#[source] ChannelError),
}

/// Error raised synchronously by a [`Channel`](crate::Channel).
#[derive(Error, Debug)]
pub enum ChannelError {
    /// The channel is not connected
    #[error("channel is not connected: {0}")]
    InvalidState(ChannelStatus),

    /// The message bytes are not a valid container
    #[error("message is not a valid container")]
    ResponseDecoding,

    /// The configuration step run during start failed
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    /// The connection task is gone or its queue is full
    #[error("channel closed: {0}")]
    Closed(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Error raised by typed handler registration.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RouterError {
    /// Two different message schemas declared the same type tag
    #[error("type tag {tag:?} is already registered by another message schema")]
    TagCollision { tag: String },
}

/// Why a tunnel provider could not be configured.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    /// No configuration was supplied at all
    #[error("configuration is missing")]
    MissingConfiguration,

    /// The provider requires a user configuration and none was supplied
    #[error("configuration does not contain a user configuration")]
    MissingUserConfiguration,

    /// The supplied configuration could not be decoded
    #[error("failed to decode configuration: {0}")]
    DecodingFailed(#[source] CodecError),

    /// The provider failed to apply its settings
    #[error("failed to apply settings: {0}")]
    SettingsApplicationFailed(String),
}

/// Error raised while bringing a tunnel provider up.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The provider could not be configured
    #[error("provider configuration failed: {0}")]
    Configuration(#[from] ConfigurationError),

    /// The provider failed to start its service
    #[error("provider failed to start: {0}")]
    Start(String),

    /// The channel to the provider could not be started
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// The provider host could not serve its socket
    #[error("transport error: {0}")]
    Transport(#[from] IpcError),
}
