//! Tunnel provider lifecycle.
//!
//! A [`TunnelProvider`] is the service running on the far side of the
//! channel. It is configured, started and stopped by a provider manager,
//! and answers controller messages through the handlers it registers on a
//! [`Router`].
//!
//! The provider can run in-process behind a
//! [`LoopbackChannel`](crate::LoopbackChannel) ([`MockProviderManager`]) or
//! in a separate host process reached over a Unix socket
//! ([`SocketProviderManager`], with [`serve_provider`] on the host side).

mod extension;
mod host;
mod manager;

pub use extension::{ExtensionManager, ManagerEvent};
pub use host::serve_provider;
pub use manager::{MockProviderManager, ProviderManager, SocketProviderManager};

use crate::channel::StartOptions;
use crate::error::{ConfigurationError, ProviderError};
use crate::router::Router;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Service logic hosted behind a channel.
#[async_trait]
pub trait TunnelProvider: Send + Sync {
    /// Prepare the provider. Called before [`start`](TunnelProvider::start)
    /// with the serialized user configuration the manager was created with.
    async fn configure(&self, user_configuration: Option<&[u8]>) -> Result<(), ConfigurationError>;

    /// Start the provider's service.
    async fn start(&self, options: Option<&StartOptions>) -> Result<(), ProviderError>;

    /// Stop the service and clean up.
    async fn stop(&self, reason: StopReason);

    /// Register a handler for every message type the provider answers.
    fn register_handlers(&self, router: &Router);
}

/// Why a provider was stopped.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopReason {
    #[default]
    None,
    UserInitiated,
    ProviderFailed,
    NoNetworkAvailable,
    UnrecoverableNetworkChange,
    ProviderDisabled,
    AuthenticationCanceled,
    ConfigurationFailed,
    IdleTimeout,
    ConfigurationDisabled,
    ConfigurationRemoved,
    Superseded,
    UserLogout,
    UserSwitch,
    AppUpdate,
    ConnectionFailed,
    Sleep,
}

impl StopReason {
    /// Longer, human readable explanation of the reason.
    pub fn description(self) -> &'static str {
        match self {
            StopReason::None => "No specific reason.",
            StopReason::UserInitiated => "The user stopped the provider.",
            StopReason::ProviderFailed => "The provider failed to function correctly.",
            StopReason::NoNetworkAvailable => "No network connectivity is currently available.",
            StopReason::UnrecoverableNetworkChange => "The device's network connectivity changed.",
            StopReason::ProviderDisabled => "The provider was disabled.",
            StopReason::AuthenticationCanceled => "The authentication process was canceled.",
            StopReason::ConfigurationFailed => "The configuration is invalid.",
            StopReason::IdleTimeout => "The session timed out.",
            StopReason::ConfigurationDisabled => "The configuration was disabled.",
            StopReason::ConfigurationRemoved => "The configuration was removed.",
            StopReason::Superseded => {
                "The configuration was superseded by a higher-priority configuration."
            }
            StopReason::UserLogout => "The user logged out.",
            StopReason::UserSwitch => "The current console user changed.",
            StopReason::AppUpdate => "The application is being updated.",
            StopReason::ConnectionFailed => "The connection failed.",
            StopReason::Sleep => {
                "The configuration enabled disconnect on sleep and the device went to sleep."
            }
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StopReason::None => "None",
            StopReason::UserInitiated => "User Initiated",
            StopReason::ProviderFailed => "Provider Failed",
            StopReason::NoNetworkAvailable => "No Network Available",
            StopReason::UnrecoverableNetworkChange => "Unrecoverable Network Change",
            StopReason::ProviderDisabled => "Provider Disabled",
            StopReason::AuthenticationCanceled => "Authentication Canceled",
            StopReason::ConfigurationFailed => "Configuration Failed",
            StopReason::IdleTimeout => "Idle Timeout",
            StopReason::ConfigurationDisabled => "Configuration Disabled",
            StopReason::ConfigurationRemoved => "Configuration Removed",
            StopReason::Superseded => "Superseded",
            StopReason::UserLogout => "User Logout",
            StopReason::UserSwitch => "User Switch",
            StopReason::AppUpdate => "App Update",
            StopReason::ConnectionFailed => "Connection Failed",
            StopReason::Sleep => "Sleep",
        };
        f.write_str(name)
    }
}
