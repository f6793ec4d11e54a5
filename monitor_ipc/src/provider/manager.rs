use super::{StopReason, TunnelProvider};
use crate::channel::{Channel, ChannelKind, LoopbackChannel, SocketChannel};
use crate::codec::{self, CodecError};
use crate::error::ProviderError;
use crate::status::ChannelStatus;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;
use tracing::{error, info};

/// Runs a provider in-process behind a [`LoopbackChannel`].
///
/// The provider's handlers are registered on the channel's router when the
/// manager is created, so messages sent over the channel reach the provider
/// as soon as it is connected.
pub struct MockProviderManager {
    provider: Arc<dyn TunnelProvider>,
    channel: Arc<LoopbackChannel>,
    user_configuration: Option<Vec<u8>>,
}

impl MockProviderManager {
    /// Create a manager for `provider`, serializing `user_configuration` for
    /// the provider's configuration step.
    pub fn new<C: Serialize>(
        provider: Arc<dyn TunnelProvider>,
        user_configuration: Option<&C>,
    ) -> Result<Self, CodecError> {
        let user_configuration = user_configuration.map(codec::encode).transpose()?;
        let channel = Arc::new(LoopbackChannel::new());
        provider.register_handlers(channel.router());

        Ok(Self {
            provider,
            channel,
            user_configuration,
        })
    }

    /// The loop-back channel the provider is reachable through.
    pub fn channel(&self) -> &Arc<LoopbackChannel> {
        &self.channel
    }

    /// Configure and start the provider, then mark the channel connected.
    pub async fn start(&self) -> Result<(), ProviderError> {
        self.channel.set_status(ChannelStatus::Connecting);
        info!("Configuring mock tunnel provider...");

        if let Err(e) = self
            .provider
            .configure(self.user_configuration.as_deref())
            .await
        {
            error!("Failed to configure mock tunnel provider: {}", e);
            self.channel.set_status(ChannelStatus::Disconnected);
            return Err(e.into());
        }

        if let Err(e) = self.provider.start(None).await {
            error!("Failed to start mock tunnel provider: {}", e);
            self.channel.set_status(ChannelStatus::Disconnecting);
            self.channel.set_status(ChannelStatus::Disconnected);
            return Err(e);
        }

        self.channel.set_status(ChannelStatus::Connected);
        info!("Mock tunnel provider successfully started");
        Ok(())
    }

    /// Stop the provider and disconnect the channel.
    pub async fn stop(&self) {
        self.channel.set_status(ChannelStatus::Disconnecting);
        self.provider.stop(StopReason::UserInitiated).await;
        self.channel.set_status(ChannelStatus::Disconnected);
        info!("Mock tunnel provider stopped");
    }
}

/// Reaches a provider hosted in another process over a [`SocketChannel`].
pub struct SocketProviderManager {
    channel: Arc<SocketChannel>,
}

impl SocketProviderManager {
    /// Create a manager for the provider host listening at `path`.
    pub fn new<P: AsRef<Path>>(path: P, io_timeout: Duration) -> Self {
        Self {
            channel: Arc::new(SocketChannel::new(path).with_io_timeout(io_timeout)),
        }
    }

    /// The socket channel to the provider host.
    pub fn channel(&self) -> &Arc<SocketChannel> {
        &self.channel
    }

    /// Open the connection to the provider host. Does nothing if the
    /// channel is already connected.
    pub fn start(&self) -> Result<(), ProviderError> {
        if self.channel.status().is_connected() {
            error!("Failed to start: tunnel is already connected");
            return Ok(());
        }
        self.channel.start(None).map_err(|e| {
            error!("Failed to open a connection to the provider host: {}", e);
            ProviderError::from(e)
        })
    }

    /// Close the connection to the provider host.
    pub fn stop(&self) {
        self.channel.stop();
    }
}

/// One of the two ways a provider can be reached.
pub enum ProviderManager {
    /// Provider running in-process
    Mock(MockProviderManager),
    /// Provider running in a host process
    Socket(SocketProviderManager),
}

impl ProviderManager {
    /// Manager for an in-process provider.
    pub fn mock<C: Serialize>(
        provider: Arc<dyn TunnelProvider>,
        user_configuration: Option<&C>,
    ) -> Result<Self, CodecError> {
        MockProviderManager::new(provider, user_configuration).map(ProviderManager::Mock)
    }

    /// Manager for a provider host listening at `path`.
    pub fn socket<P: AsRef<Path>>(path: P, io_timeout: Duration) -> Self {
        ProviderManager::Socket(SocketProviderManager::new(path, io_timeout))
    }

    /// Select the manager for `kind`. A loop-back channel hosts the
    /// provider built by `loopback_provider` in-process, without user
    /// configuration; a socket channel reaches a host at the given path.
    pub fn from_kind<F>(
        kind: &ChannelKind,
        io_timeout: Duration,
        loopback_provider: F,
    ) -> Result<Self, CodecError>
    where
        F: FnOnce() -> Arc<dyn TunnelProvider>,
    {
        match kind {
            ChannelKind::Loopback => Self::mock::<()>(loopback_provider(), None),
            ChannelKind::Socket { path } => Ok(Self::socket(path, io_timeout)),
        }
    }

    /// Bring the provider up.
    pub async fn start(&self) -> Result<(), ProviderError> {
        match self {
            ProviderManager::Mock(manager) => manager.start().await,
            ProviderManager::Socket(manager) => manager.start(),
        }
    }

    /// Take the provider down.
    pub async fn stop(&self) {
        match self {
            ProviderManager::Mock(manager) => manager.stop().await,
            ProviderManager::Socket(manager) => manager.stop(),
        }
    }

    /// The channel to the provider.
    pub fn channel(&self) -> Arc<dyn Channel> {
        match self {
            ProviderManager::Mock(manager) => manager.channel().clone() as Arc<dyn Channel>,
            ProviderManager::Socket(manager) => manager.channel().clone() as Arc<dyn Channel>,
        }
    }

    /// Current status of the channel to the provider.
    pub fn status(&self) -> ChannelStatus {
        self.channel().status()
    }

    /// Watch status changes of the channel to the provider.
    pub fn subscribe_status(&self) -> watch::Receiver<ChannelStatus> {
        match self {
            ProviderManager::Mock(manager) => manager.channel().subscribe_status(),
            ProviderManager::Socket(manager) => manager.channel().subscribe_status(),
        }
    }
}
