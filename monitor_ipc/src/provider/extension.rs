use super::ProviderManager;
use crate::container::Message;
use crate::error::{CommunicationResult, ProviderError};
use crate::monitor::Monitor;
use crate::status::ChannelStatus;
use serde::de::DeserializeOwned;
use std::fmt;
use std::marker::PhantomData;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{error, info};

/// Notification published by an [`ExtensionManager`].
#[derive(Debug, Clone, PartialEq)]
pub enum ManagerEvent<S> {
    /// The channel to the provider changed status. Rapid successive changes
    /// may be coalesced into the latest one.
    TunnelStateChanged(ChannelStatus),
    /// A status poll returned a new service state
    ServiceStateChanged(S),
}

/// Drives a provider and publishes its tunnel and service state.
///
/// `S` is the service state type the provider answers status polls with.
pub struct ExtensionManager<S> {
    provider: ProviderManager,
    monitor: Monitor,
    events: mpsc::UnboundedSender<ManagerEvent<S>>,
    status_forwarder: JoinHandle<()>,
    _service_state: PhantomData<fn() -> S>,
}

impl<S> ExtensionManager<S>
where
    S: DeserializeOwned + fmt::Debug + Send + 'static,
{
    /// Wrap `provider`, returning the manager and the receiver its events
    /// are published on.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(provider: ProviderManager) -> (Self, mpsc::UnboundedReceiver<ManagerEvent<S>>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let monitor = Monitor::new();
        monitor.set_channel(Some(provider.channel()));

        let mut status_rx = provider.subscribe_status();
        let status_events = events.clone();
        let status_forwarder = tokio::spawn(async move {
            while status_rx.changed().await.is_ok() {
                let status = *status_rx.borrow_and_update();
                info!(%status, "Tunnel status changed");
                if status_events
                    .send(ManagerEvent::TunnelStateChanged(status))
                    .is_err()
                {
                    break;
                }
            }
        });

        let manager = Self {
            provider,
            monitor,
            events,
            status_forwarder,
            _service_state: PhantomData,
        };
        (manager, event_rx)
    }

    /// Bring the provider up.
    pub async fn start(&self) -> Result<(), ProviderError> {
        self.provider.start().await
    }

    /// Stop monitoring and take the provider down.
    pub async fn stop(&self) {
        self.monitor.stop_monitoring();
        self.provider.stop().await;
    }

    /// The provider manager.
    pub fn provider(&self) -> &ProviderManager {
        &self.provider
    }

    /// The monitor bound to the provider's channel.
    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    /// Poll the provider for its service state every `poll_interval`.
    ///
    /// Returns `false` without starting if the provider is not connected.
    /// Every successful poll is published as
    /// [`ManagerEvent::ServiceStateChanged`]; failed polls are logged.
    pub fn start_monitoring<Req, B>(&self, request_builder: B, poll_interval: Duration) -> bool
    where
        Req: Message,
        B: FnMut() -> Req + Send + 'static,
    {
        let status = self.provider.status();
        if !status.is_connected() {
            error!(%status, "Unable to monitor provider - incorrect state");
            return false;
        }

        let events = self.events.clone();
        self.monitor.start_monitoring(
            request_builder,
            move |result: CommunicationResult<S>| match result {
                Ok(state) => {
                    info!("Response received: {:?}", state);
                    let _ = events.send(ManagerEvent::ServiceStateChanged(state));
                }
                Err(e) => error!("Error communicating with provider: {}", e),
            },
            poll_interval,
        );
        true
    }

    /// Stop polling the provider.
    pub fn stop_monitoring(&self) {
        self.monitor.stop_monitoring();
    }
}

impl<S> Drop for ExtensionManager<S> {
    fn drop(&mut self) {
        self.status_forwarder.abort();
        self.monitor.stop_monitoring();
    }
}
