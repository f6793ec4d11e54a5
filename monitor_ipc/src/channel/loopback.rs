//! In-process channel double.

use super::{Channel, StartOptions};
use crate::container::Container;
use crate::error::{ChannelError, ConfigurationError};
use crate::router::{Responder, Router};
use crate::status::ChannelStatus;
use std::fmt;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Configuration step run by [`LoopbackChannel::start`] before the channel
/// reports itself connected.
pub type Configurator =
    Box<dyn Fn(Option<&StartOptions>) -> Result<(), ConfigurationError> + Send + Sync>;

/// Channel that routes sent messages straight into its own [`Router`].
///
/// Everything happens on the caller's thread: handlers run inside
/// [`send_message`](Channel::send_message) and a handler that replies
/// resolves the responder before `send_message` returns.
pub struct LoopbackChannel {
    router: Router,
    status: watch::Sender<ChannelStatus>,
    configurator: Option<Configurator>,
}

impl LoopbackChannel {
    /// Create a disconnected channel with an empty router.
    pub fn new() -> Self {
        let (status, _) = watch::channel(ChannelStatus::Disconnected);
        Self {
            router: Router::new(),
            status,
            configurator: None,
        }
    }

    /// Run `configurator` every time the channel is started.
    pub fn with_configurator<F>(mut self, configurator: F) -> Self
    where
        F: Fn(Option<&StartOptions>) -> Result<(), ConfigurationError> + Send + Sync + 'static,
    {
        self.configurator = Some(Box::new(configurator));
        self
    }

    /// The router incoming messages are dispatched to.
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Force the status, bypassing the lifecycle calls.
    pub fn set_status(&self, status: ChannelStatus) {
        let previous = self.status.send_replace(status);
        if previous != status {
            debug!(from = %previous, to = %status, "Loop-back channel status changed");
        }
    }

    /// Watch status changes.
    pub fn subscribe_status(&self) -> watch::Receiver<ChannelStatus> {
        self.status.subscribe()
    }
}

impl Default for LoopbackChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LoopbackChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackChannel")
            .field("status", &*self.status.borrow())
            .field("router", &self.router)
            .field("configurator", &self.configurator.is_some())
            .finish()
    }
}

impl Channel for LoopbackChannel {
    fn status(&self) -> ChannelStatus {
        *self.status.borrow()
    }

    fn start(&self, options: Option<&StartOptions>) -> Result<(), ChannelError> {
        if let Some(configure) = &self.configurator {
            if let Err(e) = configure(options) {
                error!(error = %e, "Failed to configure loop-back channel");
                self.set_status(ChannelStatus::Disconnected);
                return Err(e.into());
            }
        }
        self.set_status(ChannelStatus::Connected);
        info!("Loop-back channel started");
        Ok(())
    }

    fn stop(&self) {
        self.set_status(ChannelStatus::Disconnected);
        info!("Loop-back channel stopped");
    }

    fn send_message(&self, message: Vec<u8>, responder: Responder) -> Result<(), ChannelError> {
        let status = self.status();
        if !status.is_connected() {
            return Err(ChannelError::InvalidState(status));
        }
        let container = Container::decode(&message).ok_or(ChannelError::ResponseDecoding)?;

        let handled = self.router.handle(&container, &responder);
        debug!(
            tag = container.type_tag(),
            handlers = handled,
            "Loop-back channel delivered message"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Message;
    use crate::messages::Ping;

    fn request_bytes() -> Vec<u8> {
        Container::make(&Ping).unwrap().encode().unwrap()
    }

    #[test]
    fn test_reports_forced_status() {
        let channel = LoopbackChannel::new();
        for status in ChannelStatus::ALL {
            channel.set_status(status);
            assert_eq!(channel.status(), status);
        }
    }

    #[test]
    fn test_start_and_stop_transitions() {
        let channel = LoopbackChannel::new();
        assert_eq!(channel.status(), ChannelStatus::Disconnected);

        channel.start(None).unwrap();
        assert_eq!(channel.status(), ChannelStatus::Connected);

        channel.stop();
        assert_eq!(channel.status(), ChannelStatus::Disconnected);
    }

    #[test]
    fn test_send_succeeds_when_connected() {
        let channel = LoopbackChannel::new();
        channel.set_status(ChannelStatus::Connected);

        let (responder, _rx) = Responder::new();
        channel.send_message(request_bytes(), responder).unwrap();
    }

    #[test]
    fn test_send_fails_when_not_connected() {
        let channel = LoopbackChannel::new();
        for status in ChannelStatus::ALL.into_iter().filter(|s| !s.is_connected()) {
            channel.set_status(status);
            let (responder, _rx) = Responder::new();
            match channel.send_message(request_bytes(), responder) {
                Err(ChannelError::InvalidState(reported)) => assert_eq!(reported, status),
                other => panic!("expected invalid state error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_send_fails_for_garbage() {
        let channel = LoopbackChannel::new();
        channel.set_status(ChannelStatus::Connected);

        let (responder, _rx) = Responder::new();
        let err = channel.send_message(Vec::new(), responder).unwrap_err();
        assert!(matches!(err, ChannelError::ResponseDecoding));
    }

    #[test]
    fn test_reply_delivered_verbatim() {
        let channel = LoopbackChannel::new();
        channel.router().add_handler(Ping::TYPE_TAG, |_, responder| {
            responder.respond(Some(vec![1, 2, 3]));
        });
        channel.start(None).unwrap();

        let (responder, mut rx) = Responder::new();
        channel.send_message(request_bytes(), responder).unwrap();
        assert_eq!(rx.try_recv(), Some(Some(vec![1, 2, 3])));
    }

    #[test]
    fn test_failed_configuration_leaves_channel_disconnected() {
        let channel = LoopbackChannel::new()
            .with_configurator(|_| Err(ConfigurationError::MissingUserConfiguration));

        let err = channel.start(None).unwrap_err();
        assert!(matches!(err, ChannelError::Configuration(_)));
        assert_eq!(channel.status(), ChannelStatus::Disconnected);
    }

    #[test]
    fn test_configurator_receives_options() {
        let channel = LoopbackChannel::new().with_configurator(|options| {
            match options.and_then(|o| o.get("mtu")) {
                Some(_) => Ok(()),
                None => Err(ConfigurationError::MissingConfiguration),
            }
        });

        assert!(channel.start(None).is_err());

        let options = StartOptions::from([("mtu".to_string(), "1280".to_string())]);
        channel.start(Some(&options)).unwrap();
        assert_eq!(channel.status(), ChannelStatus::Connected);
    }

    #[test]
    fn test_status_subscription_observes_changes() {
        let channel = LoopbackChannel::new();
        let mut status_rx = channel.subscribe_status();

        channel.start(None).unwrap();
        assert!(status_rx.has_changed().unwrap());
        assert_eq!(*status_rx.borrow_and_update(), ChannelStatus::Connected);
    }
}
