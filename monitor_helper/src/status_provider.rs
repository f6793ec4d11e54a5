//! Tunnel provider served by the helper daemon.

use async_trait::async_trait;
use monitor_ipc::channel::StartOptions;
use monitor_ipc::codec;
use monitor_ipc::error::{ConfigurationError, ProviderError};
use monitor_ipc::messages::{Ping, Pong, ServiceStatus, StatusRequest};
use monitor_ipc::provider::{StopReason, TunnelProvider};
use monitor_ipc::{Message, Responder, Router};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Settings handed to the provider when it is configured.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProviderSettings {
    /// Version string reported in status replies
    pub provider_version: String,
    /// Interface reported while the tunnel is up
    pub interface_name: Option<String>,
}

#[derive(Default)]
struct ProviderState {
    settings: Option<ProviderSettings>,
    started_at: Option<Instant>,
    /// Request payload bytes received by the handlers
    bytes_received: u64,
    /// Reply payload bytes sent by the handlers
    bytes_sent: u64,
}

impl ProviderState {
    fn service_status(&self) -> ServiceStatus {
        let tunnel_active = self.started_at.is_some();
        let settings = self.settings.as_ref();
        ServiceStatus {
            tunnel_active,
            active_interface: settings
                .filter(|_| tunnel_active)
                .and_then(|s| s.interface_name.clone()),
            bytes_received: self.bytes_received,
            bytes_sent: self.bytes_sent,
            uptime_secs: self
                .started_at
                .map(|started| started.elapsed().as_secs())
                .unwrap_or(0),
            provider_version: settings
                .map(|s| s.provider_version.clone())
                .unwrap_or_default(),
        }
    }
}

/// Answers liveness checks and status polls from controllers.
#[derive(Default)]
pub struct StatusProvider {
    state: Arc<Mutex<ProviderState>>,
}

impl StatusProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Reply with `value`, counting the bytes sent.
fn reply_counted<T: Serialize>(state: &Mutex<ProviderState>, responder: &Responder, value: &T) {
    match codec::encode(value) {
        Ok(payload) => {
            state.lock().unwrap().bytes_sent += payload.len() as u64;
            responder.respond(Some(payload));
        }
        Err(e) => warn!("Failed to encode reply: {}", e),
    }
}

#[async_trait]
impl TunnelProvider for StatusProvider {
    async fn configure(&self, user_configuration: Option<&[u8]>) -> Result<(), ConfigurationError> {
        let bytes = user_configuration.ok_or(ConfigurationError::MissingUserConfiguration)?;
        let settings: ProviderSettings =
            codec::decode(bytes).map_err(ConfigurationError::DecodingFailed)?;
        if settings.provider_version.is_empty() {
            return Err(ConfigurationError::SettingsApplicationFailed(
                "provider version cannot be empty".to_string(),
            ));
        }

        info!(version = %settings.provider_version, "Provider configured");
        self.state.lock().unwrap().settings = Some(settings);
        Ok(())
    }

    async fn start(&self, _options: Option<&StartOptions>) -> Result<(), ProviderError> {
        let mut state = self.state.lock().unwrap();
        if state.settings.is_none() {
            return Err(ProviderError::Configuration(
                ConfigurationError::MissingConfiguration,
            ));
        }
        state.started_at = Some(Instant::now());
        info!("Status provider started");
        Ok(())
    }

    async fn stop(&self, reason: StopReason) {
        self.state.lock().unwrap().started_at = None;
        info!(%reason, "Status provider stopped: {}", reason.description());
    }

    fn register_handlers(&self, router: &Router) {
        let state = self.state.clone();
        router.add_handler(Ping::TYPE_TAG, move |_, responder| {
            debug!("Received ping");
            reply_counted(&state, responder, &Pong);
        });

        let state = self.state.clone();
        let status_handler = move |request: StatusRequest, responder: &Responder| {
            debug!(client_id = %request.client_id, "Received status request");
            let status = {
                let mut state = state.lock().unwrap();
                state.bytes_received += request.client_id.len() as u64;
                state.service_status()
            };
            reply_counted(&state, responder, &status);
        };
        if let Err(e) = router.add_message_handler(status_handler) {
            warn!("Failed to register status handler: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monitor_ipc::provider::ProviderManager;
    use monitor_ipc::{ChannelStatus, CommunicationError, Monitor};

    fn settings() -> ProviderSettings {
        ProviderSettings {
            provider_version: "2.0.0".to_string(),
            interface_name: Some("utun7".to_string()),
        }
    }

    fn status_request() -> StatusRequest {
        StatusRequest {
            client_id: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_status_through_loopback() {
        let manager =
            ProviderManager::mock(Arc::new(StatusProvider::new()), Some(&settings())).unwrap();
        manager.start().await.unwrap();

        let monitor = Monitor::new();
        monitor.set_channel(Some(manager.channel()));

        let pong: Pong = monitor.send(&Ping).await.unwrap();
        assert_eq!(pong, Pong);

        let status: ServiceStatus = monitor.send(&status_request()).await.unwrap();
        assert!(status.tunnel_active);
        assert_eq!(status.active_interface.as_deref(), Some("utun7"));
        assert_eq!(status.provider_version, "2.0.0");
        assert_eq!(status.bytes_received, 4);
        assert!(status.bytes_sent > 0);

        manager.stop().await;
        assert!(matches!(
            monitor.send::<_, ServiceStatus>(&status_request()).await,
            Err(CommunicationError::InvalidState(ChannelStatus::Disconnected))
        ));
    }

    #[tokio::test]
    async fn test_requires_settings() {
        let provider = StatusProvider::new();
        assert!(matches!(
            provider.configure(None).await,
            Err(ConfigurationError::MissingUserConfiguration)
        ));
        assert!(provider.start(None).await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_empty_version() {
        let provider = StatusProvider::new();
        let bytes = codec::encode(&ProviderSettings {
            provider_version: String::new(),
            interface_name: None,
        })
        .unwrap();
        assert!(matches!(
            provider.configure(Some(&bytes)).await,
            Err(ConfigurationError::SettingsApplicationFailed(_))
        ));
    }

    #[test]
    fn test_inactive_status_hides_interface() {
        let state = ProviderState {
            settings: Some(settings()),
            ..Default::default()
        };
        let status = state.service_status();
        assert!(!status.tunnel_active);
        assert_eq!(status.active_interface, None);
        assert_eq!(status.uptime_secs, 0);
    }
}
