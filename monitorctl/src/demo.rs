//! In-process provider used by `monitorctl demo` and loop-back mode.

use async_trait::async_trait;
use monitor_ipc::channel::StartOptions;
use monitor_ipc::error::{ConfigurationError, ProviderError};
use monitor_ipc::messages::{Ping, Pong, ServiceStatus, StatusRequest};
use monitor_ipc::provider::{StopReason, TunnelProvider};
use monitor_ipc::{Responder, Router};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Simulated traffic added per status poll.
const BYTES_PER_POLL: u64 = 1500;

#[derive(Default)]
struct DemoState {
    started_at: Option<Instant>,
    polls: u64,
}

/// Provider that fakes a running tunnel whose counters grow with every poll.
#[derive(Default)]
pub struct DemoProvider {
    state: Arc<Mutex<DemoState>>,
}

impl DemoProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TunnelProvider for DemoProvider {
    async fn configure(&self, _user_configuration: Option<&[u8]>) -> Result<(), ConfigurationError> {
        Ok(())
    }

    async fn start(&self, _options: Option<&StartOptions>) -> Result<(), ProviderError> {
        self.state.lock().unwrap().started_at = Some(Instant::now());
        info!("Demo provider started");
        Ok(())
    }

    async fn stop(&self, reason: StopReason) {
        self.state.lock().unwrap().started_at = None;
        info!(%reason, "Demo provider stopped");
    }

    fn register_handlers(&self, router: &Router) {
        if let Err(e) = router.add_message_handler(|_: Ping, responder: &Responder| {
            send_reply(responder, &Pong);
        }) {
            warn!("Failed to register ping handler: {}", e);
        }

        let state = self.state.clone();
        let status_handler = move |request: StatusRequest, responder: &Responder| {
            debug!(client_id = %request.client_id, "Demo status poll");
            let mut state = state.lock().unwrap();
            state.polls += 1;
            let status = ServiceStatus {
                tunnel_active: state.started_at.is_some(),
                active_interface: Some("demo0".to_string()),
                bytes_received: state.polls * BYTES_PER_POLL,
                bytes_sent: state.polls * BYTES_PER_POLL / 2,
                uptime_secs: state
                    .started_at
                    .map(|started| started.elapsed().as_secs())
                    .unwrap_or(0),
                provider_version: env!("CARGO_PKG_VERSION").to_string(),
            };
            send_reply(responder, &status);
        };
        if let Err(e) = router.add_message_handler(status_handler) {
            warn!("Failed to register status handler: {}", e);
        }
    }
}

/// Reply through `responder`. Returns whether the reply was delivered.
fn send_reply<T: Serialize>(responder: &Responder, value: &T) -> bool {
    match responder.reply(value) {
        Ok(delivered) => delivered,
        Err(e) => {
            warn!("Failed to encode reply: {}", e);
            false
        }
    }
}
