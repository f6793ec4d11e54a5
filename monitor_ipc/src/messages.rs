//! IPC Message Definitions
//!
//! Message schemas understood by every provider host: a liveness check and
//! the status poll used by the monitoring loop.

use crate::container::Message;
use serde::{Deserialize, Serialize};

/// Simple ping to check if the provider is alive
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ping;

impl Message for Ping {
    const TYPE_TAG: &'static str = "monitor.ping";
}

/// Response to a ping request
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pong;

impl Message for Pong {
    const TYPE_TAG: &'static str = "monitor.pong";
}

/// Request for the current service status of the provider
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusRequest {
    /// Identifier of the requesting controller, for the provider's logs
    pub client_id: String,
}

impl Message for StatusRequest {
    const TYPE_TAG: &'static str = "monitor.status_request";
}

/// Service status reported by the provider
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct ServiceStatus {
    /// Whether a tunnel is currently active
    pub tunnel_active: bool,

    /// Name of the active interface, if any
    pub active_interface: Option<String>,

    /// Bytes received through the tunnel
    pub bytes_received: u64,

    /// Bytes sent through the tunnel
    pub bytes_sent: u64,

    /// Seconds since the tunnel came up
    pub uptime_secs: u64,

    /// Version of the provider
    pub provider_version: String,
}

impl Message for ServiceStatus {
    const TYPE_TAG: &'static str = "monitor.service_status";
}
