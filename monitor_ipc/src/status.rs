//! Connectivity state shared by every channel implementation.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection status of a channel.
///
/// Transitions are driven from outside the monitor: by the transport for the
/// socket adapter, by explicit lifecycle calls for the loop-back double. The
/// monitor only consults the value, and only [`ChannelStatus::Connected`]
/// lets a send through.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelStatus {
    /// The channel has not been configured
    #[default]
    Invalid,
    /// The channel is configured but not connected
    Disconnected,
    /// The channel is establishing its connection
    Connecting,
    /// The channel is connected and accepts messages
    Connected,
    /// The channel is re-establishing a connection that was lost
    Reasserting,
    /// The channel is tearing its connection down
    Disconnecting,
}

impl ChannelStatus {
    /// Every status, in declaration order.
    pub const ALL: [ChannelStatus; 6] = [
        ChannelStatus::Invalid,
        ChannelStatus::Disconnected,
        ChannelStatus::Connecting,
        ChannelStatus::Connected,
        ChannelStatus::Reasserting,
        ChannelStatus::Disconnecting,
    ];

    /// Whether a channel in this state accepts messages.
    pub fn is_connected(self) -> bool {
        self == ChannelStatus::Connected
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelStatus::Invalid => "invalid",
            ChannelStatus::Disconnected => "disconnected",
            ChannelStatus::Connecting => "connecting",
            ChannelStatus::Connected => "connected",
            ChannelStatus::Reasserting => "reasserting",
            ChannelStatus::Disconnecting => "disconnecting",
        };
        f.write_str(name)
    }
}
