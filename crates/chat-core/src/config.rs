//! Chat layer configuration.

use serde::{Deserialize, Serialize};

/// Tunables for composing notifications, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Local composing stops being advertised after this much inactivity.
    pub composing_idle_timeout: i64,
    /// An active composing notification is refreshed at this interval.
    pub composing_refresh_timeout: i64,
    /// A remote composing indication expires when not refreshed within
    /// this delay.
    pub remote_composing_refresh_timeout: i64,
    /// Send delivery receipts for received messages.
    pub send_delivery_receipts: bool,
    /// Advertise our own composing activity to the peer.
    pub send_is_composing: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            composing_idle_timeout: 15,
            composing_refresh_timeout: 60,
            remote_composing_refresh_timeout: 120,
            send_delivery_receipts: true,
            send_is_composing: true,
        }
    }
}
