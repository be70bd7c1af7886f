//! Session layer configuration.

use serde::{Deserialize, Serialize};

/// Tunables for the call session state machine.
///
/// Timeouts are in seconds; zero disables the corresponding check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Attempt to repair sessions whose dialog was lost to a network outage.
    pub repair_broken_calls: bool,
    /// Do not auto-accept incoming reINVITE/UPDATE offers; wait for the
    /// application to call `accept_update`.
    pub defer_update_default: bool,
    /// Automatically accept an incoming call that replaces an already
    /// established one.
    pub auto_answer_replacing_calls: bool,
    /// Send 180 Ringing as soon as the incoming notification is processed.
    pub auto_send_ringing: bool,
    /// Probe with an OPTIONS ping before sending the INVITE, to discover
    /// the NAT'd contact address.
    pub ping_with_options: bool,
    /// How long an outgoing call may sit in OutgoingInit waiting for the
    /// OPTIONS reply before the INVITE is sent anyway.
    pub delayed_timeout: i64,
    /// Maximum duration of an established call. Zero means unlimited.
    pub in_call_timeout: i64,
    /// How long an incoming call may ring before the application is
    /// expected to decline it as not answered.
    pub incoming_timeout: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            repair_broken_calls: true,
            defer_update_default: false,
            auto_answer_replacing_calls: true,
            auto_send_ringing: true,
            ping_with_options: false,
            delayed_timeout: 4,
            in_call_timeout: 0,
            incoming_timeout: 30,
        }
    }
}
