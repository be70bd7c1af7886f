//! Notification surface between the state machine and the upper layers.

use crate::session::CallSession;
use crate::types::{CallState, InfoMessage};

/// Callbacks fired synchronously by the session state machine.
///
/// Calls happen on the same execution context as the triggering network
/// event, with no buffering. Implementations may re-enter the session from
/// inside a callback (e.g. accept or decline while handling
/// `on_call_session_state_changed`); the session never holds its internal
/// lock across a callback, so this is safe.
pub trait CallSessionListener: Send + Sync {
    /// The session moved to a new state. For the `Referred` pulse this fires
    /// without the tracked state having changed.
    fn on_call_session_state_changed(&self, _session: &CallSession, _state: CallState, _message: &str) {}

    fn on_call_session_transfer_state_changed(&self, _session: &CallSession, _state: CallState) {}

    /// The session reached End or Error and its log has been completed. Fired
    /// before `on_call_session_state_changed` reports the terminal state.
    fn on_call_session_set_terminated(&self, _session: &CallSession) {}

    /// All resources of the session have been torn down. Fired after the
    /// application saw the End or Error notification.
    fn on_call_session_set_released(&self, _session: &CallSession) {}

    /// An incoming session is about to be presented; gives the application a
    /// chance to make it the current call.
    fn on_incoming_call_session_started(&self, _session: &CallSession) {}

    /// An incoming INVITE was received, before the state changes.
    fn on_incoming_call_session_notified(&self, _session: &CallSession) {}

    /// Periodic check while an incoming session is ringing; the application
    /// decides whether to give up on it.
    fn on_incoming_call_session_timeout_check(&self, _session: &CallSession, _elapsed: i64, _one_second_elapsed: bool) {}

    /// Periodic check while a push-notified session still waits for its
    /// INVITE to arrive.
    fn on_push_call_session_timeout_check(&self, _session: &CallSession, _elapsed: i64) {}

    /// The far end asked to refer this session to another target.
    fn on_call_session_start_referred(&self, _session: &CallSession) {}

    /// The session was flagged as accepted before the incoming notification
    /// completed.
    fn on_call_session_accepting(&self, _session: &CallSession) {}

    fn on_ack_being_sent(&self, _session: &CallSession, _headers: &[(String, String)]) {}

    fn on_ack_received(&self, _session: &CallSession, _headers: &[(String, String)]) {}

    fn on_info_received(&self, _session: &CallSession, _info: &InfoMessage) {}

    /// Last chance to veto an accept by terminating the session from within
    /// the callback.
    fn on_check_for_acceptation(&self, _session: &CallSession) {}

    fn on_background_task_to_be_started(&self, _session: &CallSession) {}

    fn on_background_task_to_be_stopped(&self, _session: &CallSession) {}

    // Media engine hooks. The session layer never touches audio itself.
    fn on_start_ringtone(&self, _session: &CallSession) {}

    fn on_stop_ringtone(&self, _session: &CallSession) {}
}

/// Listener that ignores every notification.
#[derive(Debug, Default)]
pub struct NullListener;

impl CallSessionListener for NullListener {}
