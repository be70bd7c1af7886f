//! Recovery of sessions whose dialog was lost to a network outage.

use tracing::{error, info, warn};

use crate::error_info::{ErrorInfo, Reason};
use crate::types::{CallState, RegistrationState, UpdateMethod};

use super::CallSession;

impl CallSession {
    /// React to a change of SIP network reachability.
    pub fn on_network_reachable(&self, sip_reachable: bool) {
        if sip_reachable {
            self.repair_if_broken();
        } else {
            self.set_broken();
        }
    }

    /// React to a registration state change of the account this session is
    /// bound to.
    pub fn on_registration_state_changed(&self, account_id: &str, state: RegistrationState) {
        let bound = self
            .with_inner(|i| i.account.as_ref().map(|a| a.id() == account_id))
            .unwrap_or(false);
        // Only repair the call when the right account got connected.
        if bound && state == RegistrationState::Ok {
            self.repair_if_broken();
        }
    }

    /// Mark the session as broken. With an established dialog a transaction
    /// failure does not close it; the dialog has to be repaired with a
    /// reINVITE once connectivity returns.
    pub(crate) fn set_broken(&self) {
        let state = self.state();
        match state {
            // In the early states the engine reports the failure from the
            // dialog or transaction layer itself.
            CallState::OutgoingInit
            | CallState::OutgoingProgress
            | CallState::OutgoingRinging
            | CallState::OutgoingEarlyMedia
            | CallState::IncomingReceived
            | CallState::PushIncomingReceived
            | CallState::IncomingEarlyMedia
            | CallState::StreamsRunning
            | CallState::Updating
            | CallState::Pausing
            | CallState::Resuming
            | CallState::Paused
            | CallState::PausedByRemote
            | CallState::UpdatedByRemote => {
                self.with_inner(|i| {
                    i.broken = true;
                    i.need_local_address_refresh = true;
                });
            }
            _ => {
                error!("set_broken(): unimplemented case [{}]", state);
            }
        }
    }

    /// Attempt to repair a broken session. Gated on configuration, global
    /// media network state and, when bound to a registering account, that
    /// account being registered again.
    pub fn repair_if_broken(&self) {
        let Some(core) = self.core() else {
            // Cannot repair once the core is gone.
            return;
        };
        if !core.config().repair_broken_calls
            || !core.media_network_reachable()
            || !self.is_broken()
        {
            return;
        }

        if let Some(account) = self.account() {
            // Make sure the account this call was routed through is
            // registered before trying anything on the dialog.
            if account.register_enabled()
                && account.registration_state() != RegistrationState::Ok
            {
                return;
            }
        }

        let state = self.state();
        match state {
            CallState::Updating | CallState::Pausing => {
                if let Some(op) = self.op() {
                    if op.dialog_request_pending() {
                        // The first reINVITE has to be cancelled, as per
                        // section 5.5 of RFC 6141.
                        if op.cancel_invite().is_ok() {
                            self.with_inner(|i| {
                                i.reinvite_on_cancel_requested = true;
                                i.broken = false;
                            });
                        }
                    }
                }
            }
            CallState::StreamsRunning | CallState::Paused | CallState::PausedByRemote => {
                let pending = self.op().map(|op| op.dialog_request_pending()).unwrap_or(false);
                if !pending {
                    self.with_inner(|i| i.broken = false);
                    self.reinvite_to_recover_from_connection_loss();
                }
            }
            CallState::UpdatedByRemote => {
                if let Some(op) = self.op() {
                    if op.dialog_request_pending() {
                        let error = ErrorInfo::from_reason(Reason::ServiceUnavailable);
                        let _ = op.decline(&error, None);
                    }
                }
                self.with_inner(|i| i.broken = false);
                self.reinvite_to_recover_from_connection_loss();
            }
            CallState::OutgoingInit | CallState::OutgoingProgress => {
                self.with_inner(|i| i.broken = false);
                self.repair_by_invite_with_replaces();
            }
            CallState::OutgoingEarlyMedia | CallState::OutgoingRinging => {
                let has_remote_tag = self.op().and_then(|op| op.remote_tag()).is_some();
                if has_remote_tag {
                    self.with_inner(|i| i.broken = false);
                    self.repair_by_invite_with_replaces();
                } else {
                    warn!(
                        "No remote tag in last provisional response, no early dialog, \
                         trying to cancel lost INVITE and will retry later"
                    );
                    if let Some(op) = self.op() {
                        if op.cancel_invite().is_ok() {
                            self.with_inner(|i| {
                                i.reinvite_on_cancel_requested = true;
                                i.broken = false;
                            });
                        }
                    }
                }
            }
            CallState::IncomingEarlyMedia
            | CallState::IncomingReceived
            | CallState::PushIncomingReceived => {
                // Keep the call broken until a forked INVITE is received
                // from the server.
            }
            _ => {
                warn!("repair_if_broken(): don't know what to do in state [{}]", state);
                self.with_inner(|i| i.broken = false);
            }
        }
    }

    /// Send a reINVITE on the existing dialog to re-anchor it on the new
    /// local transport address.
    pub(crate) fn reinvite_to_recover_from_connection_loss(&self) {
        info!(
            "CallSession [{}] is going to be updated (reINVITE) in order to recover from lost \
             connectivity",
            self.id()
        );
        let params = self.params();
        let _ = self.do_update(params.as_ref(), UpdateMethod::Invite, "", None, false);
    }

    /// Open a brand new dialog replacing the dead one, as the early dialog
    /// itself was lost.
    pub(crate) fn repair_by_invite_with_replaces(&self) {
        info!(
            "CallSession [{}] is going to have a new INVITE replacing the previous one in order \
             to recover from lost connectivity",
            self.id()
        );
        let Some(op) = self.op() else { return };
        let call_id = op.call_id();
        let from_tag = op.local_tag();
        let to_tag = op.remote_tag().unwrap_or_default();
        // Restore the INVITE body if any.
        let content = op.local_body();
        op.kill_dialog();
        self.create_op();
        if let Some(new_op) = self.op() {
            // An empty remote tag is encoded as 0, as defined by RFC 3891.
            new_op.set_replaces(&call_id, &from_tag, if to_tag.is_empty() { "0" } else { &to_tag });
            self.with_inner(|i| i.invite_content = content);
            let _ = self.start_invite(None);
        }
    }
}
