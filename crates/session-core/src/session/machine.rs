//! State transitions and operation-layer event handling.
//!
//! `set_state` is the single authorized mutator of the session state. The
//! `on_*` methods are the push-style callbacks the external dialog engine
//! invokes on the session; they are processed strictly in arrival order and
//! every listener notification fires before the triggering method returns.

use tracing::{debug, error, info, warn};

use crate::call_log::CallStatus;
use crate::error_info::Reason;
use crate::errors::{Result, SessionError};
use crate::types::{now_secs, Address, CallDirection, CallState, Content, InfoMessage};

use super::CallSession;

impl CallSession {
    /// Move the session to `new_state`.
    ///
    /// Transitions out of End or Error may only go to Released, and Released
    /// may only be entered from End or Error; anything else would corrupt
    /// call accounting and is refused without mutation.
    pub(crate) fn set_state(&self, new_state: CallState, message: &str) -> Result<()> {
        let notify_terminated;
        {
            let mut inner = self.shared.inner.lock();
            if inner.state == new_state {
                return Ok(());
            }

            // Sanity checks on state changes. Any bad transition can result
            // in unpredictable results or irrecoverable errors in the
            // application.
            if matches!(inner.state, CallState::End | CallState::Error)
                && new_state != CallState::Released
            {
                error!(
                    "Abnormal call resurrection from {} to {} on CallSession [{}], aborting",
                    inner.state, new_state, self.shared.id
                );
                return Err(SessionError::FatalStateTransition { from: inner.state, to: new_state });
            }
            if new_state == CallState::Released
                && !matches!(inner.state, CallState::End | CallState::Error)
            {
                error!(
                    "Attempt to move CallSession [{}] to Released state while it was not previously \
                     in Error or End state, aborting",
                    self.shared.id
                );
                return Err(SessionError::FatalStateTransition { from: inner.state, to: new_state });
            }

            info!(
                "CallSession [{}] moving from state {} to {}",
                self.shared.id, inner.state, new_state
            );
            inner.prev_state = inner.state;
            inner.prev_message = std::mem::take(&mut inner.message);

            if new_state != CallState::Referred {
                // Referred is rather an event than a state: it does not
                // change the state of the call.
                inner.state = new_state;
                inner.message = message.to_string();
            } else {
                inner.message = inner.prev_message.clone();
            }

            notify_terminated = match new_state {
                CallState::End | CallState::Error => {
                    if !inner.non_op_error {
                        if let Some(op) = &inner.op {
                            inner.error_info = op.error_info();
                        }
                    }
                    let code = inner.error_info.protocol_code();
                    match inner.error_info.reason() {
                        Reason::Declined => {
                            // Do not re-change the status of a call if it is
                            // already set.
                            if inner.log.status() != CallStatus::Missed {
                                inner.log.set_status(CallStatus::Declined);
                            }
                        }
                        Reason::NotAnswered => {
                            if inner.direction == CallDirection::Incoming {
                                inner.log.set_status(CallStatus::Missed);
                            }
                        }
                        Reason::None => {
                            if inner.direction == CallDirection::Incoming {
                                if (200..300).contains(&code) {
                                    inner.log.set_status(CallStatus::AcceptedElsewhere);
                                } else if code == 487 {
                                    inner.log.set_status(CallStatus::Missed);
                                }
                            }
                        }
                        Reason::DoNotDisturb => {
                            if inner.direction == CallDirection::Incoming
                                && (600..700).contains(&code)
                            {
                                inner.log.set_status(CallStatus::DeclinedElsewhere);
                            }
                        }
                        _ => {}
                    }
                    // Complete the log now so the application sees the final
                    // record from within the notification.
                    let now = now_secs();
                    let duration = inner.log.compute_duration(now);
                    inner.log.set_duration(duration);
                    let error_info = inner.error_info.clone();
                    inner.log.set_error_info(error_info);
                    if inner.log.status() == CallStatus::Missed {
                        if let Some(core) = self.shared.core.upgrade() {
                            core.count_missed_call();
                        }
                    }
                    true
                }
                CallState::Connected => {
                    inner.log.set_status(CallStatus::Success);
                    inner.log.set_connected_time(now_secs());
                    false
                }
                _ => false,
            };

            if message.is_empty() {
                error!(
                    "You must fill a reason when changing call state (from {} to {})",
                    inner.prev_state, inner.state
                );
            }
        }

        let listener = self.listener();
        if notify_terminated {
            listener.on_call_session_set_terminated(self);
        }
        listener.on_call_session_state_changed(self, new_state, message);

        if new_state == CallState::Released {
            // Shall be performed after the application was notified.
            self.set_released();
        } else {
            // Lifecycle tick: retry whatever was deferred.
            self.execute_pending_actions();
        }
        Ok(())
    }

    pub(crate) fn restore_previous_state(&self) {
        let (prev, prev_message) = self.with_inner(|i| (i.prev_state, i.prev_message.clone()));
        let _ = self.set_state(prev, &prev_message);
    }

    pub(crate) fn set_transfer_state(&self, new_state: CallState) {
        let changed = self.with_inner(|i| {
            if new_state == i.transfer_state {
                error!(
                    "Unable to change transfer state for CallSession [{}] from [{}] to [{}]",
                    self.shared.id, i.transfer_state, new_state
                );
                return false;
            }
            info!(
                "Transfer state for CallSession [{}] changed from [{}] to [{}]",
                self.shared.id, i.transfer_state, new_state
            );
            i.transfer_state = new_state;
            true
        });
        if changed {
            self.listener().on_call_session_transfer_state_changed(self, new_state);
        }
    }

    /// Terminal cleanup once End or Error is definitive: release the op,
    /// drop cross-session links and pending work, notify the application.
    fn set_released(&self) {
        let (op, ping_op) = self.with_inner(|i| {
            if let Some(op) = &i.op {
                // Transfer the last error so that it can be obtained even in
                // Released state.
                if !i.non_op_error {
                    i.error_info = op.error_info();
                }
            }
            i.referer = None;
            i.transfer_target = None;
            i.pending.clear();
            (i.op.take(), i.ping_op.take())
        });
        // No more upcalls from the engine concerning this session.
        if let Some(op) = op {
            op.release();
        }
        if let Some(ping_op) = ping_op {
            ping_op.release();
        }
        if let Some(core) = self.core() {
            core.registry().unregister(self.id());
        }
        self.listener().on_call_session_set_released(self);
    }

    /// Common tail of every local termination path.
    pub(crate) fn terminate_internal(&self) {
        self.with_inner(|i| {
            if matches!(i.state, CallState::IncomingReceived | CallState::IncomingEarlyMedia) {
                match i.error_info.reason() {
                    Reason::None => {
                        i.error_info.set(
                            None,
                            Reason::Declined,
                            Reason::Declined.error_code(),
                            Some("Call declined"),
                        );
                        i.non_op_error = true;
                    }
                    Reason::NotAnswered => {}
                    _ => i.non_op_error = true,
                }
                // A locally refused incoming call is a decline whatever the
                // protocol reason sent with it, unless it was already missed.
                if i.log.status() != CallStatus::Missed {
                    i.log.set_status(CallStatus::Declined);
                }
            }
        });
        let _ = self.set_state(CallState::End, "Call terminated");
        // With no dialog left there is nothing further to wait for.
        let releasable = match self.op() {
            Some(op) => !op.has_dialog(),
            None => true,
        };
        if releasable && self.state() == CallState::End {
            let _ = self.set_state(CallState::Released, "Call released");
        }
    }

    /// Target state for a renegotiation started from the current state.
    pub(crate) fn update_target_state(&self, operation: &'static str) -> Result<CallState> {
        let state = self.state();
        let next = match state {
            CallState::IncomingReceived
            | CallState::PushIncomingReceived
            | CallState::IncomingEarlyMedia
            | CallState::OutgoingRinging
            | CallState::OutgoingEarlyMedia => CallState::EarlyUpdating,
            CallState::Connected
            | CallState::StreamsRunning
            | CallState::PausedByRemote
            | CallState::UpdatedByRemote => CallState::Updating,
            CallState::Paused => CallState::Pausing,
            CallState::OutgoingProgress
            | CallState::Pausing
            | CallState::Resuming
            | CallState::Updating
            | CallState::EarlyUpdating => state,
            _ => {
                error!("Update is not allowed in [{}] state", state);
                return Err(SessionError::InvalidState { operation, state });
            }
        };
        Ok(next)
    }

    // ==== Events from the operation layer ====

    /// The far end answered. The connected state is notified immediately,
    /// even if errors occur afterwards.
    pub fn on_accepted(&self) {
        match self.state() {
            CallState::OutgoingProgress
            | CallState::OutgoingRinging
            | CallState::OutgoingEarlyMedia => {
                let _ = self.set_state(CallState::Connected, "Connected");
            }
            CallState::Pausing => {
                let _ = self.set_state(CallState::Paused, "Call paused");
            }
            CallState::Resuming => {
                let _ = self.set_state(CallState::StreamsRunning, "Call resumed");
            }
            CallState::Updating => {
                let _ = self.set_state(CallState::StreamsRunning, "Streams running");
            }
            CallState::EarlyUpdating => {
                self.restore_previous_state();
            }
            _ => {}
        }
        // Privacy is renegotiated on every answer.
        if let Some(op) = self.op() {
            let privacy = op.privacy();
            self.with_inner(|i| i.current_params.set_privacy(privacy));
        }
    }

    pub fn on_ack_being_sent(&self, headers: &[(String, String)]) {
        self.listener().on_ack_being_sent(self, headers);
        if self.state() == CallState::Connected {
            let _ = self.set_state(CallState::StreamsRunning, "Media streams running");
        }
    }

    pub fn on_ack_received(&self, headers: &[(String, String)]) {
        self.listener().on_ack_received(self, headers);
        if self.state() == CallState::Connected {
            let _ = self.set_state(CallState::StreamsRunning, "Media streams running");
        }
    }

    /// A CANCEL we issued completed; continue a scheduled repair if one was
    /// waiting for it.
    pub fn on_cancel_done(&self) {
        let reinvite = self.with_inner(|i| std::mem::take(&mut i.reinvite_on_cancel_requested));
        if reinvite {
            self.reinvite_to_recover_from_connection_loss();
        }
    }

    /// The current transaction failed; decide between transparent retry,
    /// rollback and termination.
    pub fn on_failure(&self) {
        let Some(op) = self.op() else { return };
        let ei = op.error_info();
        let state = self.state();

        if ei.reason() == Reason::Redirect
            && matches!(
                state,
                CallState::OutgoingInit
                    | CallState::OutgoingProgress
                    | CallState::OutgoingRinging
                    | CallState::OutgoingEarlyMedia
            )
        {
            if let Some(redirect_to) = op.remote_contact_address() {
                warn!("Redirecting CallSession [{}] to {}", self.id(), redirect_to);
                self.with_inner(|i| i.log.set_to_address(redirect_to));
                self.restart_invite();
                return;
            }
        }

        // Some call errors are not fatal.
        if matches!(
            state,
            CallState::Updating | CallState::Pausing | CallState::Resuming | CallState::StreamsRunning
        ) {
            match ei.reason() {
                Reason::RequestPending => {
                    // There will be a retry, keep this state.
                    info!(
                        "Call error on state [{}], keeping this state until scheduled retry",
                        state
                    );
                    return;
                }
                Reason::NoMatch => {
                    // The stray response matched nothing we still care
                    // about; the session record stays untouched.
                    debug!("Ignoring NoMatch error on state [{}]", state);
                    return;
                }
                _ if state != CallState::StreamsRunning => {
                    // The renegotiation failed but the dialog survives.
                    let prev = self.previous_state();
                    info!(
                        "Call error on state [{}], restoring previous state [{}]",
                        state, prev
                    );
                    let _ = self.set_state(prev, ei.phrase());
                    return;
                }
                _ => {}
            }
        }

        if !matches!(state, CallState::End | CallState::Error) {
            if ei.reason() == Reason::Declined {
                let _ = self.set_state(CallState::End, "Call declined");
            } else if state.is_early() {
                let _ = self.set_state(CallState::Error, ei.phrase());
            } else {
                let _ = self.set_state(CallState::End, ei.phrase());
            }
        }
        // A call coming from a refer chain reports its fate to the referer.
        self.notify_referer();
    }

    pub fn on_info_received(&self, content: Option<Content>) {
        let headers = self.op().map(|op| op.received_custom_headers()).unwrap_or_default();
        let info = InfoMessage { headers, content };
        self.listener().on_info_received(self, &info);
    }

    pub fn on_ping_reply(&self) {
        if self.state() == CallState::OutgoingInit {
            self.with_inner(|i| i.ping_replied = true);
            if self.is_ready_for_invite() {
                let _ = self.start_invite(None);
            }
        }
    }

    /// The far end asked us to refer this call elsewhere. A pure
    /// notification pulse: the tracked state is not modified.
    pub fn on_referred(&self, refer_to: Address) {
        self.with_inner(|i| {
            i.refer_to_address = Some(refer_to);
            i.refer_pending = true;
        });
        let _ = self.set_state(CallState::Referred, "Referred");
        if self.with_inner(|i| i.refer_pending) {
            self.listener().on_call_session_start_referred(self);
        }
    }

    pub fn on_remote_ringing(&self, early_media: bool) {
        if let Some(op) = self.op() {
            let privacy = op.privacy();
            self.with_inner(|i| i.current_params.set_privacy(privacy));
        }
        if early_media {
            let _ = self.set_state(CallState::OutgoingEarlyMedia, "Remote ringing with early media");
        } else {
            let _ = self.set_state(CallState::OutgoingRinging, "Remote ringing");
        }
    }

    /// Generic lifecycle tick from the engine; retries deferred work.
    pub fn on_call_state_changed(&self) {
        self.execute_pending_actions();
    }

    /// The engine dropped the last transaction of the dialog; nothing is
    /// left to wait for.
    pub fn on_released(&self) {
        match self.state() {
            CallState::End | CallState::Error => {
                let _ = self.set_state(CallState::Released, "Call released");
            }
            CallState::Released => {}
            state => {
                // The dialog disappeared under an active session; close it
                // down in order.
                warn!("Dialog released while CallSession [{}] is in state [{}]", self.id(), state);
                let _ = self.set_state(CallState::End, "Call ended");
                let _ = self.set_state(CallState::Released, "Call released");
            }
        }
    }

    /// The dialog was terminated by the far end or by the engine.
    pub fn on_terminated(&self) {
        match self.state() {
            CallState::End | CallState::Error => {
                warn!("terminated: CallSession [{}] already terminated, ignoring", self.id());
                return;
            }
            CallState::IncomingReceived | CallState::IncomingEarlyMedia => {
                let cancelled_without_reason = self
                    .op()
                    .map(|op| op.reason_error_info().protocol().is_empty())
                    .unwrap_or(true);
                if cancelled_without_reason {
                    self.with_inner(|i| {
                        i.error_info.set(None, Reason::NotAnswered, 0, Some("Incoming call cancelled"));
                        i.non_op_error = true;
                    });
                }
            }
            _ => {}
        }
        if self.with_inner(|i| i.refer_pending) {
            self.listener().on_call_session_start_referred(self);
        }
        let _ = self.set_state(CallState::End, "Call ended");
    }

    /// An incoming reINVITE or UPDATE arrived. Dispatch depends on where
    /// the session currently is.
    pub fn on_updated(&self, is_update: bool) {
        if let Some(config) = self.config() {
            self.with_inner(|i| i.defer_update = config.defer_update_default);
        }
        // The tracked state may change while handling; work on a copy.
        let local_state = self.state();
        match local_state {
            CallState::PausedByRemote => self.updated_by_remote(),
            // SIP UPDATE during an early dialog.
            CallState::OutgoingRinging | CallState::OutgoingEarlyMedia | CallState::IncomingEarlyMedia => {
                if is_update {
                    let _ = self.set_state(CallState::EarlyUpdatedByRemote, "Early update by remote");
                    let (prev, prev_name) =
                        self.with_inner(|i| (i.prev_state, i.prev_state.to_string()));
                    let _ = self.accept_update_internal(prev, &prev_name);
                }
            }
            CallState::StreamsRunning | CallState::Connected | CallState::UpdatedByRemote => {
                // UpdatedByRemote can happen again on UAC connectivity loss.
                self.updated_by_remote();
            }
            CallState::Paused => {
                // Remain paused but accept the offer anyway.
                let _ = self.set_state(
                    CallState::UpdatedByRemote,
                    "Call updated by remote (while in Paused)",
                );
                let _ = self.accept_update_internal(CallState::Paused, "Paused");
            }
            CallState::Pausing | CallState::Updating | CallState::Resuming => {
                // Notify the UpdatedByRemote state, then return to the
                // original state so the retryable transaction can complete.
                let _ = self.set_state(
                    CallState::UpdatedByRemote,
                    "Call updated by remote while in transient state",
                );
                let _ = self.accept_update_internal(local_state, &local_state.to_string());
            }
            _ => {
                warn!(
                    "Receiving reINVITE or UPDATE while in state [{}], should not happen",
                    local_state
                );
            }
        }
    }

    /// Same dispatch for an UPDATE the engine classifies as in-dialog
    /// refresh negotiation.
    pub fn on_updating(&self, is_update: bool) {
        self.on_updated(is_update);
    }

    /// A pure session refresh: briefly notify UpdatedByRemote and return to
    /// the previous state, since the actual call state does not change.
    pub fn on_refreshed(&self) {
        let _ = self.set_state(CallState::UpdatedByRemote, "Session refresh");
        self.restore_previous_state();
    }

    fn updated_by_remote(&self) {
        let _ = self.set_state(CallState::UpdatedByRemote, "Call updated by remote");
        let (defer, defer_internal) = self.with_inner(|i| (i.defer_update, i.defer_update_internal));
        if defer || defer_internal {
            if self.state() == CallState::UpdatedByRemote && !defer_internal {
                info!(
                    "CallSession [{}]: UpdatedByRemote was signaled but deferred; the application \
                     is expected to accept the update later",
                    self.id()
                );
            }
        } else if self.state() == CallState::UpdatedByRemote {
            let _ = self.accept_update(None);
        }
        // Otherwise the application responded from within the callback, the
        // job is already done.
    }

    /// Accept the pending offer and settle on `next_state`. A remote offer
    /// holding the media flips the outcome to PausedByRemote.
    pub(crate) fn accept_update_internal(&self, next_state: CallState, state_info: &str) -> Result<()> {
        let op = self.op().ok_or(SessionError::NoOp)?;
        op.accept()?;
        let mut next = next_state;
        let mut info: &str = state_info;
        if matches!(
            next,
            CallState::Connected | CallState::StreamsRunning | CallState::PausedByRemote
        ) {
            if let Some(direction) = op.remote_media_direction() {
                use crate::types::MediaDirection::*;
                if matches!(direction, SendOnly | Inactive) {
                    next = CallState::PausedByRemote;
                    info = "Call paused by remote";
                } else if next == CallState::PausedByRemote {
                    next = CallState::StreamsRunning;
                    info = "Call resumed by remote";
                }
            }
        }
        self.set_state(next, info)
    }

    /// Transfer ownership of the dialog from the current op to `new_op`.
    /// The old handle is released only after the new one is fully wired.
    pub fn replace_op(&self, new_op: std::sync::Arc<dyn crate::op::CallOp>) {
        let old_op = self.with_inner(|i| i.op.replace(new_op.clone()));
        let state = self.state();
        new_op.set_local_media_description(
            old_op.as_ref().and_then(|op| op.local_media_description()),
        );
        match state {
            CallState::IncomingEarlyMedia | CallState::IncomingReceived => {
                new_op.notify_ringing(state == CallState::IncomingEarlyMedia);
            }
            CallState::Connected | CallState::StreamsRunning => {
                let _ = new_op.accept();
            }
            CallState::PushIncomingReceived => {}
            _ => {
                warn!("replace_op(): don't know what to do in state [{}]", state);
            }
        }
        let Some(old_op) = old_op else { return };
        match state {
            CallState::IncomingEarlyMedia | CallState::IncomingReceived => {
                info!("replace_op(): terminating old session in early state");
                if new_op.replaces().is_some() {
                    old_op.terminate(None);
                } else {
                    // Do not terminate a forked INVITE.
                    old_op.kill_dialog();
                }
            }
            CallState::Connected | CallState::StreamsRunning => {
                info!("replace_op(): terminating old session in running state");
                old_op.terminate(None);
                old_op.kill_dialog();
            }
            _ => {}
        }
        old_op.release();
    }

    /// Restart the INVITE towards the (possibly re-targeted) to-address on
    /// a fresh op.
    pub(crate) fn restart_invite(&self) {
        self.create_op();
        let (subject, content) = self.with_inner(|i| (i.subject.clone(), i.invite_content.clone()));
        let _ = self.initiate_outgoing(&subject, content.as_ref());
    }

    pub(crate) fn notify_referer(&self) {
        let Some(referer_id) = self.with_inner(|i| i.referer.clone()) else { return };
        let Some(core) = self.core() else { return };
        let Some(referer) = core.registry().resolve(&referer_id) else { return };
        if let Some(op) = referer.op() {
            op.notify_refer_state(self.state());
        }
    }
}
