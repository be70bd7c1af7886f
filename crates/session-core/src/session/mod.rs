//! The call session and its state machine.
//!
//! A [`CallSession`] drives one SIP dialog through its whole lifecycle. The
//! dialog itself is owned by the external engine and reached through a
//! [`CallOp`] handle; the session reacts to the engine's events (the `on_*`
//! methods in [`machine`]), validates transitions, and notifies the
//! application through its [`CallSessionListener`].
//!
//! All mutation happens on one logical execution context. The internal lock
//! only exists to make listener re-entrancy safe: it is never held across a
//! callback.

mod machine;
mod pending;
mod repair;
#[cfg(test)]
mod tests;

pub use pending::PendingAction;

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::account::Account;
use crate::call_log::{CallLog, CallStatus};
use crate::config::SessionConfig;
use crate::core::CoreContext;
use crate::error_info::{ErrorInfo, Reason};
use crate::errors::{Result, SessionError};
use crate::listener::CallSessionListener;
use crate::op::{CallOp, OpFactory};
use crate::params::{CallSessionParams, Privacy};
use crate::types::{
    now_secs, Address, CallDirection, CallState, Content, MediaDirection, SessionId, UpdateMethod,
};

pub(crate) struct Inner {
    pub(crate) state: CallState,
    pub(crate) prev_state: CallState,
    pub(crate) message: String,
    pub(crate) prev_message: String,
    pub(crate) transfer_state: CallState,
    pub(crate) direction: CallDirection,
    /// Params requested by the application, deep-copied.
    pub(crate) params: Option<CallSessionParams>,
    /// Params as negotiated so far.
    pub(crate) current_params: CallSessionParams,
    pub(crate) remote_params: Option<CallSessionParams>,
    pub(crate) log: CallLog,
    pub(crate) error_info: ErrorInfo,
    /// The error info was produced locally; do not overwrite it from the op.
    pub(crate) non_op_error: bool,
    pub(crate) op: Option<Arc<dyn CallOp>>,
    pub(crate) ping_op: Option<Arc<dyn CallOp>>,
    pub(crate) ping_replied: bool,
    pub(crate) account: Option<Arc<Account>>,
    pub(crate) pending: VecDeque<PendingAction>,
    pub(crate) broken: bool,
    pub(crate) need_local_address_refresh: bool,
    pub(crate) refer_pending: bool,
    pub(crate) refer_to_address: Option<Address>,
    pub(crate) transfer_target: Option<SessionId>,
    pub(crate) referer: Option<SessionId>,
    pub(crate) subject: String,
    pub(crate) invite_content: Option<Content>,
    pub(crate) defer_update: bool,
    pub(crate) defer_update_internal: bool,
    pub(crate) reinvite_on_cancel_requested: bool,
    pub(crate) notify_ringing: bool,
    pub(crate) accepting_early: bool,
    pub(crate) defer_incoming_notification: bool,
}

pub(crate) struct SessionShared {
    pub(crate) id: SessionId,
    pub(crate) core: Weak<CoreContext>,
    pub(crate) factory: Arc<dyn OpFactory>,
    pub(crate) listener: Mutex<Arc<dyn CallSessionListener>>,
    pub(crate) inner: Mutex<Inner>,
}

/// Handle onto one call session. Cloning is cheap and shares the session.
#[derive(Clone)]
pub struct CallSession {
    shared: Arc<SessionShared>,
}

impl CallSession {
    pub fn new(
        core: &Arc<CoreContext>,
        params: Option<&CallSessionParams>,
        listener: Arc<dyn CallSessionListener>,
        factory: Arc<dyn OpFactory>,
    ) -> Self {
        let id = SessionId::new();
        let inner = Inner {
            state: CallState::Idle,
            prev_state: CallState::Idle,
            message: String::new(),
            prev_message: String::new(),
            transfer_state: CallState::Idle,
            direction: CallDirection::Outgoing,
            params: params.cloned(),
            current_params: CallSessionParams::new(),
            remote_params: None,
            log: CallLog::new(CallDirection::Outgoing, Address::anonymous(), Address::anonymous()),
            error_info: ErrorInfo::new(),
            non_op_error: false,
            op: None,
            ping_op: None,
            ping_replied: false,
            account: None,
            pending: VecDeque::new(),
            broken: false,
            need_local_address_refresh: false,
            refer_pending: false,
            refer_to_address: None,
            transfer_target: None,
            referer: None,
            subject: String::new(),
            invite_content: None,
            defer_update: false,
            defer_update_internal: false,
            reinvite_on_cancel_requested: false,
            notify_ringing: true,
            accepting_early: false,
            defer_incoming_notification: false,
        };
        let shared = Arc::new(SessionShared {
            id: id.clone(),
            core: Arc::downgrade(core),
            factory,
            listener: Mutex::new(listener),
            inner: Mutex::new(inner),
        });
        core.registry().register(id.clone(), Arc::downgrade(&shared));
        info!("New CallSession [{}] initialized", id);
        Self { shared }
    }

    pub(crate) fn from_shared(shared: Arc<SessionShared>) -> Self {
        Self { shared }
    }

    // ==== Configuration ====

    /// Configure an outgoing session towards `to`.
    pub fn configure_outgoing(&self, account: Option<Arc<Account>>, from: Address, to: Address) {
        self.with_inner(|i| {
            i.direction = CallDirection::Outgoing;
            i.account = account;
            i.log = CallLog::new(CallDirection::Outgoing, from, to);
            i.referer = i.params.as_ref().and_then(|p| p.referer().cloned());
        });
    }

    /// Configure an incoming session from an operation handle the engine
    /// already created for the received INVITE.
    pub fn configure_incoming(
        &self,
        account: Option<Arc<Account>>,
        op: Arc<dyn CallOp>,
        from: Address,
        to: Address,
    ) {
        let call_id = op.call_id();
        let privacy = op.privacy();
        self.with_inner(|i| {
            i.direction = CallDirection::Incoming;
            i.account = account;
            i.log = CallLog::new(CallDirection::Incoming, from, to);
            i.log.set_call_id(call_id);
            i.op = Some(op);
            i.params = Some(CallSessionParams::new());
            // Avoid asking later for features the remote end apparently
            // does not support.
            i.current_params.set_privacy(privacy);
        });
    }

    /// Configure a session known only from a push notification; the INVITE
    /// has not arrived yet.
    pub fn configure_from_push(&self, direction: CallDirection, call_id: &str) {
        self.with_inner(|i| {
            i.direction = direction;
            // Valid placeholder identities per RFC 3323.
            i.log = CallLog::new(direction, Address::anonymous(), Address::anonymous());
            i.log.set_call_id(call_id);
        });
    }

    pub fn set_listener(&self, listener: Arc<dyn CallSessionListener>) {
        *self.shared.listener.lock() = listener;
    }

    pub fn set_defer_incoming_notification(&self, defer: bool) {
        self.with_inner(|i| i.defer_incoming_notification = defer);
    }

    /// Hold remote updates pending while an internal operation (e.g. ICE
    /// processing) must conclude before an answer can be produced.
    pub fn set_internal_update_deferred(&self, defer: bool) {
        self.with_inner(|i| i.defer_update_internal = defer);
    }

    // ==== Outgoing call flow ====

    /// Start an outgoing call. The INVITE goes out immediately unless an
    /// OPTIONS ping must complete first; in that case it is sent from
    /// `on_ping_reply` or from the delayed-start check in `iterate`.
    pub fn initiate_outgoing(&self, subject: &str, content: Option<&Content>) -> Result<()> {
        self.set_state(CallState::OutgoingInit, "Starting outgoing call")?;
        self.with_inner(|i| {
            i.log.set_start_time(now_secs());
            i.subject = subject.to_string();
            i.invite_content = content.cloned();
        });
        let has_account = self.with_inner(|i| i.account.is_some());
        let defer = if !has_account { self.start_ping() } else { false };
        if !defer {
            self.start_invite(None)?;
        }
        Ok(())
    }

    /// Send the INVITE, towards `destination` when given, towards the
    /// session's to-address otherwise.
    pub fn start_invite(&self, destination: Option<&Address>) -> Result<()> {
        if self.op().is_none() {
            self.create_op();
        }
        self.set_contact_on_op();
        let (from, to, subject, content) = self.with_inner(|i| {
            (
                i.log.from_address().clone(),
                destination.cloned().unwrap_or_else(|| i.log.to_address().clone()),
                i.subject.clone(),
                i.invite_content.clone(),
            )
        });
        let op = self.op().ok_or(SessionError::NoOp)?;
        if content.is_some() {
            op.set_local_body(content);
        }
        match op.invite(&from, &to, &subject) {
            Err(err) => {
                // The engine may have reported the failure synchronously, in
                // which case the state is already final.
                if !matches!(self.state(), CallState::Error | CallState::Released) {
                    let _ = self.set_state(CallState::Error, "Call failed");
                }
                Err(err)
            }
            Ok(()) => {
                let call_id = op.call_id();
                self.with_inner(|i| i.log.set_call_id(call_id));
                self.set_state(CallState::OutgoingProgress, "Outgoing call in progress")
            }
        }
    }

    // ==== Incoming call flow ====

    /// Present a newly received incoming call to the application and move
    /// the session to IncomingReceived.
    pub fn start_incoming_notification(&self, notify_ringing: bool) {
        let push = self.state() == CallState::PushIncomingReceived;
        if !push {
            self.with_inner(|i| i.notify_ringing = notify_ringing);
            let listener = self.listener();
            listener.on_incoming_call_session_notified(self);
            listener.on_background_task_to_be_started(self);
        }
        if self.with_inner(|i| i.defer_incoming_notification) {
            info!("Defer incoming notification for CallSession [{}]", self.id());
            return;
        }

        let mut try_start_ringtone = true;
        if !push {
            // Can make this session the current call of the application.
            self.listener().on_incoming_call_session_started(self);
        } else {
            try_start_ringtone = false;
        }

        let _ = self.set_state(CallState::IncomingReceived, "Incoming call received");

        // From now on the application is aware of the call; our background
        // task is no longer needed.
        self.listener().on_background_task_to_be_stopped(self);

        let auto_ring = self.core().map(|c| c.config().auto_send_ringing).unwrap_or(true);
        let state = self.state();
        if (state == CallState::IncomingReceived && auto_ring)
            || state == CallState::IncomingEarlyMedia
        {
            if try_start_ringtone {
                self.listener().on_start_ringtone(self);
            }
            self.handle_incoming_received();
        }

        if self.with_inner(|i| i.accepting_early) {
            info!("CallSession [{}] is accepted early", self.id());
            self.listener().on_call_session_accepting(self);
        }
    }

    /// Record a push notification for a call whose INVITE is still on its
    /// way.
    pub fn start_push_incoming_notification(&self) {
        let listener = self.listener();
        listener.on_incoming_call_session_started(self);
        listener.on_start_ringtone(self);
        let _ = self.set_state(CallState::PushIncomingReceived, "Push notification received");
    }

    /// Flag the session as accepted before the incoming notification has
    /// been fully processed.
    pub fn accepting(&self) {
        self.with_inner(|i| i.accepting_early = true);
    }

    fn handle_incoming_received(&self) {
        self.set_contact_on_op();
        let (notify_ringing, state) = self.with_inner(|i| (i.notify_ringing, i.state));
        if notify_ringing && state != CallState::IncomingEarlyMedia {
            if let Some(op) = self.op() {
                op.notify_ringing(false);
            }
        }
        self.accept_or_terminate_replaced_session();
    }

    /// An incoming call that replaces an established one is accepted
    /// automatically when configured to do so.
    fn accept_or_terminate_replaced_session(&self) {
        let auto = self.core().map(|c| c.config().auto_answer_replacing_calls).unwrap_or(true);
        if !auto {
            return;
        }
        let Some(replaced) = self.replaced_session() else { return };
        match replaced.state() {
            CallState::StreamsRunning
            | CallState::Connected
            | CallState::Paused
            | CallState::PausedByRemote
            | CallState::Pausing => {
                info!(
                    "CallSession [{}] replaces an accepted session, accepting it automatically",
                    self.id()
                );
                let _ = self.accept(None);
            }
            _ => {}
        }
    }

    // ==== Application operations ====

    pub fn accept(&self, params: Option<&CallSessionParams>) -> Result<()> {
        self.check_for_acceptation()?;
        self.accept_internal(params)
    }

    /// Answer with early media: ring with a media session already flowing,
    /// without formally accepting the call.
    pub fn accept_early_media(&self) -> Result<()> {
        let state = self.state();
        if !matches!(state, CallState::IncomingReceived | CallState::PushIncomingReceived) {
            error!("Bad state [{}] for accepting early media", state);
            return Err(SessionError::InvalidState { operation: "accept_early_media", state });
        }
        self.set_contact_on_op();
        if let Some(op) = self.op() {
            op.notify_ringing(true);
        }
        self.set_state(CallState::IncomingEarlyMedia, "Incoming call with early media")
    }

    fn check_for_acceptation(&self) -> Result<()> {
        let state = self.state();
        match state {
            CallState::IncomingReceived
            | CallState::IncomingEarlyMedia
            | CallState::PushIncomingReceived => {}
            _ => {
                error!(
                    "check_for_acceptation(): CallSession [{}] is in state [{}], operation not permitted",
                    self.id(),
                    state
                );
                return Err(SessionError::InvalidState { operation: "accept", state });
            }
        }
        self.listener().on_check_for_acceptation(self);

        // This call may be supposed to replace an already running one.
        if let Some(replaced) = self.replaced_session() {
            info!(
                "CallSession [{}] replaces CallSession [{}], terminating the replaced one",
                self.id(),
                replaced.id()
            );
            let _ = replaced.terminate(None);
        }
        Ok(())
    }

    fn accept_internal(&self, params: Option<&CallSessionParams>) -> Result<()> {
        // Best effort at giving a real local or routable contact address.
        self.set_contact_on_op();
        if let Some(params) = params {
            self.with_inner(|i| i.params = Some(params.clone()));
        }
        let op = self.op().ok_or(SessionError::NoOp)?;
        if let Some(headers) = self.with_inner(|i| i.params.as_ref().map(|p| p.custom_headers().to_vec())) {
            op.set_sent_custom_headers(&headers);
        }
        op.accept()?;
        self.set_state(CallState::Connected, "Connected")
    }

    /// Accept a pending remote update. Only legal while the session is in
    /// UpdatedByRemote.
    pub fn accept_update(&self, params: Option<&CallSessionParams>) -> Result<()> {
        let state = self.state();
        if state != CallState::UpdatedByRemote {
            error!("accept_update(): invalid state [{}] to call this method", state);
            return Err(SessionError::InvalidState { operation: "accept_update", state });
        }
        if let Some(params) = params {
            self.with_inner(|i| i.params = Some(params.clone()));
        }
        let (prev, prev_name) = self.with_inner(|i| (i.prev_state, i.prev_state.to_string()));
        self.accept_update_internal(prev, &prev_name)
    }

    /// Keep a remote update pending until the application accepts it
    /// explicitly.
    pub fn defer_update_request(&self) -> Result<()> {
        let state = self.state();
        if state != CallState::UpdatedByRemote {
            error!("defer_update_request() not done in state UpdatedByRemote");
            return Err(SessionError::InvalidState { operation: "defer_update", state });
        }
        self.with_inner(|i| i.defer_update = true);
        Ok(())
    }

    pub fn decline(&self, reason: Reason) -> Result<()> {
        self.do_decline(Some(&ErrorInfo::from_reason(reason)), None)
    }

    pub fn decline_with_error_info(&self, error: &ErrorInfo) -> Result<()> {
        self.do_decline(Some(error), None)
    }

    /// Decline an incoming call that was never presented to the user,
    /// recording it as missed.
    pub fn decline_not_answered(&self, reason: Reason) -> Result<()> {
        self.with_inner(|i| {
            i.log.set_status(CallStatus::Missed);
            i.non_op_error = true;
            i.error_info.set(None, reason, reason.error_code(), Some("Not answered"));
        });
        self.decline(reason)
    }

    fn do_decline(&self, error: Option<&ErrorInfo>, redirect: Option<&Address>) -> Result<()> {
        let state = self.state();
        if state == CallState::PushIncomingReceived && self.op().is_none() {
            info!("Terminating push incoming CallSession [{}] with no operation", self.id());
            self.with_inner(|i| {
                i.error_info.set(None, Reason::Declined, Reason::Declined.error_code(), Some("Declined"));
                i.non_op_error = true;
            });
            self.terminate_internal();
            return Ok(());
        }
        if !matches!(
            state,
            CallState::IncomingReceived | CallState::IncomingEarlyMedia | CallState::PushIncomingReceived
        ) {
            error!("Cannot decline a CallSession that is in state [{}]", state);
            return Err(SessionError::InvalidState { operation: "decline", state });
        }
        let op = self.op().ok_or(SessionError::NoOp)?;
        match error {
            Some(error) => {
                self.with_inner(|i| {
                    i.error_info.set(None, error.reason(), error.protocol_code(), Some(error.phrase()));
                });
                op.decline(error, redirect)?;
            }
            None => {
                op.decline(&ErrorInfo::from_reason(Reason::Declined), redirect)?;
            }
        }
        self.terminate_internal();
        Ok(())
    }

    /// Redirect an incoming call towards another target.
    pub fn redirect(&self, target: &Address) -> Result<()> {
        if !target.is_valid() {
            error!("Bad redirect address: {}", target);
            return Err(SessionError::InvalidAddress(target.to_string()));
        }
        let state = self.state();
        if !matches!(state, CallState::IncomingReceived | CallState::PushIncomingReceived) {
            error!("Unable to redirect call when in state [{}]", state);
            return Err(SessionError::InvalidState { operation: "redirect", state });
        }
        let op = self.op().ok_or(SessionError::NoOp)?;
        op.decline(&ErrorInfo::from_reason(Reason::Redirect), Some(target))?;
        self.with_inner(|i| {
            i.error_info.set(None, Reason::Redirect, 302, Some("Call redirected"));
            i.non_op_error = true;
        });
        self.terminate_internal();
        Ok(())
    }

    pub fn terminate(&self, error: Option<&ErrorInfo>) -> Result<()> {
        let state = self.state();
        info!("Terminate CallSession [{}] which is currently in state [{}]", self.id(), state);
        match state {
            CallState::Released | CallState::End | CallState::Error => {
                warn!("No need to terminate CallSession [{}] in state [{}]", self.id(), state);
                return Err(SessionError::InvalidState { operation: "terminate", state });
            }
            CallState::IncomingReceived
            | CallState::PushIncomingReceived
            | CallState::IncomingEarlyMedia => {
                return self.do_decline(error, None);
            }
            CallState::OutgoingInit => {
                // No transaction was sent yet; the op can simply be dropped.
                if let Some(op) = self.with_inner(|i| i.op.take()) {
                    op.release();
                }
            }
            CallState::Idle => {}
            _ => {
                if let Some(op) = self.op() {
                    op.terminate(error);
                }
            }
        }
        self.terminate_internal();
        Ok(())
    }

    /// Renegotiate the session. The target state depends on where we are;
    /// on a synchronous send failure the initial state is restored.
    pub fn update(
        &self,
        params: Option<&CallSessionParams>,
        method: UpdateMethod,
        subject: &str,
        content: Option<&Content>,
    ) -> Result<()> {
        self.do_update(params, method, subject, content, true)
    }

    /// Internal renegotiation that keeps the current state: dialog repair
    /// re-sends an INVITE without the session appearing to move.
    pub(crate) fn do_update(
        &self,
        params: Option<&CallSessionParams>,
        method: UpdateMethod,
        subject: &str,
        content: Option<&Content>,
        transition: bool,
    ) -> Result<()> {
        let initial_state = self.state();
        let next_state = self.update_target_state("update")?;
        if let Some(params) = params {
            self.with_inner(|i| i.params = Some(params.clone()));
        }
        let op = self.op().ok_or(SessionError::NoOp)?;
        op.set_local_body(content.cloned());
        if transition && next_state != initial_state {
            self.set_state(next_state, "Updating call")?;
        }
        let result = self.start_update(method, subject);
        if result.is_err() && self.state() != initial_state {
            let _ = self.set_state(initial_state, "Restore initial state");
        }
        result
    }

    /// Put the call on hold by offering a send-only stream.
    pub fn pause(&self) -> Result<()> {
        let initial_state = self.state();
        if !matches!(initial_state, CallState::StreamsRunning | CallState::PausedByRemote) {
            warn!("Cannot pause CallSession [{}] in state [{}]", self.id(), initial_state);
            return Err(SessionError::InvalidState { operation: "pause", state: initial_state });
        }
        self.with_inner(|i| {
            i.current_params.set_audio_direction(MediaDirection::SendOnly);
            if let Some(params) = i.params.as_mut() {
                params.set_audio_direction(MediaDirection::SendOnly);
            }
        });
        self.set_state(CallState::Pausing, "Pausing call")?;
        let result = self.start_update(UpdateMethod::Default, "Call on hold");
        if result.is_err() {
            let _ = self.set_state(initial_state, "Restore initial state");
        }
        result
    }

    /// Resume a call previously put on hold.
    pub fn resume(&self) -> Result<()> {
        let initial_state = self.state();
        if initial_state != CallState::Paused {
            warn!("Cannot resume CallSession [{}] in state [{}]", self.id(), initial_state);
            return Err(SessionError::InvalidState { operation: "resume", state: initial_state });
        }
        self.with_inner(|i| {
            i.current_params.set_audio_direction(MediaDirection::SendRecv);
            if let Some(params) = i.params.as_mut() {
                params.set_audio_direction(MediaDirection::SendRecv);
            }
        });
        self.set_state(CallState::Resuming, "Resuming call")?;
        let result = self.start_update(UpdateMethod::Default, "Call resumed");
        if result.is_err() {
            let _ = self.set_state(initial_state, "Restore initial state");
        }
        result
    }

    /// Blind transfer of the call towards an address.
    pub fn transfer_to_address(&self, target: &Address) -> Result<()> {
        if !target.is_valid() {
            error!("Received invalid address {} to transfer the call to", target);
            return Err(SessionError::InvalidAddress(target.to_string()));
        }
        let op = self.op().ok_or(SessionError::NoOp)?;
        op.refer(target)?;
        self.set_transfer_state(CallState::OutgoingInit);
        Ok(())
    }

    /// Attended transfer: replace `target`'s dialog with ours at the far
    /// end.
    pub fn transfer_to_session(&self, target: &CallSession) -> Result<()> {
        let op = self.op().ok_or(SessionError::NoOp)?;
        let target_op = target.op().ok_or(SessionError::NoOp)?;
        op.refer_with_replaces(target_op.as_ref())?;
        self.with_inner(|i| i.transfer_target = Some(target.id().clone()));
        self.set_transfer_state(CallState::OutgoingInit);
        Ok(())
    }

    /// Queue an operation for retry once the session can execute it.
    pub fn add_pending_action(&self, action: PendingAction) {
        self.with_inner(|i| i.pending.push_back(action));
    }

    // ==== Periodic tick ====

    /// Drive the time-based checks. `now` is wall-clock Unix seconds; the
    /// session keeps no timer of its own.
    pub fn iterate(&self, now: i64, one_second_elapsed: bool) {
        let Some(core) = self.core() else { return };
        let elapsed = now - self.with_inner(|i| i.log.start_time());

        if self.state() == CallState::OutgoingInit && elapsed > core.config().delayed_timeout {
            // Start the call even if the OPTIONS reply did not arrive.
            let _ = self.start_invite(None);
        }

        if matches!(self.state(), CallState::IncomingReceived | CallState::IncomingEarlyMedia) {
            self.listener().on_incoming_call_session_timeout_check(self, elapsed, one_second_elapsed);
        }

        if self.with_inner(|i| i.direction == CallDirection::Incoming && i.op.is_none()) {
            self.listener().on_push_call_session_timeout_check(self, elapsed);
        }

        let in_call_timeout = core.config().in_call_timeout;
        let connected_time = self.with_inner(|i| i.log.connected_time());
        if in_call_timeout > 0 && connected_time != 0 && (now - connected_time) > in_call_timeout {
            info!("In call timeout ({})", in_call_timeout);
            let _ = self.terminate(None);
        }
    }

    // ==== Getters ====

    pub fn id(&self) -> &SessionId {
        &self.shared.id
    }

    pub fn state(&self) -> CallState {
        self.shared.inner.lock().state
    }

    pub fn previous_state(&self) -> CallState {
        self.shared.inner.lock().prev_state
    }

    pub fn state_message(&self) -> String {
        self.shared.inner.lock().message.clone()
    }

    pub fn transfer_state(&self) -> CallState {
        self.shared.inner.lock().transfer_state
    }

    pub fn direction(&self) -> CallDirection {
        self.shared.inner.lock().direction
    }

    pub fn is_broken(&self) -> bool {
        self.shared.inner.lock().broken
    }

    pub fn log(&self) -> CallLog {
        self.shared.inner.lock().log.clone()
    }

    pub fn account(&self) -> Option<Arc<Account>> {
        self.shared.inner.lock().account.clone()
    }

    pub fn params(&self) -> Option<CallSessionParams> {
        self.shared.inner.lock().params.clone()
    }

    pub fn current_params(&self) -> CallSessionParams {
        self.shared.inner.lock().current_params.clone()
    }

    /// Remote params, rebuilt from what the op received. Only present once
    /// a message from the far end carried custom headers.
    pub fn remote_params(&self) -> Option<CallSessionParams> {
        let op = self.op()?;
        let headers = op.received_custom_headers();
        self.with_inner(|i| {
            if !headers.is_empty() {
                let params = i.remote_params.get_or_insert_with(CallSessionParams::new);
                params.set_custom_headers(headers);
            }
            i.remote_params.clone()
        })
    }

    /// Failure detail for this session. While the op is alive and the error
    /// was not generated locally, the op is the authoritative source.
    pub fn error_info(&self) -> ErrorInfo {
        self.with_inner(|i| {
            if !i.non_op_error {
                if let Some(op) = &i.op {
                    i.error_info = op.error_info();
                }
            }
            i.error_info.clone()
        })
    }

    pub fn reason(&self) -> Reason {
        self.error_info().reason()
    }

    /// Call duration in seconds, final once the session ended.
    pub fn duration(&self) -> i64 {
        self.with_inner(|i| match i.state {
            CallState::End | CallState::Error | CallState::Released => i.log.duration(),
            _ => i.log.compute_duration(now_secs()),
        })
    }

    pub fn remote_contact_address(&self) -> Option<Address> {
        self.op().and_then(|op| op.remote_contact_address())
    }

    pub fn refer_to_address(&self) -> Option<Address> {
        self.shared.inner.lock().refer_to_address.clone()
    }

    pub fn has_transfer_pending(&self) -> bool {
        self.shared.inner.lock().refer_pending
    }

    pub fn referer(&self) -> Option<SessionId> {
        self.shared.inner.lock().referer.clone()
    }

    pub fn transfer_target(&self) -> Option<SessionId> {
        self.shared.inner.lock().transfer_target.clone()
    }

    pub fn is_op_configured(&self) -> bool {
        self.shared.inner.lock().op.is_some()
    }

    /// Session this one replaces, resolved from the op's Replaces header.
    pub fn replaced_session(&self) -> Option<CallSession> {
        let replaced_id = self.op()?.replaces()?;
        self.core()?.registry().resolve(&replaced_id)
    }

    pub fn pending_action_count(&self) -> usize {
        self.shared.inner.lock().pending.len()
    }

    // ==== Internal helpers ====

    pub(crate) fn with_inner<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut guard = self.shared.inner.lock();
        f(&mut guard)
    }

    pub(crate) fn listener(&self) -> Arc<dyn CallSessionListener> {
        self.shared.listener.lock().clone()
    }

    pub(crate) fn op(&self) -> Option<Arc<dyn CallOp>> {
        self.shared.inner.lock().op.clone()
    }

    pub(crate) fn core(&self) -> Option<Arc<CoreContext>> {
        self.shared.core.upgrade()
    }

    pub(crate) fn config(&self) -> Option<SessionConfig> {
        self.core().map(|c| c.config().clone())
    }

    pub(crate) fn create_op(&self) {
        let to = self.with_inner(|i| i.log.to_address().clone());
        self.create_op_to(&to);
    }

    pub(crate) fn create_op_to(&self, to: &Address) {
        if let Some(old) = self.with_inner(|i| i.op.take()) {
            old.release();
        }
        let op = self.shared.factory.create_call_op(to);
        let (headers, privacy, referer) = self.with_inner(|i| {
            (
                i.params.as_ref().map(|p| p.custom_headers().to_vec()).unwrap_or_default(),
                i.params.as_ref().map(|p| p.privacy()).unwrap_or_default(),
                i.referer.clone(),
            )
        });
        op.set_sent_custom_headers(&headers);
        if privacy != Privacy::Default {
            op.set_privacy(privacy);
        }
        if let Some(referer) = referer {
            op.set_referred_by(&referer);
        }
        self.with_inner(|i| i.op = Some(op));
    }

    fn start_ping(&self) -> bool {
        let Some(core) = self.core() else { return false };
        if !core.config().ping_with_options {
            return false;
        }
        // Defer the start of the call until the OPTIONS ping gave us a
        // chance to discover our NAT'd address.
        let ping = self.shared.factory.create_ping_op();
        let (direction, from, to) = self.with_inner(|i| {
            i.ping_replied = false;
            (i.direction, i.log.from_address().clone(), i.log.to_address().clone())
        });
        let result = match direction {
            CallDirection::Outgoing => ping.ping(&from, &to),
            // Send an OPTIONS back to the caller to discover our own
            // routable address before answering.
            CallDirection::Incoming => ping.ping(&to, &from),
        };
        match result {
            Ok(()) => {
                self.with_inner(|i| i.ping_op = Some(ping));
                true
            }
            Err(err) => {
                warn!("OPTIONS ping could not be sent: {}", err);
                false
            }
        }
    }

    pub(crate) fn is_ready_for_invite(&self) -> bool {
        self.with_inner(|i| i.ping_op.is_none() || i.ping_replied)
    }

    pub(crate) fn set_contact_on_op(&self) {
        let Some(op) = self.op() else { return };
        let Some(mut contact) = self.fixed_contact() else { return };
        let contact_params = self
            .with_inner(|i| i.params.as_ref().map(|p| p.custom_contact_params().to_vec()))
            .unwrap_or_default();
        for (name, value) in contact_params {
            contact.set_param(name, value);
        }
        if !contact.is_valid() {
            warn!(
                "Unable to set contact address for CallSession [{}] to {} as it is not valid",
                self.id(),
                contact
            );
            return;
        }
        self.decorate_contact(&mut contact);
        info!("Setting contact address for CallSession [{}] to {}", self.id(), contact);
        op.set_contact_address(Some(contact));
    }

    fn fixed_contact(&self) -> Option<Address> {
        let (already_set, need_refresh, ping_contact, account) = self.with_inner(|i| {
            (
                i.op.as_ref().map(|op| op.contact_address().is_some()).unwrap_or(false),
                std::mem::take(&mut i.need_local_address_refresh),
                i.ping_op.as_ref().and_then(|op| op.contact_address()),
                i.account.clone(),
            )
        });
        if already_set && !need_refresh {
            // Already chosen, keep it.
            return None;
        }
        if let Some(contact) = ping_contact {
            info!("Contact has been fixed using OPTIONS");
            return Some(contact);
        }
        if let Some(account) = account {
            if let Some(contact) = account.contact() {
                // Contact as guessed from the REGISTER exchange.
                info!("Contact has been fixed using account");
                return Some(contact);
            }
        }
        // No better candidate, the stack will pick one.
        None
    }

    pub(crate) fn decorate_contact(&self, contact: &mut Address) {
        let (in_conference, conference_id) = self.with_inner(|i| {
            let p = i.params.as_ref();
            (
                p.map(|p| p.in_conference()).unwrap_or(false),
                p.and_then(|p| p.conference_id().map(str::to_string)),
            )
        });
        if in_conference {
            if !contact.has_param("conf-id") {
                if let Some(id) = conference_id {
                    contact.set_param("conf-id", id);
                }
            }
            if !contact.has_param("isfocus") {
                contact.set_param("isfocus", "");
            }
        } else {
            contact.remove_param("conf-id");
            contact.remove_param("isfocus");
        }
    }

    pub(crate) fn start_update(&self, method: UpdateMethod, subject: &str) -> Result<()> {
        let op = self.op().ok_or(SessionError::NoOp)?;
        let (in_conference, internal_update, no_user_consent, account) = self.with_inner(|i| {
            let p = i.params.as_ref();
            (
                p.map(|p| p.in_conference()).unwrap_or(false),
                p.map(|p| p.internal_call_update()).unwrap_or(false),
                p.map(|p| p.no_user_consent()).unwrap_or(false),
                i.account.clone(),
            )
        });
        let subject = if subject.is_empty() {
            if in_conference {
                "Conference"
            } else if internal_update {
                "ICE processing concluded"
            } else if no_user_consent {
                "Refreshing"
            } else {
                "Media change"
            }
        } else {
            subject
        };
        // Give a chance to update the contact address if connectivity has
        // changed.
        match account.and_then(|a| a.contact()) {
            Some(mut contact) => {
                self.decorate_contact(&mut contact);
                op.set_contact_address(Some(contact));
            }
            None => op.set_contact_address(None),
        }
        let no_user_consent = match method {
            UpdateMethod::Default => no_user_consent,
            UpdateMethod::Update => true,
            UpdateMethod::Invite => false,
        };
        self.with_inner(|i| i.subject = subject.to_string());
        op.update(subject, no_user_consent)
    }
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSession")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .finish()
    }
}
