//! Test doubles for the collaborator interfaces.
//!
//! A scriptable [`MockCallOp`] stands in for the external dialog engine and
//! records every command the state machine issues; [`RecordingListener`]
//! captures the notification stream. Unit and integration tests share these
//! doubles.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::CoreContext;
use crate::error_info::ErrorInfo;
use crate::errors::{Result, SessionError};
use crate::listener::CallSessionListener;
use crate::op::{CallOp, OpFactory};
use crate::params::Privacy;
use crate::session::CallSession;
use crate::types::{
    Address, CallState, Content, InfoMessage, MediaDescription, MediaDirection, SessionId,
};

/// Scriptable stand-in for the engine's call operation handle.
pub struct MockCallOp {
    call_id: String,
    local_tag: String,
    commands: Mutex<Vec<String>>,
    remote_tag: Mutex<Option<String>>,
    has_dialog: AtomicBool,
    dialog_request_pending: AtomicBool,
    contact: Mutex<Option<Address>>,
    remote_contact: Mutex<Option<Address>>,
    local_description: Mutex<Option<MediaDescription>>,
    remote_direction: Mutex<Option<MediaDirection>>,
    privacy: Mutex<Privacy>,
    sent_headers: Mutex<Vec<(String, String)>>,
    received_headers: Mutex<Vec<(String, String)>>,
    error_info: Mutex<ErrorInfo>,
    reason_error_info: Mutex<ErrorInfo>,
    replaces: Mutex<Option<SessionId>>,
    replaces_set: Mutex<Option<(String, String, String)>>,
    referred_by: Mutex<Option<SessionId>>,
    local_body: Mutex<Option<Content>>,
    released: AtomicBool,
    fail_requests: AtomicBool,
}

impl MockCallOp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            call_id: format!("call-{}", uuid::Uuid::new_v4()),
            local_tag: format!("tag-{}", uuid::Uuid::new_v4()),
            commands: Mutex::new(Vec::new()),
            remote_tag: Mutex::new(None),
            has_dialog: AtomicBool::new(true),
            dialog_request_pending: AtomicBool::new(false),
            contact: Mutex::new(None),
            remote_contact: Mutex::new(None),
            local_description: Mutex::new(None),
            remote_direction: Mutex::new(None),
            privacy: Mutex::new(Privacy::Default),
            sent_headers: Mutex::new(Vec::new()),
            received_headers: Mutex::new(Vec::new()),
            error_info: Mutex::new(ErrorInfo::new()),
            reason_error_info: Mutex::new(ErrorInfo::new()),
            replaces: Mutex::new(None),
            replaces_set: Mutex::new(None),
            referred_by: Mutex::new(None),
            local_body: Mutex::new(None),
            released: AtomicBool::new(false),
            fail_requests: AtomicBool::new(false),
        })
    }

    fn record(&self, command: impl Into<String>) {
        self.commands.lock().push(command.into());
    }

    fn request_result(&self, command: &str) -> Result<()> {
        self.record(command);
        if self.fail_requests.load(Ordering::SeqCst) {
            Err(SessionError::op_failed(format!("{command} rejected")))
        } else {
            Ok(())
        }
    }

    // Scripting knobs.

    pub fn script_error_info(&self, error_info: ErrorInfo) {
        *self.error_info.lock() = error_info;
    }

    pub fn script_reason_error_info(&self, error_info: ErrorInfo) {
        *self.reason_error_info.lock() = error_info;
    }

    pub fn script_remote_tag(&self, tag: Option<&str>) {
        *self.remote_tag.lock() = tag.map(str::to_string);
    }

    pub fn script_has_dialog(&self, has_dialog: bool) {
        self.has_dialog.store(has_dialog, Ordering::SeqCst);
    }

    pub fn script_dialog_request_pending(&self, pending: bool) {
        self.dialog_request_pending.store(pending, Ordering::SeqCst);
    }

    pub fn script_remote_contact(&self, contact: Option<Address>) {
        *self.remote_contact.lock() = contact;
    }

    pub fn script_remote_media_direction(&self, direction: Option<MediaDirection>) {
        *self.remote_direction.lock() = direction;
    }

    pub fn script_replaces(&self, replaced: Option<SessionId>) {
        *self.replaces.lock() = replaced;
    }

    pub fn script_received_headers(&self, headers: Vec<(String, String)>) {
        *self.received_headers.lock() = headers;
    }

    pub fn script_contact(&self, contact: Option<Address>) {
        *self.contact.lock() = contact;
    }

    pub fn script_fail_requests(&self, fail: bool) {
        self.fail_requests.store(fail, Ordering::SeqCst);
    }

    // Observations.

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    pub fn command_count(&self, command: &str) -> usize {
        self.commands.lock().iter().filter(|c| c.starts_with(command)).count()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    pub fn replaces_header(&self) -> Option<(String, String, String)> {
        self.replaces_set.lock().clone()
    }

    pub fn sent_headers(&self) -> Vec<(String, String)> {
        self.sent_headers.lock().clone()
    }
}

impl CallOp for MockCallOp {
    fn call_id(&self) -> String {
        self.call_id.clone()
    }

    fn local_tag(&self) -> String {
        self.local_tag.clone()
    }

    fn remote_tag(&self) -> Option<String> {
        self.remote_tag.lock().clone()
    }

    fn has_dialog(&self) -> bool {
        self.has_dialog.load(Ordering::SeqCst)
    }

    fn dialog_request_pending(&self) -> bool {
        self.dialog_request_pending.load(Ordering::SeqCst)
    }

    fn contact_address(&self) -> Option<Address> {
        self.contact.lock().clone()
    }

    fn set_contact_address(&self, address: Option<Address>) {
        self.record("set_contact_address");
        *self.contact.lock() = address;
    }

    fn remote_contact_address(&self) -> Option<Address> {
        self.remote_contact.lock().clone()
    }

    fn local_media_description(&self) -> Option<MediaDescription> {
        self.local_description.lock().clone()
    }

    fn set_local_media_description(&self, description: Option<MediaDescription>) {
        *self.local_description.lock() = description;
    }

    fn remote_media_direction(&self) -> Option<MediaDirection> {
        *self.remote_direction.lock()
    }

    fn privacy(&self) -> Privacy {
        *self.privacy.lock()
    }

    fn set_privacy(&self, privacy: Privacy) {
        *self.privacy.lock() = privacy;
    }

    fn set_sent_custom_headers(&self, headers: &[(String, String)]) {
        *self.sent_headers.lock() = headers.to_vec();
    }

    fn received_custom_headers(&self) -> Vec<(String, String)> {
        self.received_headers.lock().clone()
    }

    fn error_info(&self) -> ErrorInfo {
        self.error_info.lock().clone()
    }

    fn reason_error_info(&self) -> ErrorInfo {
        self.reason_error_info.lock().clone()
    }

    fn replaces(&self) -> Option<SessionId> {
        self.replaces.lock().clone()
    }

    fn set_replaces(&self, call_id: &str, local_tag: &str, remote_tag: &str) {
        self.record("set_replaces");
        *self.replaces_set.lock() =
            Some((call_id.to_string(), local_tag.to_string(), remote_tag.to_string()));
    }

    fn set_referred_by(&self, referer: &SessionId) {
        *self.referred_by.lock() = Some(referer.clone());
    }

    fn invite(&self, _from: &Address, to: &Address, _subject: &str) -> Result<()> {
        self.request_result(&format!("invite {to}"))
    }

    fn accept(&self) -> Result<()> {
        self.request_result("accept")
    }

    fn decline(&self, error: &ErrorInfo, _redirect: Option<&Address>) -> Result<()> {
        self.request_result(&format!("decline {}", error.protocol_code()))
    }

    fn terminate(&self, _error: Option<&ErrorInfo>) {
        self.record("terminate");
    }

    fn update(&self, subject: &str, _no_user_consent: bool) -> Result<()> {
        self.request_result(&format!("update {subject}"))
    }

    fn notify_ringing(&self, early_media: bool) {
        self.record(format!("notify_ringing {early_media}"));
    }

    fn refer(&self, target: &Address) -> Result<()> {
        self.request_result(&format!("refer {target}"))
    }

    fn refer_with_replaces(&self, _replaced: &dyn CallOp) -> Result<()> {
        self.request_result("refer_with_replaces")
    }

    fn notify_refer_state(&self, state: CallState) {
        self.record(format!("notify_refer_state {state}"));
    }

    fn ping(&self, _from: &Address, _to: &Address) -> Result<()> {
        self.request_result("ping")
    }

    fn cancel_invite(&self) -> Result<()> {
        self.request_result("cancel_invite")
    }

    fn set_local_body(&self, content: Option<Content>) {
        *self.local_body.lock() = content;
    }

    fn local_body(&self) -> Option<Content> {
        self.local_body.lock().clone()
    }

    fn kill_dialog(&self) {
        self.record("kill_dialog");
        self.has_dialog.store(false, Ordering::SeqCst);
    }

    fn release(&self) {
        self.record("release");
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Factory handing out [`MockCallOp`]s and remembering them for inspection.
#[derive(Default)]
pub struct MockOpFactory {
    created: Mutex<Vec<Arc<MockCallOp>>>,
    ping_ops: Mutex<Vec<Arc<MockCallOp>>>,
}

impl MockOpFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created_ops(&self) -> Vec<Arc<MockCallOp>> {
        self.created.lock().clone()
    }

    pub fn last_op(&self) -> Option<Arc<MockCallOp>> {
        self.created.lock().last().cloned()
    }

    pub fn last_ping_op(&self) -> Option<Arc<MockCallOp>> {
        self.ping_ops.lock().last().cloned()
    }
}

impl OpFactory for MockOpFactory {
    fn create_call_op(&self, _to: &Address) -> Arc<dyn CallOp> {
        let op = MockCallOp::new();
        self.created.lock().push(op.clone());
        op
    }

    fn create_ping_op(&self) -> Arc<dyn CallOp> {
        let op = MockCallOp::new();
        self.ping_ops.lock().push(op.clone());
        op
    }
}

/// Listener recording every notification in arrival order.
#[derive(Default)]
pub struct RecordingListener {
    transitions: Mutex<Vec<(CallState, String)>>,
    transfer_states: Mutex<Vec<CallState>>,
    infos: Mutex<Vec<InfoMessage>>,
    pub terminated: AtomicUsize,
    pub released: AtomicUsize,
    pub incoming_started: AtomicUsize,
    pub incoming_notified: AtomicUsize,
    pub timeout_checks: AtomicUsize,
    pub push_timeout_checks: AtomicUsize,
    pub refer_started: AtomicUsize,
    pub check_for_acceptation: AtomicUsize,
    pub background_started: AtomicUsize,
    pub background_stopped: AtomicUsize,
    pub ringtone_started: AtomicUsize,
    pub acks_received: AtomicUsize,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn transitions(&self) -> Vec<(CallState, String)> {
        self.transitions.lock().clone()
    }

    pub fn states(&self) -> Vec<CallState> {
        self.transitions.lock().iter().map(|(s, _)| *s).collect()
    }

    pub fn transfer_states(&self) -> Vec<CallState> {
        self.transfer_states.lock().clone()
    }

    pub fn infos(&self) -> Vec<InfoMessage> {
        self.infos.lock().clone()
    }

    fn count(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

impl CallSessionListener for RecordingListener {
    fn on_call_session_state_changed(&self, _session: &CallSession, state: CallState, message: &str) {
        self.transitions.lock().push((state, message.to_string()));
    }

    fn on_call_session_transfer_state_changed(&self, _session: &CallSession, state: CallState) {
        self.transfer_states.lock().push(state);
    }

    fn on_call_session_set_terminated(&self, _session: &CallSession) {
        Self::count(&self.terminated);
    }

    fn on_call_session_set_released(&self, _session: &CallSession) {
        Self::count(&self.released);
    }

    fn on_incoming_call_session_started(&self, _session: &CallSession) {
        Self::count(&self.incoming_started);
    }

    fn on_incoming_call_session_notified(&self, _session: &CallSession) {
        Self::count(&self.incoming_notified);
    }

    fn on_incoming_call_session_timeout_check(&self, _session: &CallSession, _elapsed: i64, _one_second_elapsed: bool) {
        Self::count(&self.timeout_checks);
    }

    fn on_push_call_session_timeout_check(&self, _session: &CallSession, _elapsed: i64) {
        Self::count(&self.push_timeout_checks);
    }

    fn on_call_session_start_referred(&self, _session: &CallSession) {
        Self::count(&self.refer_started);
    }

    fn on_ack_received(&self, _session: &CallSession, _headers: &[(String, String)]) {
        Self::count(&self.acks_received);
    }

    fn on_info_received(&self, _session: &CallSession, info: &InfoMessage) {
        self.infos.lock().push(info.clone());
    }

    fn on_check_for_acceptation(&self, _session: &CallSession) {
        Self::count(&self.check_for_acceptation);
    }

    fn on_background_task_to_be_started(&self, _session: &CallSession) {
        Self::count(&self.background_started);
    }

    fn on_background_task_to_be_stopped(&self, _session: &CallSession) {
        Self::count(&self.background_stopped);
    }

    fn on_start_ringtone(&self, _session: &CallSession) {
        Self::count(&self.ringtone_started);
    }
}

/// Incoming session wired to a fresh mock op, already configured.
pub fn incoming_session(
    core: &Arc<CoreContext>,
    listener: Arc<dyn CallSessionListener>,
    factory: Arc<dyn OpFactory>,
    op: Arc<MockCallOp>,
) -> CallSession {
    let session = CallSession::new(core, None, listener, factory);
    session.configure_incoming(
        None,
        op,
        Address::new("sip:caller@example.org"),
        Address::new("sip:callee@example.org"),
    );
    session
}

/// Outgoing session configured towards a default destination.
pub fn outgoing_session(
    core: &Arc<CoreContext>,
    params: Option<&crate::params::CallSessionParams>,
    listener: Arc<dyn CallSessionListener>,
    factory: Arc<dyn OpFactory>,
) -> CallSession {
    let session = CallSession::new(core, params, listener, factory);
    session.configure_outgoing(
        None,
        Address::new("sip:caller@example.org"),
        Address::new("sip:callee@example.org"),
    );
    session
}
