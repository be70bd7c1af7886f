//! Failure handling, redirects, transfers, pending actions and the
//! periodic tick.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use pretty_assertions::assert_eq;

use opencomm_session_core::testing::{
    incoming_session, outgoing_session, MockCallOp, MockOpFactory, RecordingListener,
};
use opencomm_session_core::{
    Address, CallOp, CallSession, CallSessionListener, CallSessionParams, CallState, CallStatus,
    CoreContext, ErrorInfo, PendingAction, Reason, SessionConfig, UpdateMethod,
};

fn core() -> Arc<CoreContext> {
    Arc::new(CoreContext::new(SessionConfig::default()))
}

fn core_with(config: SessionConfig) -> Arc<CoreContext> {
    Arc::new(CoreContext::new(config))
}

// ==== Failure handling ====

#[test]
fn redirect_during_outgoing_progress_restarts_towards_new_target() {
    let core = core();
    let listener = RecordingListener::new();
    let factory = MockOpFactory::new();
    let session = outgoing_session(&core, None, listener.clone(), factory.clone());
    session.initiate_outgoing("", None).unwrap();
    let first_op = factory.last_op().unwrap();

    first_op.script_error_info(ErrorInfo::from_reason(Reason::Redirect));
    first_op.script_remote_contact(Some(Address::new("sip:redirected@example.net")));
    session.on_failure();

    // Transparent retry: a fresh INVITE towards the redirect target, and
    // the attempt never goes through Error.
    assert!(!listener.states().contains(&CallState::Error));
    assert!(!listener.states().contains(&CallState::End));
    let second_op = factory.last_op().unwrap();
    assert!(!Arc::ptr_eq(&first_op, &second_op));
    assert!(first_op.is_released());
    assert_eq!(session.log().to_address().uri(), "sip:redirected@example.net");
    assert_eq!(second_op.command_count("invite sip:redirected@example.net"), 1);
    assert_eq!(session.state(), CallState::OutgoingProgress);
}

#[test]
fn declined_failure_ends_the_call() {
    let core = core();
    let listener = RecordingListener::new();
    let factory = MockOpFactory::new();
    let session = outgoing_session(&core, None, listener, factory.clone());
    session.initiate_outgoing("", None).unwrap();
    session.on_remote_ringing(false);

    let op = factory.last_op().unwrap();
    op.script_error_info(ErrorInfo::from_reason(Reason::Declined));
    session.on_failure();

    assert_eq!(session.state(), CallState::End);
    assert_eq!(session.log().status(), CallStatus::Declined);
}

#[test]
fn early_failure_goes_to_error_established_failure_to_end() {
    let core = core();
    let factory = MockOpFactory::new();
    let early = outgoing_session(&core, None, RecordingListener::new(), factory.clone());
    early.initiate_outgoing("", None).unwrap();
    let op = factory.last_op().unwrap();
    let mut ei = ErrorInfo::new();
    ei.set(Some("SIP"), Reason::NotFound, 404, Some("Not found"));
    op.script_error_info(ei);
    early.on_failure();
    assert_eq!(early.state(), CallState::Error);

    let factory2 = MockOpFactory::new();
    let op2 = MockCallOp::new();
    let established = incoming_session(&core, RecordingListener::new(), factory2, op2.clone());
    established.start_incoming_notification(true);
    established.accept(None).unwrap();
    established.on_ack_received(&[]);
    let mut ei = ErrorInfo::new();
    ei.set(Some("SIP"), Reason::ServiceUnavailable, 503, Some("Service unavailable"));
    op2.script_error_info(ei);
    established.on_failure();
    assert_eq!(established.state(), CallState::End);
}

#[test]
fn request_pending_failure_is_swallowed_in_transient_states() {
    let core = core();
    let listener = RecordingListener::new();
    let factory = MockOpFactory::new();
    let op = MockCallOp::new();
    let session = incoming_session(&core, listener.clone(), factory, op.clone());
    session.start_incoming_notification(true);
    session.accept(None).unwrap();
    session.on_ack_received(&[]);
    session.pause().unwrap();
    assert_eq!(session.state(), CallState::Pausing);

    let before = listener.states().len();
    op.script_error_info(ErrorInfo::from_reason(Reason::RequestPending));
    session.on_failure();

    // A retry is scheduled by the far end; the state is kept.
    assert_eq!(session.state(), CallState::Pausing);
    assert_eq!(listener.states().len(), before);
}

#[test]
fn recoverable_failure_in_transient_state_rolls_back() {
    let core = core();
    let factory = MockOpFactory::new();
    let op = MockCallOp::new();
    let session = incoming_session(&core, RecordingListener::new(), factory, op.clone());
    session.start_incoming_notification(true);
    session.accept(None).unwrap();
    session.on_ack_received(&[]);
    session.pause().unwrap();

    let mut ei = ErrorInfo::new();
    ei.set(Some("SIP"), Reason::TemporarilyUnavailable, 480, Some("Temporarily unavailable"));
    op.script_error_info(ei);
    session.on_failure();

    assert_eq!(session.state(), CallState::StreamsRunning);
}

#[test]
fn no_match_failure_is_swallowed_without_any_record() {
    let core = core();
    let listener = RecordingListener::new();
    let factory = MockOpFactory::new();
    let op = MockCallOp::new();
    let session = incoming_session(&core, listener.clone(), factory, op.clone());
    session.start_incoming_notification(true);
    session.accept(None).unwrap();
    session.on_ack_received(&[]);

    let before = listener.states().len();
    op.script_error_info(ErrorInfo::from_reason(Reason::NoMatch));
    session.on_failure();

    assert_eq!(session.state(), CallState::StreamsRunning);
    assert_eq!(listener.states().len(), before);
    assert_eq!(session.log().status(), CallStatus::Success);
}

#[test]
fn failure_of_a_referred_call_notifies_the_referer() {
    let core = core();
    let factory = MockOpFactory::new();
    let referer_op = MockCallOp::new();
    let referer = incoming_session(&core, RecordingListener::new(), factory.clone(), referer_op.clone());
    referer.start_incoming_notification(true);
    referer.accept(None).unwrap();

    let mut params = CallSessionParams::new();
    params.set_referer(referer.id().clone());
    let referred = outgoing_session(&core, Some(&params), RecordingListener::new(), factory.clone());
    referred.initiate_outgoing("", None).unwrap();

    let op = factory.last_op().unwrap();
    op.script_error_info(ErrorInfo::from_reason(Reason::Declined));
    referred.on_failure();

    assert_eq!(referred.state(), CallState::End);
    assert_eq!(referer_op.command_count("notify_refer_state"), 1);
}

// ==== Transfers and refers ====

#[test]
fn blind_transfer_refers_and_tracks_transfer_state() {
    let core = core();
    let listener = RecordingListener::new();
    let factory = MockOpFactory::new();
    let op = MockCallOp::new();
    let session = incoming_session(&core, listener.clone(), factory, op.clone());
    session.start_incoming_notification(true);
    session.accept(None).unwrap();

    session.transfer_to_address(&Address::new("sip:target@example.net")).unwrap();
    assert_eq!(op.command_count("refer sip:target@example.net"), 1);
    assert_eq!(listener.transfer_states(), vec![CallState::OutgoingInit]);

    // Requesting the same transfer state twice is ignored with a warning.
    session.transfer_to_address(&Address::new("sip:target2@example.net")).unwrap();
    assert_eq!(listener.transfer_states(), vec![CallState::OutgoingInit]);
}

#[test]
fn attended_transfer_uses_refer_with_replaces() {
    let core = core();
    let factory = MockOpFactory::new();
    let op_a = MockCallOp::new();
    let session_a = incoming_session(&core, RecordingListener::new(), factory.clone(), op_a.clone());
    session_a.start_incoming_notification(true);
    session_a.accept(None).unwrap();
    let op_b = MockCallOp::new();
    let session_b = incoming_session(&core, RecordingListener::new(), factory, op_b.clone());
    session_b.start_incoming_notification(true);
    session_b.accept(None).unwrap();

    session_a.transfer_to_session(&session_b).unwrap();
    assert_eq!(op_a.command_count("refer_with_replaces"), 1);
    assert_eq!(session_a.transfer_target().as_ref(), Some(session_b.id()));
}

#[test]
fn invalid_transfer_target_is_rejected() {
    let core = core();
    let factory = MockOpFactory::new();
    let op = MockCallOp::new();
    let session = incoming_session(&core, RecordingListener::new(), factory, op.clone());
    session.start_incoming_notification(true);
    session.accept(None).unwrap();
    assert!(session.transfer_to_address(&Address::new("not-a-sip-uri")).is_err());
    assert_eq!(op.command_count("refer"), 0);
}

#[test]
fn incoming_refer_pulses_without_changing_state() {
    let core = core();
    let listener = RecordingListener::new();
    let factory = MockOpFactory::new();
    let op = MockCallOp::new();
    let session = incoming_session(&core, listener.clone(), factory, op);
    session.start_incoming_notification(true);
    session.accept(None).unwrap();
    session.on_ack_received(&[]);

    session.on_referred(Address::new("sip:elsewhere@example.net"));

    assert_eq!(session.state(), CallState::StreamsRunning);
    assert!(session.has_transfer_pending());
    assert_eq!(session.refer_to_address().unwrap().uri(), "sip:elsewhere@example.net");
    assert_eq!(listener.refer_started.load(Ordering::SeqCst), 1);
    assert_eq!(listener.states().last(), Some(&CallState::Referred));
}

// ==== Replaces ====

#[test]
fn accepting_a_replacing_call_terminates_the_replaced_one() {
    let core = core();
    let factory = MockOpFactory::new();
    let replaced_op = MockCallOp::new();
    let replaced = incoming_session(&core, RecordingListener::new(), factory.clone(), replaced_op.clone());
    replaced.start_incoming_notification(true);
    replaced.accept(None).unwrap();
    replaced.on_ack_received(&[]);
    assert_eq!(replaced.state(), CallState::StreamsRunning);

    let replacing_op = MockCallOp::new();
    replacing_op.script_replaces(Some(replaced.id().clone()));
    let replacing = incoming_session(&core, RecordingListener::new(), factory, replacing_op.clone());
    replacing.start_incoming_notification(true);
    // The auto-answer path already accepted the replacing call and
    // terminated the replaced one.
    assert_eq!(replacing.state(), CallState::Connected);
    assert_eq!(replaced_op.command_count("terminate"), 1);
    assert_eq!(replaced.state(), CallState::End);
}

// ==== Pending actions ====

#[test]
fn pending_actions_retry_in_fifo_order_and_requeue_failures() {
    let core = core();
    let factory = MockOpFactory::new();
    let op = MockCallOp::new();
    let session = incoming_session(&core, RecordingListener::new(), factory, op.clone());

    // Accept cannot run while the session is still Idle; pause cannot run
    // before the call is established.
    session.add_pending_action(PendingAction::Accept { params: None });
    session.add_pending_action(PendingAction::Pause);
    assert_eq!(session.pending_action_count(), 2);

    // The incoming notification ticks the lifecycle: accept succeeds,
    // pause still fails and stays queued.
    session.start_incoming_notification(true);
    assert_eq!(session.state(), CallState::Connected);
    assert_eq!(session.pending_action_count(), 1);

    // Once the streams are running the queued pause finally executes.
    session.on_ack_received(&[]);
    assert_eq!(session.state(), CallState::Pausing);
    assert_eq!(session.pending_action_count(), 0);
}

#[test]
fn pending_actions_are_dropped_on_release() {
    let core = core();
    let factory = MockOpFactory::new();
    let op = MockCallOp::new();
    let session = incoming_session(&core, RecordingListener::new(), factory, op.clone());
    session.start_incoming_notification(true);

    session.add_pending_action(PendingAction::Update {
        params: None,
        method: UpdateMethod::Default,
        subject: String::new(),
        content: None,
    });
    op.script_has_dialog(false);
    session.decline(Reason::Declined).unwrap();

    assert_eq!(session.state(), CallState::Released);
    assert_eq!(session.pending_action_count(), 0);
    // The queued update was never executed.
    assert_eq!(op.command_count("update"), 0);
}

#[test]
fn decline_not_answered_records_a_missed_call() {
    let core = core();
    let factory = MockOpFactory::new();
    let op = MockCallOp::new();
    op.script_has_dialog(false);
    let session = incoming_session(&core, RecordingListener::new(), factory, op.clone());
    session.start_incoming_notification(true);

    session.decline_not_answered(Reason::NotAnswered).unwrap();

    assert_eq!(session.state(), CallState::Released);
    assert_eq!(session.log().status(), CallStatus::Missed);
    assert_eq!(session.error_info().reason(), Reason::NotAnswered);
    assert_eq!(core.missed_calls(), 1);
}

// ==== Listener re-entrancy ====

struct AcceptOnIncoming {
    accepted: AtomicUsize,
}

impl CallSessionListener for AcceptOnIncoming {
    fn on_call_session_state_changed(&self, session: &CallSession, state: CallState, _message: &str) {
        if state == CallState::IncomingReceived {
            // Re-enter the session from within the notification.
            session.accept(None).unwrap();
            self.accepted.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[test]
fn listener_may_accept_from_within_the_state_callback() {
    let core = core();
    let listener = Arc::new(AcceptOnIncoming { accepted: AtomicUsize::new(0) });
    let factory = MockOpFactory::new();
    let op = MockCallOp::new();
    let session = incoming_session(&core, listener.clone(), factory, op.clone());

    session.start_incoming_notification(true);

    assert_eq!(listener.accepted.load(Ordering::SeqCst), 1);
    assert_eq!(session.state(), CallState::Connected);
    assert_eq!(op.command_count("accept"), 1);
}

// ==== Periodic tick ====

#[test]
fn delayed_start_fires_when_the_ping_never_answers() {
    let config = SessionConfig { ping_with_options: true, ..SessionConfig::default() };
    let core = core_with(config);
    let factory = MockOpFactory::new();
    let session = outgoing_session(&core, None, RecordingListener::new(), factory.clone());
    session.initiate_outgoing("", None).unwrap();

    // The INVITE is deferred behind the OPTIONS ping.
    assert_eq!(session.state(), CallState::OutgoingInit);
    assert!(factory.last_op().is_none());
    assert_eq!(factory.last_ping_op().unwrap().command_count("ping"), 1);

    let start = session.log().start_time();
    session.iterate(start + 2, true);
    assert_eq!(session.state(), CallState::OutgoingInit);

    // Start the call even though the OPTIONS reply never arrived.
    session.iterate(start + 5, true);
    assert_eq!(session.state(), CallState::OutgoingProgress);
    assert_eq!(factory.last_op().unwrap().command_count("invite"), 1);
}

#[test]
fn ping_reply_releases_the_deferred_invite() {
    let config = SessionConfig { ping_with_options: true, ..SessionConfig::default() };
    let core = core_with(config);
    let factory = MockOpFactory::new();
    let session = outgoing_session(&core, None, RecordingListener::new(), factory.clone());
    session.initiate_outgoing("", None).unwrap();
    assert_eq!(session.state(), CallState::OutgoingInit);

    // The ping reply fixed our routable contact.
    factory.last_ping_op().unwrap().script_contact(Some(Address::new("sip:caller@198.51.100.7:5062")));
    session.on_ping_reply();

    assert_eq!(session.state(), CallState::OutgoingProgress);
    let op = factory.last_op().unwrap();
    assert_eq!(op.command_count("invite"), 1);
    assert_eq!(op.contact_address().unwrap().uri(), "sip:caller@198.51.100.7:5062");
}

#[test]
fn ring_timeout_checks_are_reported_while_ringing() {
    let core = core();
    let listener = RecordingListener::new();
    let factory = MockOpFactory::new();
    let op = MockCallOp::new();
    let session = incoming_session(&core, listener.clone(), factory, op);
    session.start_incoming_notification(true);

    session.iterate(10, true);
    session.iterate(11, true);
    assert_eq!(listener.timeout_checks.load(Ordering::SeqCst), 2);

    session.accept(None).unwrap();
    session.iterate(12, true);
    assert_eq!(listener.timeout_checks.load(Ordering::SeqCst), 2);
}

#[test]
fn in_call_timeout_terminates_the_session() {
    let config = SessionConfig { in_call_timeout: 60, ..SessionConfig::default() };
    let core = core_with(config);
    let factory = MockOpFactory::new();
    let op = MockCallOp::new();
    let session = incoming_session(&core, RecordingListener::new(), factory, op.clone());
    session.start_incoming_notification(true);
    session.accept(None).unwrap();
    session.on_ack_received(&[]);

    let connected = session.log().connected_time();
    session.iterate(connected + 30, true);
    assert_eq!(session.state(), CallState::StreamsRunning);

    session.iterate(connected + 61, true);
    assert_eq!(session.state(), CallState::End);
    assert_eq!(op.command_count("terminate"), 1);
}

// ==== Miscellaneous surfaces ====

#[test]
fn info_messages_carry_headers_and_content() {
    let core = core();
    let listener = RecordingListener::new();
    let factory = MockOpFactory::new();
    let op = MockCallOp::new();
    op.script_received_headers(vec![("X-Custom".to_string(), "1".to_string())]);
    let session = incoming_session(&core, listener.clone(), factory, op);
    session.start_incoming_notification(true);
    session.accept(None).unwrap();

    session.on_info_received(Some(opencomm_session_core::Content::new("application/dtmf-relay", "Signal=5")));

    let infos = listener.infos();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].headers, vec![("X-Custom".to_string(), "1".to_string())]);
    assert_eq!(infos[0].content.as_ref().unwrap().content_type, "application/dtmf-relay");
}

#[test]
fn redirect_of_incoming_call_declines_with_target() {
    let core = core();
    let factory = MockOpFactory::new();
    let op = MockCallOp::new();
    op.script_has_dialog(false);
    let session = incoming_session(&core, RecordingListener::new(), factory, op.clone());
    session.start_incoming_notification(true);

    session.redirect(&Address::new("sip:voicemail@example.org")).unwrap();

    assert_eq!(op.command_count("decline 302"), 1);
    assert_eq!(session.state(), CallState::Released);
    assert_eq!(session.error_info().reason(), Reason::Redirect);
    assert_eq!(session.error_info().protocol_code(), 302);
}

#[test]
fn custom_headers_are_wired_to_the_op_on_accept() {
    let core = core();
    let factory = MockOpFactory::new();
    let op = MockCallOp::new();
    let session = incoming_session(&core, RecordingListener::new(), factory, op.clone());
    session.start_incoming_notification(true);

    let mut params = CallSessionParams::new();
    params.add_custom_header("X-Priority", "urgent");
    session.accept(Some(&params)).unwrap();

    assert_eq!(op.sent_headers(), vec![("X-Priority".to_string(), "urgent".to_string())]);
}
