//! Unit tests for the transition guards of `set_state`.
//!
//! These exercise the mutator directly, which is not reachable from outside
//! the crate; the scenario-level coverage lives in the integration tests.

use std::sync::Arc;

use crate::config::SessionConfig;
use crate::core::CoreContext;
use crate::errors::SessionError;
use crate::testing::{incoming_session, outgoing_session, MockCallOp, MockOpFactory, RecordingListener};
use crate::types::CallState;

fn core() -> Arc<CoreContext> {
    Arc::new(CoreContext::new(SessionConfig::default()))
}

#[test]
fn identical_state_is_a_no_op_without_notification() {
    let core = core();
    let listener = RecordingListener::new();
    let factory = MockOpFactory::new();
    let session = incoming_session(&core, listener.clone(), factory, MockCallOp::new());

    session.set_state(CallState::IncomingReceived, "Incoming call received").unwrap();
    let before = listener.transitions().len();
    session.set_state(CallState::IncomingReceived, "again").unwrap();
    assert_eq!(listener.transitions().len(), before);
    assert_eq!(session.state(), CallState::IncomingReceived);
}

#[test]
fn no_resurrection_from_end_except_released() {
    let core = core();
    let listener = RecordingListener::new();
    let factory = MockOpFactory::new();
    let session = incoming_session(&core, listener.clone(), factory, MockCallOp::new());
    session.set_state(CallState::IncomingReceived, "Incoming call received").unwrap();
    session.set_state(CallState::End, "Call ended").unwrap();

    for target in [
        CallState::Idle,
        CallState::IncomingReceived,
        CallState::Connected,
        CallState::StreamsRunning,
        CallState::Error,
        CallState::Paused,
    ] {
        let result = session.set_state(target, "resurrect");
        assert!(
            matches!(result, Err(SessionError::FatalStateTransition { .. })),
            "transition to {target} must be refused"
        );
        assert_eq!(session.state(), CallState::End, "state must stay unchanged");
    }

    session.set_state(CallState::Released, "Call released").unwrap();
    assert_eq!(session.state(), CallState::Released);
}

#[test]
fn released_is_unreachable_from_active_states() {
    let core = core();
    let listener = RecordingListener::new();
    let factory = MockOpFactory::new();
    let session = incoming_session(&core, listener.clone(), factory, MockCallOp::new());
    session.set_state(CallState::IncomingReceived, "Incoming call received").unwrap();
    session.set_state(CallState::Connected, "Connected").unwrap();

    let result = session.set_state(CallState::Released, "Call released");
    assert!(matches!(result, Err(SessionError::FatalStateTransition { .. })));
    assert_eq!(session.state(), CallState::Connected);
    // The listener never observed the refused transition.
    assert!(!listener.states().contains(&CallState::Released));
}

#[test]
fn released_allowed_from_error() {
    let core = core();
    let listener = RecordingListener::new();
    let factory = MockOpFactory::new();
    let session = outgoing_session(&core, None, listener.clone(), factory);
    session.set_state(CallState::OutgoingInit, "Starting outgoing call").unwrap();
    session.set_state(CallState::Error, "Call failed").unwrap();
    session.set_state(CallState::Released, "Call released").unwrap();
    assert_eq!(session.state(), CallState::Released);
    assert_eq!(listener.released.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[test]
fn referred_is_a_pulse_not_a_state() {
    let core = core();
    let listener = RecordingListener::new();
    let factory = MockOpFactory::new();
    let session = incoming_session(&core, listener.clone(), factory, MockCallOp::new());
    session.set_state(CallState::IncomingReceived, "Incoming call received").unwrap();
    session.set_state(CallState::Connected, "Connected").unwrap();
    session.set_state(CallState::StreamsRunning, "Media streams running").unwrap();

    session.set_state(CallState::Referred, "Referred").unwrap();
    // The pulse is notified but the tracked state and message survive.
    assert_eq!(session.state(), CallState::StreamsRunning);
    assert_eq!(session.state_message(), "Media streams running");
    assert_eq!(listener.states().last(), Some(&CallState::Referred));
}

#[test]
fn end_records_duration_and_error_info_in_log() {
    let core = core();
    let listener = RecordingListener::new();
    let factory = MockOpFactory::new();
    let op = MockCallOp::new();
    let session = incoming_session(&core, listener, factory, op);
    session.set_state(CallState::IncomingReceived, "Incoming call received").unwrap();
    session.set_state(CallState::Connected, "Connected").unwrap();
    assert_ne!(session.log().connected_time(), 0);

    session.set_state(CallState::End, "Call ended").unwrap();
    let log = session.log();
    assert!(log.error_info().is_some());
    assert!(log.duration() >= 0);
}
