//! Handling of incoming reINVITE/UPDATE offers in every state family.

use std::sync::Arc;

use pretty_assertions::assert_eq;

use opencomm_session_core::testing::{incoming_session, MockCallOp, MockOpFactory, RecordingListener};
use opencomm_session_core::{
    CallState, CoreContext, MediaDirection, SessionConfig,
};

fn core_with(config: SessionConfig) -> Arc<CoreContext> {
    Arc::new(CoreContext::new(config))
}

struct Fixture {
    // Keeps the weakly referenced core alive for the session.
    _core: Arc<CoreContext>,
    listener: Arc<RecordingListener>,
    op: Arc<MockCallOp>,
    session: opencomm_session_core::CallSession,
}

fn established_session(config: SessionConfig) -> Fixture {
    let core = core_with(config);
    let listener = RecordingListener::new();
    let factory = MockOpFactory::new();
    let op = MockCallOp::new();
    let session = incoming_session(&core, listener.clone(), factory, op.clone());
    session.start_incoming_notification(true);
    session.accept(None).unwrap();
    session.on_ack_received(&[]);
    assert_eq!(session.state(), CallState::StreamsRunning);
    Fixture { _core: core, listener, op, session }
}

#[test]
fn update_while_established_is_auto_accepted() {
    let f = established_session(SessionConfig::default());
    let accepts_before = f.op.command_count("accept");

    f.session.on_updated(false);

    assert_eq!(f.session.state(), CallState::StreamsRunning);
    assert_eq!(f.op.command_count("accept"), accepts_before + 1);
    let states = f.listener.states();
    assert!(states.windows(2).any(|w| w == [CallState::UpdatedByRemote, CallState::StreamsRunning]));
}

#[test]
fn update_while_paused_pulses_and_stays_paused() {
    let f = established_session(SessionConfig::default());
    f.session.pause().unwrap();
    f.session.on_accepted();
    assert_eq!(f.session.state(), CallState::Paused);

    let before = f.listener.states();
    f.session.on_updated(false);

    assert_eq!(f.session.state(), CallState::Paused);
    let after = &f.listener.states()[before.len()..];
    // Exactly one UpdatedByRemote pulse, then back to Paused.
    assert_eq!(after, [CallState::UpdatedByRemote, CallState::Paused]);
}

#[test]
fn update_during_transient_state_restores_it() {
    let f = established_session(SessionConfig::default());
    f.session.pause().unwrap();
    assert_eq!(f.session.state(), CallState::Pausing);

    f.session.on_updated(false);

    // The in-flight transaction must be able to complete in its state.
    assert_eq!(f.session.state(), CallState::Pausing);
    assert!(f.listener.states().contains(&CallState::UpdatedByRemote));
}

#[test]
fn deferred_update_waits_for_the_application() {
    let config = SessionConfig { defer_update_default: true, ..SessionConfig::default() };
    let f = established_session(config);
    let accepts_before = f.op.command_count("accept");

    f.session.on_updated(false);
    assert_eq!(f.session.state(), CallState::UpdatedByRemote);
    assert_eq!(f.op.command_count("accept"), accepts_before);

    f.session.accept_update(None).unwrap();
    assert_eq!(f.session.state(), CallState::StreamsRunning);
    assert_eq!(f.op.command_count("accept"), accepts_before + 1);
}

#[test]
fn accept_update_outside_updated_by_remote_is_refused() {
    let f = established_session(SessionConfig::default());
    assert!(f.session.accept_update(None).is_err());
    assert!(f.session.defer_update_request().is_err());
    assert_eq!(f.session.state(), CallState::StreamsRunning);
}

#[test]
fn remote_hold_is_detected_from_the_offered_direction() {
    let f = established_session(SessionConfig::default());
    f.op.script_remote_media_direction(Some(MediaDirection::SendOnly));

    f.session.on_updated(false);
    assert_eq!(f.session.state(), CallState::PausedByRemote);

    // The far end resumes with a bidirectional offer.
    f.op.script_remote_media_direction(Some(MediaDirection::SendRecv));
    f.session.on_updated(false);
    assert_eq!(f.session.state(), CallState::StreamsRunning);
}

#[test]
fn early_update_pulses_early_updated_by_remote() {
    let core = core_with(SessionConfig::default());
    let listener = RecordingListener::new();
    let factory = MockOpFactory::new();
    let op = MockCallOp::new();
    let session = incoming_session(&core, listener.clone(), factory, op.clone());
    session.start_incoming_notification(true);
    // Early media was accepted while still incoming.
    session.accept_early_media().unwrap();

    session.on_updated(true);
    assert_eq!(session.state(), CallState::IncomingEarlyMedia);
    assert!(listener.states().contains(&CallState::EarlyUpdatedByRemote));

    // A reINVITE (not UPDATE) in an early dialog is not acted upon.
    let before = listener.states().len();
    session.on_updated(false);
    assert_eq!(listener.states().len(), before);
}

#[test]
fn refresh_pulses_updated_by_remote_and_returns() {
    let f = established_session(SessionConfig::default());
    let before = f.listener.states().len();

    f.session.on_refreshed();

    assert_eq!(f.session.state(), CallState::StreamsRunning);
    let after = &f.listener.states()[before..];
    assert_eq!(after, [CallState::UpdatedByRemote, CallState::StreamsRunning]);
}

#[test]
fn update_in_unexpected_state_is_ignored() {
    let core = core_with(SessionConfig::default());
    let listener = RecordingListener::new();
    let factory = MockOpFactory::new();
    let op = MockCallOp::new();
    let session = incoming_session(&core, listener.clone(), factory, op.clone());
    session.start_incoming_notification(true);
    assert_eq!(session.state(), CallState::IncomingReceived);

    let before = listener.states().len();
    session.on_updated(false);
    // Defensive warning only, nothing changes and nothing is accepted.
    assert_eq!(session.state(), CallState::IncomingReceived);
    assert_eq!(listener.states().len(), before);
    assert_eq!(op.command_count("accept"), 0);
}
