//! Core types shared across the session layer.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Session ID type
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(format!("session-{}", uuid::Uuid::new_v4()))
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Direction of a call session.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum CallDirection {
    Incoming,
    Outgoing,
}

/// Media direction used for hold/resume negotiation.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Default, Serialize, Deserialize)]
pub enum MediaDirection {
    #[default]
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

/// Minimal view of a negotiated media description.
///
/// The media engine owns the actual SDP; the session layer only tracks what
/// it needs to steer the state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaDescription {
    pub direction: MediaDirection,
}

impl MediaDescription {
    pub fn new(direction: MediaDirection) -> Self {
        Self { direction }
    }
}

impl Default for MediaDescription {
    fn default() -> Self {
        Self { direction: MediaDirection::SendRecv }
    }
}

/// A SIP address with optional header/contact parameters.
///
/// Wire-level URI parsing belongs to the SIP engine; this type carries the
/// URI opaquely plus the parameters the session layer decorates it with
/// (conference markers, custom contact parameters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    uri: String,
    params: BTreeMap<String, String>,
}

impl Address {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into(), params: BTreeMap::new() }
    }

    /// Anonymous address used when the real identity is not yet known,
    /// following RFC 3323 guidelines.
    pub fn anonymous() -> Self {
        Self::new("sip:anonymous@anonymous.invalid")
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn is_valid(&self) -> bool {
        self.uri.starts_with("sip:") || self.uri.starts_with("sips:")
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn set_param(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.params.insert(name.into(), value.into());
    }

    pub fn remove_param(&mut self, name: &str) {
        self.params.remove(name);
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri)?;
        for (name, value) in &self.params {
            if value.is_empty() {
                write!(f, ";{}", name)?;
            } else {
                write!(f, ";{}={}", name, value)?;
            }
        }
        Ok(())
    }
}

/// State of a call session.
///
/// `Referred` is an event rather than a state: it is notified to listeners
/// but never overwrites the tracked state of the session.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum CallState {
    Idle,
    OutgoingInit,
    OutgoingProgress,
    OutgoingRinging,
    OutgoingEarlyMedia,
    IncomingReceived,
    PushIncomingReceived,
    IncomingEarlyMedia,
    Connected,
    StreamsRunning,
    Pausing,
    Paused,
    Resuming,
    PausedByRemote,
    UpdatedByRemote,
    Updating,
    EarlyUpdatedByRemote,
    EarlyUpdating,
    Referred,
    End,
    Error,
    Released,
}

impl CallState {
    /// True for states reached before the call is definitively established.
    pub fn is_early(self) -> bool {
        matches!(
            self,
            CallState::Idle
                | CallState::OutgoingInit
                | CallState::OutgoingEarlyMedia
                | CallState::OutgoingRinging
                | CallState::OutgoingProgress
                | CallState::IncomingReceived
                | CallState::PushIncomingReceived
                | CallState::IncomingEarlyMedia
                | CallState::EarlyUpdatedByRemote
                | CallState::EarlyUpdating
        )
    }

    /// True once the session has reached a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::End | CallState::Error | CallState::Released)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Method used to renegotiate an established session.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum UpdateMethod {
    /// Pick between INVITE and UPDATE based on the session parameters.
    Default,
    Invite,
    Update,
}

/// Registration state of an account, as reported by the registrar layer.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum RegistrationState {
    None,
    Progress,
    Ok,
    Failed,
    Cleared,
}

/// An opaque body carried in a SIP request or response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Content {
    pub content_type: String,
    pub body: String,
}

impl Content {
    pub fn new(content_type: impl Into<String>, body: impl Into<String>) -> Self {
        Self { content_type: content_type.into(), body: body.into() }
    }
}

/// An INFO message received in-dialog, surfaced to the application.
#[derive(Debug, Clone, Default)]
pub struct InfoMessage {
    pub headers: Vec<(String, String)>,
    pub content: Option<Content>,
}

/// Current wall-clock time as Unix seconds.
pub(crate) fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
