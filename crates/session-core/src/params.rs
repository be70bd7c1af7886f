//! Call session parameters.
//!
//! Parameters follow clone-on-write semantics: a session deep-copies the
//! params handed to it by the application and only ever mutates its own
//! copy, so that negotiation results (privacy overwritten by the far end,
//! media direction flipped on hold) never leak back into the caller's
//! object.

use serde::{Deserialize, Serialize};

use crate::types::{MediaDirection, SessionId};

/// Privacy requested for the caller identity.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum Privacy {
    /// Let the account or stack decide.
    Default,
    /// Explicitly no privacy.
    None,
    /// Hide the identity behind an anonymous From.
    Id,
}

impl Default for Privacy {
    fn default() -> Self {
        Privacy::Default
    }
}

/// Encryption policy requested for the media streams. Enforcement is owned
/// by the media engine.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum MediaEncryption {
    None,
    Srtp,
    Zrtp,
    Dtls,
}

impl Default for MediaEncryption {
    fn default() -> Self {
        MediaEncryption::None
    }
}

/// Requested and negotiated configuration of a call session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallSessionParams {
    privacy: Privacy,
    encryption: MediaEncryption,
    custom_headers: Vec<(String, String)>,
    custom_contact_params: Vec<(String, String)>,
    in_conference: bool,
    conference_id: Option<String>,
    referer: Option<SessionId>,
    /// Renegotiate with UPDATE instead of reINVITE when the change does not
    /// require user consent.
    no_user_consent: bool,
    /// The update is driven by internal processing (e.g. ICE conclusion),
    /// not by the application.
    internal_call_update: bool,
    audio_direction: MediaDirection,
}

impl CallSessionParams {
    pub fn new() -> Self {
        Self { audio_direction: MediaDirection::SendRecv, ..Default::default() }
    }

    pub fn privacy(&self) -> Privacy {
        self.privacy
    }

    pub fn set_privacy(&mut self, privacy: Privacy) {
        self.privacy = privacy;
    }

    pub fn encryption(&self) -> MediaEncryption {
        self.encryption
    }

    pub fn set_encryption(&mut self, encryption: MediaEncryption) {
        self.encryption = encryption;
    }

    pub fn custom_headers(&self) -> &[(String, String)] {
        &self.custom_headers
    }

    pub fn add_custom_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.custom_headers.push((name.into(), value.into()));
    }

    pub fn set_custom_headers(&mut self, headers: Vec<(String, String)>) {
        self.custom_headers = headers;
    }

    pub fn custom_contact_params(&self) -> &[(String, String)] {
        &self.custom_contact_params
    }

    pub fn add_custom_contact_param(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.custom_contact_params.push((name.into(), value.into()));
    }

    pub fn in_conference(&self) -> bool {
        self.in_conference
    }

    pub fn set_in_conference(&mut self, in_conference: bool) {
        self.in_conference = in_conference;
    }

    pub fn conference_id(&self) -> Option<&str> {
        self.conference_id.as_deref()
    }

    pub fn set_conference_id(&mut self, id: impl Into<String>) {
        self.conference_id = Some(id.into());
    }

    pub fn referer(&self) -> Option<&SessionId> {
        self.referer.as_ref()
    }

    pub fn set_referer(&mut self, referer: SessionId) {
        self.referer = Some(referer);
    }

    pub fn no_user_consent(&self) -> bool {
        self.no_user_consent
    }

    pub fn set_no_user_consent(&mut self, no_user_consent: bool) {
        self.no_user_consent = no_user_consent;
    }

    pub fn internal_call_update(&self) -> bool {
        self.internal_call_update
    }

    pub fn set_internal_call_update(&mut self, internal: bool) {
        self.internal_call_update = internal;
    }

    pub fn audio_direction(&self) -> MediaDirection {
        self.audio_direction
    }

    pub fn set_audio_direction(&mut self, direction: MediaDirection) {
        self.audio_direction = direction;
    }
}
