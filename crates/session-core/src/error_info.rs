//! Failure description attached to a session.
//!
//! The call operation is the authoritative source of protocol-level failure
//! detail while it is alive; the session copies the error info out before
//! releasing the operation so it stays queryable after `Released`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// High-level failure reason, mapped from the protocol response.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum Reason {
    /// No failure recorded.
    None,
    Declined,
    NotAnswered,
    Busy,
    DoNotDisturb,
    Redirect,
    /// A transaction is already in progress on the dialog; a retry is
    /// scheduled by the far end.
    RequestPending,
    /// The request matched no dialog or transaction.
    NoMatch,
    ServiceUnavailable,
    NotAcceptable,
    TemporarilyUnavailable,
    Gone,
    NotFound,
    Forbidden,
    IoError,
    Unknown,
}

impl Reason {
    /// Default protocol status code for a locally generated failure.
    pub fn error_code(self) -> u16 {
        match self {
            Reason::None => 0,
            Reason::Declined => 603,
            Reason::NotAnswered => 408,
            Reason::Busy => 486,
            Reason::DoNotDisturb => 600,
            Reason::Redirect => 302,
            Reason::RequestPending => 491,
            Reason::NoMatch => 481,
            Reason::ServiceUnavailable => 503,
            Reason::NotAcceptable => 488,
            Reason::TemporarilyUnavailable => 480,
            Reason::Gone => 410,
            Reason::NotFound => 404,
            Reason::Forbidden => 403,
            Reason::IoError => 503,
            Reason::Unknown => 400,
        }
    }
}

impl Default for Reason {
    fn default() -> Self {
        Reason::None
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Structured failure record: reason, protocol, status code and phrase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    reason: Reason,
    protocol: String,
    protocol_code: u16,
    phrase: String,
}

impl ErrorInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_reason(reason: Reason) -> Self {
        let mut ei = Self::new();
        ei.set(Some("SIP"), reason, reason.error_code(), None);
        ei
    }

    /// Overwrite all fields at once. A `None` protocol keeps the previous
    /// protocol name, mirroring how reasons are restated locally without
    /// losing the transport that produced them.
    pub fn set(&mut self, protocol: Option<&str>, reason: Reason, code: u16, phrase: Option<&str>) {
        if let Some(protocol) = protocol {
            self.protocol = protocol.to_string();
        }
        self.reason = reason;
        self.protocol_code = code;
        self.phrase = phrase.unwrap_or_default().to_string();
    }

    pub fn set_reason(&mut self, reason: Reason) {
        self.reason = reason;
    }

    pub fn reason(&self) -> Reason {
        self.reason
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn protocol_code(&self) -> u16 {
        self.protocol_code
    }

    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.protocol_code, self.phrase, self.reason)
    }
}
