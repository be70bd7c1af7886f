//! Call operation collaborator interface.
//!
//! A [`CallOp`] is the opaque handle onto one dialog/transaction of the
//! underlying SIP engine. The session state machine drives it through this
//! trait and receives its events back through the `on_*` methods of
//! [`crate::session::CallSession`]. The engine itself lives outside this
//! crate.

use std::sync::Arc;

use crate::error_info::ErrorInfo;
use crate::errors::Result;
use crate::params::Privacy;
use crate::types::{Address, CallState, Content, MediaDescription, MediaDirection, SessionId};

/// Handle onto a single SIP dialog owned by the external engine.
///
/// Exactly one session owns a given op at a time; ownership is transferred
/// atomically through `CallSession::replace_op`. After `release` the engine
/// must not deliver further events for this handle.
pub trait CallOp: Send + Sync {
    // Identity of the underlying dialog.
    fn call_id(&self) -> String;
    fn local_tag(&self) -> String;
    /// Remote tag of the dialog, absent until a provisional or final
    /// response carried one.
    fn remote_tag(&self) -> Option<String>;

    fn has_dialog(&self) -> bool;
    /// A client transaction is currently in flight on the dialog.
    fn dialog_request_pending(&self) -> bool;

    fn contact_address(&self) -> Option<Address>;
    fn set_contact_address(&self, address: Option<Address>);
    fn remote_contact_address(&self) -> Option<Address>;

    fn local_media_description(&self) -> Option<MediaDescription>;
    fn set_local_media_description(&self, description: Option<MediaDescription>);
    /// Stream direction offered by the most recent remote description.
    fn remote_media_direction(&self) -> Option<MediaDirection>;

    fn privacy(&self) -> Privacy;
    fn set_privacy(&self, privacy: Privacy);
    fn set_sent_custom_headers(&self, headers: &[(String, String)]);
    fn received_custom_headers(&self) -> Vec<(String, String)>;

    /// Failure detail for the last transaction on this op.
    fn error_info(&self) -> ErrorInfo;
    /// Failure detail carried in a Reason header of a received request.
    fn reason_error_info(&self) -> ErrorInfo;

    /// Session replaced by this op's INVITE, resolved from its Replaces
    /// header by the engine.
    fn replaces(&self) -> Option<SessionId>;
    fn set_replaces(&self, call_id: &str, local_tag: &str, remote_tag: &str);
    /// Record the session whose REFER caused this op to be created.
    fn set_referred_by(&self, referer: &SessionId);

    fn invite(&self, from: &Address, to: &Address, subject: &str) -> Result<()>;
    fn accept(&self) -> Result<()>;
    fn decline(&self, error: &ErrorInfo, redirect: Option<&Address>) -> Result<()>;
    fn terminate(&self, error: Option<&ErrorInfo>);
    fn update(&self, subject: &str, no_user_consent: bool) -> Result<()>;
    fn notify_ringing(&self, early_media: bool);
    fn refer(&self, target: &Address) -> Result<()>;
    fn refer_with_replaces(&self, replaced: &dyn CallOp) -> Result<()>;
    /// NOTIFY the far end of a REFER about the progress of the resulting
    /// call attempt.
    fn notify_refer_state(&self, state: CallState);
    fn ping(&self, from: &Address, to: &Address) -> Result<()>;
    fn cancel_invite(&self) -> Result<()>;

    fn set_local_body(&self, content: Option<Content>);
    fn local_body(&self) -> Option<Content>;

    /// Drop the dialog without signalling the far end.
    fn kill_dialog(&self);
    /// Detach the op from the engine; no more events will be delivered.
    fn release(&self);
}

/// Creates fresh operation handles on behalf of a session.
///
/// Needed whenever the machine must open a new dialog by itself: restarting
/// an INVITE after a redirect, repairing a broken dialog with an
/// INVITE-with-Replaces, or probing with an OPTIONS ping.
pub trait OpFactory: Send + Sync {
    fn create_call_op(&self, to: &Address) -> Arc<dyn CallOp>;
    fn create_ping_op(&self) -> Arc<dyn CallOp>;
}
