//! Deferred operations, retried on every lifecycle tick.
//!
//! Operations that cannot run in the current state are queued as explicit
//! commands rather than opaque closures, so pending work can be inspected
//! and tested. The queue is drained with a take-all-then-execute pattern:
//! a command enqueued from inside another command's execution is picked up
//! by the same round without re-entering the queue lock.

use tracing::debug;

use crate::error_info::ErrorInfo;
use crate::errors::Result;
use crate::params::CallSessionParams;
use crate::types::{Address, CallState, Content, UpdateMethod};

use super::CallSession;

/// An application-requested operation deferred because the session was in
/// the middle of a transition.
#[derive(Debug, Clone)]
pub enum PendingAction {
    Accept { params: Option<CallSessionParams> },
    AcceptUpdate { params: Option<CallSessionParams> },
    Decline { error: ErrorInfo },
    Terminate { error: Option<ErrorInfo> },
    Update { params: Option<CallSessionParams>, method: UpdateMethod, subject: String, content: Option<Content> },
    Pause,
    Resume,
    Transfer { target: Address },
}

impl CallSession {
    /// Run every queued action once, re-queueing the ones that still cannot
    /// execute, in their original order. Only active sessions retry; a
    /// session past End, Error or Released drops its queue unexecuted.
    pub(crate) fn execute_pending_actions(&self) {
        if matches!(self.state(), CallState::End | CallState::Error | CallState::Released) {
            return;
        }
        let mut unsuccessful = Vec::new();
        loop {
            // Take each action out of the queue before executing it, so a
            // re-entrant enqueue never runs in the same stack frame twice.
            let Some(action) = self.with_inner(|i| i.pending.pop_front()) else { break };
            if let Err(err) = self.run_pending_action(action.clone()) {
                debug!(
                    "Pending action on CallSession [{}] still not executable: {}",
                    self.id(),
                    err
                );
                unsuccessful.push(action);
            }
        }
        self.with_inner(|i| {
            for action in unsuccessful.into_iter().rev() {
                i.pending.push_front(action);
            }
        });
    }

    fn run_pending_action(&self, action: PendingAction) -> Result<()> {
        match action {
            PendingAction::Accept { params } => self.accept(params.as_ref()),
            PendingAction::AcceptUpdate { params } => self.accept_update(params.as_ref()),
            PendingAction::Decline { error } => self.decline_with_error_info(&error),
            PendingAction::Terminate { error } => self.terminate(error.as_ref()),
            PendingAction::Update { params, method, subject, content } => {
                self.update(params.as_ref(), method, &subject, content.as_ref())
            }
            PendingAction::Pause => self.pause(),
            PendingAction::Resume => self.resume(),
            PendingAction::Transfer { target } => self.transfer_to_address(&target),
        }
    }
}
