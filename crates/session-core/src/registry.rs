//! Arena of live sessions, used to resolve cross-session links.
//!
//! Transfer targets, referers and replaced sessions are stored as plain
//! [`SessionId`]s and resolved here on demand, so no session ever holds a
//! strong or raw back-pointer to another one.

use std::sync::Weak;

use dashmap::DashMap;

use crate::session::{CallSession, SessionShared};
use crate::types::SessionId;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Weak<SessionShared>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self { sessions: DashMap::new() }
    }

    pub(crate) fn register(&self, id: SessionId, shared: Weak<SessionShared>) {
        self.sessions.insert(id, shared);
    }

    pub fn unregister(&self, id: &SessionId) {
        self.sessions.remove(id);
    }

    /// Look up a session by id. Dead entries resolve to `None` and are
    /// pruned lazily.
    pub fn resolve(&self, id: &SessionId) -> Option<CallSession> {
        let upgraded = self.sessions.get(id).and_then(|entry| entry.value().upgrade());
        match upgraded {
            Some(shared) => Some(CallSession::from_shared(shared)),
            None => {
                self.sessions.remove(id);
                None
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
