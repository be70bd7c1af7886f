//! Deadline bookkeeping for is-composing notifications.
//!
//! The chat room keeps no timers of its own; all deadlines are Unix-second
//! instants checked by the external `iterate` tick.

use opencomm_session_core::Address;

use crate::config::ChatConfig;

/// Outcome of a deadline sweep, to be acted upon by the room.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct ComposingExpiry {
    /// Local composing went idle; an idle notification is due.
    pub idle: bool,
    /// The active notification must be refreshed.
    pub refresh: bool,
    /// These remote endpoints stopped composing.
    pub expired_remotes: Vec<Address>,
}

#[derive(Debug, Default)]
pub(crate) struct ComposingState {
    pub active: bool,
    idle_deadline: Option<i64>,
    refresh_deadline: Option<i64>,
    remotes: Vec<(Address, i64)>,
}

impl ComposingState {
    /// Arm the deadlines for a local composing burst.
    pub fn touch_local(&mut self, config: &ChatConfig, now: i64) -> bool {
        let started = !self.active;
        if started {
            self.active = true;
            self.refresh_deadline = Some(now + config.composing_refresh_timeout);
        }
        self.idle_deadline = Some(now + config.composing_idle_timeout);
        started
    }

    /// Stop advertising local composing and drop its deadlines.
    pub fn stop_local(&mut self) {
        self.active = false;
        self.idle_deadline = None;
        self.refresh_deadline = None;
    }

    /// Record a remote composing indication.
    pub fn set_remote(&mut self, config: &ChatConfig, from: &Address, composing: bool, now: i64) {
        self.remotes.retain(|(address, _)| address != from);
        if composing {
            self.remotes.push((from.clone(), now + config.remote_composing_refresh_timeout));
        }
    }

    pub fn remote_addresses(&self) -> Vec<Address> {
        self.remotes.iter().map(|(address, _)| address.clone()).collect()
    }

    pub fn is_remote_composing(&self) -> bool {
        !self.remotes.is_empty()
    }

    /// Sweep every deadline against `now`.
    pub fn check(&mut self, config: &ChatConfig, now: i64) -> ComposingExpiry {
        let mut expiry = ComposingExpiry::default();
        if self.active {
            if self.idle_deadline.map(|deadline| now >= deadline).unwrap_or(false) {
                self.stop_local();
                expiry.idle = true;
            } else if self.refresh_deadline.map(|deadline| now >= deadline).unwrap_or(false) {
                self.refresh_deadline = Some(now + config.composing_refresh_timeout);
                expiry.refresh = true;
            }
        }
        let (kept, expired): (Vec<_>, Vec<_>) =
            self.remotes.drain(..).partition(|(_, deadline)| now < *deadline);
        self.remotes = kept;
        expiry.expired_remotes = expired.into_iter().map(|(address, _)| address).collect();
        expiry
    }
}
