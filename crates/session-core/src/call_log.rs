//! Call history record kept alongside a session.

use serde::{Deserialize, Serialize};

use crate::error_info::ErrorInfo;
use crate::types::{Address, CallDirection};

/// Final outcome of a call, as recorded in the history.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum CallStatus {
    Success,
    /// The call never completed, for any reason not covered below.
    Aborted,
    Missed,
    Declined,
    /// Another device of the same identity picked up the call.
    AcceptedElsewhere,
    /// Another device of the same identity declined the call.
    DeclinedElsewhere,
}

impl Default for CallStatus {
    fn default() -> Self {
        CallStatus::Aborted
    }
}

/// History record for one call: direction, peers, timestamps and outcome.
///
/// Timestamps are Unix seconds; zero means "not reached".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallLog {
    direction: CallDirection,
    from: Address,
    to: Address,
    call_id: Option<String>,
    start_time: i64,
    connected_time: i64,
    duration: i64,
    status: CallStatus,
    error_info: Option<ErrorInfo>,
}

impl CallLog {
    pub fn new(direction: CallDirection, from: Address, to: Address) -> Self {
        Self {
            direction,
            from,
            to,
            call_id: None,
            start_time: 0,
            connected_time: 0,
            duration: 0,
            status: CallStatus::default(),
            error_info: None,
        }
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    pub fn from_address(&self) -> &Address {
        &self.from
    }

    pub fn to_address(&self) -> &Address {
        &self.to
    }

    pub fn set_to_address(&mut self, to: Address) {
        self.to = to;
    }

    pub fn call_id(&self) -> Option<&str> {
        self.call_id.as_deref()
    }

    pub fn set_call_id(&mut self, call_id: impl Into<String>) {
        self.call_id = Some(call_id.into());
    }

    pub fn start_time(&self) -> i64 {
        self.start_time
    }

    pub fn set_start_time(&mut self, time: i64) {
        self.start_time = time;
    }

    pub fn connected_time(&self) -> i64 {
        self.connected_time
    }

    pub fn set_connected_time(&mut self, time: i64) {
        self.connected_time = time;
    }

    pub fn status(&self) -> CallStatus {
        self.status
    }

    pub fn set_status(&mut self, status: CallStatus) {
        self.status = status;
    }

    pub fn duration(&self) -> i64 {
        self.duration
    }

    pub fn set_duration(&mut self, duration: i64) {
        self.duration = duration;
    }

    pub fn error_info(&self) -> Option<&ErrorInfo> {
        self.error_info.as_ref()
    }

    pub fn set_error_info(&mut self, error_info: ErrorInfo) {
        self.error_info = Some(error_info);
    }

    /// Seconds spent in the call, counted from the connection when there was
    /// one, from the start of the attempt otherwise.
    pub fn compute_duration(&self, now: i64) -> i64 {
        if self.connected_time == 0 {
            if self.start_time == 0 {
                return 0;
            }
            return now - self.start_time;
        }
        now - self.connected_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> CallLog {
        CallLog::new(
            CallDirection::Outgoing,
            Address::new("sip:alice@example.org"),
            Address::new("sip:bob@example.org"),
        )
    }

    #[test]
    fn duration_counts_from_connect_when_connected() {
        let mut log = log();
        log.set_start_time(100);
        assert_eq!(log.compute_duration(130), 30);
        log.set_connected_time(120);
        assert_eq!(log.compute_duration(130), 10);
    }

    #[test]
    fn duration_is_zero_before_start() {
        assert_eq!(log().compute_duration(1000), 0);
    }
}
