//! Call session management for the opencomm stack.
//!
//! This crate hosts the call session state machine: the component that
//! drives a SIP dialog through its whole lifecycle (offer/answer, ringing,
//! media updates, hold/resume, transfer, reconnection after network loss)
//! on top of an external transaction/dialog engine reached through the
//! [`op::CallOp`] trait, and that reports everything to the application
//! through the [`listener::CallSessionListener`] callbacks.
//!
//! Everything runs on one logical execution context: events are processed
//! in arrival order and callbacks fire synchronously before the triggering
//! event handler returns.

pub mod account;
pub mod call_log;
pub mod config;
pub mod core;
pub mod error_info;
pub mod errors;
pub mod listener;
pub mod op;
pub mod params;
pub mod registry;
pub mod session;
pub mod testing;
pub mod types;

pub use crate::account::Account;
pub use crate::call_log::{CallLog, CallStatus};
pub use crate::config::SessionConfig;
pub use crate::core::CoreContext;
pub use crate::error_info::{ErrorInfo, Reason};
pub use crate::errors::{Result, SessionError};
pub use crate::listener::{CallSessionListener, NullListener};
pub use crate::op::{CallOp, OpFactory};
pub use crate::params::{CallSessionParams, MediaEncryption, Privacy};
pub use crate::registry::SessionRegistry;
pub use crate::session::{CallSession, PendingAction};
pub use crate::types::{
    Address, CallDirection, CallState, Content, InfoMessage, MediaDescription, MediaDirection,
    RegistrationState, SessionId, UpdateMethod,
};
