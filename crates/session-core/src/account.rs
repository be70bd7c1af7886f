//! Registration account a session may be bound to.

use parking_lot::Mutex;

use crate::types::{Address, RegistrationState};

/// Account through which a call was routed or received.
///
/// The registrar layer owns the actual registration; the session layer only
/// observes its state to gate dialog repair and to pick a contact address
/// learned from the REGISTER exchange.
pub struct Account {
    id: String,
    register_enabled: bool,
    contact: Mutex<Option<Address>>,
    state: Mutex<RegistrationState>,
}

impl Account {
    pub fn new(id: impl Into<String>, register_enabled: bool) -> Self {
        Self {
            id: id.into(),
            register_enabled,
            contact: Mutex::new(None),
            state: Mutex::new(RegistrationState::None),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn register_enabled(&self) -> bool {
        self.register_enabled
    }

    pub fn contact(&self) -> Option<Address> {
        self.contact.lock().clone()
    }

    pub fn set_contact(&self, contact: Option<Address>) {
        *self.contact.lock() = contact;
    }

    pub fn registration_state(&self) -> RegistrationState {
        *self.state.lock()
    }

    pub fn set_registration_state(&self, state: RegistrationState) {
        *self.state.lock() = state;
    }
}
