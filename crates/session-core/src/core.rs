//! Shared context injected into every session.

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::config::SessionConfig;
use crate::registry::SessionRegistry;

#[derive(Debug, Clone, Copy, Default)]
struct NetworkState {
    media_reachable: bool,
}

/// Process-wide state the sessions depend on: configuration, global network
/// reachability and the session registry.
///
/// Sessions hold a `Weak` reference to it; a session outliving its core
/// (teardown in managed environments) simply finds every upgrade failing
/// and skips the work.
pub struct CoreContext {
    config: SessionConfig,
    network: Mutex<NetworkState>,
    registry: SessionRegistry,
    missed_calls: AtomicU32,
}

impl CoreContext {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            network: Mutex::new(NetworkState { media_reachable: true }),
            registry: SessionRegistry::new(),
            missed_calls: AtomicU32::new(0),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn media_network_reachable(&self) -> bool {
        self.network.lock().media_reachable
    }

    pub fn set_media_network_reachable(&self, reachable: bool) {
        self.network.lock().media_reachable = reachable;
    }

    pub fn missed_calls(&self) -> u32 {
        self.missed_calls.load(Ordering::Relaxed)
    }

    pub(crate) fn count_missed_call(&self) {
        self.missed_calls.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for CoreContext {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}
