use std::sync::Arc;

use hookd_core::auth::AuthMethod;
use hookd_core::procedure::Registry;
use hookd_core::serialize::ExecutionSlots;

/// Shared application state passed to all route handlers.
///
/// The registry and auth method are immutable for the process lifetime;
/// the execution slots are the only mutable shared state.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthMethod>,
    pub registry: Arc<Registry>,
    pub slots: ExecutionSlots,
}

impl AppState {
    pub fn new(auth: AuthMethod, registry: Registry) -> Self {
        Self {
            auth: Arc::new(auth),
            registry: Arc::new(registry),
            slots: ExecutionSlots::new(),
        }
    }
}
