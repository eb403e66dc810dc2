use std::sync::Arc;

use instinct_core::{ActionRegistry, Instinct};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub instinct: Arc<Instinct>,
    /// Used to build reflexes submitted over HTTP.
    pub registry: Arc<ActionRegistry>,
}

impl AppState {
    pub fn new(instinct: Arc<Instinct>, registry: Arc<ActionRegistry>) -> Self {
        Self { instinct, registry }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_state_shares_the_engine() {
        let instinct = Arc::new(Instinct::new());
        let state = AppState::new(Arc::clone(&instinct), Arc::new(ActionRegistry::standard()));
        let copy = state.clone();
        assert!(Arc::ptr_eq(&copy.instinct, &instinct));
        assert!(copy.registry.contains("print"));
        assert!(state.instinct.is_empty().await);
    }
}
