//! Application state for Axum handlers.

use reqbridge_runtime::RequestBridge;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
#[derive(Clone, Debug)]
pub struct AppState {
    bridge: Arc<RequestBridge>,
}

impl AppState {
    /// Create state around a shared bridge.
    #[must_use]
    pub const fn new(bridge: Arc<RequestBridge>) -> Self {
        Self { bridge }
    }

    /// The request bridge.
    #[must_use]
    pub fn bridge(&self) -> &RequestBridge {
        &self.bridge
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_is_clone() {
        fn assert_clone<T: Clone + Send + Sync + 'static>() {}
        assert_clone::<AppState>();
    }
}
