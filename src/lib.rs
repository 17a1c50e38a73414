//! panelhub: admin traffic quotas over 3x-ui, tx-ui and Marzban panels.
//!
//! The binary wires these modules into an HTTP server and a CLI; integration
//! tests in `tests/` use them directly.

use std::sync::Arc;

pub mod api;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod panel;
pub mod store;

use dispatch::Orchestrator;
use panel::AdapterRegistry;
use store::EntityStore;

/// Shared application state passed to handlers and middleware.
pub struct AppState {
    pub store: Arc<dyn EntityStore>,
    pub orchestrator: Orchestrator,
    pub config: config::Config,
}

impl AppState {
    pub fn new(store: Arc<dyn EntityStore>, registry: AdapterRegistry, config: config::Config) -> Self {
        Self {
            orchestrator: Orchestrator::new(store.clone(), registry),
            store,
            config,
        }
    }
}
