//! Read-only HTTP inspection server.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns 200 if the document store is readable, 503 if not
//! - `GET /api/v1/diffs/{id}` - Returns the diff record as JSON
//! - `GET /api/v1/tasks` - Lists the scheduled tasks and whether each is running

use std::sync::Arc;

pub mod diffs;
pub mod health;
pub mod tasks;

pub use diffs::diff_handler;
pub use health::health_handler;
pub use tasks::tasks_handler;

use crate::store::DocumentStore;
use crate::tasks::Task;

/// Shared application state, passed to handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: Arc<dyn DocumentStore>,
    tasks: Vec<Arc<dyn Task>>,
}

impl AppState {
    pub fn new(store: Arc<dyn DocumentStore>, tasks: Vec<Arc<dyn Task>>) -> Self {
        AppState {
            inner: Arc::new(AppStateInner { store, tasks }),
        }
    }

    /// The store, for moving into `spawn_blocking`: adapters do
    /// synchronous IO.
    pub fn store(&self) -> Arc<dyn DocumentStore> {
        Arc::clone(&self.inner.store)
    }

    pub fn tasks(&self) -> &[Arc<dyn Task>] {
        &self.inner.tasks
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::get;

    axum::Router::new()
        .route("/api/v1/diffs/{id}", get(diff_handler))
        .route("/api/v1/tasks", get(tasks_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
}
