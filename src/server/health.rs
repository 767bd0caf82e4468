//! Health endpoint.
//!
//! The job is only useful while its document store is readable, so the check
//! reads the CI request queue: a failing store or a stuck read turns the
//! endpoint unhealthy even though the process is still serving HTTP.

use axum::extract::State;
use axum::http::StatusCode;
use tracing::warn;

use super::AppState;
use crate::store::paths;

/// Returns 200 OK with the text "OK", or 503 with the store error.
pub async fn health_handler(State(app_state): State<AppState>) -> (StatusCode, String) {
    let store = app_state.store();
    let read = tokio::task::spawn_blocking(move || store.list(paths::CI_REQUESTS_PATH)).await;
    match read {
        Ok(Ok(_)) => (StatusCode::OK, "OK".to_string()),
        Ok(Err(e)) => {
            warn!(error = %e, "health check cannot read the store");
            (StatusCode::SERVICE_UNAVAILABLE, format!("store unavailable: {e}"))
        }
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, format!("store read aborted: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DocumentStore, Result, StoreError, StoredDocument};
    use serde_json::Value;
    use std::sync::Arc;

    struct Unreadable;

    fn broken<T>() -> Result<T> {
        Err(StoreError::Io(std::io::Error::other("disk gone")))
    }

    impl DocumentStore for Unreadable {
        fn get(&self, _: &str) -> Result<Option<Value>> {
            broken()
        }

        fn set(&self, _: &str, _: &Value) -> Result<()> {
            broken()
        }

        fn add(&self, _: &str, _: &Value) -> Result<String> {
            broken()
        }

        fn delete(&self, _: &str) -> Result<bool> {
            broken()
        }

        fn list(&self, _: &str) -> Result<Vec<StoredDocument>> {
            broken()
        }

        fn pop_first(&self, _: &str) -> Result<Option<StoredDocument>> {
            broken()
        }

        fn update(
            &self,
            _: &str,
            _: &mut dyn FnMut(Option<Value>) -> Result<Option<Value>>,
        ) -> Result<()> {
            broken()
        }
    }

    #[tokio::test]
    async fn unreadable_store_is_unhealthy() {
        let state = AppState::new(Arc::new(Unreadable), Vec::new());
        let (status, body) = health_handler(State(state)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.contains("disk gone"));
    }
}
