//! Diff inspection endpoint.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tokio::task::JoinError;

use super::AppState;
use crate::store::{DocumentStoreExt, StoreError, paths};
use crate::types::{Diff, DiffId};

#[derive(Debug, Error)]
pub enum DiffLookupError {
    #[error("diff not found: {0}")]
    NotFound(DiffId),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("store read aborted: {0}")]
    Aborted(#[from] JoinError),
}

impl IntoResponse for DiffLookupError {
    fn into_response(self) -> Response {
        let status = match &self {
            DiffLookupError::NotFound(_) => StatusCode::NOT_FOUND,
            DiffLookupError::Store(_) | DiffLookupError::Aborted(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.to_string()).into_response()
    }
}

/// Returns the stored diff record.
///
/// - 200 OK with the diff as JSON
/// - 400 Bad Request if the id is not a number
/// - 404 Not Found if no such diff exists
pub async fn diff_handler(
    State(app_state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Diff>, DiffLookupError> {
    let id = DiffId(id);
    let store = app_state.store();
    tokio::task::spawn_blocking(move || store.get_doc::<Diff>(&paths::diff_path(id)))
        .await??
        .map(Json)
        .ok_or(DiffLookupError::NotFound(id))
}
