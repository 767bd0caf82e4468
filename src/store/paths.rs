//! Document path conventions.

use crate::types::DiffId;

use super::{Result, StoreError};

/// Collection holding pending CI requests, one document per diff.
pub const CI_REQUESTS_PATH: &str = "/reviewer/ci/requests";

/// Collection holding diff records, keyed by diff id.
pub const DIFF_COLLECTION: &str = "/reviewer/data/diff";

/// Published copy of the reviewer registry.
pub const REVIEWER_REGISTRY_PATH: &str = "/reviewer/registry";

/// Published copy of the reviewer's own configuration.
pub const REVIEWER_CONFIG_PATH: &str = "/reviewer/config";

/// Path of the pending CI request for a diff.
pub fn ci_request_path(diff: DiffId) -> String {
    join(CI_REQUESTS_PATH, &diff.0.to_string())
}

/// Collection of CI responses published for a diff.
pub fn ci_responses_path(diff: DiffId) -> String {
    format!("/reviewer/ci/responses/{}/history", diff.0)
}

/// Path of a diff record.
pub fn diff_path(diff: DiffId) -> String {
    join(DIFF_COLLECTION, &diff.0.to_string())
}

/// Collection of submission reports written by the submitter for a diff.
pub fn submission_reports_path(diff: DiffId) -> String {
    format!("/reviewer/submitter/results/{}/history", diff.0)
}

/// Joins a collection path and a document id.
pub fn join(collection: &str, id: &str) -> String {
    format!("{}/{}", collection.trim_end_matches('/'), id)
}

/// Splits a path into its segments, rejecting anything that could escape a
/// store root or collide with adapter bookkeeping files.
///
/// A segment is unsafe if it:
/// - is empty (e.g. `//` or a trailing slash)
/// - starts with a dot (covers `.` and `..`)
/// - contains a backslash or a null byte
pub fn segments(path: &str) -> Result<Vec<&str>> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        return Err(StoreError::InvalidPath(path.to_string()));
    }

    let segments: Vec<&str> = trimmed.split('/').collect();
    for segment in &segments {
        if segment.is_empty()
            || segment.starts_with('.')
            || segment.contains('\\')
            || segment.contains('\0')
        {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
    }
    Ok(segments)
}

/// Splits a document path into `(collection, id)`.
pub fn split(path: &str) -> Result<(String, String)> {
    let mut segments = segments(path)?;
    if segments.len() < 2 {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    let id = segments.pop().unwrap_or_default().to_string();
    Ok((format!("/{}", segments.join("/")), id))
}

/// Normalizes a collection path (leading slash, no trailing slash).
pub fn collection(path: &str) -> Result<String> {
    Ok(format!("/{}", segments(path)?.join("/")))
}
