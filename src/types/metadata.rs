//! Reviewer metadata mirrored from the metadata repository.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A metadata file as published to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataDocument {
    /// Hex SHA-256 of the file contents the document was built from.
    pub checksum: String,
    /// Path of the file inside the metadata repository.
    pub source: String,
    pub content: Value,
    pub updated_at: DateTime<Utc>,
}
