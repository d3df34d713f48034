//! Collaborator services
//!
//! The reconciliation engine consumes three narrow interfaces: a record
//! store, a registry lookup and a prefix search. Each has an HTTP
//! implementation over the backend's JSON API; tests substitute in-memory
//! implementations.

pub mod prefix_search;
pub mod record_client;
pub mod registry_client;

pub use prefix_search::{DebouncedSearch, SearchOutcome};
pub use record_client::HttpRecordClient;
pub use registry_client::HttpRegistryClient;

use crate::reconcile::{FetchFailure, FieldMap};
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Persisted form record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormRecord {
    pub id: String,
    #[serde(default)]
    pub fields: FieldMap,
}

/// Registry lookup errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("No registry entry for {0}")]
    NotFound(String),

    #[error("Registry rejected key {0}")]
    InvalidKey(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<&LookupError> for FetchFailure {
    fn from(err: &LookupError) -> Self {
        match err {
            LookupError::NotFound(_) => FetchFailure::NotFound,
            LookupError::InvalidKey(_) => FetchFailure::InvalidInput,
            LookupError::Network(_) | LookupError::Parse(_) => FetchFailure::NetworkError,
        }
    }
}

/// Record store errors
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Record API error {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Local storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for RecordError {
    fn from(err: sqlx::Error) -> Self {
        RecordError::Storage(err.to_string())
    }
}

impl From<RecordError> for skylog_common::Error {
    fn from(err: RecordError) -> Self {
        match err {
            RecordError::NotFound(id) => skylog_common::Error::NotFound(id),
            RecordError::Storage(msg) => skylog_common::Error::Internal(msg),
            other => skylog_common::Error::Service(other.to_string()),
        }
    }
}

/// Parse an API base URL that path segments can be appended to
pub(crate) fn parse_base_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| format!("invalid base URL {:?}: {}", raw, e))?;
    if url.cannot_be_a_base() {
        return Err(format!("invalid base URL {:?}: not hierarchical", raw));
    }
    Ok(url)
}

/// `base` extended by `segments`, each encoded as exactly one path segment
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    // Infallible for bases accepted by parse_base_url
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

/// Persisted records (backend, device-local, or both)
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<FormRecord, RecordError>;

    async fn save(&self, id: &str, fields: &FieldMap) -> Result<(), RecordError>;
}

/// External registry keyed by a natural key (e.g. registration mark)
///
/// Must be idempotent for a given key.
#[async_trait]
pub trait RegistryLookup: Send + Sync {
    /// Partial field map for `key`
    async fn lookup(&self, key: &str) -> Result<FieldMap, LookupError>;
}

/// Candidate keys starting with a prefix, best match first
#[async_trait]
pub trait PrefixSearch: Send + Sync {
    async fn search(&self, prefix: &str, limit: usize) -> Result<Vec<String>, LookupError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_error_classification() {
        assert_eq!(
            FetchFailure::from(&LookupError::NotFound("C-FABC".into())),
            FetchFailure::NotFound
        );
        assert_eq!(
            FetchFailure::from(&LookupError::InvalidKey("C-F".into())),
            FetchFailure::InvalidInput
        );
        assert_eq!(
            FetchFailure::from(&LookupError::Parse("eof".into())),
            FetchFailure::NetworkError
        );
    }

    #[test]
    fn test_endpoint_encodes_each_segment() {
        let base = parse_base_url("http://127.0.0.1:8080/api/").unwrap();
        assert_eq!(
            endpoint(&base, &["aircraft", "a1"]).as_str(),
            "http://127.0.0.1:8080/api/aircraft/a1"
        );
        assert_eq!(
            endpoint(&base, &["aircraft", "a/b?c#d"]).as_str(),
            "http://127.0.0.1:8080/api/aircraft/a%2Fb%3Fc%23d"
        );

        let root = parse_base_url("http://127.0.0.1:8080").unwrap();
        assert_eq!(
            endpoint(&root, &["registry", "search"]).as_str(),
            "http://127.0.0.1:8080/registry/search"
        );
    }

    #[test]
    fn test_base_url_must_be_hierarchical() {
        assert!(parse_base_url("mailto:ops@example.com").is_err());
        assert!(parse_base_url("not a url").is_err());
    }

    #[test]
    fn test_record_without_fields_parses() {
        let record: FormRecord = serde_json::from_str(r#"{"id": "a1"}"#).unwrap();
        assert_eq!(record.id, "a1");
        assert!(record.fields.is_empty());
    }
}
