//! Reconciliation data contracts
//!
//! Values, provenance tags, fetch status and the results returned by the
//! store. Errors live next to the types they describe so callers can match
//! on them without pulling in the store itself.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// JSON object keyed by field name (record payloads, registry responses)
pub type FieldMap = BTreeMap<String, serde_json::Value>;

/// A coerced field value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Decimal(f64),
    Text(String),
}

impl FieldValue {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Text(s) => serde_json::Value::String(s.clone()),
            FieldValue::Integer(i) => serde_json::Value::from(*i),
            FieldValue::Decimal(d) => serde_json::Value::from(*d),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => write!(f, "{}", s),
            FieldValue::Integer(i) => write!(f, "{}", i),
            FieldValue::Decimal(d) => write!(f, "{}", d),
        }
    }
}

/// Provenance of a field's current value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOrigin {
    /// Loaded from the persisted record, or never filled
    Unset,
    /// Supplied by a registry lookup
    External,
    /// Typed by the user after lookups became relevant
    User,
}

/// One field of a form instance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormField {
    pub name: String,
    pub current_value: Option<FieldValue>,
    pub origin: FieldOrigin,
    pub last_external_value: Option<FieldValue>,
}

impl FormField {
    pub(crate) fn new(name: &str, value: Option<FieldValue>) -> Self {
        Self {
            name: name.to_string(),
            current_value: value,
            origin: FieldOrigin::Unset,
            last_external_value: None,
        }
    }
}

/// Status of the external registry lookup for a form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Idle,
    Loading,
    Success,
    NotFound,
    InvalidInput,
    Error,
}

impl FetchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchStatus::Idle => "idle",
            FetchStatus::Loading => "loading",
            FetchStatus::Success => "success",
            FetchStatus::NotFound => "not_found",
            FetchStatus::InvalidInput => "invalid_input",
            FetchStatus::Error => "error",
        }
    }
}

/// Classified lookup failure
///
/// Informational only: the form stays editable and saveable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchFailure {
    NotFound,
    InvalidInput,
    NetworkError,
}

impl FetchFailure {
    pub fn status(self) -> FetchStatus {
        match self {
            FetchFailure::NotFound => FetchStatus::NotFound,
            FetchFailure::InvalidInput => FetchStatus::InvalidInput,
            FetchFailure::NetworkError => FetchStatus::Error,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FetchFailure::NotFound => "not_found",
            FetchFailure::InvalidInput => "invalid_input",
            FetchFailure::NetworkError => "network_error",
        }
    }
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Monotonic lookup counter for one form instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FetchGeneration(pub u64);

impl fmt::Display for FetchGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Issued by an accepted lookup; the response must be applied with it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub generation: FetchGeneration,
    /// Normalized lookup key
    pub key: String,
}

/// Result of merging a registry response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Fields whose value was replaced
    pub changed: Vec<String>,
    /// User-edited fields that disagree with the registry
    pub conflicts: Vec<String>,
    /// Entries that were not applied (unknown, not lookup-populated, uncoercible)
    pub ignored: Vec<String>,
}

impl MergeOutcome {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// Comparable snapshot of a form's reconciliation state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciliationState {
    pub fields: BTreeMap<String, FormField>,
    pub external_fetch_status: FetchStatus,
    pub last_fetch_key: Option<String>,
}

/// Local rejection of an operation; state is left unchanged
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationFailure {
    #[error("Unknown field: {0}")]
    UnknownField(String),

    #[error("Invalid value for {field}: {reason}")]
    Coercion { field: String, reason: String },

    #[error("Malformed lookup key: {0:?}")]
    MalformedKey(String),

    #[error("A lookup is already in progress")]
    FetchInProgress,

    #[error("Field {0} has no pending conflict")]
    NotInConflict(String),
}

/// Response for a lookup that is no longer pending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Stale lookup response (generation {received}, current {current:?})")]
pub struct StaleResponse {
    pub received: FetchGeneration,
    /// Generation still pending, if any
    pub current: Option<FetchGeneration>,
}
