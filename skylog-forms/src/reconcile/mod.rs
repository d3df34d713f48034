//! Field reconciliation engine
//!
//! Merges three sources of form values: the persisted record, registry
//! lookups and user edits. See [`store`] for the merge policy.

pub mod key;
pub mod schema;
pub mod store;
pub mod types;

pub use key::{CanadianRegistration, LookupKeyFormat};
pub use schema::{aircraft_identity, FieldKind, FieldSpec, FieldStorage, FormSchema};
pub use store::ReconciliationStore;
pub use types::{
    FetchFailure, FetchGeneration, FetchStatus, FetchTicket, FieldMap, FieldOrigin, FieldValue,
    FormField, MergeOutcome, ReconciliationState, StaleResponse, ValidationFailure,
};
