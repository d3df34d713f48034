//! # Skylog Forms
//!
//! Field reconciliation for aircraft record forms: persisted values,
//! registry lookups and user edits merged without silently overwriting what
//! the user typed.
//!
//! - [`reconcile`]: the synchronous reconciliation engine and form schemas
//! - [`session`]: async form sessions (spawned lookups, cancellation)
//! - [`services`]: record store, registry lookup and prefix search clients
//! - [`overlay`]: backend records overlaid with device-local fields

pub mod db;
pub mod overlay;
pub mod reconcile;
pub mod services;
pub mod session;

use reconcile::FormSchema;
use skylog_common::config::Settings;

pub use session::{FetchHandle, FetchReport, FormContext, FormSession};

/// Apply `[forms.<name>]` overrides from the resolved settings
pub fn configure_schema(schema: FormSchema, settings: &Settings) -> skylog_common::Result<FormSchema> {
    match settings.lookup_fields(schema.name()) {
        Some(fields) => {
            tracing::info!(
                form = schema.name(),
                lookup_fields = ?fields,
                "Using configured lookup fields"
            );
            schema.with_lookup_fields(fields)
        }
        None => Ok(schema),
    }
}
