//! Reconciliation store
//!
//! Owns one form instance's field values together with their provenance,
//! and merges registry responses without overwriting user edits.
//!
//! **Merge policy:**
//! - Fields the user has not touched (`Unset`) or that already came from the
//!   registry (`External`) take the registry value.
//! - Fields the user edited (`User`) are never overwritten automatically; a
//!   differing registry value becomes a conflict that the user keeps or
//!   replaces through [`ReconciliationStore::resolve_conflict`].
//!
//! **Lookup ordering:** every accepted lookup bumps the fetch generation.
//! Responses are applied only when their generation matches the lookup that
//! is still pending; anything else is a [`StaleResponse`] and leaves the
//! state untouched.
//!
//! The store is synchronous and single-owner. Async plumbing (running the
//! registry call, cancellation on close) lives in [`crate::session`].

use super::key::LookupKeyFormat;
use super::schema::FormSchema;
use super::types::{
    FetchFailure, FetchGeneration, FetchStatus, FetchTicket, FieldMap, FieldOrigin, FieldValue,
    FormField, MergeOutcome, ReconciliationState, StaleResponse, ValidationFailure,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lookup accepted but not yet answered
#[derive(Debug, Clone)]
struct PendingFetch {
    generation: FetchGeneration,
    key: String,
    /// Status to restore if the lookup is cancelled
    previous_status: FetchStatus,
}

/// Field values and provenance for one open form
pub struct ReconciliationStore {
    schema: Arc<FormSchema>,
    key_format: Arc<dyn LookupKeyFormat>,
    fields: BTreeMap<String, FormField>,
    fetch_status: FetchStatus,
    last_fetch_key: Option<String>,
    pending: Option<PendingFetch>,
    generation: u64,
    /// Registry values awaiting a keep/replace decision
    conflicts: BTreeMap<String, FieldValue>,
}

impl ReconciliationStore {
    /// Create an empty form instance
    pub fn new(schema: Arc<FormSchema>, key_format: Arc<dyn LookupKeyFormat>) -> Self {
        let fields = schema
            .fields()
            .iter()
            .map(|spec| (spec.name.clone(), FormField::new(&spec.name, None)))
            .collect();

        Self {
            schema,
            key_format,
            fields,
            fetch_status: FetchStatus::Idle,
            last_fetch_key: None,
            pending: None,
            generation: 0,
            conflicts: BTreeMap::new(),
        }
    }

    pub fn schema(&self) -> &FormSchema {
        &self.schema
    }

    /// Load persisted record values
    ///
    /// Every origin becomes `Unset`, the lookup status returns to `Idle` and
    /// any pending lookup is abandoned. Unknown keys are skipped and values
    /// that fail coercion load as empty; neither aborts the load.
    pub fn load_baseline(&mut self, record: &FieldMap) {
        for name in record.keys() {
            if self.schema.field(name).is_none() {
                debug!(form = self.schema.name(), field = %name, "Ignoring unknown record field");
            }
        }

        let mut fields = BTreeMap::new();
        for spec in self.schema.fields() {
            let value = match record.get(&spec.name) {
                Some(raw) => spec.coerce(raw).unwrap_or_else(|e| {
                    warn!(
                        form = self.schema.name(),
                        field = %spec.name,
                        error = %e,
                        "Stored value could not be coerced, loading as empty"
                    );
                    None
                }),
                None => None,
            };
            fields.insert(spec.name.clone(), FormField::new(&spec.name, value));
        }

        self.abandon_pending();
        self.fields = fields;
        self.fetch_status = FetchStatus::Idle;
        self.last_fetch_key = None;
        self.conflicts.clear();

        debug!(form = self.schema.name(), fields = self.fields.len(), "Baseline loaded");
    }

    /// Clear every field, as for a new blank form
    pub fn reset(&mut self) {
        self.load_baseline(&FieldMap::new());
    }

    /// Apply a user edit
    ///
    /// Returns `Ok(true)` when the value changed. Once a lookup has completed
    /// (or is in flight) a changed field becomes `User` and is protected from
    /// later lookups; before that there is nothing to protect and the origin
    /// is left alone.
    pub fn set_field_value(
        &mut self,
        name: &str,
        raw: &serde_json::Value,
    ) -> Result<bool, ValidationFailure> {
        let spec = self
            .schema
            .field(name)
            .ok_or_else(|| ValidationFailure::UnknownField(name.to_string()))?;
        let value = spec.coerce(raw)?;

        let protect = self.last_fetch_key.is_some() || self.pending.is_some();
        let field = self
            .fields
            .get_mut(name)
            .ok_or_else(|| ValidationFailure::UnknownField(name.to_string()))?;

        if field.current_value == value {
            return Ok(false);
        }

        field.current_value = value;
        if protect {
            field.origin = FieldOrigin::User;
        }

        debug!(
            form = self.schema.name(),
            field = name,
            origin = ?field.origin,
            "Field edited"
        );
        Ok(true)
    }

    /// Accept a registry lookup for `raw_key`
    ///
    /// Rejected without any state change when the key is malformed or a
    /// lookup is already in flight.
    pub fn begin_external_fetch(&mut self, raw_key: &str) -> Result<FetchTicket, ValidationFailure> {
        if self.fetch_status == FetchStatus::Loading {
            return Err(ValidationFailure::FetchInProgress);
        }
        let key = self.normalize_key(raw_key)?;
        Ok(self.start_fetch(key))
    }

    /// Supersede any pending lookup with a new one
    ///
    /// The key is validated first; a malformed key leaves the current lookup
    /// (if any) pending.
    pub fn restart_external_fetch(&mut self, raw_key: &str) -> Result<FetchTicket, ValidationFailure> {
        let key = self.normalize_key(raw_key)?;
        self.cancel_external_fetch();
        Ok(self.start_fetch(key))
    }

    /// Abandon the pending lookup, restoring the status it replaced
    ///
    /// Returns the generation that was cancelled, if any.
    pub fn cancel_external_fetch(&mut self) -> Option<FetchGeneration> {
        let pending = self.pending.take()?;
        self.fetch_status = pending.previous_status;
        debug!(
            form = self.schema.name(),
            generation = %pending.generation,
            key = %pending.key,
            "Lookup cancelled"
        );
        Some(pending.generation)
    }

    /// Merge a registry response
    ///
    /// `result` is partial: absent and `null` entries leave fields untouched.
    pub fn complete_external_fetch(
        &mut self,
        generation: FetchGeneration,
        result: &FieldMap,
    ) -> Result<MergeOutcome, StaleResponse> {
        let pending = self.take_pending(generation)?;
        let mut outcome = MergeOutcome::default();

        for (name, raw) in result {
            if raw.is_null() {
                continue;
            }
            let spec = match self.schema.field(name) {
                Some(spec) if spec.lookup => spec,
                _ => {
                    debug!(form = self.schema.name(), field = %name, "Lookup value not applicable");
                    outcome.ignored.push(name.clone());
                    continue;
                }
            };
            let candidate = match spec.coerce(raw) {
                Ok(Some(value)) => value,
                Ok(None) => continue,
                Err(e) => {
                    warn!(form = self.schema.name(), error = %e, "Lookup value rejected");
                    outcome.ignored.push(name.clone());
                    continue;
                }
            };
            let Some(field) = self.fields.get_mut(name) else {
                outcome.ignored.push(name.clone());
                continue;
            };

            match field.origin {
                FieldOrigin::User => {
                    if field.current_value.as_ref() != Some(&candidate) {
                        self.conflicts.insert(name.clone(), candidate);
                        outcome.conflicts.push(name.clone());
                    } else {
                        // Registry now agrees; an older disagreement is moot
                        self.conflicts.remove(name);
                    }
                }
                FieldOrigin::Unset | FieldOrigin::External => {
                    if field.current_value.as_ref() != Some(&candidate) {
                        outcome.changed.push(name.clone());
                    }
                    field.current_value = Some(candidate.clone());
                    field.last_external_value = Some(candidate);
                    field.origin = FieldOrigin::External;
                }
            }
        }

        self.fetch_status = FetchStatus::Success;
        self.last_fetch_key = Some(pending.key.clone());

        info!(
            form = self.schema.name(),
            key = %pending.key,
            generation = %generation,
            changed = outcome.changed.len(),
            conflicts = outcome.conflicts.len(),
            ignored = outcome.ignored.len(),
            "Lookup merged"
        );
        Ok(outcome)
    }

    /// Record a failed lookup; field values are never touched
    pub fn fail_external_fetch(
        &mut self,
        generation: FetchGeneration,
        reason: FetchFailure,
    ) -> Result<(), StaleResponse> {
        let pending = self.take_pending(generation)?;
        self.fetch_status = reason.status();

        debug!(
            form = self.schema.name(),
            key = %pending.key,
            generation = %generation,
            reason = %reason,
            "Lookup failed"
        );
        Ok(())
    }

    /// Keep the user's value or take the registry's
    pub fn resolve_conflict(
        &mut self,
        name: &str,
        accept_external: bool,
    ) -> Result<(), ValidationFailure> {
        let candidate = self
            .conflicts
            .remove(name)
            .ok_or_else(|| ValidationFailure::NotInConflict(name.to_string()))?;
        let field = self
            .fields
            .get_mut(name)
            .ok_or_else(|| ValidationFailure::UnknownField(name.to_string()))?;

        if accept_external {
            field.current_value = Some(candidate.clone());
            field.last_external_value = Some(candidate);
            field.origin = FieldOrigin::External;
        }

        debug!(
            form = self.schema.name(),
            field = name,
            accept_external,
            "Conflict resolved"
        );
        Ok(())
    }

    pub fn field(&self, name: &str) -> Option<&FormField> {
        self.fields.get(name)
    }

    pub fn fetch_status(&self) -> FetchStatus {
        self.fetch_status
    }

    pub fn last_fetch_key(&self) -> Option<&str> {
        self.last_fetch_key.as_deref()
    }

    /// Generation of the lookup still pending, if any
    pub fn pending_generation(&self) -> Option<FetchGeneration> {
        self.pending.as_ref().map(|p| p.generation)
    }

    /// Unresolved conflicts, in field-name order
    pub fn conflicts(&self) -> Vec<String> {
        self.conflicts.keys().cloned().collect()
    }

    /// Registry value offered for a conflicted field
    pub fn conflict_candidate(&self, name: &str) -> Option<&FieldValue> {
        self.conflicts.get(name)
    }

    /// Comparable snapshot of the current state
    pub fn state(&self) -> ReconciliationState {
        ReconciliationState {
            fields: self.fields.clone(),
            external_fetch_status: self.fetch_status,
            last_fetch_key: self.last_fetch_key.clone(),
        }
    }

    /// Current values as a JSON map, ready to save
    pub fn field_values(&self) -> FieldMap {
        self.schema
            .fields()
            .iter()
            .map(|spec| {
                let value = self
                    .fields
                    .get(&spec.name)
                    .and_then(|f| f.current_value.as_ref())
                    .map(FieldValue::to_json)
                    .unwrap_or(serde_json::Value::Null);
                (spec.name.clone(), value)
            })
            .collect()
    }

    fn normalize_key(&self, raw_key: &str) -> Result<String, ValidationFailure> {
        self.key_format
            .normalize(raw_key)
            .ok_or_else(|| ValidationFailure::MalformedKey(raw_key.to_string()))
    }

    fn start_fetch(&mut self, key: String) -> FetchTicket {
        self.generation += 1;
        let generation = FetchGeneration(self.generation);
        self.pending = Some(PendingFetch {
            generation,
            key: key.clone(),
            previous_status: self.fetch_status,
        });
        self.fetch_status = FetchStatus::Loading;

        debug!(form = self.schema.name(), key = %key, generation = %generation, "Lookup started");
        FetchTicket { generation, key }
    }

    fn take_pending(&mut self, generation: FetchGeneration) -> Result<PendingFetch, StaleResponse> {
        match &self.pending {
            Some(p) if p.generation == generation => {}
            other => {
                let current = other.as_ref().map(|p| p.generation);
                debug!(
                    form = self.schema.name(),
                    received = %generation,
                    current = ?current,
                    "Discarding stale lookup response"
                );
                return Err(StaleResponse {
                    received: generation,
                    current,
                });
            }
        }
        self.pending
            .take()
            .ok_or(StaleResponse {
                received: generation,
                current: None,
            })
    }

    fn abandon_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            debug!(
                form = self.schema.name(),
                generation = %pending.generation,
                "Pending lookup abandoned by baseline load"
            );
        }
    }
}

impl std::fmt::Debug for ReconciliationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationStore")
            .field("form", &self.schema.name())
            .field("fetch_status", &self.fetch_status)
            .field("last_fetch_key", &self.last_fetch_key)
            .field("pending", &self.pending)
            .field("conflicts", &self.conflicts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::key::CanadianRegistration;
    use crate::reconcile::schema::aircraft_identity;
    use serde_json::json;

    fn store() -> ReconciliationStore {
        ReconciliationStore::new(Arc::new(aircraft_identity()), Arc::new(CanadianRegistration))
    }

    fn map(value: serde_json::Value) -> FieldMap {
        serde_json::from_value(value).unwrap()
    }

    fn text(s: &str) -> Option<FieldValue> {
        Some(FieldValue::Text(s.to_string()))
    }

    /// Complete one lookup so later edits become protected
    fn fetched(result: serde_json::Value) -> ReconciliationStore {
        let mut store = store();
        store.load_baseline(&map(json!({"registration": "C-FABC", "model": "150"})));
        let ticket = store.begin_external_fetch("C-FABC").unwrap();
        store.complete_external_fetch(ticket.generation, &map(result)).unwrap();
        store
    }

    #[test]
    fn test_baseline_sets_unset_and_idle() {
        let mut store = store();
        store.load_baseline(&map(json!({
            "registration": "C-FABC",
            "year_of_manufacture": "1968",
            "airframe_hours": 4123.4,
            "wingspan": 10
        })));

        let state = store.state();
        assert_eq!(state.external_fetch_status, FetchStatus::Idle);
        assert!(state.last_fetch_key.is_none());
        assert!(state.fields.values().all(|f| f.origin == FieldOrigin::Unset));
        assert_eq!(
            store.field("year_of_manufacture").unwrap().current_value,
            Some(FieldValue::Integer(1968))
        );
        assert!(store.field("wingspan").is_none());
    }

    #[test]
    fn test_baseline_bad_value_loads_empty() {
        let mut store = store();
        store.load_baseline(&map(json!({"year_of_manufacture": "sometime"})));
        assert_eq!(store.field("year_of_manufacture").unwrap().current_value, None);
    }

    #[test]
    fn test_baseline_idempotent() {
        let record = map(json!({"registration": "C-FABC", "model": "150L"}));
        let mut store = store();
        store.load_baseline(&record);
        let first = store.state();
        store.load_baseline(&record);
        assert_eq!(store.state(), first);
    }

    #[test]
    fn test_edit_before_any_lookup_stays_unset() {
        let mut store = store();
        store.load_baseline(&FieldMap::new());

        assert!(store.set_field_value("model", &json!("150M")).unwrap());
        let field = store.field("model").unwrap();
        assert_eq!(field.current_value, text("150M"));
        assert_eq!(field.origin, FieldOrigin::Unset);
    }

    #[test]
    fn test_edit_after_lookup_becomes_user() {
        let mut store = fetched(json!({"model": "150L"}));
        assert!(store.set_field_value("model", &json!("150M")).unwrap());
        assert_eq!(store.field("model").unwrap().origin, FieldOrigin::User);
    }

    #[test]
    fn test_edit_same_value_is_not_a_change() {
        let mut store = fetched(json!({"model": "150L"}));
        assert!(!store.set_field_value("model", &json!("150L")).unwrap());
        assert_eq!(store.field("model").unwrap().origin, FieldOrigin::External);
    }

    #[test]
    fn test_edit_rejections_leave_value() {
        let mut store = store();
        store.load_baseline(&map(json!({"year_of_manufacture": 1968})));

        assert_eq!(
            store.set_field_value("tail_colour", &json!("red")),
            Err(ValidationFailure::UnknownField("tail_colour".into()))
        );
        assert!(matches!(
            store.set_field_value("year_of_manufacture", &json!("old")),
            Err(ValidationFailure::Coercion { .. })
        ));
        assert_eq!(
            store.field("year_of_manufacture").unwrap().current_value,
            Some(FieldValue::Integer(1968))
        );
    }

    #[test]
    fn test_untouched_field_takes_lookup_value() {
        let mut store = store();
        store.load_baseline(&map(json!({"model": "150"})));
        let ticket = store.begin_external_fetch("C-FABC").unwrap();

        let outcome = store
            .complete_external_fetch(ticket.generation, &map(json!({"model": "150L"})))
            .unwrap();

        assert_eq!(outcome.changed, vec!["model".to_string()]);
        assert!(outcome.conflicts.is_empty());
        let field = store.field("model").unwrap();
        assert_eq!(field.current_value, text("150L"));
        assert_eq!(field.origin, FieldOrigin::External);
        assert_eq!(field.last_external_value, text("150L"));
        assert_eq!(store.fetch_status(), FetchStatus::Success);
        assert_eq!(store.last_fetch_key(), Some("C-FABC"));
    }

    #[test]
    fn test_user_field_becomes_conflict() {
        let mut store = fetched(json!({"model": "150L"}));
        store.set_field_value("model", &json!("150M")).unwrap();

        let ticket = store.begin_external_fetch("C-FABC").unwrap();
        let outcome = store
            .complete_external_fetch(ticket.generation, &map(json!({"model": "150L"})))
            .unwrap();

        assert_eq!(outcome.conflicts, vec!["model".to_string()]);
        assert!(outcome.changed.is_empty());
        assert_eq!(store.field("model").unwrap().current_value, text("150M"));
        assert_eq!(store.conflicts(), vec!["model".to_string()]);
        assert_eq!(store.conflict_candidate("model"), text("150L").as_ref());
    }

    #[test]
    fn test_resolve_accept_external() {
        let mut store = fetched(json!({"model": "150L"}));
        store.set_field_value("model", &json!("150M")).unwrap();
        let ticket = store.begin_external_fetch("C-FABC").unwrap();
        store
            .complete_external_fetch(ticket.generation, &map(json!({"model": "150L"})))
            .unwrap();

        store.resolve_conflict("model", true).unwrap();

        let field = store.field("model").unwrap();
        assert_eq!(field.current_value, text("150L"));
        assert_eq!(field.origin, FieldOrigin::External);
        assert!(store.conflicts().is_empty());
    }

    #[test]
    fn test_resolve_keep_user_value() {
        let mut store = fetched(json!({"model": "150L"}));
        store.set_field_value("model", &json!("150M")).unwrap();
        let ticket = store.begin_external_fetch("C-FABC").unwrap();
        store
            .complete_external_fetch(ticket.generation, &map(json!({"model": "150L"})))
            .unwrap();

        store.resolve_conflict("model", false).unwrap();

        let field = store.field("model").unwrap();
        assert_eq!(field.current_value, text("150M"));
        assert_eq!(field.origin, FieldOrigin::User);
        assert!(store.conflicts().is_empty());
        assert_eq!(
            store.resolve_conflict("model", true),
            Err(ValidationFailure::NotInConflict("model".into()))
        );
    }

    #[test]
    fn test_agreeing_user_value_is_not_a_conflict() {
        let mut store = fetched(json!({"model": "150L"}));
        store.set_field_value("model", &json!("150M")).unwrap();
        let ticket = store.begin_external_fetch("C-FABC").unwrap();
        let outcome = store
            .complete_external_fetch(ticket.generation, &map(json!({"model": "150M"})))
            .unwrap();

        assert!(outcome.conflicts.is_empty());
        assert_eq!(store.field("model").unwrap().origin, FieldOrigin::User);
    }

    #[test]
    fn test_partial_result_leaves_absent_fields() {
        let mut store = store();
        store.load_baseline(&map(json!({"model": "150", "owner_name": "J. Pilot"})));
        let ticket = store.begin_external_fetch("C-FABC").unwrap();
        store
            .complete_external_fetch(
                ticket.generation,
                &map(json!({"manufacturer": "Cessna", "owner_name": null})),
            )
            .unwrap();

        assert_eq!(store.field("model").unwrap().current_value, text("150"));
        assert_eq!(store.field("model").unwrap().origin, FieldOrigin::Unset);
        assert_eq!(store.field("owner_name").unwrap().current_value, text("J. Pilot"));
        assert_eq!(store.field("manufacturer").unwrap().current_value, text("Cessna"));
    }

    #[test]
    fn test_non_lookup_fields_ignored() {
        let mut store = store();
        store.load_baseline(&map(json!({"airframe_hours": 100.0})));
        let ticket = store.begin_external_fetch("C-FABC").unwrap();
        let outcome = store
            .complete_external_fetch(
                ticket.generation,
                &map(json!({"airframe_hours": 9999.0, "colour": "red", "year_of_manufacture": "n/a"})),
            )
            .unwrap();

        assert_eq!(
            outcome.ignored,
            vec!["airframe_hours".to_string(), "colour".to_string(), "year_of_manufacture".to_string()]
        );
        assert_eq!(
            store.field("airframe_hours").unwrap().current_value,
            Some(FieldValue::Decimal(100.0))
        );
    }

    #[test]
    fn test_begin_rejects_malformed_key() {
        let mut store = store();
        store.load_baseline(&FieldMap::new());
        assert_eq!(
            store.begin_external_fetch("N12345"),
            Err(ValidationFailure::MalformedKey("N12345".into()))
        );
        assert_eq!(store.fetch_status(), FetchStatus::Idle);
        assert!(store.pending_generation().is_none());
    }

    #[test]
    fn test_begin_while_loading_is_noop() {
        let mut store = store();
        let first = store.begin_external_fetch("C-FABC").unwrap();
        let before = store.state();

        assert_eq!(
            store.begin_external_fetch("C-GXYZ"),
            Err(ValidationFailure::FetchInProgress)
        );
        assert_eq!(store.state(), before);
        assert_eq!(store.pending_generation(), Some(first.generation));
    }

    #[test]
    fn test_lookup_retries_after_any_failure() {
        let mut store = store();
        for failure in [
            FetchFailure::InvalidInput,
            FetchFailure::NotFound,
            FetchFailure::NetworkError,
        ] {
            let ticket = store.begin_external_fetch("C-FABC").unwrap();
            store.fail_external_fetch(ticket.generation, failure).unwrap();
            assert_eq!(store.fetch_status(), failure.status());

            let retry = store.begin_external_fetch("C-FABD").unwrap();
            assert_eq!(store.fetch_status(), FetchStatus::Loading);
            assert!(retry.generation > ticket.generation);
            store
                .complete_external_fetch(retry.generation, &map(json!({"model": "150L"})))
                .unwrap();
            assert_eq!(store.fetch_status(), FetchStatus::Success);
        }
    }

    #[test]
    fn test_key_is_normalized() {
        let mut store = store();
        let ticket = store.begin_external_fetch("cfabc").unwrap();
        assert_eq!(ticket.key, "C-FABC");
    }

    #[test]
    fn test_failure_keeps_fields() {
        let mut store = store();
        store.load_baseline(&map(json!({"model": "150"})));
        let ticket = store.begin_external_fetch("C-FABC").unwrap();
        let before = store.state().fields;

        store.fail_external_fetch(ticket.generation, FetchFailure::NotFound).unwrap();
        assert_eq!(store.fetch_status(), FetchStatus::NotFound);
        assert_eq!(store.state().fields, before);

        // Form stays usable: edits and new lookups are accepted
        store.set_field_value("model", &json!("150M")).unwrap();
        let retry = store.begin_external_fetch("C-GXYZ").unwrap();
        store.fail_external_fetch(retry.generation, FetchFailure::NetworkError).unwrap();
        assert_eq!(store.fetch_status(), FetchStatus::Error);
        assert!(store.last_fetch_key().is_none());
    }

    #[test]
    fn test_stale_generation_discarded() {
        let mut store = store();
        store.load_baseline(&map(json!({"model": "150"})));
        let first = store.begin_external_fetch("C-FABC").unwrap();
        let second = store.restart_external_fetch("C-GXYZ").unwrap();
        assert!(second.generation > first.generation);
        let before = store.state();

        let stale = store
            .complete_external_fetch(first.generation, &map(json!({"model": "172"})))
            .unwrap_err();
        assert_eq!(stale.received, first.generation);
        assert_eq!(stale.current, Some(second.generation));
        assert_eq!(
            store.fail_external_fetch(first.generation, FetchFailure::NotFound),
            Err(StaleResponse {
                received: first.generation,
                current: Some(second.generation)
            })
        );
        assert_eq!(store.state(), before);
        assert_eq!(store.fetch_status(), FetchStatus::Loading);

        store
            .complete_external_fetch(second.generation, &map(json!({"model": "150L"})))
            .unwrap();
        assert_eq!(store.field("model").unwrap().current_value, text("150L"));
        assert_eq!(store.last_fetch_key(), Some("C-GXYZ"));
    }

    #[test]
    fn test_cancel_restores_status_and_discards_late_response() {
        let mut store = fetched(json!({"model": "150L"}));
        let ticket = store.begin_external_fetch("C-FABC").unwrap();

        assert_eq!(store.cancel_external_fetch(), Some(ticket.generation));
        assert_eq!(store.fetch_status(), FetchStatus::Success);
        assert!(store.cancel_external_fetch().is_none());

        assert!(store
            .complete_external_fetch(ticket.generation, &map(json!({"model": "172"})))
            .is_err());
        assert_eq!(store.field("model").unwrap().current_value, text("150L"));
    }

    #[test]
    fn test_restart_with_bad_key_keeps_pending() {
        let mut store = store();
        let ticket = store.begin_external_fetch("C-FABC").unwrap();
        assert!(store.restart_external_fetch("bogus").is_err());
        assert_eq!(store.pending_generation(), Some(ticket.generation));
    }

    #[test]
    fn test_edit_during_lookup_becomes_conflict() {
        let mut store = store();
        store.load_baseline(&map(json!({"model": "150"})));
        let ticket = store.begin_external_fetch("C-FABC").unwrap();

        store.set_field_value("model", &json!("150M")).unwrap();
        assert_eq!(store.field("model").unwrap().origin, FieldOrigin::User);

        let outcome = store
            .complete_external_fetch(ticket.generation, &map(json!({"model": "150L", "manufacturer": "Cessna"})))
            .unwrap();
        assert_eq!(outcome.conflicts, vec!["model".to_string()]);
        assert_eq!(outcome.changed, vec!["manufacturer".to_string()]);
    }

    #[test]
    fn test_baseline_clears_conflicts_and_pending() {
        let mut store = fetched(json!({"model": "150L"}));
        store.set_field_value("model", &json!("150M")).unwrap();
        let ticket = store.begin_external_fetch("C-FABC").unwrap();
        store
            .complete_external_fetch(ticket.generation, &map(json!({"model": "150L"})))
            .unwrap();
        let late = store.begin_external_fetch("C-FABC").unwrap();

        store.load_baseline(&map(json!({"model": "172"})));

        assert!(store.conflicts().is_empty());
        assert!(store.pending_generation().is_none());
        assert_eq!(store.fetch_status(), FetchStatus::Idle);
        assert!(store
            .complete_external_fetch(late.generation, &map(json!({"model": "150L"})))
            .is_err());
        assert_eq!(store.field("model").unwrap().origin, FieldOrigin::Unset);
    }

    #[test]
    fn test_reset_clears_values() {
        let mut store = fetched(json!({"model": "150L"}));
        store.reset();
        assert!(store.state().fields.values().all(|f| f.current_value.is_none()));
        assert_eq!(store.fetch_status(), FetchStatus::Idle);
    }

    #[test]
    fn test_field_values_for_save() {
        let mut store = store();
        store.load_baseline(&map(json!({"model": "150", "year_of_manufacture": 1968})));
        let values = store.field_values();

        assert_eq!(values["model"], json!("150"));
        assert_eq!(values["year_of_manufacture"], json!(1968));
        assert_eq!(values["owner_name"], serde_json::Value::Null);
        assert_eq!(values.len(), store.schema().fields().len());
    }
}
