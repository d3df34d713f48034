//! Form sessions
//!
//! A `FormSession` is one open form: it owns exactly one
//! [`ReconciliationStore`], bound to one record, plus handles to the
//! services the form talks to. Sessions are constructed explicitly when a
//! form opens and torn down when it closes; there is no shared default
//! instance.
//!
//! Registry lookups run as spawned tasks so edits keep flowing while a
//! request is in flight. Each lookup races against its own cancellation
//! token (a child of the session token), and the response is applied with
//! the generation its lookup was issued, so a superseded response is
//! dropped by the store even if it wins the race. Closing or dropping the
//! session cancels everything still running.

use crate::reconcile::{
    FetchFailure, FetchGeneration, FetchStatus, FetchTicket, FieldMap, FieldOrigin, FormField,
    FormSchema, LookupKeyFormat, MergeOutcome, ReconciliationState, ReconciliationStore,
    ValidationFailure,
};
use crate::services::{LookupError, RecordError, RecordStore, RegistryLookup};
use chrono::Utc;
use skylog_common::events::{EventBus, FormEvent};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Services a form session talks to
#[derive(Clone)]
pub struct FormContext {
    pub records: Arc<dyn RecordStore>,
    pub registry: Arc<dyn RegistryLookup>,
    pub events: EventBus,
}

/// How a spawned lookup ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchReport {
    /// Response merged into the form
    Applied(MergeOutcome),
    /// Lookup failed; the form stays editable
    Failed(FetchFailure),
    /// Response arrived for a lookup that was no longer pending
    Stale,
    /// Lookup cancelled before its response was applied
    Cancelled,
}

/// Handle to a spawned lookup
#[derive(Debug)]
pub struct FetchHandle {
    pub ticket: FetchTicket,
    handle: JoinHandle<FetchReport>,
}

impl FetchHandle {
    /// Wait for the lookup task to finish
    pub async fn wait(self) -> FetchReport {
        match self.handle.await {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(generation = %self.ticket.generation, error = %e, "Lookup task aborted");
                FetchReport::Cancelled
            }
        }
    }
}

pub struct FormSession {
    form_id: Uuid,
    record_id: String,
    store: Arc<Mutex<ReconciliationStore>>,
    context: FormContext,
    cancel: CancellationToken,
    fetch_cancel: std::sync::Mutex<Option<CancellationToken>>,
}

impl FormSession {
    /// Open a form bound to `record_id`, loading its persisted values
    pub async fn open(
        context: FormContext,
        schema: Arc<FormSchema>,
        key_format: Arc<dyn LookupKeyFormat>,
        record_id: &str,
    ) -> Result<Self, RecordError> {
        let record = context.records.get(record_id).await?;

        let mut store = ReconciliationStore::new(schema, key_format);
        store.load_baseline(&record.fields);

        let form_id = Uuid::new_v4();
        tracing::info!(
            form_id = %form_id,
            record_id = %record_id,
            form = store.schema().name(),
            "Form session opened"
        );
        context.events.emit_lossy(FormEvent::BaselineLoaded {
            form_id,
            record_id: record_id.to_string(),
            timestamp: Utc::now(),
        });

        Ok(Self {
            form_id,
            record_id: record_id.to_string(),
            store: Arc::new(Mutex::new(store)),
            context,
            cancel: CancellationToken::new(),
            fetch_cancel: std::sync::Mutex::new(None),
        })
    }

    pub fn form_id(&self) -> Uuid {
        self.form_id
    }

    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    /// Reload persisted values, discarding edits and any pending lookup
    pub async fn reload(&self) -> Result<(), RecordError> {
        let record = self.context.records.get(&self.record_id).await?;
        let mut store = self.store.lock().await;
        self.cancel_fetch_task();
        store.load_baseline(&record.fields);

        self.emit(FormEvent::BaselineLoaded {
            form_id: self.form_id,
            record_id: self.record_id.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Apply a user edit; returns whether the value changed
    pub async fn set_field(
        &self,
        name: &str,
        value: serde_json::Value,
    ) -> Result<bool, ValidationFailure> {
        let mut store = self.store.lock().await;
        let changed = store.set_field_value(name, &value)?;

        if changed {
            let protected = store
                .field(name)
                .map(|f| f.origin == FieldOrigin::User)
                .unwrap_or(false);
            self.emit(FormEvent::FieldEdited {
                form_id: self.form_id,
                field: name.to_string(),
                protected,
                timestamp: Utc::now(),
            });
        }
        Ok(changed)
    }

    /// Start a registry lookup; rejected while one is in flight
    pub async fn lookup(&self, raw_key: &str) -> Result<FetchHandle, ValidationFailure> {
        let ticket = self.store.lock().await.begin_external_fetch(raw_key)?;
        Ok(self.spawn_fetch(ticket))
    }

    /// Start a registry lookup, superseding any lookup in flight
    pub async fn restart_lookup(&self, raw_key: &str) -> Result<FetchHandle, ValidationFailure> {
        let mut store = self.store.lock().await;
        let ticket = store.restart_external_fetch(raw_key)?;
        self.cancel_fetch_task();
        drop(store);
        Ok(self.spawn_fetch(ticket))
    }

    /// Cancel the lookup in flight, if any
    pub async fn cancel_lookup(&self) -> Option<FetchGeneration> {
        let mut store = self.store.lock().await;
        self.cancel_fetch_task();
        store.cancel_external_fetch()
    }

    pub async fn resolve_conflict(
        &self,
        name: &str,
        accept_external: bool,
    ) -> Result<(), ValidationFailure> {
        self.store.lock().await.resolve_conflict(name, accept_external)?;

        self.emit(FormEvent::ConflictResolved {
            form_id: self.form_id,
            field: name.to_string(),
            accepted_external: accept_external,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Write current values back to the record store
    ///
    /// Allowed in every lookup state, including failed lookups and
    /// unresolved conflicts (the user's values are saved).
    pub async fn save(&self) -> Result<(), RecordError> {
        let values = self.store.lock().await.field_values();
        self.context.records.save(&self.record_id, &values).await?;

        tracing::info!(form_id = %self.form_id, record_id = %self.record_id, "Form saved");
        self.emit(FormEvent::RecordSaved {
            form_id: self.form_id,
            record_id: self.record_id.clone(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub async fn state(&self) -> ReconciliationState {
        self.store.lock().await.state()
    }

    pub async fn field(&self, name: &str) -> Option<FormField> {
        self.store.lock().await.field(name).cloned()
    }

    pub async fn conflicts(&self) -> Vec<String> {
        self.store.lock().await.conflicts()
    }

    pub async fn fetch_status(&self) -> FetchStatus {
        self.store.lock().await.fetch_status()
    }

    /// Close the form; in-flight lookups are cancelled and never applied
    pub fn close(self) {
        tracing::info!(form_id = %self.form_id, "Form session closed");
        // Drop cancels the session token
    }

    fn emit(&self, event: FormEvent) {
        self.context.events.emit_lossy(event);
    }

    /// Cancel the token of the lookup task in flight
    fn cancel_fetch_task(&self) {
        let previous = self
            .fetch_cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(token) = previous {
            token.cancel();
        }
    }

    fn spawn_fetch(&self, ticket: FetchTicket) -> FetchHandle {
        let token = self.cancel.child_token();
        let previous = self
            .fetch_cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(token.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }

        self.emit(FormEvent::LookupStarted {
            form_id: self.form_id,
            key: ticket.key.clone(),
            generation: ticket.generation.0,
            timestamp: Utc::now(),
        });

        let task = LookupTask {
            form_id: self.form_id,
            ticket: ticket.clone(),
            token,
            store: self.store.clone(),
            registry: self.context.registry.clone(),
            events: self.context.events.clone(),
        };
        let handle = tokio::spawn(task.run());

        FetchHandle { ticket, handle }
    }
}

impl Drop for FormSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// One spawned registry lookup
struct LookupTask {
    form_id: Uuid,
    ticket: FetchTicket,
    token: CancellationToken,
    store: Arc<Mutex<ReconciliationStore>>,
    registry: Arc<dyn RegistryLookup>,
    events: EventBus,
}

impl LookupTask {
    async fn run(self) -> FetchReport {
        let result = tokio::select! {
            _ = self.token.cancelled() => {
                tracing::debug!(form_id = %self.form_id, generation = %self.ticket.generation, "Lookup cancelled in flight");
                return FetchReport::Cancelled;
            }
            result = self.registry.lookup(&self.ticket.key) => result,
        };

        let mut store = self.store.lock().await;
        // Cancellation happens under the store lock, so this check is final
        if self.token.is_cancelled() {
            return FetchReport::Cancelled;
        }

        match result {
            Ok(fields) => self.apply(&mut store, &fields),
            Err(err) => self.fail(&mut store, err),
        }
    }

    fn apply(&self, store: &mut ReconciliationStore, fields: &FieldMap) -> FetchReport {
        match store.complete_external_fetch(self.ticket.generation, fields) {
            Ok(outcome) => {
                self.events.emit_lossy(FormEvent::LookupApplied {
                    form_id: self.form_id,
                    key: self.ticket.key.clone(),
                    generation: self.ticket.generation.0,
                    changed: outcome.changed.clone(),
                    conflicts: outcome.conflicts.clone(),
                    timestamp: Utc::now(),
                });
                FetchReport::Applied(outcome)
            }
            Err(_) => self.stale(),
        }
    }

    fn fail(&self, store: &mut ReconciliationStore, err: LookupError) -> FetchReport {
        let failure = FetchFailure::from(&err);
        if failure == FetchFailure::NetworkError {
            tracing::warn!(form_id = %self.form_id, key = %self.ticket.key, error = %err, "Registry lookup failed");
        } else {
            tracing::info!(form_id = %self.form_id, key = %self.ticket.key, reason = %failure, "Registry lookup returned no data");
        }

        match store.fail_external_fetch(self.ticket.generation, failure) {
            Ok(()) => {
                self.events.emit_lossy(FormEvent::LookupFailed {
                    form_id: self.form_id,
                    key: self.ticket.key.clone(),
                    generation: self.ticket.generation.0,
                    reason: failure.to_string(),
                    timestamp: Utc::now(),
                });
                FetchReport::Failed(failure)
            }
            Err(_) => self.stale(),
        }
    }

    fn stale(&self) -> FetchReport {
        self.events.emit_lossy(FormEvent::StaleResponseDiscarded {
            form_id: self.form_id,
            generation: self.ticket.generation.0,
            timestamp: Utc::now(),
        });
        FetchReport::Stale
    }
}
