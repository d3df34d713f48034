//! Event types for form sessions
//!
//! Provides the shared FormEvent definitions and the EventBus used to fan
//! them out to any interested listener (UI bridge, audit log, CLI output).

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Form session events
///
/// Every event names the form instance it belongs to; two open forms never
/// share an instance id. Events serialize with a `type` tag for transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FormEvent {
    /// Persisted record loaded into the form
    BaselineLoaded {
        form_id: Uuid,
        record_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// User changed a field value
    FieldEdited {
        form_id: Uuid,
        field: String,
        /// True when the edit is now protected from lookup overwrites
        protected: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Registry lookup accepted and in flight
    LookupStarted {
        form_id: Uuid,
        key: String,
        generation: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Registry response merged into the form
    LookupApplied {
        form_id: Uuid,
        key: String,
        generation: u64,
        /// Fields whose value changed
        changed: Vec<String>,
        /// User-edited fields awaiting a keep/replace decision
        conflicts: Vec<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Registry lookup failed (informational; form stays editable)
    LookupFailed {
        form_id: Uuid,
        key: String,
        generation: u64,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Response for a superseded or cancelled lookup was dropped
    StaleResponseDiscarded {
        form_id: Uuid,
        generation: u64,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// User decided a conflict
    ConflictResolved {
        form_id: Uuid,
        field: String,
        accepted_external: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Form values written back to the record store
    RecordSaved {
        form_id: Uuid,
        record_id: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl FormEvent {
    /// Form instance this event belongs to
    pub fn form_id(&self) -> Uuid {
        match self {
            FormEvent::BaselineLoaded { form_id, .. }
            | FormEvent::FieldEdited { form_id, .. }
            | FormEvent::LookupStarted { form_id, .. }
            | FormEvent::LookupApplied { form_id, .. }
            | FormEvent::LookupFailed { form_id, .. }
            | FormEvent::StaleResponseDiscarded { form_id, .. }
            | FormEvent::ConflictResolved { form_id, .. }
            | FormEvent::RecordSaved { form_id, .. } => *form_id,
        }
    }

    /// Short event name for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            FormEvent::BaselineLoaded { .. } => "BaselineLoaded",
            FormEvent::FieldEdited { .. } => "FieldEdited",
            FormEvent::LookupStarted { .. } => "LookupStarted",
            FormEvent::LookupApplied { .. } => "LookupApplied",
            FormEvent::LookupFailed { .. } => "LookupFailed",
            FormEvent::StaleResponseDiscarded { .. } => "StaleResponseDiscarded",
            FormEvent::ConflictResolved { .. } => "ConflictResolved",
            FormEvent::RecordSaved { .. } => "RecordSaved",
        }
    }
}

/// Broadcast bus for FormEvents
///
/// Slow subscribers lose the oldest events once `capacity` is exceeded.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<FormEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Examples
    ///
    /// ```
    /// use skylog_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<FormEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    pub fn emit(&self, event: FormEvent) -> Result<usize, broadcast::error::SendError<FormEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscriber case
    pub fn emit_lossy(&self, event: FormEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Event dropped: no subscribers");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
