//! Local overlay record store
//!
//! Combines the backend record with device-local values. Reads take the
//! backend record and overlay the locally stored values of `Local` fields;
//! writes split the field map so local fields go to SQLite and everything
//! else goes to the backend.

use crate::db::local_fields::{load_local_fields, save_local_fields};
use crate::reconcile::{FieldMap, FormSchema};
use crate::services::{FormRecord, RecordError, RecordStore};
use async_trait::async_trait;
use sqlx::{Pool, Sqlite};
use std::sync::Arc;

pub struct OverlayRecordStore {
    remote: Arc<dyn RecordStore>,
    db: Pool<Sqlite>,
    schema: Arc<FormSchema>,
}

impl OverlayRecordStore {
    pub fn new(remote: Arc<dyn RecordStore>, db: Pool<Sqlite>, schema: Arc<FormSchema>) -> Self {
        Self { remote, db, schema }
    }

    /// Split a field map into (remote, local) halves
    fn split(&self, fields: &FieldMap) -> (FieldMap, FieldMap) {
        fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .partition(|(name, _)| !self.schema.is_local(name))
    }
}

fn storage_error(err: skylog_common::Error) -> RecordError {
    RecordError::Storage(err.to_string())
}

#[async_trait]
impl RecordStore for OverlayRecordStore {
    async fn get(&self, id: &str) -> Result<FormRecord, RecordError> {
        let mut record = self.remote.get(id).await?;
        let local = load_local_fields(&self.db, id).await.map_err(storage_error)?;

        for (name, value) in local {
            if self.schema.is_local(&name) {
                record.fields.insert(name, value);
            }
        }
        Ok(record)
    }

    async fn save(&self, id: &str, fields: &FieldMap) -> Result<(), RecordError> {
        let (remote, local) = self.split(fields);

        // Remote first: a rejected save must not leave local values ahead of the backend
        self.remote.save(id, &remote).await?;
        if !local.is_empty() {
            save_local_fields(&self.db, id, &local)
                .await
                .map_err(storage_error)?;
        }

        tracing::debug!(
            record_id = %id,
            remote = remote.len(),
            local = local.len(),
            "Overlay save complete"
        );
        Ok(())
    }
}
