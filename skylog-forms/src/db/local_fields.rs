//! Device-local field values
//!
//! One row per (record, field); values are stored as JSON text so numeric
//! and text fields round-trip unchanged. A JSON `null` deletes the row.

use crate::reconcile::FieldMap;
use skylog_common::{Error, Result};
use sqlx::{Pool, Sqlite};

/// Load all local values for a record
pub async fn load_local_fields(db: &Pool<Sqlite>, record_id: &str) -> Result<FieldMap> {
    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT field, value FROM local_fields WHERE record_id = ?")
            .bind(record_id)
            .fetch_all(db)
            .await?;

    let mut fields = FieldMap::new();
    for (field, value) in rows {
        let parsed = serde_json::from_str(&value).map_err(|e| {
            Error::Internal(format!(
                "Corrupt local value for {}.{}: {}",
                record_id, field, e
            ))
        })?;
        fields.insert(field, parsed);
    }
    Ok(fields)
}

/// Upsert local values for a record in one transaction
pub async fn save_local_fields(db: &Pool<Sqlite>, record_id: &str, fields: &FieldMap) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    let mut tx = db.begin().await?;

    for (field, value) in fields {
        if value.is_null() {
            sqlx::query("DELETE FROM local_fields WHERE record_id = ? AND field = ?")
                .bind(record_id)
                .bind(field)
                .execute(&mut *tx)
                .await?;
            continue;
        }

        sqlx::query(
            r#"
            INSERT INTO local_fields (record_id, field, value, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(record_id, field) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record_id)
        .bind(field)
        .bind(value.to_string())
        .bind(&now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    tracing::debug!(record_id = %record_id, fields = fields.len(), "Local fields saved");
    Ok(())
}
