//! Backend record API client
//!
//! `GET /aircraft/{id}` returns `{"id": .., "fields": {..}}`;
//! `PUT /aircraft/{id}` accepts `{"fields": {..}}`.

use super::{endpoint, parse_base_url, FormRecord, RecordError, RecordStore};
use crate::reconcile::FieldMap;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Serialize;
use std::time::Duration;

const USER_AGENT: &str = concat!("skylog-forms/", env!("CARGO_PKG_VERSION"));

#[derive(Serialize)]
struct SaveBody<'a> {
    fields: &'a FieldMap,
}

/// HTTP record store
#[derive(Debug, Clone)]
pub struct HttpRecordClient {
    http_client: reqwest::Client,
    base_url: Url,
}

impl HttpRecordClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RecordError> {
        let base_url = parse_base_url(base_url).map_err(RecordError::Network)?;
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| RecordError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    fn record_url(&self, id: &str) -> Url {
        endpoint(&self.base_url, &["aircraft", id])
    }
}

async fn rejected(response: reqwest::Response) -> RecordError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    RecordError::Rejected { status, message }
}

#[async_trait]
impl RecordStore for HttpRecordClient {
    async fn get(&self, id: &str) -> Result<FormRecord, RecordError> {
        let url = self.record_url(id);
        tracing::debug!(record_id = %id, url = %url, "Fetching record");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| RecordError::Network(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(RecordError::NotFound(id.to_string()));
        }
        if !response.status().is_success() {
            return Err(rejected(response).await);
        }

        response
            .json::<FormRecord>()
            .await
            .map_err(|e| RecordError::Parse(e.to_string()))
    }

    async fn save(&self, id: &str, fields: &FieldMap) -> Result<(), RecordError> {
        let url = self.record_url(id);
        tracing::debug!(record_id = %id, fields = fields.len(), "Saving record");

        let response = self
            .http_client
            .put(url)
            .json(&SaveBody { fields })
            .send()
            .await
            .map_err(|e| RecordError::Network(e.to_string()))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(RecordError::NotFound(id.to_string()));
        }
        if !response.status().is_success() {
            return Err(rejected(response).await);
        }

        tracing::info!(record_id = %id, "Record saved");
        Ok(())
    }
}
