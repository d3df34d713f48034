//! Aircraft registry API client
//!
//! Wraps the backend's Transport Canada register endpoints:
//! - `GET /registry/aircraft/{mark}` returns a flat JSON object keyed by
//!   form field name
//! - `GET /registry/search?prefix=..&limit=..` returns a JSON array of marks

use super::{endpoint, parse_base_url, LookupError, PrefixSearch, RegistryLookup};
use crate::reconcile::FieldMap;
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use std::time::Duration;

const USER_AGENT: &str = concat!("skylog-forms/", env!("CARGO_PKG_VERSION"));

/// HTTP registry client
#[derive(Debug, Clone)]
pub struct HttpRegistryClient {
    http_client: reqwest::Client,
    base_url: Url,
}

impl HttpRegistryClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, LookupError> {
        let base_url = parse_base_url(base_url).map_err(LookupError::Network)?;
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| LookupError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url,
        })
    }
}

#[async_trait]
impl RegistryLookup for HttpRegistryClient {
    async fn lookup(&self, key: &str) -> Result<FieldMap, LookupError> {
        let url = endpoint(&self.base_url, &["registry", "aircraft", key]);
        tracing::debug!(key = %key, url = %url, "Querying registry");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| LookupError::Network(e.to_string()))?;

        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(LookupError::NotFound(key.to_string()));
        }

        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY {
            return Err(LookupError::InvalidKey(key.to_string()));
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(LookupError::Network(format!(
                "registry returned {}: {}",
                status.as_u16(),
                error_text
            )));
        }

        let fields: FieldMap = response
            .json()
            .await
            .map_err(|e| LookupError::Parse(e.to_string()))?;

        tracing::info!(key = %key, fields = fields.len(), "Retrieved registry entry");
        Ok(fields)
    }
}

#[async_trait]
impl PrefixSearch for HttpRegistryClient {
    async fn search(&self, prefix: &str, limit: usize) -> Result<Vec<String>, LookupError> {
        let url = endpoint(&self.base_url, &["registry", "search"]);
        let limit = limit.to_string();

        let response = self
            .http_client
            .get(url)
            .query(&[("prefix", prefix), ("limit", limit.as_str())])
            .send()
            .await
            .map_err(|e| LookupError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LookupError::Network(format!(
                "registry search returned {}",
                status.as_u16()
            )));
        }

        response
            .json::<Vec<String>>()
            .await
            .map_err(|e| LookupError::Parse(e.to_string()))
    }
}
