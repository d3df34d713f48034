//! Shared test doubles for skylog-forms integration tests
//!
//! - `ScriptedRegistry`: canned lookup responses, optionally held behind a
//!   gate until the test releases them
//! - `MemoryRecordStore`: records in a HashMap, with a save log
//! - `spawn_backend`: axum server imitating the record and registry APIs

#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use skylog_forms::reconcile::FieldMap;
use skylog_forms::services::{FormRecord, LookupError, RecordError, RecordStore, RegistryLookup};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

pub fn map(value: serde_json::Value) -> FieldMap {
    serde_json::from_value(value).expect("test field map must be a JSON object")
}

/// Registry with canned responses per key
#[derive(Default)]
pub struct ScriptedRegistry {
    responses: Mutex<HashMap<String, Result<FieldMap, LookupError>>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    calls: AtomicUsize,
}

impl ScriptedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, key: &str, response: Result<FieldMap, LookupError>) {
        self.responses.lock().unwrap().insert(key.to_string(), response);
    }

    /// Hold responses for `key` until `release` is called
    pub fn gate(&self, key: &str) {
        self.gates
            .lock()
            .unwrap()
            .insert(key.to_string(), Arc::new(Notify::new()));
    }

    pub fn release(&self, key: &str) {
        if let Some(gate) = self.gates.lock().unwrap().get(key) {
            gate.notify_one();
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistryLookup for ScriptedRegistry {
    async fn lookup(&self, key: &str) -> Result<FieldMap, LookupError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let gate = self.gates.lock().unwrap().get(key).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        self.responses
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_else(|| Err(LookupError::NotFound(key.to_string())))
    }
}

/// Records held in memory
#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<String, FieldMap>>,
    saves: Mutex<Vec<(String, FieldMap)>>,
}

impl MemoryRecordStore {
    pub fn with_record(id: &str, fields: FieldMap) -> Self {
        let store = Self::default();
        store.records.lock().unwrap().insert(id.to_string(), fields);
        store
    }

    pub fn saves(&self) -> Vec<(String, FieldMap)> {
        self.saves.lock().unwrap().clone()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, id: &str) -> Result<FormRecord, RecordError> {
        self.records
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .map(|fields| FormRecord {
                id: id.to_string(),
                fields,
            })
            .ok_or_else(|| RecordError::NotFound(id.to_string()))
    }

    async fn save(&self, id: &str, fields: &FieldMap) -> Result<(), RecordError> {
        let mut records = self.records.lock().unwrap();
        if !records.contains_key(id) {
            return Err(RecordError::NotFound(id.to_string()));
        }
        records.insert(id.to_string(), fields.clone());
        self.saves.lock().unwrap().push((id.to_string(), fields.clone()));
        Ok(())
    }
}

/// State behind the mock backend
#[derive(Default)]
pub struct Backend {
    pub records: Mutex<HashMap<String, FieldMap>>,
    pub registry: Mutex<HashMap<String, FieldMap>>,
    pub marks: Vec<String>,
}

#[derive(Deserialize)]
struct SearchParams {
    prefix: String,
    limit: usize,
}

#[derive(Deserialize)]
struct SaveBody {
    fields: FieldMap,
}

async fn get_record(
    State(backend): State<Arc<Backend>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let records = backend.records.lock().unwrap();
    let fields = records.get(&id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(serde_json::json!({ "id": id, "fields": fields })))
}

async fn put_record(
    State(backend): State<Arc<Backend>>,
    Path(id): Path<String>,
    Json(body): Json<SaveBody>,
) -> StatusCode {
    if id == "locked" {
        return StatusCode::FORBIDDEN;
    }
    backend.records.lock().unwrap().insert(id, body.fields);
    StatusCode::NO_CONTENT
}

async fn get_registry(
    State(backend): State<Arc<Backend>>,
    Path(mark): Path<String>,
) -> Result<Json<FieldMap>, StatusCode> {
    match mark.as_str() {
        "C-FBAD" => return Err(StatusCode::UNPROCESSABLE_ENTITY),
        "C-FERR" => return Err(StatusCode::INTERNAL_SERVER_ERROR),
        _ => {}
    }
    backend
        .registry
        .lock()
        .unwrap()
        .get(&mark)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn search_registry(
    State(backend): State<Arc<Backend>>,
    Query(params): Query<SearchParams>,
) -> Json<Vec<String>> {
    Json(
        backend
            .marks
            .iter()
            .filter(|m| m.starts_with(&params.prefix))
            .take(params.limit)
            .cloned()
            .collect(),
    )
}

/// Serve the mock backend on an ephemeral port; returns the API base URL
pub async fn spawn_backend(backend: Arc<Backend>) -> String {
    let app = Router::new()
        .route("/api/aircraft/:id", get(get_record).put(put_record))
        .route("/api/registry/aircraft/:mark", get(get_registry))
        .route("/api/registry/search", get(search_registry))
        .with_state(backend);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}/api", addr)
}
