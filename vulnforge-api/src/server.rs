//! Router and handlers for the review API

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tracing::info;

use vulnforge_core::{ActionRecord, Envelope, LeakRecord, Metrics, DEFAULT_SOURCE};
use vulnforge_ingest::IngestCoordinator;
use vulnforge_store::{EnrichQueue, ItemFilter, LeakStore};

use crate::error::ApiError;

/// Page size when the caller names none
const DEFAULT_LIMIT: i64 = 50;

/// Hard cap on page size
const MAX_LIMIT: i64 = 200;

/// Shared state for all handlers. Everything is constructed by the
/// entrypoint and injected; handlers own no clients of their own.
#[derive(Clone)]
pub struct AppState {
    pub store: LeakStore,
    pub queue: EnrichQueue,
    pub coordinator: Arc<IngestCoordinator>,
    pub envelope: Arc<Envelope>,
    pub metrics: Arc<Metrics>,
    pub reviewer_password: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/ingest", post(ingest))
        .route("/items", get(list_items))
        .route("/items/{id}", get(get_item))
        .route("/items/{id}/actions", post(append_action))
        .route("/items/{id}/decrypt", post(decrypt_item))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process exits.
pub async fn run_server(state: AppState, bind: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("review API listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await
}

#[derive(Debug, Deserialize)]
struct IngestRequest {
    source: Option<String>,
    payload: Value,
}

#[derive(Debug, Serialize)]
struct IngestResponse {
    count: usize,
    ids: Vec<String>,
}

async fn ingest(
    State(state): State<AppState>,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, ApiError> {
    let source = req.source.as_deref().unwrap_or(DEFAULT_SOURCE);
    let ids = state.coordinator.ingest(&req.payload, source).await?;
    Ok(Json(IngestResponse {
        count: ids.len(),
        ids,
    }))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    leak_type: Option<String>,
    tag: Option<String>,
    min_score: Option<i64>,
    max_score: Option<i64>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Debug, Serialize)]
struct ItemPage {
    total: i64,
    items: Vec<LeakRecord>,
}

async fn list_items(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ItemPage>, ApiError> {
    let filter = ItemFilter {
        leak_type: params.leak_type,
        tag: params.tag,
        min_score: params.min_score,
        max_score: params.max_score,
        limit: params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        offset: params.offset.unwrap_or(0).max(0),
    };

    let (total, items) = state.store.list(&filter).await?;
    Ok(Json(ItemPage { total, items }))
}

#[derive(Debug, Serialize)]
struct ItemDetail {
    #[serde(flatten)]
    item: LeakRecord,
    actions: Vec<ActionRecord>,
}

async fn get_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ItemDetail>, ApiError> {
    let item = state
        .store
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no item with id {}", id)))?;
    let actions = state.store.actions_for(&id).await?;
    Ok(Json(ItemDetail { item, actions }))
}

#[derive(Debug, Deserialize)]
struct ActionRequest {
    action: String,
    actor: String,
    notes: Option<String>,
}

async fn append_action(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ActionRequest>,
) -> Result<Json<ActionRecord>, ApiError> {
    let action = req.action.trim();
    let actor = req.actor.trim();
    if action.is_empty() || actor.is_empty() {
        return Err(ApiError::BadRequest(
            "action and actor must not be empty".to_string(),
        ));
    }

    let record = state
        .store
        .append_action(&id, action, actor, req.notes.as_deref())
        .await?;
    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
struct DecryptRequest {
    reviewer_password: String,
}

#[derive(Debug, Serialize)]
struct DecryptResponse {
    id: String,
    plaintext: String,
}

async fn decrypt_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<DecryptRequest>,
) -> Result<Json<DecryptResponse>, ApiError> {
    if req.reviewer_password != state.reviewer_password {
        return Err(ApiError::Forbidden("reviewer credential mismatch".to_string()));
    }

    let record = state
        .store
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("no item with id {}", id)))?;

    let plaintext = state.envelope.decrypt(
        &record.raw_ciphertext,
        &record.raw_nonce,
        &record.raw_tag,
        None,
    )?;

    Ok(Json(DecryptResponse {
        id,
        plaintext: String::from_utf8_lossy(&plaintext).into_owned(),
    }))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    storage: &'static str,
    queue: &'static str,
}

/// Storage and queue are probed independently; either being down degrades
/// the service without taking the API offline.
async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    let storage_ok = state.store.ping().await.is_ok();
    let queue_ok = state.queue.ping().await.is_ok();

    Json(HealthResponse {
        status: if storage_ok && queue_ok { "ok" } else { "degraded" },
        storage: if storage_ok { "ok" } else { "unreachable" },
        queue: if queue_ok { "ok" } else { "unreachable" },
    })
}

async fn metrics(State(state): State<AppState>) -> ([(header::HeaderName, &'static str); 1], String) {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

async fn dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

const DASHBOARD_HTML: &str = r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>VulnForge×Robin — Leak Review</title>
<style>
  body { font-family: system-ui, sans-serif; margin: 2rem; background: #111; color: #ddd; }
  h1 { font-size: 1.3rem; }
  table { border-collapse: collapse; width: 100%; }
  th, td { text-align: left; padding: 0.4rem 0.8rem; border-bottom: 1px solid #333; }
  .score { font-weight: bold; }
  .tag { background: #333; border-radius: 3px; padding: 0 0.3rem; margin-right: 0.2rem; font-size: 0.85em; }
</style>
</head>
<body>
<h1>VulnForge×Robin — Leak Review</h1>
<table id="items">
  <thead>
    <tr><th>Score</th><th>Target</th><th>Type</th><th>Source</th><th>Tags</th><th>Updated</th></tr>
  </thead>
  <tbody></tbody>
</table>
<script>
fetch('/items?limit=50').then(r => r.json()).then(page => {
  const body = document.querySelector('#items tbody');
  for (const item of page.items) {
    const row = document.createElement('tr');
    const tags = (item.tags || []).map(t => `<span class="tag">${t}</span>`).join('');
    row.innerHTML = `<td class="score">${item.score}</td>` +
      `<td>${item.target.value}</td><td>${item.leak_type}</td>` +
      `<td>${item.source}</td><td>${tags}</td><td>${item.updated_at}</td>`;
    body.appendChild(row);
  }
});
</script>
</body>
</html>
"#;
