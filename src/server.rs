//! HTTP search API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/search` | Rank collections for a query |
//! | `POST` | `/items/search` | Full item search (or parameters only) |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `invalid_catalog` (400), `not_found` (404),
//! `upstream_error` (502), `timeout` (504), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser clients can
//! call the API directly.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::config::Config;
use crate::models::{CollectionCandidate, Query, SearchResult};
use crate::orchestrator::SearchOrchestrator;
use crate::Error;

/// Builds the API router over a shared orchestrator.
pub fn router(orchestrator: Arc<SearchOrchestrator>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/search", post(handle_collection_search))
        .route("/items/search", post(handle_item_search))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(orchestrator)
}

/// Binds to `[server].bind` and serves until the process is terminated.
pub async fn run_server(config: &Config, orchestrator: Arc<SearchOrchestrator>) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let app = router(orchestrator);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(bind = %bind_addr, "search API listening");
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let (status, code) = match &err {
            Error::InvalidInput(_) | Error::UnsupportedFilter(_) => {
                (StatusCode::BAD_REQUEST, "bad_request")
            }
            Error::InvalidCatalog { .. } => (StatusCode::BAD_REQUEST, "invalid_catalog"),
            Error::IndexNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Error::ExternalService { .. } => (StatusCode::BAD_GATEWAY, "upstream_error"),
            Error::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            Error::Storage(_) | Error::Config(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        if status.is_server_error() {
            error!(code, error = %err, "request failed");
        } else {
            warn!(code, error = %err, "request rejected");
        }
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /search ============

#[derive(Deserialize)]
struct CollectionSearchRequest {
    query: String,
    #[serde(default)]
    catalog_url: Option<String>,
}

#[derive(Serialize)]
struct CollectionSearchResponse {
    results: Vec<CollectionCandidate>,
}

async fn handle_collection_search(
    State(orchestrator): State<Arc<SearchOrchestrator>>,
    Json(req): Json<CollectionSearchRequest>,
) -> Result<Json<CollectionSearchResponse>, AppError> {
    let results = orchestrator
        .search_collections(&req.query, req.catalog_url.as_deref())
        .await?;
    Ok(Json(CollectionSearchResponse { results }))
}

// ============ POST /items/search ============

#[derive(Deserialize)]
struct ItemSearchRequest {
    query: String,
    #[serde(default)]
    catalog_url: Option<String>,
    #[serde(default)]
    return_search_params_only: bool,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Serialize)]
struct ItemSearchResponse {
    results: SearchResult,
}

async fn handle_item_search(
    State(orchestrator): State<Arc<SearchOrchestrator>>,
    Json(req): Json<ItemSearchRequest>,
) -> Result<Json<ItemSearchResponse>, AppError> {
    let query = Query {
        text: req.query,
        catalog_url: req.catalog_url,
        limit: req.limit,
        return_params_only: req.return_search_params_only,
    };
    let results = orchestrator.search(&query).await?;
    Ok(Json(ItemSearchResponse { results }))
}
