//! HTTP API.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use arcstr::ArcStr;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use pathmatch::{Coordinator, Error, MatchOptions, ResolutionRequest, ResolutionResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
struct AppState {
    coord: Coordinator,
    /// Applies to every request when set.
    model: Option<String>,
}

/// An error response carrying a `detail` message.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

/// Query parameters of the subcircuit listing.
#[derive(Debug, Deserialize)]
pub struct SubcktQuery {
    netlist_path: PathBuf,
}

/// The subcircuits of one netlist.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubcktListing {
    /// The netlist that was read.
    pub netlist_path: PathBuf,
    /// Subcircuit names in document order.
    pub subcircuits: Vec<ArcStr>,
    /// The number of subcircuits.
    pub count: usize,
}

/// Builds the API router.
pub fn router(coord: Coordinator, model: Option<String>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/api/v1/hierarchy-matching", post(matching_handler))
        .route("/api/v1/subcircuits", get(subcircuits_handler))
        .with_state(AppState { coord, model })
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serves the API on `addr` until interrupted.
pub async fn serve(addr: SocketAddr, coord: Coordinator, model: Option<String>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}."))?;
    info!("hierarchy matching API listening on http://{addr}");
    axum::serve(listener, router(coord, model))
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutting down");
            }
        })
        .await
        .with_context(|| "API server failed.")
}

async fn root_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "service": "Hierarchy Matching API",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "disambiguation": state.coord.has_transport(),
    }))
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "healthy" }))
}

async fn matching_handler(
    State(state): State<AppState>,
    body: Result<Json<ResolutionRequest>, JsonRejection>,
) -> Result<Json<ResolutionResponse>, ApiError> {
    let Json(mut req) = body.map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.body_text()))?;
    if let Some(model) = &state.model {
        req.options.model = model.clone();
    }

    // Dropping the handler future, as on client disconnect, cancels the request.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    match state.coord.respond(&req, &cancel).await {
        Ok(response) => Ok(Json(response)),
        Err(err) if err.is_request_error() => {
            Err(ApiError::new(StatusCode::BAD_REQUEST, err.to_string()))
        }
        Err(err) => {
            tracing::error!("hierarchy matching failed: {err}");
            Err(ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                err.to_string(),
            ))
        }
    }
}

async fn subcircuits_handler(
    State(state): State<AppState>,
    Query(query): Query<SubcktQuery>,
) -> Result<Json<SubcktListing>, ApiError> {
    let subcircuits = state
        .coord
        .list_subcircuits(&query.netlist_path, &MatchOptions::default())
        .await
        .map_err(|err| {
            let status = match &*err {
                Error::Io { .. } => StatusCode::NOT_FOUND,
                _ => StatusCode::UNPROCESSABLE_ENTITY,
            };
            ApiError::new(status, err.to_string())
        })?;
    Ok(Json(SubcktListing {
        netlist_path: query.netlist_path,
        count: subcircuits.len(),
        subcircuits,
    }))
}
