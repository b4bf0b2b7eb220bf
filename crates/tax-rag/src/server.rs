/// HTTP transport for the pipeline.
///
/// Routes:
/// - `POST /ingest?reset=<bool>`: re-read the corpus file into the store (reset defaults to true)
/// - `POST /add_rule` `{"text": ...}`: append a rule
/// - `POST /calculate` `{"text": ...}`: answer a query, always as a `QueryResult`
/// - `GET /health`
///
/// Failures become `{"detail": "..."}` with 400 for bad input and 500 otherwise.
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::AppError;
use crate::model::QueryResult;
use crate::pipeline::Pipeline;

#[derive(Debug, Deserialize)]
pub struct TextRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct IngestParams {
    pub reset: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub message: String,
}

impl StatusResponse {
    fn success(message: String) -> Self {
        Self {
            status: "success".to_string(),
            message,
        }
    }
}

pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        let status = match &err {
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            detail: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "detail": self.detail }))).into_response()
    }
}

pub fn router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ingest", post(ingest))
        .route("/add_rule", post(add_rule))
        .route("/calculate", post(calculate))
        .with_state(pipeline)
}

pub async fn serve(listener: TcpListener, pipeline: Arc<Pipeline>) -> std::io::Result<()> {
    axum::serve(listener, router(pipeline))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn ingest(
    State(pipeline): State<Arc<Pipeline>>,
    Query(params): Query<IngestParams>,
) -> Result<Json<StatusResponse>, ApiError> {
    let reset = params.reset.unwrap_or(true);
    let path = pipeline.corpus().path().to_path_buf();
    let count = pipeline
        .ingest(&path, reset)
        .await
        .inspect_err(|e| error!(error = %e, "ingestion failed"))?;
    let action = if reset { "Resetted and ingested" } else { "Ingested" };
    Ok(Json(StatusResponse::success(format!("{action} {count} rules."))))
}

async fn add_rule(
    State(pipeline): State<Arc<Pipeline>>,
    Json(request): Json<TextRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let rule_id = pipeline
        .add_rule(&request.text)
        .await
        .inspect_err(|e| error!(error = %e, "add rule failed"))?;
    Ok(Json(StatusResponse::success(format!(
        "Rule added successfully with ID {rule_id}"
    ))))
}

async fn calculate(
    State(pipeline): State<Arc<Pipeline>>,
    Json(request): Json<TextRequest>,
) -> Result<Json<QueryResult>, ApiError> {
    if request.text.trim().is_empty() {
        return Err(AppError::InvalidInput("text must not be empty".to_string()).into());
    }
    let result = pipeline
        .calculate(&request.text)
        .await
        .inspect_err(|e| error!(error = %e, "calculation failed"))?;
    Ok(Json(result))
}
