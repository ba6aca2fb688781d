use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

use crate::pipeline::{AskReport, Failure};
use crate::prompt::Example;
use crate::recall::RecallError;
use crate::web::state::{AppState, RecallStatus};

#[derive(Debug, Deserialize, Clone)]
pub struct AskRequest {
    pub question: String,
}

#[derive(Debug, Deserialize)]
pub struct RememberRequest {
    pub question: String,
    pub sql_query: String,
}

#[derive(Debug, Serialize)]
pub struct RememberResponse {
    pub id: String,
    pub question: String,
    pub sql_query: String,
    pub dimension: usize,
}

#[derive(Debug, Serialize)]
pub struct PromptResponse {
    pub prompt: String,
    pub example_count: usize,
}

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub llm_backend: String,
    pub llm_model: String,
    pub database_backend: String,
    pub recall: RecallStatus,
    pub recall_top_k: usize,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Similarity recall is unavailable: {0}")]
    RecallUnavailable(String),
    #[error("Vector store error: {0}")]
    Recall(#[from] RecallError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::RecallUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Recall(e) => {
                error!("Recall error: {}", e);
                StatusCode::BAD_GATEWAY
            }
        };

        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// HTTP status for a finished run; the body always carries the full report.
pub fn status_for(report: &AskReport) -> StatusCode {
    match &report.failure {
        None => StatusCode::OK,
        Some(Failure::EmptyQuestion) => StatusCode::BAD_REQUEST,
        Some(Failure::Upstream { .. }) => StatusCode::BAD_GATEWAY,
        Some(Failure::ExtractionFailed) | Some(Failure::Database { .. }) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
    }
}

// Natural language question through the whole pipeline
pub async fn ask(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<AskRequest>,
) -> impl IntoResponse {
    let report = state.assistant.ask(&payload.question).await;
    (status_for(&report), Json(report))
}

pub async fn get_prompt(State(state): State<Arc<AppState>>) -> Json<PromptResponse> {
    let prompt = state.assistant.prompt();
    Json(PromptResponse {
        prompt: prompt.as_str().to_string(),
        example_count: prompt.examples().len(),
    })
}

pub async fn list_examples(State(state): State<Arc<AppState>>) -> Json<Vec<Example>> {
    Json(state.assistant.prompt().examples().to_vec())
}

// Append a question/SQL pair to the recall store
pub async fn remember(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RememberRequest>,
) -> Result<(StatusCode, Json<RememberResponse>), ApiError> {
    let question = payload.question.trim();
    let sql_query = payload.sql_query.trim();
    if question.is_empty() || sql_query.is_empty() {
        return Err(ApiError::BadRequest(
            "question and sql_query must not be empty".to_string(),
        ));
    }

    let recall = state
        .assistant
        .recall()
        .ok_or_else(|| ApiError::RecallUnavailable(state.recall_status.to_string()))?;

    let record = recall.remember(question, sql_query).await?;
    info!("Remembered question {}", record.id);

    Ok((
        StatusCode::CREATED,
        Json(RememberResponse {
            dimension: record.embedding.len(),
            id: record.id,
            question: record.question,
            sql_query: record.sql_query,
        }),
    ))
}

// System status
pub async fn system_status(State(state): State<Arc<AppState>>) -> Json<SystemStatus> {
    let now = chrono::Utc::now();
    let uptime = now.signed_duration_since(state.startup_time).num_seconds();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        llm_backend: state.assistant.llm().backend().to_string(),
        llm_model: state.assistant.llm().model().to_string(),
        database_backend: state.assistant.database().backend.to_string(),
        recall: state.recall_status.clone(),
        recall_top_k: state.config.recall.top_k,
    })
}
