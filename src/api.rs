//! REST API Server for the tabular query orchestrator
//!
//! Thin HTTP adapter: every route maps onto one `Orchestrator` operation.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::agent::Orchestrator;
use crate::error::PipelineError;
use crate::memory::ListQuery;
use crate::models::{QueryResponse, ResponseSource};

const DEFAULT_PAGE_SIZE: usize = 10;
const HISTORY_PAGE_SIZE: usize = 20;

pub const GENERIC_FAILURE: &str =
    "I'm sorry, but I encountered an error while processing your question. Please try rephrasing or ask something else.";

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QueryRequest {
    pub query: String,
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ListParams {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub tag: Option<String>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MetadataUpdate {
    pub title: Option<String>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct ExportParams {
    pub format: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CleanupParams {
    pub max_age_days: Option<i64>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

type ApiResult = (StatusCode, Json<ApiResponse>);

fn ok<T: Serialize>(data: T) -> ApiResult {
    (StatusCode::OK, Json(ApiResponse::success(data)))
}

fn failure(e: PipelineError) -> ApiResult {
    let status = match &e {
        PipelineError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        PipelineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        _ => {
            error!(error = %e, "Request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(ApiResponse::error(e.to_string())))
}

fn respond<T: Serialize>(result: crate::Result<T>) -> ApiResult {
    match result {
        Ok(data) => ok(data),
        Err(e) => failure(e),
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

/// =============================
/// Health & Query
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "message": "Tabular query API is running",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn query(State(state): State<ApiState>, Json(req): Json<QueryRequest>) -> ApiResult {
    let result = state
        .orchestrator
        .submit_query(&req.query, req.session_id.as_deref())
        .await;

    match result {
        Ok(response) => ok(response),
        Err(e @ PipelineError::InvalidInput(_)) => failure(e),
        Err(e) => {
            error!(error = %e, "Query processing failed");
            ok(QueryResponse {
                answer: GENERIC_FAILURE.to_string(),
                source: ResponseSource::Error,
                session_id: req.session_id.unwrap_or_default(),
                debug: None,
            })
        }
    }
}

/// =============================
/// Sessions
/// =============================

async fn init_session(State(state): State<ApiState>) -> ApiResult {
    respond(
        state
            .orchestrator
            .init_session()
            .map(|id| serde_json::json!({ "sessionId": id })),
    )
}

async fn list_sessions(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
) -> ApiResult {
    let query = ListQuery {
        limit: params.limit.unwrap_or(DEFAULT_PAGE_SIZE),
        offset: params.offset.unwrap_or(0),
        tag: params.tag,
        search: params.search,
    };
    respond(state.orchestrator.list_sessions(query))
}

async fn session_history(State(state): State<ApiState>) -> ApiResult {
    let query = ListQuery {
        limit: HISTORY_PAGE_SIZE,
        ..ListQuery::default()
    };
    respond(state.orchestrator.list_sessions(query).map(|page| {
        let history: Vec<serde_json::Value> = page
            .sessions
            .iter()
            .map(|s| {
                serde_json::json!({
                    "sessionId": s.session_id,
                    "title": s.title,
                    "createdAt": s.created_at.to_rfc3339(),
                    "updatedAt": s.last_access.to_rfc3339(),
                    "messageCount": s.message_count,
                })
            })
            .collect();
        serde_json::json!({ "history": history })
    }))
}

async fn get_session(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult {
    respond(state.orchestrator.get_session(&id).map(|session| {
        serde_json::json!({
            "id": session.id,
            "title": session.metadata.title,
            "tags": session.metadata.tags,
            "messages": session.messages,
            "context": session.context,
            "createdAt": session.metadata.created_at.to_rfc3339(),
            "updatedAt": session.last_access.to_rfc3339(),
        })
    }))
}

async fn delete_session(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult {
    respond(state.orchestrator.delete_session(&id).map(|()| {
        serde_json::json!({ "message": format!("Session {} deleted successfully", id) })
    }))
}

async fn clear_session(State(state): State<ApiState>, Path(id): Path<String>) -> ApiResult {
    respond(state.orchestrator.clear_session(&id).map(|()| {
        serde_json::json!({ "message": format!("Conversation history for session {} cleared", id) })
    }))
}

async fn update_metadata(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(update): Json<MetadataUpdate>,
) -> ApiResult {
    respond(
        state
            .orchestrator
            .update_metadata(&id, update.title, update.tags),
    )
}

async fn export_session(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(params): Query<ExportParams>,
) -> Response {
    let format = params.format.unwrap_or_else(|| "json".to_string());
    match state.orchestrator.export_session(&id, &format) {
        Ok(export) => (
            [
                (header::CONTENT_TYPE, export.format.content_type().to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}\"", export.file_name),
                ),
            ],
            export.body,
        )
            .into_response(),
        Err(e) => failure(e).into_response(),
    }
}

async fn import_session(
    State(state): State<ApiState>,
    Json(record): Json<serde_json::Value>,
) -> ApiResult {
    respond(
        state
            .orchestrator
            .import_session(record)
            .map(|id| serde_json::json!({ "sessionId": id })),
    )
}

async fn backup_sessions(State(state): State<ApiState>) -> ApiResult {
    respond(state.orchestrator.backup_sessions(None))
}

/// =============================
/// Maintenance & Debug
/// =============================

async fn cleanup(State(state): State<ApiState>, Query(params): Query<CleanupParams>) -> ApiResult {
    respond(state.orchestrator.cleanup(params.max_age_days))
}

async fn debug(State(state): State<ApiState>) -> ApiResult {
    if !state.orchestrator.settings().development {
        return (
            StatusCode::FORBIDDEN,
            Json(ApiResponse::error(
                "Debug endpoint only available in development mode".to_string(),
            )),
        );
    }
    respond(state.orchestrator.debug_info())
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/", get(health))
        .route("/query", post(query))
        .route("/sessions", get(list_sessions))
        .route("/sessions/init", post(init_session))
        .route("/sessions/create", post(init_session))
        .route("/sessions/history", get(session_history))
        .route("/sessions/import", post(import_session))
        .route("/sessions/backup", post(backup_sessions))
        .route("/sessions/:id", get(get_session).delete(delete_session))
        .route("/sessions/:id/clear", post(clear_session))
        .route("/sessions/:id/metadata", put(update_metadata))
        .route("/sessions/:id/export", get(export_session))
        .route("/cleanup", get(cleanup).post(cleanup))
        .route("/debug", get(debug))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
