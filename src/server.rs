//! JSON HTTP API.
//!
//! Serves the [`ToolRegistry`] over plain HTTP for clients that do not
//! speak MCP.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/tools/list` | List all tools with their parameter schemas |
//! | `POST` | `/tools/{name}` | Call a tool by name |
//! | `GET`  | `/health` | Health check (returns version and index state) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "max_results must be greater than 0" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404),
//! `index_failed` (503), `tool_error` (500).

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::error::IndexError;
use crate::models::IndexState;
use crate::tools::{validate_params, ToolContext, ToolRegistry};

#[derive(Clone)]
struct AppState {
    ctx: ToolContext,
    tools: Arc<ToolRegistry>,
}

/// Build the router. Exposed separately from [`run_server`] for tests.
pub fn router(ctx: ToolContext, tools: Arc<ToolRegistry>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { ctx, tools })
}

pub async fn run_server(bind_addr: &str, ctx: ToolContext) -> anyhow::Result<()> {
    let tools = Arc::new(ToolRegistry::with_builtins());
    let app = router(ctx, tools);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("SOP HTTP API listening on http://{}", bind_addr);
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
    code: &'static str,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn classify_tool_error(tool_name: &str, err: anyhow::Error) -> AppError {
    let message = format!("{}: {:#}", tool_name, err);
    let (status, code) = match err.downcast_ref::<IndexError>() {
        Some(IndexError::InvalidRequest(_) | IndexError::InvalidConfiguration(_)) => {
            (StatusCode::BAD_REQUEST, "bad_request")
        }
        Some(IndexError::BuildFailed { .. }) => (StatusCode::SERVICE_UNAVAILABLE, "index_failed"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "tool_error"),
    };
    AppError {
        status,
        code,
        message,
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    index: IndexState,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        index: state.ctx.retriever().indexer().stats().state,
    })
}

// ============ GET /tools/list ============

#[derive(Serialize)]
struct ToolInfo {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    let tools = state
        .tools
        .tools()
        .iter()
        .map(|t| ToolInfo {
            name: t.name().to_string(),
            description: t.description().to_string(),
            parameters: t.parameters_schema(),
        })
        .collect();
    Json(ToolListResponse { tools })
}

// ============ POST /tools/{name} ============

async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Option<Json<serde_json::Value>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let tool = state
        .tools
        .find(&name)
        .ok_or_else(|| not_found(format!("no tool registered with name: {}", name)))?;

    let params = body.map(|Json(v)| v).unwrap_or(serde_json::Value::Null);
    let validated_params = validate_params(&tool.parameters_schema(), &params)
        .map_err(|e| bad_request(e.to_string()))?;

    let result = tool
        .execute(validated_params, &state.ctx)
        .await
        .map_err(|e| classify_tool_error(&name, e))?;

    Ok(Json(serde_json::json!({ "result": result })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_map_to_status_codes() {
        let cases = [
            (
                IndexError::InvalidRequest("max_results must be greater than 0".into()),
                StatusCode::BAD_REQUEST,
                "bad_request",
            ),
            (
                IndexError::BuildFailed {
                    reason: "embedding failed".into(),
                },
                StatusCode::SERVICE_UNAVAILABLE,
                "index_failed",
            ),
            (
                IndexError::VectorStore("disk full".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
                "tool_error",
            ),
        ];
        for (err, status, code) in cases {
            let app = classify_tool_error("search_sop_documents", err.into());
            assert_eq!(app.status, status);
            assert_eq!(app.code, code);
            assert!(app.message.starts_with("search_sop_documents: "));
        }

        let app = classify_tool_error("x", anyhow::anyhow!("boom"));
        assert_eq!(app.code, "tool_error");
    }
}
