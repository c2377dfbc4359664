//! JSON HTTP surface over the policy store and executor.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::cancel::CancelSignal;
use crate::error::{RunError, StoreError};
use crate::executor::{PolicyExecutor, PolicyRun};
use crate::model::Policy;
use crate::policy_store::PolicyStore;

pub struct AppState {
    pub store: Arc<dyn PolicyStore>,
    pub executor: PolicyExecutor,
}

type SharedState = Arc<AppState>;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/policies", get(list_policies))
        .route("/policies/:name", get(get_policy))
        .route("/execute/:name", post(execute))
        .route("/reload", post(reload))
        .with_state(state)
}

async fn health(State(state): State<SharedState>) -> Result<Json<Value>, AppError> {
    let policies = state.store.list().await?;
    Ok(Json(json!({
        "status": "ok",
        "policies": policies.len(),
    })))
}

async fn list_policies(State(state): State<SharedState>) -> Result<Json<Vec<Policy>>, AppError> {
    Ok(Json(state.store.list().await?))
}

async fn get_policy(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<Json<Policy>, AppError> {
    Ok(Json(state.store.get_by_name(&name).await?))
}

async fn execute(
    State(state): State<SharedState>,
    Path(name): Path<String>,
) -> Result<Json<PolicyRun>, AppError> {
    let policy = state.store.get_by_name(&name).await?;
    let run = state
        .executor
        .run_report(&policy, &CancelSignal::never())
        .await?;
    info!(
        policy = %name,
        passed = run.summary.passed,
        failed = run.summary.failed,
        "served policy execution"
    );
    Ok(Json(run))
}

async fn reload(State(state): State<SharedState>) -> Result<Json<Value>, AppError> {
    let policies = state.store.reload().await?;
    info!(policies, "reloaded policies");
    Ok(Json(json!({ "policies": policies })))
}

#[derive(Debug)]
enum AppError {
    NotFound(String),
    Store(String),
    Run(String),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => Self::NotFound(err.to_string()),
            other => Self::Store(other.to_string()),
        }
    }
}

impl From<RunError> for AppError {
    fn from(err: RunError) -> Self {
        Self::Run(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::Store(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            Self::Run(msg) => (StatusCode::BAD_GATEWAY, msg),
        };
        if status != StatusCode::NOT_FOUND {
            warn!(status = status.as_u16(), error = %message, "request failed");
        }

        let body = json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
