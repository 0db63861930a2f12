use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::error::ApiError;
use crate::lifecycle::{MachineHandle, MachineStatus};
use crate::secrets::{BackendHealth, SecretStore};

/// Shared state for the control API.
#[derive(Clone)]
pub struct ApiState {
    pub handles: Arc<Vec<MachineHandle>>,
    pub store: Arc<dyn SecretStore>,
}

impl ApiState {
    pub fn new(handles: Vec<MachineHandle>, store: Arc<dyn SecretStore>) -> Self {
        Self { handles: Arc::new(handles), store }
    }

    fn machine(&self, id: &str) -> Result<&MachineHandle, ApiError> {
        self.handles.iter().find(|h| h.id() == id).ok_or_else(|| ApiError::unknown_credential(id))
    }
}

#[derive(Debug, Serialize)]
pub struct CredentialView {
    pub id: String,
    #[serde(flatten)]
    pub status: MachineStatus,
}

#[derive(Debug, Serialize)]
pub struct Accepted {
    pub id: String,
    pub action: &'static str,
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/credentials", get(list_credentials))
        .route("/credentials/{id}", get(get_credential))
        .route("/credentials/{id}/rotate", post(rotate_credential))
        .route("/credentials/{id}/create", post(create_credential))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<ApiState>) -> (StatusCode, Json<BackendHealth>) {
    let health = state.store.health_check().await;
    let status =
        if health.is_healthy() { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(health))
}

async fn list_credentials(State(state): State<ApiState>) -> Json<Vec<CredentialView>> {
    Json(
        state
            .handles
            .iter()
            .map(|h| CredentialView { id: h.id().to_string(), status: h.status() })
            .collect(),
    )
}

async fn get_credential(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<Json<CredentialView>, ApiError> {
    let handle = state.machine(&id)?;
    Ok(Json(CredentialView { id, status: handle.status() }))
}

async fn rotate_credential(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.machine(&id)?.rotate()?;
    info!(credential = %id, "Rotation requested via API");
    Ok((StatusCode::ACCEPTED, Json(Accepted { id, action: "rotate" })))
}

async fn create_credential(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.machine(&id)?.create()?;
    info!(credential = %id, "Creation requested via API");
    Ok((StatusCode::ACCEPTED, Json(Accepted { id, action: "create" })))
}
