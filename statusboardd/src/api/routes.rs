use std::sync::Arc;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio::sync::watch;
use shared::protocol::{CHECK_PATH, CONFIG_PATH, STATUS_HASH_PATH, STATUS_PATH};
use shared::types::{ServiceDefinition, ServiceStatus, SweepSnapshot};
use crate::config::CheckSettings;
use crate::publisher::SnapshotPublisher;
use crate::scheduler::SweepTrigger;

#[derive(Clone)]
pub struct AppState {
    pub publisher: SnapshotPublisher,
    pub hash_rx: watch::Receiver<String>,
    pub trigger: SweepTrigger,
    pub config: Arc<ConfigResponse>,
}

/// Effective configuration as served at the config endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ConfigResponse {
    pub settings: CheckSettings,
    pub services: Vec<ServiceDefinition>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(STATUS_PATH, get(get_status))
        .route(STATUS_HASH_PATH, get(get_hash))
        .route(&format!("{}/:name", STATUS_PATH), get(get_service))
        .route(CONFIG_PATH, get(get_config))
        .route(CHECK_PATH, post(request_check))
        .with_state(state)
}

async fn get_status(State(state): State<AppState>) -> Json<SweepSnapshot> {
    Json(state.publisher.snapshot())
}

async fn get_hash(State(state): State<AppState>) -> String {
    state.hash_rx.borrow().clone()
}

async fn get_service(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ServiceStatus>, StatusCode> {
    state
        .publisher
        .service(&name)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn get_config(State(state): State<AppState>) -> Json<ConfigResponse> {
    Json(state.config.as_ref().clone())
}

async fn request_check(State(state): State<AppState>) -> StatusCode {
    if state.trigger.request() {
        StatusCode::ACCEPTED
    } else {
        tracing::error!("Check requested but the scheduler has stopped");
        StatusCode::SERVICE_UNAVAILABLE
    }
}
