use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

use appointment_cell::router::{appointment_routes, AppointmentCellState};
use shared_config::AppConfig;

pub fn create_router(config: Arc<AppConfig>) -> Router {
    Router::new()
        .route("/", get(|| async { "Clinic scheduling API is running!" }))
        .route("/health", get(health))
        .nest("/appointments", appointment_routes(AppointmentCellState::new(config)))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
