pub mod events;
pub mod health;
pub mod status;

use crate::engine::EventLog;
use crate::orchestration::StatusHandle;
use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub status: StatusHandle,
    pub events: EventLog,
}

impl AppState {
    pub fn new(status: StatusHandle, events: EventLog) -> Self {
        Self { status, events }
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/v1/status", get(status::get_status))
        .route("/v1/events", get(events::get_events))
        .layer(cors)
        .with_state(state)
}
