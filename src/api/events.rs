//! Recent action events, oldest first.

use crate::api::AppState;
use crate::engine::ActionEvent;
use crate::error::AppError;
use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 512;

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
    /// Only events with this name, e.g. `dca.add`.
    pub event: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub events: Vec<ActionEvent>,
}

pub async fn get_events(
    Query(params): Query<EventsQuery>,
    State(state): State<AppState>,
) -> Result<Json<EventsResponse>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    if limit == 0 || limit > MAX_LIMIT {
        return Err(AppError::BadRequest(format!(
            "limit must be between 1 and {}",
            MAX_LIMIT
        )));
    }
    let events = match params.event.as_deref() {
        Some(name) => {
            let mut matching: Vec<ActionEvent> = state
                .events
                .recent(MAX_LIMIT)
                .into_iter()
                .filter(|e| e.event == name)
                .collect();
            let skip = matching.len().saturating_sub(limit);
            matching.drain(..skip);
            matching
        }
        None => state.events.recent(limit),
    };
    Ok(Json(EventsResponse { events }))
}
