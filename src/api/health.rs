use crate::api::AppState;
use crate::error::AppError;
use axum::extract::State;
use axum::Json;

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Ready once the control loop has completed a tick.
pub async fn ready(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    if !state.status.is_ready() {
        return Err(AppError::NotReady("control loop has not ticked yet".into()));
    }
    Ok(Json(serde_json::json!({"status": "ready"})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EventLog;
    use crate::orchestration::StatusHandle;

    #[tokio::test]
    async fn test_health_returns_ok() {
        let Json(body) = health().await;
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_ready_follows_status() {
        let state = AppState::new(StatusHandle::new(), EventLog::default());
        assert!(ready(State(state.clone())).await.is_err());

        state.status.update(|s| s.ready = true);
        let Json(body) = ready(State(state)).await.unwrap();
        assert_eq!(body["status"], "ready");
    }
}
