use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::{json, Value};

use crate::config::SERVICE_NAME;
use crate::utils::date::to_iso_string;
use crate::AppState;

/// `GET /health`: 200 while the store answers, 503 `degraded` otherwise.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let connected = state.store.ping().await;
    let (status, label) = if connected {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    let body = json!({
        "service": SERVICE_NAME,
        "status": label,
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": to_iso_string(&chrono::Utc::now()),
        "database": if connected { "connected" } else { "disconnected" },
        "features": {
            "user_crud": "enabled",
            "event_publishing": "enabled",
            "service_communication": "enabled",
        },
    });

    (status, Json(body))
}
