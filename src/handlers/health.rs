use axum::{extract::State, response::Json};
use serde_json::json;

use crate::{errors::Result, handlers::AppState, store::LedgerStore};

pub async fn liveness() -> Result<Json<serde_json::Value>> {
    Ok(Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

pub async fn readiness(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let store_status = match state.store.ping().await {
        Ok(()) => "healthy",
        Err(_) => "unhealthy",
    };

    let overall_status = if store_status == "healthy" {
        "ready"
    } else {
        "not_ready"
    };

    Ok(Json(json!({
        "status": overall_status,
        "checks": {
            "store": store_status
        },
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}
