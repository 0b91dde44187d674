//! HTTP routes and router assembly

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use switchboard_telephony::DisconnectCause;

use crate::state::AppState;
use crate::websocket;

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    let cors_enabled = state.config.read().server.cors_enabled;

    let mut router = Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .route("/voice/status", post(voice_status))
        .route("/media-stream", get(websocket::media_stream))
        .with_state(state);

    if cors_enabled {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router.layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "service": "switchboard" }))
}

async fn ready(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "active_sessions": state.sessions.count(),
    }))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics disabled".to_string()),
    }
}

/// Provider status callback
#[derive(Debug, Deserialize)]
pub struct StatusCallback {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "CallStatus")]
    pub call_status: String,
}

/// Map the provider's end-of-call status onto the recovery path. For calls
/// whose WebSocket already closed this is a no-op.
async fn voice_status(
    State(state): State<AppState>,
    Form(callback): Form<StatusCallback>,
) -> impl IntoResponse {
    let cause = DisconnectCause::from_provider_status(&callback.call_status);
    tracing::info!(
        call_sid = %callback.call_sid,
        status = %callback.call_status,
        cause = %cause,
        "Provider status callback"
    );

    if cause == DisconnectCause::NormalEnd {
        state.recovery.handle_normal_end(&callback.call_sid).await;
    } else if let Err(e) = state.recovery.handle_disconnect(&callback.call_sid, cause).await {
        tracing::error!(error = %e, call_sid = %callback.call_sid, "Status-callback recovery failed");
    }

    (StatusCode::OK, "OK")
}
