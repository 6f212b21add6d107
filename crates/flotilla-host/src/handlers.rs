//! Status API handlers. All read-only.
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    Json,
};
use flotilla_core::{ConfigError, FLOTILLA_VERSION};
use serde_json::{json, Value};

fn unknown_engine(label: String) -> (StatusCode, Json<Value>) {
    let err = ConfigError::UnknownEngine { label };
    (StatusCode::NOT_FOUND, Json(json!({ "error": err.to_string() })))
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let group = state.group.lock().await;
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "version": FLOTILLA_VERSION,
            "live_engines": group.live_labels().len(),
        })),
    )
}

pub async fn list_engines(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let group = state.group.lock().await;
    (
        StatusCode::OK,
        Json(json!({ "engines": group.summaries() })),
    )
}

pub async fn get_engine(
    State(state): State<AppState>,
    Path(label): Path<String>,
) -> (StatusCode, Json<Value>) {
    let group = state.group.lock().await;
    match group.snapshot(&label) {
        Some(summary) => (StatusCode::OK, Json(json!(summary))),
        None => unknown_engine(label),
    }
}

pub async fn engine_routes(
    State(state): State<AppState>,
    Path(label): Path<String>,
) -> (StatusCode, Json<Value>) {
    let group = state.group.lock().await;
    match group.get(&label) {
        Some(ctx) => (
            StatusCode::OK,
            Json(json!({
                "engine": label,
                "routes": ctx.module_context().pages().describe(),
            })),
        ),
        None => unknown_engine(label),
    }
}

/// Init report of the main engine
pub async fn init_report(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let group = state.group.lock().await;
    match group.get(&state.main_label) {
        Some(ctx) => (StatusCode::OK, Json(json!(ctx.init_report()))),
        None => unknown_engine(state.main_label.to_string()),
    }
}

pub async fn metrics(State(state): State<AppState>) -> (StatusCode, [(header::HeaderName, &'static str); 1], String) {
    let content_type = [(header::CONTENT_TYPE, "text/plain; version=0.0.4")];
    {
        let group = state.group.lock().await;
        state.metrics.observe(&group);
    }
    match state.metrics.encode() {
        Ok(body) => (StatusCode::OK, content_type, body),
        Err(e) => {
            tracing::error!(error = %e, "metrics encoding failed");
            (StatusCode::INTERNAL_SERVER_ERROR, content_type, e.to_string())
        }
    }
}
