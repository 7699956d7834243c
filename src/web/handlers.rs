//! HTTP request handlers. Translation only; the logic lives in the control
//! surface and the query layer.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::db::query;

use super::AppState;

pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.health())
}

// --- Monitors ---

pub async fn handle_list_monitors(State(state): State<AppState>) -> impl IntoResponse {
    match state.control.list_monitors() {
        Ok(monitors) => Json(monitors).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_get_monitor(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.control.get_monitor(id) {
        Ok(detail) => Json(detail).into_response(),
        Err(_) => (StatusCode::NOT_FOUND, "Monitor not found").into_response(),
    }
}

pub async fn handle_create_monitor(
    State(state): State<AppState>,
    Json(data): Json<Value>,
) -> impl IntoResponse {
    let resp = state.control.create_monitor(&data);
    if resp.ok {
        (StatusCode::CREATED, Json(resp)).into_response()
    } else {
        (StatusCode::BAD_REQUEST, Json(resp)).into_response()
    }
}

pub async fn handle_edit_monitor(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(mut data): Json<Value>,
) -> impl IntoResponse {
    if let Some(obj) = data.as_object_mut() {
        obj.insert("id".to_string(), json!(id));
    }
    let resp = state.control.edit_monitor(&data);
    if resp.ok {
        Json(resp).into_response()
    } else {
        (StatusCode::BAD_REQUEST, Json(resp)).into_response()
    }
}

pub async fn handle_delete_monitor(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let resp = state.control.delete_monitor(id);
    if resp.ok {
        Json(resp).into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(resp)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct TogglePayload {
    #[serde(default)]
    active: i64,
}

pub async fn handle_toggle_monitor(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<TogglePayload>,
) -> impl IntoResponse {
    let resp = state.control.toggle_active(id, payload.active);
    if resp.ok {
        Json(resp).into_response()
    } else {
        (StatusCode::BAD_REQUEST, Json(resp)).into_response()
    }
}

pub async fn handle_monitor_stats(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    Json(query::monitor_stats(&state.store, &state.retention, id))
}

#[derive(Debug, Deserialize)]
pub struct ChartQuery {
    #[serde(default)]
    view: Option<String>,
}

pub async fn handle_chart(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(q): Query<ChartQuery>,
) -> impl IntoResponse {
    let view = q.view.unwrap_or_else(|| "24h".to_string());
    let data = query::chart_data(&state.store, id, &view);
    Json(json!({ "view": view, "data": data }))
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    #[serde(default)]
    hours: Option<i64>,
}

pub async fn handle_heartbeats(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(q): Query<RangeQuery>,
) -> impl IntoResponse {
    let hours = q.hours.unwrap_or(24).max(1);
    let (data, tier) = query::heartbeats_with_range(&state.store, &state.retention, id, hours);
    Json(json!({ "data": data, "dataType": tier, "hours": hours }))
}

pub async fn handle_clear_events(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let resp = state.control.clear_events(id);
    if resp.ok {
        Json(resp).into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, Json(resp)).into_response()
    }
}

pub async fn handle_test_monitor(
    State(state): State<AppState>,
    Json(data): Json<Value>,
) -> impl IntoResponse {
    Json(state.control.test_monitor(&data).await)
}

pub async fn handle_export(State(state): State<AppState>) -> impl IntoResponse {
    match state.control.export_monitors() {
        Ok(list) => Json(list).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_import(
    State(state): State<AppState>,
    Json(data): Json<Value>,
) -> impl IntoResponse {
    let resp = state.control.import_monitors(&data);
    if resp.ok {
        Json(resp).into_response()
    } else {
        (StatusCode::BAD_REQUEST, Json(resp)).into_response()
    }
}

pub async fn handle_force_aggregation(State(state): State<AppState>) -> impl IntoResponse {
    state.control.force_aggregation();
    Json(json!({ "ok": true }))
}

// --- Notification rules ---

pub async fn handle_list_notifications(State(state): State<AppState>) -> impl IntoResponse {
    match state.control.list_notifications() {
        Ok(rules) => Json(rules).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_add_notification(
    State(state): State<AppState>,
    Json(data): Json<Value>,
) -> impl IntoResponse {
    let resp = state.control.add_notification(&data);
    if resp.ok {
        (StatusCode::CREATED, Json(resp)).into_response()
    } else {
        (StatusCode::BAD_REQUEST, Json(resp)).into_response()
    }
}

pub async fn handle_edit_notification(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(mut data): Json<Value>,
) -> impl IntoResponse {
    if let Some(obj) = data.as_object_mut() {
        obj.insert("id".to_string(), json!(id));
    }
    let resp = state.control.edit_notification(&data);
    if resp.ok {
        Json(resp).into_response()
    } else {
        (StatusCode::BAD_REQUEST, Json(resp)).into_response()
    }
}

pub async fn handle_delete_notification(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    Json(state.control.delete_notification(id))
}

pub async fn handle_toggle_notification(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let resp = state.control.toggle_notification(id);
    if resp.ok {
        Json(resp).into_response()
    } else {
        (StatusCode::NOT_FOUND, Json(resp)).into_response()
    }
}

pub async fn handle_test_notification(
    State(state): State<AppState>,
    Json(data): Json<Value>,
) -> impl IntoResponse {
    Json(state.control.test_notification(&data).await)
}
