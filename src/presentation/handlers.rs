// HTTP request handlers
use crate::domain::monitoring::{
    ChartSeries, Credentials, DeviceSnapshot, HistoryEntry, IncomingReading, LatestValues,
    StoredReading, WaterBodyLocation,
};
use crate::infrastructure::http_response::{ApiError, ApiResult};
use crate::presentation::app_state::AppState;
use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Deserialize)]
pub struct ChartQuery {
    pub date: String,
}

#[derive(Serialize)]
pub struct DeviceRef {
    pub id: String,
}

#[derive(Serialize)]
pub struct IngestResponse {
    pub status: &'static str,
    pub id: i64,
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

pub async fn root() -> Json<Value> {
    Json(json!({ "message": "Water quality collector" }))
}

/// Store one reading or error record
pub async fn ingest(
    State(state): State<Arc<AppState>>,
    Json(reading): Json<IncomingReading>,
) -> ApiResult<Json<IngestResponse>> {
    let id = state.monitoring_service.ingest(reading).await?;
    Ok(Json(IngestResponse { status: "saved", id }))
}

pub async fn list_data(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<StoredReading>>> {
    Ok(Json(state.monitoring_service.all_readings().await?))
}

pub async fn latest_per_device(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<StoredReading>>> {
    Ok(Json(state.monitoring_service.latest_per_device().await?))
}

pub async fn list_devices(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<DeviceRef>>> {
    let ids = state.monitoring_service.device_ids().await?;
    Ok(Json(ids.into_iter().map(|id| DeviceRef { id }).collect()))
}

pub async fn global_latest(State(state): State<Arc<AppState>>) -> ApiResult<Json<LatestValues>> {
    state
        .monitoring_service
        .global_latest()
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("No monitoring data found".to_string()))
}

pub async fn device_latest(
    Path(device_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<DeviceSnapshot>> {
    state
        .monitoring_service
        .latest_for_device(&device_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Not Found".to_string()))
}

pub async fn device_chart(
    Path(device_id): Path<String>,
    Query(query): Query<ChartQuery>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<ChartSeries>> {
    let date = NaiveDate::parse_from_str(&query.date, "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("invalid date {:?}, expected YYYY-MM-DD", query.date)))?;
    Ok(Json(state.monitoring_service.chart(&device_id, date).await?))
}

pub async fn device_history(
    Path(device_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<HistoryEntry>>> {
    Ok(Json(state.monitoring_service.history(&device_id).await?))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(credentials): Json<Credentials>,
) -> ApiResult<Json<Value>> {
    if state.monitoring_service.login(&credentials).await? {
        Ok(Json(json!({ "username": credentials.username })))
    } else {
        tracing::info!(username = %credentials.username, "Rejected login");
        Err(ApiError::Unauthorized("Invalid username or password".to_string()))
    }
}

pub async fn set_location(
    Query(location): Query<WaterBodyLocation>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<WaterBodyLocation>> {
    Ok(Json(state.monitoring_service.set_location(location).await?))
}

/// An unset location is a normal answer, not a 404.
pub async fn get_location(
    Path(device_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Response> {
    Ok(match state.monitoring_service.location(&device_id).await? {
        Some(location) => Json(location).into_response(),
        None => Json(json!({ "detail": "Location not set" })).into_response(),
    })
}

pub async fn list_locations(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<WaterBodyLocation>>> {
    Ok(Json(state.monitoring_service.locations().await?))
}
