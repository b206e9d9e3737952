//! REST API endpoints for the hydroleaf-service.
//!
//! The router is a thin layer over [`hydroleaf_core::Telemetry`]: handlers
//! translate JSON bodies and query strings into facade calls and map
//! [`hydroleaf_core::Error`] onto HTTP status codes.
//!
//! ## Error Handling
//!
//! All endpoints return structured JSON errors via [`AppError`]. Validation
//! failures return 400, unknown devices 404 and storage failures 500.
//!
//! # Example
//!
//! ```ignore
//! use hydroleaf_service::api;
//!
//! let app = api::router().with_state(state);
//! ```

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::error;

use hydroleaf_core::{
    AggregatedHistory, BucketWidth, Device, FlushStatsSnapshot, HistoryQuery, LatestAverage,
    LatestSensorValue, RollupQuery, SensorReading, SensorRollup, TelemetryMessage, parse_instant,
};
use hydroleaf_types::from_unix_millis;

use crate::state::AppState;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        // Health and status
        .route("/api/health", get(health))
        .route("/api/status", get(get_status))
        .route(
            "/api/status/{system}/{layer}/{sensor_type}/average",
            get(get_layer_average),
        )
        // Ingestion
        .route("/api/readings", post(post_readings))
        // Devices
        .route("/api/devices", get(list_devices))
        .route("/api/devices/{id}", get(get_device))
        .route("/api/devices/{id}/latest", get(get_latest))
        .route("/api/devices/{id}/rollups", get(get_rollups))
        // History
        .route("/api/history/aggregated", get(get_aggregated_history))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Health check endpoint.
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// Service status response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub uptime_seconds: i64,
    pub flush_interval_secs: u64,
    /// (device, sensor type) keys waiting for the next flush.
    pub pending_entries: usize,
    /// Rollup rows persisted so far.
    pub stored_rollups: u64,
    pub flush: FlushStatsSnapshot,
}

async fn get_status(State(state): State<Arc<AppState>>) -> Result<Json<StatusResponse>, AppError> {
    let stored_rollups = state.telemetry.rollup_count().await?;
    let now = OffsetDateTime::now_utc();
    Ok(Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        started_at: state.started_at,
        uptime_seconds: (now - state.started_at).whole_seconds().max(0),
        flush_interval_secs: state.config.ingest.flush_interval_secs,
        pending_entries: state.telemetry.accumulator().pending(),
        stored_rollups,
        flush: state.flush_stats.snapshot(),
    }))
}

/// Live average of the latest values in one system layer.
async fn get_layer_average(
    State(state): State<Arc<AppState>>,
    Path((system, layer, sensor_type)): Path<(String, String, String)>,
) -> Result<Json<LatestAverage>, AppError> {
    let sensor_type = validate_sensor_type(&sensor_type)?;
    Ok(Json(
        state
            .telemetry
            .latest_average(&system, &layer, &sensor_type)
            .await?,
    ))
}

/// Maximum length of a sensor type accepted in query parameters.
const MAX_SENSOR_TYPE_LEN: usize = 32;

/// Trim a sensor type and check it is 1-32 ASCII letters, digits, `_` or `-`.
fn validate_sensor_type(raw: &str) -> Result<String, AppError> {
    let trimmed = raw.trim();
    let valid = (1..=MAX_SENSOR_TYPE_LEN).contains(&trimmed.len())
        && trimmed
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(trimmed.to_string())
    } else {
        Err(AppError::BadRequest(format!("Invalid sensorType '{}'", raw)))
    }
}

/// Timestamp as RFC 3339 text or epoch milliseconds.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum TimestampInput {
    Millis(i64),
    Text(String),
}

impl TimestampInput {
    fn resolve(&self) -> Result<OffsetDateTime, AppError> {
        let parsed = match self {
            TimestampInput::Millis(ms) => from_unix_millis(*ms),
            TimestampInput::Text(raw) => parse_instant(raw),
        };
        parsed.map_err(|e| AppError::BadRequest(e.to_string()))
    }
}

/// One sensor value in a [`ReadingsRequest`].
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorInput {
    pub sensor_type: String,
    pub value: f64,
    #[serde(default)]
    pub unit: Option<String>,
}

/// Body of `POST /api/readings`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingsRequest {
    pub composite_id: String,
    /// Defaults to the time of receipt.
    #[serde(default)]
    pub timestamp: Option<TimestampInput>,
    #[serde(default)]
    pub group: Option<String>,
    /// May be empty; the device is still registered.
    #[serde(default)]
    pub sensors: Vec<SensorInput>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingsResponse {
    pub composite_id: String,
    pub recorded: usize,
}

async fn post_readings(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ReadingsRequest>,
) -> Result<(StatusCode, Json<ReadingsResponse>), AppError> {
    let timestamp = match &request.timestamp {
        Some(ts) => ts.resolve()?,
        None => OffsetDateTime::now_utc(),
    };

    let message = TelemetryMessage {
        composite_id: request.composite_id,
        group: request.group.filter(|g| !g.trim().is_empty()),
        timestamp,
        readings: request
            .sensors
            .into_iter()
            .map(|s| SensorReading {
                sensor_type: s.sensor_type,
                value: s.value,
                unit: s.unit,
            })
            .collect(),
    };

    let recorded = state.telemetry.record_message(&message).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(ReadingsResponse {
            composite_id: message.composite_id,
            recorded,
        }),
    ))
}

async fn get_device(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Device>, AppError> {
    state
        .telemetry
        .device(&id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Unknown device: {}", id)))
}

async fn list_devices(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Device>>, AppError> {
    Ok(Json(state.telemetry.devices().await?))
}

async fn get_latest(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<LatestSensorValue>>, AppError> {
    Ok(Json(state.telemetry.latest_values(&id).await?))
}

/// Query parameters for `GET /api/devices/{id}/rollups`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupParams {
    pub since: Option<String>,
    pub until: Option<String>,
    pub sensor_type: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    /// Return the most recent rollups first.
    #[serde(default)]
    pub newest: bool,
}

impl RollupParams {
    fn into_query(self) -> Result<RollupQuery, AppError> {
        let since = self
            .since
            .as_deref()
            .map(parse_instant)
            .transpose()
            .map_err(hydroleaf_core::Error::from)?;
        let until = self
            .until
            .as_deref()
            .map(parse_instant)
            .transpose()
            .map_err(hydroleaf_core::Error::from)?;

        if let (Some(since), Some(until)) = (since, until)
            && since > until
        {
            return Err(AppError::BadRequest(format!(
                "Invalid time range: 'since' ({}) must not be after 'until' ({})",
                since, until
            )));
        }

        let mut query = RollupQuery::new();
        if let Some(since) = since {
            query = query.since(since);
        }
        if let Some(until) = until {
            query = query.until(until);
        }
        if let Some(raw) = self.sensor_type.as_deref() {
            query = query.sensor_type(&validate_sensor_type(raw)?);
        }
        if let Some(limit) = self.limit {
            query = query.limit(limit);
        }
        if let Some(offset) = self.offset {
            query = query.offset(offset);
        }
        if self.newest {
            query = query.newest_first();
        }
        Ok(query)
    }
}

async fn get_rollups(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<RollupParams>,
) -> Result<Json<Vec<SensorRollup>>, AppError> {
    let query = params.into_query()?;
    Ok(Json(state.telemetry.rollups(&id, query).await?))
}

/// Query parameters for `GET /api/history/aggregated`.
///
/// `sensorType` may be repeated and each occurrence may hold a
/// comma-separated list, so the struct is filled from raw pairs.
#[derive(Debug, Default)]
pub struct HistoryParams {
    pub composite_id: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    /// Bucket width such as `5m`; the configured default if absent.
    pub bucket: Option<String>,
    /// Validated, trimmed sensor types. Empty means all.
    pub sensor_types: Vec<String>,
    pub bucket_limit: Option<usize>,
    pub bucket_offset: Option<usize>,
    pub sensor_limit: Option<usize>,
    pub sensor_offset: Option<usize>,
}

impl HistoryParams {
    /// Collect parameters from decoded query pairs. Unknown keys are ignored.
    pub fn from_pairs(pairs: Vec<(String, String)>) -> Result<Self, AppError> {
        let mut params = Self::default();
        for (key, value) in pairs {
            match key.as_str() {
                "compositeId" => params.composite_id = Some(value),
                "from" => params.from = Some(value),
                "to" => params.to = Some(value),
                "bucket" => params.bucket = Some(value),
                "sensorType" if value.trim().is_empty() => {}
                "sensorType" => {
                    for raw in value.split(',') {
                        params.sensor_types.push(validate_sensor_type(raw)?);
                    }
                }
                "bucketLimit" => params.bucket_limit = Some(parse_count(&key, &value)?),
                "bucketOffset" => params.bucket_offset = Some(parse_count(&key, &value)?),
                "sensorLimit" => params.sensor_limit = Some(parse_count(&key, &value)?),
                "sensorOffset" => params.sensor_offset = Some(parse_count(&key, &value)?),
                _ => {}
            }
        }
        Ok(params)
    }

    fn into_query(self, default_bucket: BucketWidth) -> Result<HistoryQuery, AppError> {
        let composite_id = self
            .composite_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| AppError::BadRequest("compositeId is required".to_string()))?;

        let bucket = match self.bucket.as_deref() {
            Some(raw) => BucketWidth::parse(raw).map_err(hydroleaf_core::Error::from)?,
            None => default_bucket,
        };

        let mut query = HistoryQuery::new(&composite_id).bucket(bucket);
        if let Some(raw) = self.from.as_deref() {
            query = query.from(parse_instant(raw).map_err(hydroleaf_core::Error::from)?);
        }
        if let Some(raw) = self.to.as_deref() {
            query = query.to(parse_instant(raw).map_err(hydroleaf_core::Error::from)?);
        }
        if !self.sensor_types.is_empty() {
            query = query.sensor_types(self.sensor_types);
        }
        if let Some(limit) = self.bucket_limit {
            query = query.bucket_limit(limit);
        }
        if let Some(offset) = self.bucket_offset {
            query = query.bucket_offset(offset);
        }
        if let Some(limit) = self.sensor_limit {
            query = query.sensor_limit(limit);
        }
        if let Some(offset) = self.sensor_offset {
            query = query.sensor_offset(offset);
        }

        Ok(query)
    }
}

fn parse_count(key: &str, value: &str) -> Result<usize, AppError> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid {} '{}'", key, value)))
}

async fn get_aggregated_history(
    State(state): State<Arc<AppState>>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Result<Json<AggregatedHistory>, AppError> {
    let query = HistoryParams::from_pairs(pairs)?
        .into_query(state.config.history.default_bucket())?;
    Ok(Json(state.telemetry.query_aggregated_history(&query).await?))
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Telemetry(hydroleaf_core::Error),
}

impl From<hydroleaf_core::Error> for AppError {
    fn from(e: hydroleaf_core::Error) -> Self {
        AppError::Telemetry(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        use hydroleaf_core::Error;

        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Telemetry(e @ Error::UnknownDevice(_)) => {
                (StatusCode::NOT_FOUND, e.to_string())
            }
            AppError::Telemetry(e) if e.is_client_error() => {
                (StatusCode::BAD_REQUEST, e.to_string())
            }
            AppError::Telemetry(e) => {
                error!("Request failed: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}
