use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::alerts::{AlarmState, AlertPipeline, EvaluationResult, Subscriber, DEFAULT_SCOPE};
use crate::config::{
    normalize_rules, ConfigError, ConfigStore, NotificationPreferences, PreferencesInput,
    ThresholdRule, ThresholdRuleInput, ValidationError,
};
use crate::data::MetricReading;
use crate::ingest::{self, ProcessError};
use crate::storage::{NotificationLog, NotificationRecord, ReadingStore, SubscriberStore};

/// Application state shared across handlers
pub struct AppState {
    pub config: Arc<ConfigStore>,
    pub pipeline: Arc<AlertPipeline>,
    pub readings: Arc<ReadingStore>,
    pub notifications: Arc<NotificationLog>,
    pub subscribers: Arc<SubscriberStore>,
}

fn default_scope() -> String {
    DEFAULT_SCOPE.to_string()
}

#[derive(Debug, Deserialize)]
pub struct ScopeQuery {
    #[serde(default = "default_scope")]
    pub scope: String,
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Thresholds
// ============================================================================

#[derive(Serialize)]
pub struct ThresholdsResponse {
    pub scope: String,
    pub revision: u64,
    pub rules: Vec<ThresholdRule>,
}

#[derive(Deserialize)]
pub struct ThresholdsRequest {
    pub rules: Vec<ThresholdRuleInput>,
}

pub async fn get_thresholds(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScopeQuery>,
) -> Json<ThresholdsResponse> {
    let config = state.config.scope(&query.scope);
    Json(ThresholdsResponse {
        scope: query.scope,
        revision: config.rules_revision,
        rules: config.rules,
    })
}

pub async fn set_thresholds(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScopeQuery>,
    Json(request): Json<ThresholdsRequest>,
) -> Result<Json<ThresholdsResponse>, ApiError> {
    let rules = normalize_rules(&request.rules, state.config.catalog())?;
    let rule_set = state.config.set_rules(&query.scope, rules)?;
    state.pipeline.reload(&query.scope).await?;

    Ok(Json(ThresholdsResponse {
        scope: query.scope,
        revision: rule_set.revision,
        rules: rule_set.rules,
    }))
}

// ============================================================================
// Preferences
// ============================================================================

#[derive(Serialize)]
pub struct PreferencesResponse {
    pub scope: String,
    #[serde(flatten)]
    pub preferences: NotificationPreferences,
}

pub async fn get_preferences(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScopeQuery>,
) -> Json<PreferencesResponse> {
    let preferences = state.config.scope(&query.scope).preferences;
    Json(PreferencesResponse {
        scope: query.scope,
        preferences,
    })
}

pub async fn set_preferences(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScopeQuery>,
    Json(request): Json<PreferencesInput>,
) -> Result<Json<PreferencesResponse>, ApiError> {
    let preferences = request.normalize()?;
    let preferences = state.config.set_preferences(&query.scope, preferences)?;

    Ok(Json(PreferencesResponse {
        scope: query.scope,
        preferences,
    }))
}

// ============================================================================
// Readings
// ============================================================================

pub async fn latest_reading(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScopeQuery>,
) -> Response {
    match state.readings.latest(&query.scope) {
        Some(reading) => Json(reading).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

#[derive(Serialize)]
pub struct ReadingOutcome {
    pub scope: String,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub result: EvaluationResult,
}

#[derive(Serialize)]
#[serde(untagged)]
pub enum IngestResponse {
    Single(ReadingOutcome),
    Batch { results: Vec<ReadingOutcome> },
}

/// Evaluate readings synchronously, in payload order
pub async fn post_readings(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScopeQuery>,
    Json(payload): Json<serde_json::Value>,
) -> Result<Json<IngestResponse>, ApiError> {
    let is_batch = payload.get("readings").is_some();
    let readings = ingest::parse_value(
        &payload,
        &query.scope,
        state.config.catalog(),
        Utc::now(),
    )?;

    let mut results = Vec::with_capacity(readings.len());
    for scoped in readings {
        let timestamp = scoped.reading.timestamp;
        let result = state.pipeline.process(&scoped.scope, scoped.reading).await?;
        results.push(ReadingOutcome {
            scope: scoped.scope,
            timestamp,
            result,
        });
    }

    if !is_batch {
        if let Some(outcome) = results.pop() {
            return Ok(Json(IngestResponse::Single(outcome)));
        }
    }
    Ok(Json(IngestResponse::Batch { results }))
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Serialize)]
pub struct HistoryResponse {
    pub scope: String,
    pub readings: Vec<MetricReading>,
}

pub async fn reading_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Json<HistoryResponse> {
    let limit = query.limit.unwrap_or(50).min(1000);
    Json(HistoryResponse {
        readings: state.readings.recent(&query.scope, limit),
        scope: query.scope,
    })
}

// ============================================================================
// Alarms and notifications
// ============================================================================

#[derive(Serialize)]
pub struct AlarmInfo {
    pub metric_id: String,
    #[serde(flatten)]
    pub state: AlarmState,
}

#[derive(Serialize)]
pub struct AlarmsResponse {
    pub scope: String,
    pub alarms: Vec<AlarmInfo>,
}

pub async fn list_alarms(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ScopeQuery>,
) -> Json<AlarmsResponse> {
    let alarms = state
        .pipeline
        .alarm_states(&query.scope)
        .await
        .into_iter()
        .map(|(metric_id, state)| AlarmInfo { metric_id, state })
        .collect();

    Json(AlarmsResponse {
        scope: query.scope,
        alarms,
    })
}

#[derive(Serialize)]
pub struct NotificationsResponse {
    pub scope: String,
    pub notifications: Vec<NotificationRecord>,
}

pub async fn list_notifications(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Json<NotificationsResponse> {
    let limit = query.limit.unwrap_or(50).min(1000);
    Json(NotificationsResponse {
        notifications: state.notifications.list(Some(query.scope.as_str()), limit),
        scope: query.scope,
    })
}

// ============================================================================
// Subscribers
// ============================================================================

#[derive(Serialize)]
pub struct SubscribersResponse {
    pub subscribers: Vec<Subscriber>,
}

pub async fn list_subscribers(State(state): State<Arc<AppState>>) -> Json<SubscribersResponse> {
    Json(SubscribersResponse {
        subscribers: state.subscribers.list(),
    })
}

#[derive(Serialize)]
pub struct UpsertSubscriberResponse {
    pub subscriber: Subscriber,
    pub replaced: bool,
}

pub async fn upsert_subscriber(
    State(state): State<Arc<AppState>>,
    Json(mut subscriber): Json<Subscriber>,
) -> Result<Json<UpsertSubscriberResponse>, ApiError> {
    subscriber.id = subscriber.id.trim().to_string();
    if subscriber.id.is_empty() {
        return Err(ApiError::BadRequest("subscriber id must not be empty".to_string()));
    }

    let replaced = state.subscribers.upsert(subscriber.clone()).is_some();
    tracing::info!(subscriber = %subscriber.id, replaced, "Subscriber saved");

    Ok(Json(UpsertSubscriberResponse {
        subscriber,
        replaced,
    }))
}

pub async fn delete_subscriber(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .subscribers
        .remove(&id)
        .ok_or_else(|| ApiError::NotFound(format!("Subscriber '{}' not found", id)))?;

    Ok(Json(serde_json::json!({ "deleted": id })))
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        tracing::error!(error = %err, "Configuration failure");
        ApiError::Internal(err.to_string())
    }
}

impl From<ProcessError> for ApiError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::Parse(msg) => ApiError::BadRequest(msg),
            ProcessError::Closed => ApiError::Internal("alert pipeline closed".to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
