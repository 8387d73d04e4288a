use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::alerts::{Alert, AlertRecord, AlertStatus, AlertTracker};
use crate::config::{AppConfig, MonitorConfig};
use crate::monitors::MonitorKind;
use crate::store::{hours_ago, AlertStore, HistoryFilter};

const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Application state shared across handlers
pub struct AppState {
    pub tracker: Arc<AlertTracker>,
    pub store: Arc<dyn AlertStore>,
    /// Live configuration, replaced on reload
    pub config: Arc<RwLock<AppConfig>>,
    pub hostname: String,
    pub started_at: DateTime<Utc>,
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub hostname: String,
    pub uptime_secs: i64,
    pub active_alerts: usize,
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        hostname: state.hostname.clone(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        active_alerts: state.tracker.active().len(),
    })
}

// ============================================================================
// Alerts
// ============================================================================

#[derive(Serialize)]
pub struct AlertsResponse {
    pub active: Vec<Alert>,
    pub pending: Vec<Alert>,
}

pub async fn active_alerts(State(state): State<Arc<AppState>>) -> Json<AlertsResponse> {
    Json(AlertsResponse {
        active: state.tracker.active(),
        pending: state.tracker.pending(),
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub status: Option<String>,
    pub monitor: Option<String>,
    pub since_hours: Option<i64>,
    pub limit: Option<usize>,
}

impl HistoryQuery {
    fn into_filter(self, now: DateTime<Utc>) -> Result<HistoryFilter, ApiError> {
        let mut filter = HistoryFilter::all().limit(self.limit.unwrap_or(DEFAULT_HISTORY_LIMIT));

        if let Some(status) = self.status {
            filter = filter.with_status(status.parse::<AlertStatus>().map_err(ApiError::BadRequest)?);
        }
        if let Some(monitor) = self.monitor {
            filter = filter.with_monitor(monitor.parse::<MonitorKind>().map_err(ApiError::BadRequest)?);
        }
        if let Some(hours) = self.since_hours {
            let since = hours_ago(now, hours).ok_or_else(|| {
                ApiError::BadRequest(format!("since_hours out of range: {}", hours))
            })?;
            filter = filter.since(since);
        }

        Ok(filter)
    }
}

pub async fn alert_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<AlertRecord>>, ApiError> {
    let filter = query.into_filter(Utc::now())?;
    let store = Arc::clone(&state.store);

    let records = tokio::task::spawn_blocking(move || store.list(&filter))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(records))
}

// ============================================================================
// Monitors
// ============================================================================

pub async fn list_monitors(State(state): State<Arc<AppState>>) -> Json<Vec<MonitorConfig>> {
    Json(state.config.read().monitors.clone())
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "API request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
