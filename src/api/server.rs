use axum::{routing::get, Router};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use super::handlers::{active_alerts, alert_history, health_check, list_monitors, AppState};

/// Build the status API router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/alerts", get(active_alerts))
        .route("/alerts/history", get(alert_history))
        .route("/monitors", get(list_monitors))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the status API until `shutdown` resolves
pub async fn run_server<F>(addr: SocketAddr, state: Arc<AppState>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Status API listening on {}", listener.local_addr()?);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    tracing::info!("Status API stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use parking_lot::RwLock;
    use tower::util::ServiceExt;

    use crate::alerts::{AlertRecord, AlertStatus, AlertTracker};
    use crate::config::AppConfig;
    use crate::monitors::{MonitorKind, Sample};
    use crate::store::testing::{at, record};
    use crate::store::{AlertStore, SqliteAlertStore};

    fn create_test_app() -> (Router, Arc<AppState>) {
        let config = AppConfig::default();
        let store = Arc::new(SqliteAlertStore::open_in_memory().unwrap());
        store
            .save(&record(MonitorKind::Cpu, AlertStatus::Active, at(0)))
            .unwrap();
        store
            .save(&record(MonitorKind::Disk, AlertStatus::Resolved, at(60)))
            .unwrap();

        let state = Arc::new(AppState {
            tracker: Arc::new(AlertTracker::new(&config.monitors)),
            store,
            config: Arc::new(RwLock::new(config)),
            hostname: "test-host".to_string(),
            started_at: Utc::now(),
        });
        (build_router(Arc::clone(&state)), state)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_check() {
        let (app, _) = create_test_app();
        let (status, body) = get_json(app, "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["hostname"], "test-host");
        assert_eq!(body["active_alerts"], 0);
    }

    #[tokio::test]
    async fn test_active_alerts() {
        let (app, state) = create_test_app();
        let cpu = state.config.read().monitor(MonitorKind::Cpu).unwrap().clone();
        let now = Utc::now();
        state
            .tracker
            .observe(&cpu, &Sample::new(MonitorKind::Cpu, None, 99.0, now), now);

        let (status, body) = get_json(app, "/alerts").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["active"].as_array().unwrap().len(), 0);
        assert_eq!(body["pending"].as_array().unwrap().len(), 1);
        assert_eq!(body["pending"][0]["status"], "pending");
    }

    #[tokio::test]
    async fn test_history_filters() {
        let (app, _) = create_test_app();

        let (status, body) = get_json(app.clone(), "/alerts/history").await;
        assert_eq!(status, StatusCode::OK);
        let records: Vec<AlertRecord> = serde_json::from_value(body).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].monitor_kind, MonitorKind::Disk);

        let (_, body) = get_json(app.clone(), "/alerts/history?status=active&monitor=cpu").await;
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (_, body) = get_json(app, "/alerts/history?limit=1").await;
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_history_rejects_bad_params() {
        let (app, _) = create_test_app();

        let (status, body) = get_json(app.clone(), "/alerts/history?monitor=gpu").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("gpu"));

        let (status, _) = get_json(app.clone(), "/alerts/history?since_hours=0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = get_json(app.clone(), "/alerts/history?since_hours=9223372036854775807").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("since_hours"));

        // The server keeps answering afterwards
        let (status, _) = get_json(app, "/alerts/history?since_hours=24").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_list_monitors() {
        let (app, _) = create_test_app();
        let (status, body) = get_json(app, "/monitors").await;

        assert_eq!(status, StatusCode::OK);
        let monitors = body.as_array().unwrap();
        assert_eq!(monitors.len(), 4);
        assert_eq!(monitors[0]["kind"], "cpu");
        assert_eq!(monitors[0]["interval"], 60);
    }
}
