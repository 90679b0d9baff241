use axum::{
    routing::{delete, get},
    Router,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    delete_subscriber, get_preferences, get_thresholds, health_check, latest_reading,
    list_alarms, list_notifications, list_subscribers, post_readings, reading_history,
    set_preferences, set_thresholds, upsert_subscriber, AppState,
};
use crate::alerts::{AlertPipeline, ChatBotConfig, Dispatcher, ScopedReading, DEFAULT_CONFIRMATIONS};
use crate::config::{ConfigError, ConfigStore};
use crate::data::MetricCatalog;
use crate::report::ReportWorker;
use crate::storage::{NotificationLog, ReadingStore, SubscriberStore};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// JSON snapshot of rules and preferences; in-memory only when unset
    pub config_path: Option<PathBuf>,
    pub confirmations: u32,
    pub report_check_interval_secs: u64,
    /// Readings kept per scope
    pub history_limit: usize,
    pub chat: Option<ChatBotConfig>,
    #[cfg(feature = "kafka")]
    pub kafka: Option<crate::ingest::KafkaConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            config_path: None,
            confirmations: DEFAULT_CONFIRMATIONS,
            report_check_interval_secs: 30,
            history_limit: 1000,
            chat: None,
            #[cfg(feature = "kafka")]
            kafka: None,
        }
    }
}

/// Shared services behind the router and the background workers
pub struct Services {
    pub state: Arc<AppState>,
    pub dispatcher: Arc<Dispatcher>,
}

/// Wire stores, dispatcher and pipeline together
pub fn build_services(config: &ServerConfig) -> Result<Services, ConfigError> {
    let catalog = MetricCatalog::default();
    let store = match &config.config_path {
        Some(path) => ConfigStore::open(path, catalog.clone())?,
        None => ConfigStore::new(catalog.clone()),
    };
    let store = Arc::new(store);

    let readings = Arc::new(ReadingStore::new(config.history_limit));
    let notifications = Arc::new(NotificationLog::default());
    let subscribers = Arc::new(SubscriberStore::new());
    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&subscribers), config.chat.clone()));

    let pipeline = AlertPipeline::new(
        Arc::clone(&store) as Arc<dyn crate::config::ConfigProvider>,
        Arc::new(catalog),
        Arc::clone(&readings),
        Arc::clone(&notifications),
        Arc::clone(&dispatcher),
    )
    .with_confirmations(config.confirmations);

    let state = Arc::new(AppState {
        config: store,
        pipeline: Arc::new(pipeline),
        readings,
        notifications,
        subscribers,
    });

    Ok(Services { state, dispatcher })
}

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Configuration
        .route("/thresholds", get(get_thresholds).post(set_thresholds))
        .route("/preferences", get(get_preferences).post(set_preferences))
        // Readings
        .route("/readings", get(reading_history).post(post_readings))
        .route("/readings/latest", get(latest_reading))
        // Alert state and history
        .route("/alarms", get(list_alarms))
        .route("/notifications", get(list_notifications))
        // Subscribers
        .route("/subscribers", get(list_subscribers).post(upsert_subscriber))
        .route("/subscribers/:id", delete(delete_subscriber))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run_server(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let Services { state, dispatcher } = build_services(&config)?;

    // Queued readings from non-HTTP sources
    let (reading_tx, reading_rx) = mpsc::channel::<ScopedReading>(1024);
    let pipeline_handle = Arc::clone(&state.pipeline).start(reading_rx);

    #[cfg(feature = "kafka")]
    let kafka_handle = match &config.kafka {
        Some(kafka_config) => {
            let consumer = crate::ingest::KafkaConsumer::new(
                kafka_config.clone(),
                Arc::new(state.config.catalog().clone()),
                reading_tx.clone(),
            )?;
            consumer.subscribe()?;
            Some(consumer.start())
        }
        None => None,
    };

    let report_worker = Arc::new(ReportWorker::new(
        Arc::clone(&state.config),
        Arc::clone(&state.readings),
        Arc::clone(&state.notifications),
        dispatcher,
        Duration::from_secs(config.report_check_interval_secs),
    ));
    let report_handle = Arc::clone(&report_worker).start();

    let app = build_router(Arc::clone(&state));

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Starting Skywatch server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(report_worker))
        .await?;

    #[cfg(feature = "kafka")]
    if let Some(handle) = kafka_handle {
        handle.abort();
    }
    drop(reading_tx);
    state.pipeline.stop().await;
    let _ = pipeline_handle.await;
    report_handle.abort();

    tracing::info!("Skywatch server stopped");
    Ok(())
}

async fn shutdown_signal(report_worker: Arc<ReportWorker>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install CTRL+C signal handler");
        std::future::pending::<()>().await;
    }

    tracing::info!("Shutdown signal received, stopping workers...");
    report_worker.stop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    fn create_test_app() -> Router {
        let services = build_services(&ServerConfig::default()).unwrap();
        build_router(services.state)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_health_check() {
        let app = create_test_app();
        let (status, body) = send(&app, "GET", "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_default_configuration_is_seeded() {
        let app = create_test_app();

        let (status, body) = send(&app, "GET", "/thresholds?scope=home", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["scope"], "home");
        assert_eq!(body["rules"].as_array().unwrap().len(), 6);

        let (status, body) = send(&app, "GET", "/preferences", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["report_times"], json!(["08:00", "20:00"]));
        assert_eq!(body["alert_rate"], "immediate");
        assert_eq!(body["timezone"], "UTC");
    }

    #[tokio::test]
    async fn test_invalid_configuration_is_rejected() {
        let app = create_test_app();

        let (status, body) = send(
            &app,
            "POST",
            "/thresholds",
            Some(json!({ "rules": [{ "metric_id": "aqi", "limit": "NaN", "direction": "above" }] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("aqi"));

        let (status, _) = send(
            &app,
            "POST",
            "/preferences",
            Some(json!({
                "report_times": [],
                "alert_rate": "hourly",
                "notify_window": { "start": "00:00", "end": "23:59" }
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            "POST",
            "/preferences",
            Some(json!({
                "report_times": ["08:00"],
                "alert_rate": "weekly",
                "notify_window": { "start": "00:00", "end": "23:59" }
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = send(&app, "GET", "/preferences", None).await;
        assert_eq!(body["alert_rate"], "immediate");
    }

    #[tokio::test]
    async fn test_latest_reading_no_content_then_ok() {
        let app = create_test_app();

        let (status, _) = send(&app, "GET", "/readings/latest", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = send(&app, "POST", "/readings", Some(json!({ "temp": 21.5 }))).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, "GET", "/readings/latest", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["values"]["temperature"], 21.5);
    }

    #[tokio::test]
    async fn test_alert_flow_over_http() {
        let app = create_test_app();

        let (status, _) = send(
            &app,
            "POST",
            "/thresholds",
            Some(json!({ "rules": [{ "metric_id": "aqi", "limit": 450, "direction": "above" }] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let mut outcomes = Vec::new();
        for (i, aqi) in [300, 500, 520, 530].iter().enumerate() {
            let timestamp = format!("2024-05-01T10:00:{:02}Z", i * 10);
            let (status, body) = send(
                &app,
                "POST",
                "/readings",
                Some(json!({ "aqi": aqi, "timestamp": timestamp })),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            outcomes.push(body);
        }

        assert_eq!(outcomes[0]["reason"], "no-threshold-crossing");
        assert_eq!(outcomes[1]["reason"], "no-threshold-crossing");
        assert_eq!(outcomes[2]["outcome"], "triggered");
        assert_eq!(outcomes[2]["message"], "aqi: 520 (>= 450)");
        assert_eq!(outcomes[3]["reason"], "cooldown-active");

        let (_, body) = send(&app, "GET", "/alarms", None).await;
        assert_eq!(body["alarms"][0]["metric_id"], "aqi");
        assert_eq!(body["alarms"][0]["is_alarming"], true);

        let (_, body) = send(&app, "GET", "/notifications?limit=10", None).await;
        let notifications = body["notifications"].as_array().unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0]["kind"], "alert");
    }

    #[tokio::test]
    async fn test_threshold_update_replaces_alarm_table() {
        let app = create_test_app();
        let aqi_rules = json!({ "rules": [{ "metric_id": "aqi", "limit": 450, "direction": "above" }] });
        let uv_rules = json!({ "rules": [{ "metric_id": "uv", "limit": 8, "direction": "above" }] });

        send(&app, "POST", "/thresholds", Some(aqi_rules)).await;
        let (status, _) = send(&app, "POST", "/readings", Some(json!({ "aqi": 500 }))).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(&app, "GET", "/alarms", None).await;
        assert_eq!(body["alarms"][0]["metric_id"], "aqi");
        assert_eq!(body["alarms"][0]["consecutive_count"], 1);

        let (status, _) = send(&app, "POST", "/thresholds", Some(uv_rules)).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(&app, "GET", "/alarms", None).await;
        let alarms = body["alarms"].as_array().unwrap();
        assert_eq!(alarms.len(), 1);
        assert_eq!(alarms[0]["metric_id"], "uv");
        assert_eq!(alarms[0]["consecutive_count"], 0);
        assert_eq!(alarms[0]["is_alarming"], false);
    }

    #[tokio::test]
    async fn test_batch_readings_keep_order() {
        let app = create_test_app();

        let (status, body) = send(
            &app,
            "POST",
            "/readings?scope=lab",
            Some(json!({
                "readings": [
                    { "uv": 9, "timestamp": 1714557600000_i64 },
                    { "uv": 9.5, "timestamp": 1714557610000_i64 }
                ]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let results = body["results"].as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0]["scope"], "lab");
        assert_eq!(results[1]["outcome"], "triggered");
        assert_eq!(results[1]["message"], "UV Index: 9.5 (>= 8.0)");
    }

    #[tokio::test]
    async fn test_subscriber_lifecycle() {
        let app = create_test_app();

        let (status, body) = send(
            &app,
            "POST",
            "/subscribers",
            Some(json!({ "id": "ops", "targets": [{ "type": "log" }] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["replaced"], false);

        let (_, body) = send(&app, "GET", "/subscribers", None).await;
        assert_eq!(body["subscribers"][0]["scope"], "default");

        let (status, _) = send(&app, "DELETE", "/subscribers/ops", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, "DELETE", "/subscribers/ops", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("ops"));
    }
}
