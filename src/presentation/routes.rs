// Router for the collector service
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    device_chart, device_history, device_latest, get_location, global_latest, health_check,
    ingest, latest_per_device, list_data, list_devices, list_locations, login, root,
    set_location,
};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/healthz", get(health_check))
        .route("/data", post(ingest).get(list_data))
        .route("/data/latest", get(latest_per_device))
        .route("/monitoring/list", get(list_devices))
        .route("/monitoring_data/latest", get(global_latest))
        .route("/monitoring_data/:device_id", get(device_latest))
        .route("/monitoring_data/:device_id/chart", get(device_chart))
        .route("/history/:device_id", get(device_history))
        .route("/login", post(login))
        .route("/waterbody/location", post(set_location))
        .route("/waterbody/list", get(list_locations))
        .route("/waterbody/:device_id", get(get_location))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::dispatcher::{DispatchOutcome, Dispatcher};
    use crate::application::monitoring_service::MonitoringService;
    use crate::application::normalizer::normalize;
    use crate::domain::device::Device;
    use crate::domain::reading::RawChunk;
    use crate::infrastructure::audit_log::AuditLog;
    use crate::infrastructure::collector_client::CollectorClient;
    use crate::infrastructure::config::CollectorConfig;
    use crate::infrastructure::sqlite_repository::SqliteRepository;
    use chrono::FixedOffset;
    use reqwest::StatusCode;
    use serde_json::{json, Value};

    async fn spawn_collector() -> String {
        let repo = SqliteRepository::open(":memory:").unwrap();
        let service =
            MonitoringService::new(Arc::new(repo), FixedOffset::east_opt(2 * 3600).unwrap());
        service.seed_user("admin", "1234").await.unwrap();
        let app = router(Arc::new(AppState {
            monitoring_service: service,
        }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn get_json(url: String) -> (StatusCode, Value) {
        let response = reqwest::get(url).await.unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }

    #[tokio::test]
    async fn test_empty_collector() {
        let base = spawn_collector().await;

        let health = reqwest::get(format!("{base}/healthz")).await.unwrap();
        assert_eq!(health.text().await.unwrap(), "ok");

        let (status, body) = get_json(format!("{base}/monitoring_data/latest")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, json!({"detail": "No monitoring data found"}));

        let (status, _) = get_json(format!("{base}/monitoring_data/esp32_001")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = get_json(format!("{base}/data")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn test_dispatcher_delivers_to_collector() {
        let base = spawn_collector().await;
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::open(dir.path().join("audit.log")).await.unwrap();
        let client = CollectorClient::new(&CollectorConfig {
            base_url: base.clone(),
            timeout_secs: 2,
        })
        .unwrap();
        let dispatcher = Dispatcher::new(client, audit);
        let device = Device::new("esp32_001", "ESP32 Device 1");

        let reading = normalize(Some(&RawChunk::new(
            &br#"{"ph": 7.25, "tds": "abc", "rssi": -60}"#[..],
        )));
        let outcome = dispatcher.dispatch(&device, reading).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Sent { id: Some("1".to_string()) });

        let garbage = normalize(Some(&RawChunk::new(&b"{ph: 7"[..])));
        let outcome = dispatcher.dispatch(&device, garbage).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Sent { id: Some("2".to_string()) });

        let (_, rows) = get_json(format!("{base}/data")).await;
        let rows = rows.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["ph_value"], json!(7.25));
        assert_eq!(rows[0]["tds_value"], Value::Null);
        assert_eq!(rows[1]["is_error"], json!(true));
        assert_eq!(rows[1]["error"], json!("json_decode_error"));

        let (_, latest) = get_json(format!("{base}/data/latest")).await;
        assert_eq!(latest.as_array().unwrap().len(), 1);
        assert_eq!(latest[0]["ph_value"], json!(7.25));

        let (_, devices) = get_json(format!("{base}/monitoring/list")).await;
        assert_eq!(devices, json!([{"id": "esp32_001"}]));

        let (status, snapshot) = get_json(format!("{base}/monitoring_data/esp32_001")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(snapshot["device_id"], json!("esp32_001"));
        assert!(snapshot["created_at"].as_str().is_some());

        let (_, history) = get_json(format!("{base}/history/esp32_001")).await;
        assert_eq!(history.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_chart_and_login() {
        let base = spawn_collector().await;
        let http = reqwest::Client::new();

        let saved: Value = http
            .post(format!("{base}/data"))
            .json(&json!({
                "device_id": "d1",
                "timestamp": "2024-05-01T07:30:00",
                "ph_value": 6.8,
                "tds_value": 410.0,
                "temperature": 24.1
            }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(saved, json!({"status": "saved", "id": 1}));

        let (status, chart) = get_json(format!("{base}/monitoring_data/d1/chart?date=2024-05-01")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(chart["timeLabels"], json!(["07:30"]));
        assert_eq!(chart["temperatureValues"], json!([24.1]));

        let (status, _) = get_json(format!("{base}/monitoring_data/d1/chart?date=01-05-2024")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let ok = http
            .post(format!("{base}/login"))
            .json(&json!({"username": "admin", "password": "1234"}))
            .send()
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
        assert_eq!(ok.json::<Value>().await.unwrap(), json!({"username": "admin"}));

        let denied = http
            .post(format!("{base}/login"))
            .json(&json!({"username": "admin", "password": "nope"}))
            .send()
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_water_body_locations() {
        let base = spawn_collector().await;
        let http = reqwest::Client::new();

        let (status, unset) = get_json(format!("{base}/waterbody/d1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(unset, json!({"detail": "Location not set"}));

        for (lat, lon) in [(-15.4, 28.3), (-15.5, 28.4)] {
            let response = http
                .post(format!(
                    "{base}/waterbody/location?device_id=d1&latitude={lat}&longitude={lon}"
                ))
                .send()
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let (_, location) = get_json(format!("{base}/waterbody/d1")).await;
        assert_eq!(location, json!({"device_id": "d1", "latitude": -15.5, "longitude": 28.4}));

        let (_, list) = get_json(format!("{base}/waterbody/list")).await;
        assert_eq!(list.as_array().unwrap().len(), 1);
    }
}
