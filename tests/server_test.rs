//! Integration tests for the telemetry HTTP server

#[cfg(feature = "server")]
mod server_tests {
    use acme_telemetry::server::{run, ServerConfig};
    use acme_telemetry::store::{MemoryStore, TelemetryRepository};
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde_json::{json, Value};
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::sync::Arc;
    use std::time::{Duration, SystemTime, UNIX_EPOCH};
    use tokio::sync::oneshot;

    async fn start() -> (SocketAddr, oneshot::Sender<()>, TelemetryRepository) {
        start_with(|config| config).await
    }

    async fn start_with(
        configure: impl FnOnce(ServerConfig) -> ServerConfig,
    ) -> (SocketAddr, oneshot::Sender<()>, TelemetryRepository) {
        let repository = TelemetryRepository::new(Arc::new(MemoryStore::new()));
        let config = configure(ServerConfig::new(0, repository.clone()));

        let (addr, shutdown_tx) = run(config).await.expect("Failed to start server");

        // Give server time to start
        tokio::time::sleep(Duration::from_millis(100)).await;

        (addr, shutdown_tx, repository)
    }

    fn unix_now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock before epoch")
            .as_secs() as i64
    }

    /// GET a grouped view. Also returns whether logs stamped `timestamp` fall
    /// in the server's UTC window of `window_secs`, or `None` when the window
    /// rolled over during the request.
    async fn grouped_view(
        client: &reqwest::Client,
        url: String,
        timestamp: i64,
        window_secs: i64,
    ) -> (Value, Option<bool>) {
        let before = unix_now() / window_secs;
        let body: Value = client
            .get(url)
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");
        let after = unix_now() / window_secs;

        let in_window = (before == after).then_some(timestamp / window_secs == before);
        (body, in_window)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (addr, shutdown_tx, _) = start().await;

        let response = reqwest::get(format!("http://{}/health", addr))
            .await
            .expect("Failed to send request");

        assert!(response.status().is_success());

        let body: Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["status"], "ok");
        assert!(body["version"].as_str().is_some());

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_binds_configured_host() {
        let (addr, shutdown_tx, _) =
            start_with(|config| config.with_host(IpAddr::V4(Ipv4Addr::UNSPECIFIED))).await;
        assert!(addr.ip().is_unspecified());

        let response = reqwest::get(format!("http://127.0.0.1:{}/health", addr.port()))
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_readings_are_classified_and_stored() {
        let (addr, shutdown_tx, repository) = start().await;

        let client = reqwest::Client::new();
        let response = client
            .post(format!("http://{}/readings", addr))
            .json(&json!({
                "readings": [
                    {"x": 0.0, "y": 0.0, "z": 0.0},
                    {"x": 3.0, "y": 0.0, "z": 0.0}
                ]
            }))
            .send()
            .await
            .expect("Failed to send request");

        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["message"], "ok");
        assert_eq!(body["code"], "200");

        let records = body["data"].as_object().expect("data should be an object");
        assert_eq!(records.len(), 1);
        let record = records.values().next().unwrap();
        assert_eq!(record["activity"], "walking");
        assert_eq!(record["source"], "cloud");
        assert_eq!(record["x"], 3.0);

        let stored = repository.activity_logs().unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored.contains_key(records.keys().next().unwrap()));

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_missing_coordinate_is_rejected() {
        let (addr, shutdown_tx, repository) = start().await;

        let client = reqwest::Client::new();
        let response = client
            .post(format!("http://{}/readings", addr))
            .json(&json!({
                "readings": [
                    {"x": 1.0, "y": 0.0},
                    {"x": 1.0, "y": 0.0, "z": 0.0}
                ]
            }))
            .send()
            .await
            .expect("Failed to send request");

        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["code"], "400");
        assert_eq!(body["data"]["error"], "MISSING_COORDINATE");

        // A failed classification persists nothing
        assert!(repository.activity_logs().unwrap().is_empty());

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_empty_bodies_are_rejected() {
        let (addr, shutdown_tx, _) = start().await;
        let client = reqwest::Client::new();

        for path in ["readings", "activity"] {
            let response = client
                .post(format!("http://{}/{}", addr, path))
                .send()
                .await
                .expect("Failed to send request");
            assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST, "{path}");
        }

        let response = client
            .post(format!("http://{}/readings", addr))
            .json(&json!({"other": 1}))
            .send()
            .await
            .expect("Failed to send request");
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["message"], "must have at least two readings");

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_edge_activity_is_stored() {
        let (addr, shutdown_tx, _) = start().await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("http://{}/activity", addr))
            .json(&json!({"x": 0.1, "y": 0.2, "z": 9.8, "activity": "still."}))
            .send()
            .await
            .expect("Failed to send request");
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        let body: Value = client
            .get(format!("http://{}/activity", addr))
            .send()
            .await
            .expect("Failed to send request")
            .json()
            .await
            .expect("Failed to parse JSON");

        let records = body["data"].as_object().expect("data should be an object");
        assert_eq!(records.len(), 1);
        let record = records.values().next().unwrap();
        assert_eq!(record["activity"], "still.");
        assert_eq!(record["source"], "edge");
        assert!(record["timestamp"].as_i64().unwrap() > 0);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_seed_then_grouped_views() {
        let (addr, shutdown_tx, _) = start().await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("http://{}/seed", addr))
            .send()
            .await
            .expect("Failed to send request");
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        let response = client
            .post(format!("http://{}/simulate", addr))
            .send()
            .await
            .expect("Failed to send request");
        let body: Value = response.json().await.expect("Failed to parse JSON");
        let logs = body["data"].as_object().unwrap();
        assert_eq!(logs.len(), 10);
        let timestamp = logs.values().next().unwrap()["timestamp"].as_i64().unwrap();

        let (body, in_window) = grouped_view(
            &client,
            format!("http://{}/logs/by-station", addr),
            timestamp,
            86_400,
        )
        .await;
        let stations = body["data"].as_object().unwrap();
        assert!(stations.contains_key("Tango"));
        assert!(stations.contains_key("Charlie"));
        if let Some(in_window) = in_window {
            let expected = if in_window { 5 } else { 0 };
            assert_eq!(stations["Tango"].as_array().unwrap().len(), expected);
        }

        let (body, in_window) = grouped_view(
            &client,
            format!("http://{}/logs/by-sensor", addr),
            timestamp,
            3600,
        )
        .await;
        let kinds = body["data"].as_object().unwrap();
        assert_eq!(kinds.len(), 5);
        if let Some(in_window) = in_window {
            let rows = kinds["temperature"].as_array().unwrap();
            assert_eq!(rows.len(), if in_window { 2 } else { 0 });
            for row in rows {
                let value = row["value"].as_str().unwrap();
                assert!(value.ends_with(" C"), "{value}");
            }
        }

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_relay_drops_logs_of_unconnected_sensors() {
        let (addr, shutdown_tx, repository) = start_with(|config| config.with_relay(true)).await;
        let client = reqwest::Client::new();

        client
            .post(format!("http://{}/seed", addr))
            .send()
            .await
            .expect("Failed to send request");

        // Demo sensors have no connection strings, so nothing is relayed
        let response = client
            .post(format!("http://{}/simulate", addr))
            .send()
            .await
            .expect("Failed to send request");
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: Value = response.json().await.expect("Failed to parse JSON");
        assert!(body["data"].as_object().unwrap().is_empty());

        assert_eq!(repository.weather_stations().unwrap().log_count(), 0);

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_ttn_uplink() {
        let (addr, shutdown_tx, _) = start().await;
        let client = reqwest::Client::new();

        // Empty uplinks are acknowledged and ignored
        let response = client
            .post(format!("http://{}/ttn", addr))
            .send()
            .await
            .expect("Failed to send request");
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        let payload = STANDARD.encode(
            r#"{"sensorName":"rainTango","sensorType":"rain","origin":"ttn","sensorID":"s1","value":4.2}"#,
        );
        let response = client
            .post(format!("http://{}/ttn", addr))
            .json(&json!({"dev_id": "node-1", "payload_raw": payload}))
            .send()
            .await
            .expect("Failed to send request");
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: Value = response.json().await.expect("Failed to parse JSON");
        let log = body["data"].as_object().unwrap().values().next().unwrap().clone();
        assert_eq!(log["sensorName"], "rainTango");
        assert_eq!(log["value"], 4.2);

        let response = client
            .post(format!("http://{}/ttn", addr))
            .json(&json!({"payload_raw": "not base64!"}))
            .send()
            .await
            .expect("Failed to send request");
        assert_eq!(
            response.status(),
            reqwest::StatusCode::INTERNAL_SERVER_ERROR
        );

        let _ = shutdown_tx.send(());
    }

    #[tokio::test]
    async fn test_cors_headers() {
        let (addr, shutdown_tx, _) = start().await;

        // Send OPTIONS request to check CORS
        let client = reqwest::Client::new();
        let response = client
            .request(reqwest::Method::OPTIONS, format!("http://{}/readings", addr))
            .header("Origin", "http://localhost")
            .header("Access-Control-Request-Method", "POST")
            .send()
            .await
            .expect("Failed to send request");

        // CORS preflight should succeed
        assert!(
            response.status().is_success() || response.status() == reqwest::StatusCode::NO_CONTENT,
            "CORS preflight failed: {}",
            response.status()
        );
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .and_then(|v| v.to_str().ok()),
            Some("*")
        );

        let _ = shutdown_tx.send(());
    }
}
