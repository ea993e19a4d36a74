//! HTTP API for telemetry ingestion and log views.
//!
//! This module provides an HTTP server that:
//! - Classifies raw accelerometer readings via POST /readings
//! - Accepts activities computed on the device via POST /activity
//! - Accepts The Things Network uplinks via POST /ttn
//! - Serves the stored log tree and its grouped views under /logs
//!
//! # Architecture
//!
//! ```text
//! Phone ──→ POST /readings ──→ [Classifier] ──→ ActivityLog
//! TTN   ──→ POST /ttn      ──────────────────→ Log ──→ GET /logs/by-station
//! Timer ──→ [Simulator] ──→ [IoT hub] ───────→ Log ──→ GET /logs/by-sensor
//! ```
//!
//! Every endpoint except `/health` answers with a `{message, code, data}`
//! envelope.

use crate::core::{evaluate_activity, group_by_sensor_type, group_by_station, GroupedView};
use crate::hub::HubClient;
use crate::model::{
    AccelerationReading, Activity, ActivityClassification, ActivityRecord, ActivitySource,
    LogEntry, RawLogStore,
};
use crate::simulator::{relay_transmission, simulate_transmission};
use crate::store::{StoreError, TelemetryRepository};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub host: IpAddr,
    /// Port to bind to (0 for random)
    pub port: u16,
    /// Telemetry records
    pub repository: TelemetryRepository,
    /// Zone for recency windows and displayed dates
    pub timezone: chrono_tz::Tz,
    /// Relay simulated logs to the IoT hub before storing them
    pub relay_to_hub: bool,
    /// Period of background simulated transmissions
    pub simulation_interval: Option<Duration>,
}

impl ServerConfig {
    /// Create a loopback-only server configuration with UTC windows, no relay
    /// and no background simulation.
    pub fn new(port: u16, repository: TelemetryRepository) -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
            repository,
            timezone: chrono_tz::UTC,
            relay_to_hub: false,
            simulation_interval: None,
        }
    }

    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    pub fn with_timezone(mut self, timezone: chrono_tz::Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn with_relay(mut self, relay_to_hub: bool) -> Self {
        self.relay_to_hub = relay_to_hub;
        self
    }

    pub fn with_simulation(mut self, interval: Option<Duration>) -> Self {
        self.simulation_interval = interval;
        self
    }
}

/// Shared server state
pub struct ServerState {
    repository: TelemetryRepository,
    timezone: chrono_tz::Tz,
    /// Present when relaying is enabled
    hub: Option<HubClient>,
}

impl ServerState {
    /// Create new server state
    pub fn new(config: &ServerConfig) -> anyhow::Result<Self> {
        let hub = if config.relay_to_hub {
            Some(HubClient::new()?)
        } else {
            None
        };

        Ok(Self {
            repository: config.repository.clone(),
            timezone: config.timezone,
            hub,
        })
    }

    fn now(&self) -> DateTime<chrono_tz::Tz> {
        Utc::now().with_timezone(&self.timezone)
    }

    /// One simulated transmission from every sensor, relayed first when a hub
    /// client is configured.
    async fn transmit(&self) -> Result<BTreeMap<String, LogEntry>, StoreError> {
        let now = self.now();
        match &self.hub {
            None => simulate_transmission(&self.repository, &now),
            Some(hub) => {
                relay_transmission(&self.repository, &now, |sensor_id, sensor, log| {
                    let hub = hub.clone();
                    async move { hub.relay_log(&sensor_id, &sensor, &log).await }
                })
                .await
            }
        }
    }
}

/// Response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub message: String,
    pub code: String,
    pub data: T,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            message: "ok".to_string(),
            code: StatusCode::OK.as_u16().to_string(),
            data,
        })
    }
}

type ApiError = (StatusCode, Json<ApiResponse<Value>>);
type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn api_error(status: StatusCode, message: impl Into<String>, data: Value) -> ApiError {
    (
        status,
        Json(ApiResponse {
            message: message.into(),
            code: status.as_u16().to_string(),
            data,
        }),
    )
}

fn store_error(e: StoreError) -> ApiError {
    tracing::error!("Store error: {}", e);
    api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), Value::Null)
}

/// Parse a JSON request body. An absent, `null` or `{}` body is `None`.
fn parse_body(body: &[u8]) -> Result<Option<Value>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let value: Value = serde_json::from_slice(body).map_err(|e| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("Invalid JSON body: {e}"),
            Value::Null,
        )
    })?;

    Ok(match &value {
        Value::Null => None,
        Value::Object(map) if map.is_empty() => None,
        _ => Some(value),
    })
}

fn require_body(body: &[u8]) -> Result<Value, ApiError> {
    parse_body(body)?.ok_or_else(|| {
        api_error(
            StatusCode::BAD_REQUEST,
            "you must specify a body",
            json!({}),
        )
    })
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// POST /readings
///
/// Classifies two raw accelerometer readings and stores the result.
async fn post_readings(
    State(state): State<Arc<ServerState>>,
    body: Bytes,
) -> ApiResult<BTreeMap<String, ActivityRecord>> {
    let body = require_body(&body)?;

    let readings = body.get("readings").filter(|r| !r.is_null()).ok_or_else(|| {
        api_error(
            StatusCode::BAD_REQUEST,
            "must have at least two readings",
            json!({}),
        )
    })?;

    let readings: Vec<AccelerationReading> =
        serde_json::from_value(readings.clone()).map_err(|e| {
            api_error(
                StatusCode::BAD_REQUEST,
                format!("Invalid readings: {e}"),
                Value::Null,
            )
        })?;

    let classification = evaluate_activity(&readings, &state.now()).map_err(|e| {
        api_error(
            StatusCode::BAD_REQUEST,
            e.to_string(),
            json!({ "error": e.code() }),
        )
    })?;

    let record = ActivityRecord {
        classification,
        source: ActivitySource::Cloud,
    };
    let id = state
        .repository
        .append_activity(&record)
        .map_err(store_error)?;

    tracing::info!(activity = %record.classification.activity, "classified readings");
    Ok(ApiResponse::ok(BTreeMap::from([(id, record)])))
}

/// Activity computed on the device.
#[derive(Debug, Deserialize)]
struct EdgeActivity {
    x: f64,
    y: f64,
    z: f64,
    activity: Activity,
}

/// POST /activity
async fn post_activity(
    State(state): State<Arc<ServerState>>,
    body: Bytes,
) -> ApiResult<BTreeMap<String, ActivityRecord>> {
    let edge: EdgeActivity = serde_json::from_value(require_body(&body)?).map_err(|e| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("Invalid activity: {e}"),
            Value::Null,
        )
    })?;

    let record = ActivityRecord {
        classification: ActivityClassification {
            x: edge.x,
            y: edge.y,
            z: edge.z,
            timestamp: state.now().timestamp(),
            activity: edge.activity,
        },
        source: ActivitySource::Edge,
    };
    let id = state
        .repository
        .append_activity(&record)
        .map_err(store_error)?;

    tracing::info!(activity = %edge.activity, "stored edge activity");
    Ok(ApiResponse::ok(BTreeMap::from([(id, record)])))
}

/// GET /activity
async fn get_activity(
    State(state): State<Arc<ServerState>>,
) -> ApiResult<BTreeMap<String, ActivityRecord>> {
    let logs = state.repository.activity_logs().map_err(store_error)?;
    Ok(ApiResponse::ok(logs))
}

/// GET /logs
async fn get_logs(State(state): State<Arc<ServerState>>) -> ApiResult<RawLogStore> {
    let tree = state.repository.weather_stations().map_err(store_error)?;
    Ok(ApiResponse::ok(tree))
}

/// GET /logs/by-station
async fn get_logs_by_station(State(state): State<Arc<ServerState>>) -> ApiResult<GroupedView> {
    let tree = state.repository.weather_stations().map_err(store_error)?;
    Ok(ApiResponse::ok(group_by_station(&tree, &state.now())))
}

/// GET /logs/by-sensor
async fn get_logs_by_sensor(State(state): State<Arc<ServerState>>) -> ApiResult<GroupedView> {
    let tree = state.repository.weather_stations().map_err(store_error)?;
    Ok(ApiResponse::ok(group_by_sensor_type(&tree, &state.now())))
}

/// Log carried in a TTN uplink's `payload_raw`.
#[derive(Debug, Deserialize)]
struct UplinkLog {
    #[serde(rename = "sensorName", default)]
    sensor_name: String,
    #[serde(rename = "sensorType", default)]
    sensor_type: Option<String>,
    #[serde(default)]
    origin: Option<String>,
    #[serde(rename = "sensorID", default)]
    sensor_id: Option<String>,
    value: f64,
}

/// Decode the base64 JSON log of a TTN uplink.
fn decode_uplink(uplink: &Value) -> Result<UplinkLog, String> {
    let raw = uplink
        .get("payload_raw")
        .and_then(Value::as_str)
        .ok_or("uplink has no payload_raw")?;
    let bytes = STANDARD.decode(raw).map_err(|e| e.to_string())?;
    serde_json::from_slice(&bytes).map_err(|e| e.to_string())
}

/// POST /ttn
async fn post_ttn(
    State(state): State<Arc<ServerState>>,
    body: Bytes,
) -> ApiResult<BTreeMap<String, LogEntry>> {
    let uplink = match parse_body(&body) {
        Ok(Some(uplink)) => uplink,
        Ok(None) => {
            tracing::info!("TTN transmission with empty body");
            return Ok(ApiResponse::ok(BTreeMap::new()));
        }
        Err((_, Json(response))) => {
            return Err(api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                response.message,
                Value::Null,
            ))
        }
    };

    let uplink = decode_uplink(&uplink).map_err(|e| {
        tracing::warn!("Dropping undecodable TTN uplink: {}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "error", json!({ "error": e }))
    })?;

    let log = LogEntry {
        timestamp: state.now().timestamp(),
        sensor_name: uplink.sensor_name,
        sensor_type: uplink.sensor_type,
        value: uplink.value,
        origin: uplink.origin,
        sensor_id: uplink.sensor_id,
    };
    let id = state.repository.append_log(&log).map_err(store_error)?;

    tracing::info!(sensor = %log.sensor_name, "stored TTN uplink");
    Ok(ApiResponse::ok(BTreeMap::from([(id, log)])))
}

/// POST /simulate
async fn post_simulate(
    State(state): State<Arc<ServerState>>,
) -> ApiResult<BTreeMap<String, LogEntry>> {
    let logs = state.transmit().await.map_err(store_error)?;
    Ok(ApiResponse::ok(logs))
}

/// POST /seed
async fn post_seed(State(state): State<Arc<ServerState>>) -> ApiResult<RawLogStore> {
    let tree = state.repository.seed_demo().map_err(store_error)?;
    Ok(ApiResponse::ok(tree))
}

/// Build the API router over shared state.
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/readings", post(post_readings))
        .route("/activity", get(get_activity).post(post_activity))
        .route("/logs", get(get_logs))
        .route("/logs/by-station", get(get_logs_by_station))
        .route("/logs/by-sensor", get(get_logs_by_sensor))
        .route("/ttn", post(post_ttn))
        .route("/simulate", post(post_simulate))
        .route("/seed", post(post_seed))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server
pub async fn run(
    config: ServerConfig,
) -> anyhow::Result<(SocketAddr, tokio::sync::oneshot::Sender<()>)> {
    let state = Arc::new(ServerState::new(&config)?);
    let app = router(state.clone());

    let addr = SocketAddr::new(config.host, config.port);
    let listener = TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    tracing::info!("Telemetry server listening on http://{}", actual_addr);

    let simulation = config
        .simulation_interval
        .filter(|period| !period.is_zero())
        .map(|period| {
            tracing::info!("Simulating transmissions every {}s", period.as_secs());
            let state = state.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                // The first tick completes immediately
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if let Err(e) = state.transmit().await {
                        tracing::error!("Simulated transmission failed: {}", e);
                    }
                }
            })
        });

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Server shutdown signal received");
            })
            .await
        {
            tracing::error!("Server error: {}", e);
        }
        if let Some(simulation) = simulation {
            simulation.abort();
        }
    });

    Ok((actual_addr, shutdown_tx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_bodies_are_none() {
        for body in ["", "  \n", "null", "{}"] {
            assert!(parse_body(body.as_bytes()).unwrap().is_none(), "{body:?}");
        }
        assert!(parse_body(b"{\"a\":1}").unwrap().is_some());
    }

    #[test]
    fn test_invalid_json_is_bad_request() {
        let (status, Json(response)) = parse_body(b"{oops").unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(response.code, "400");
    }

    #[test]
    fn test_decode_uplink() {
        let payload = STANDARD.encode(
            r#"{"sensorName":"rainTango","sensorType":"rain","origin":"ttn","sensorID":"s1","value":3.5}"#,
        );
        let log = decode_uplink(&json!({ "payload_raw": payload })).unwrap();

        assert_eq!(log.sensor_name, "rainTango");
        assert_eq!(log.sensor_type.as_deref(), Some("rain"));
        assert_eq!(log.origin.as_deref(), Some("ttn"));
        assert_eq!(log.sensor_id.as_deref(), Some("s1"));
        assert_eq!(log.value, 3.5);
    }

    #[test]
    fn test_decode_uplink_failures() {
        assert!(decode_uplink(&json!({ "dev_id": "x" })).is_err());
        assert!(decode_uplink(&json!({ "payload_raw": "%%%" })).is_err());
        let not_json = STANDARD.encode("hello");
        assert!(decode_uplink(&json!({ "payload_raw": not_json })).is_err());
    }
}
