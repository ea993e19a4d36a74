//! IoT hub relay for sensor telemetry.
//!
//! Each sensor owns a device connection string of the form
//! `HostName=<hub>;DeviceId=<device>;SharedAccessKey=<base64 key>`.
//! Events are sent over the hub's HTTPS device endpoint, authorized with a
//! short-lived shared access signature derived from that key.

use crate::model::{LogEntry, Sensor};
use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use serde::Serialize;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// REST API version of the device messaging endpoint.
pub const DEFAULT_API_VERSION: &str = "2020-03-13";

/// Lifetime of a generated shared access signature, in seconds.
pub const SAS_TTL_SECS: i64 = 3600;

/// Parsed device connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConnection {
    pub host_name: String,
    pub device_id: String,
    pub shared_access_key: String,
}

impl HubConnection {
    /// Parse a `Key=Value;...` device connection string.
    pub fn parse(connection_string: &str) -> Result<Self, HubError> {
        let mut host_name = None;
        let mut device_id = None;
        let mut shared_access_key = None;

        for part in connection_string.split(';').map(str::trim) {
            // Keys are base64 and may end in '=' so only split on the first one
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            match key {
                "HostName" => host_name = Some(value.to_string()),
                "DeviceId" => device_id = Some(value.to_string()),
                "SharedAccessKey" => shared_access_key = Some(value.to_string()),
                _ => {}
            }
        }

        let missing = |field: &str| HubError::Config(format!("connection string has no {field}"));
        Ok(Self {
            host_name: host_name.ok_or_else(|| missing("HostName"))?,
            device_id: device_id.ok_or_else(|| missing("DeviceId"))?,
            shared_access_key: shared_access_key.ok_or_else(|| missing("SharedAccessKey"))?,
        })
    }

    /// Resource URI the signature is scoped to.
    pub fn resource_uri(&self) -> String {
        format!("{}/devices/{}", self.host_name, self.device_id)
    }

    /// Device-to-cloud events endpoint.
    pub fn events_url(&self, api_version: &str) -> String {
        format!(
            "https://{}/messages/events?api-version={api_version}",
            self.resource_uri()
        )
    }

    /// Build a `SharedAccessSignature` authorization value expiring at `expiry`
    /// (unix seconds).
    pub fn sas_token(&self, expiry: i64) -> Result<String, HubError> {
        let key = STANDARD
            .decode(&self.shared_access_key)
            .map_err(|e| HubError::Config(format!("invalid shared access key: {e}")))?;

        let resource = url_encode(&self.resource_uri()).to_lowercase();
        let to_sign = format!("{resource}\n{expiry}");

        let mut mac = HmacSha256::new_from_slice(&key)
            .map_err(|e| HubError::Config(format!("invalid shared access key: {e}")))?;
        mac.update(to_sign.as_bytes());
        let signature = STANDARD.encode(mac.finalize().into_bytes());

        Ok(format!(
            "SharedAccessSignature sr={resource}&sig={}&se={expiry}",
            url_encode(&signature)
        ))
    }
}

fn url_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Hub relay error types.
#[derive(Debug)]
pub enum HubError {
    /// Missing or malformed connection details
    Config(String),
    /// Network/HTTP error
    Network(String),
    /// Hub returned an error response
    Server { status: u16, message: String },
    /// JSON serialization error
    Serialization(String),
}

impl std::fmt::Display for HubError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HubError::Config(msg) => write!(f, "Hub config error: {msg}"),
            HubError::Network(msg) => write!(f, "Hub network error: {msg}"),
            HubError::Server { status, message } => {
                write!(f, "Hub server error ({status}): {message}")
            }
            HubError::Serialization(msg) => write!(f, "Hub serialization error: {msg}"),
        }
    }
}

impl std::error::Error for HubError {}

/// Client for sending device events to the hub.
#[derive(Clone)]
pub struct HubClient {
    client: reqwest::Client,
}

impl HubClient {
    /// Create a new hub client.
    pub fn new() -> Result<Self, HubError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| HubError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Send a JSON payload as a device event.
    pub async fn send_event<T: Serialize + ?Sized>(
        &self,
        connection_string: &str,
        payload: &T,
    ) -> Result<(), HubError> {
        let connection = HubConnection::parse(connection_string)?;
        let expiry = chrono::Utc::now().timestamp() + SAS_TTL_SECS;
        let body =
            serde_json::to_vec(payload).map_err(|e| HubError::Serialization(e.to_string()))?;

        tracing::debug!(device = %connection.device_id, "sending event to hub");

        let response = self
            .client
            .post(connection.events_url(DEFAULT_API_VERSION))
            .header("Authorization", connection.sas_token(expiry)?)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| HubError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(HubError::Server {
                status: status.as_u16(),
                message,
            });
        }

        Ok(())
    }

    /// Relay a sensor's log through the sensor's own device identity.
    pub async fn relay_log(
        &self,
        sensor_id: &str,
        sensor: &Sensor,
        log: &LogEntry,
    ) -> Result<(), HubError> {
        let connection_string = relay_target(sensor_id, sensor)?;
        self.send_event(connection_string, log).await
    }
}

/// Check that a sensor can be relayed and return its connection string.
fn relay_target<'a>(sensor_id: &str, sensor: &'a Sensor) -> Result<&'a str, HubError> {
    if sensor_id.is_empty() {
        return Err(HubError::Config("Missing sensor ID".to_string()));
    }
    sensor
        .connection_string
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HubError::Config("Missing sensor connection string".to_string()))
}

/// Blocking hub client for use in synchronous contexts.
pub struct BlockingHubClient {
    inner: HubClient,
    runtime: tokio::runtime::Runtime,
}

impl BlockingHubClient {
    /// Create a new blocking hub client.
    pub fn new() -> Result<Self, HubError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| HubError::Config(format!("Failed to create runtime: {e}")))?;

        Ok(Self {
            inner: HubClient::new()?,
            runtime,
        })
    }

    /// Relay a sensor's log through the sensor's own device identity.
    pub fn relay_log(&self, sensor_id: &str, sensor: &Sensor, log: &LogEntry) -> Result<(), HubError> {
        self.runtime
            .block_on(self.inner.relay_log(sensor_id, sensor, log))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONNECTION: &str =
        "HostName=example.azure-devices.net;DeviceId=temperatureTango;SharedAccessKey=c2VjcmV0LWtleQ==";

    #[test]
    fn test_parse_connection_string() {
        let connection = HubConnection::parse(CONNECTION).unwrap();
        assert_eq!(connection.host_name, "example.azure-devices.net");
        assert_eq!(connection.device_id, "temperatureTango");
        assert_eq!(connection.shared_access_key, "c2VjcmV0LWtleQ==");
    }

    #[test]
    fn test_parse_rejects_incomplete_strings() {
        let err = HubConnection::parse("HostName=h;DeviceId=d").unwrap_err();
        assert!(err.to_string().contains("SharedAccessKey"));
        assert!(HubConnection::parse("").is_err());
    }

    #[test]
    fn test_urls() {
        let connection = HubConnection::parse(CONNECTION).unwrap();
        assert_eq!(
            connection.events_url(DEFAULT_API_VERSION),
            "https://example.azure-devices.net/devices/temperatureTango/messages/events?api-version=2020-03-13"
        );
    }

    #[test]
    fn test_sas_token_shape() {
        let connection = HubConnection::parse(CONNECTION).unwrap();
        let token = connection.sas_token(1_700_000_000).unwrap();

        assert!(token.starts_with(
            "SharedAccessSignature sr=example.azure-devices.net%2fdevices%2ftemperaturetango&sig="
        ));
        assert!(token.ends_with("&se=1700000000"));

        // Deterministic for the same expiry, different for another
        assert_eq!(token, connection.sas_token(1_700_000_000).unwrap());
        assert_ne!(token, connection.sas_token(1_700_000_001).unwrap());
    }

    #[test]
    fn test_sas_token_rejects_bad_key() {
        let connection = HubConnection {
            shared_access_key: "not base64!".to_string(),
            ..HubConnection::parse(CONNECTION).unwrap()
        };
        assert!(matches!(connection.sas_token(1), Err(HubError::Config(_))));
    }

    #[test]
    fn test_relay_requires_id_and_connection() {
        let sensor = Sensor::default();
        assert_eq!(
            relay_target("", &sensor).unwrap_err().to_string(),
            "Hub config error: Missing sensor ID"
        );
        assert_eq!(
            relay_target("s1", &sensor).unwrap_err().to_string(),
            "Hub config error: Missing sensor connection string"
        );

        let sensor = Sensor {
            connection_string: Some(CONNECTION.to_string()),
            ..Default::default()
        };
        assert_eq!(relay_target("s1", &sensor).unwrap(), CONNECTION);
    }

    #[test]
    fn test_hub_error_display() {
        let err = HubError::Server {
            status: 401,
            message: "Unauthorized".to_string(),
        };
        assert_eq!(err.to_string(), "Hub server error (401): Unauthorized");
    }
}
