//! Telemetry record types shared by the classifier, the aggregator and storage.
//!
//! Wire names follow the stored JSON (`sensorName`, `stationID`, ...) so a
//! snapshot read from the store deserializes without translation.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// A single accelerometer reading as received on the wire.
///
/// Coordinates are optional so that a missing axis can be reported instead of
/// being silently read as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AccelerationReading {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
}

impl AccelerationReading {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            z: Some(z),
        }
    }

    /// Returns the sample if all three coordinates are present.
    pub fn complete(&self) -> Option<AccelerationSample> {
        Some(AccelerationSample {
            x: self.x?,
            y: self.y?,
            z: self.z?,
        })
    }
}

/// A tri-axial acceleration sample with every coordinate present.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccelerationSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl AccelerationSample {
    /// Euclidean norm of the acceleration vector.
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Activity label derived from the change in acceleration magnitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Activity {
    #[serde(rename = "still.")]
    Still,
    #[serde(rename = "walking")]
    Walking,
    #[serde(rename = "running")]
    Running,
}

impl Activity {
    pub fn label(&self) -> &'static str {
        match self {
            Activity::Still => "still.",
            Activity::Walking => "walking",
            Activity::Running => "running",
        }
    }
}

impl std::fmt::Display for Activity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of classifying a pair of readings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActivityClassification {
    /// Coordinates of the second reading
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Unix seconds at classification time
    pub timestamp: i64,
    pub activity: Activity,
}

/// Where an activity was computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivitySource {
    /// Classified by this service from raw readings
    Cloud,
    /// Classified on the device and reported as-is
    Edge,
}

impl std::fmt::Display for ActivitySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivitySource::Cloud => f.write_str("cloud"),
            ActivitySource::Edge => f.write_str("edge"),
        }
    }
}

/// An activity record as persisted under `ActivityLog`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    #[serde(flatten)]
    pub classification: ActivityClassification,
    pub source: ActivitySource,
}

/// Known sensor kinds. Anything else is carried as a plain type string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Temperature,
    Humidity,
    WindDirection,
    WindIntensity,
    Rain,
}

impl SensorKind {
    pub const ALL: [SensorKind; 5] = [
        SensorKind::Temperature,
        SensorKind::Humidity,
        SensorKind::WindDirection,
        SensorKind::WindIntensity,
        SensorKind::Rain,
    ];

    pub fn from_type_name(name: &str) -> Option<Self> {
        match name {
            "temperature" => Some(SensorKind::Temperature),
            "humidity" => Some(SensorKind::Humidity),
            "windDirection" => Some(SensorKind::WindDirection),
            "windIntensity" => Some(SensorKind::WindIntensity),
            "rain" => Some(SensorKind::Rain),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Humidity => "humidity",
            SensorKind::WindDirection => "windDirection",
            SensorKind::WindIntensity => "windIntensity",
            SensorKind::Rain => "rain",
        }
    }

    /// Display unit appended to formatted values.
    pub fn unit(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "C",
            SensorKind::Humidity => "%",
            SensorKind::WindDirection => "degrees",
            SensorKind::WindIntensity => "m/s",
            SensorKind::Rain => "mm/h",
        }
    }
}

/// A single stored telemetry log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Unix seconds
    pub timestamp: i64,
    #[serde(rename = "sensorName", default)]
    pub sensor_name: String,
    #[serde(rename = "sensorType", default, skip_serializing_if = "Option::is_none")]
    pub sensor_type: Option<String>,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(rename = "sensorID", default, skip_serializing_if = "Option::is_none")]
    pub sensor_id: Option<String>,
}

/// A sensor node, optionally with its logs attached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sensor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub sensor_type: Option<String>,
    #[serde(rename = "stationID", default, skip_serializing_if = "Option::is_none")]
    pub station_id: Option<String>,
    #[serde(
        rename = "connectionString",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub connection_string: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_map",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub logs: BTreeMap<String, LogEntry>,
}

impl Sensor {
    pub fn kind(&self) -> Option<SensorKind> {
        self.sensor_type.as_deref().and_then(SensorKind::from_type_name)
    }
}

/// A weather station and the sensors mounted on it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Station {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(
        default,
        deserialize_with = "lenient_map",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub sensors: BTreeMap<String, Sensor>,
}

impl Station {
    /// Name shown to users; falls back to the station ID when unnamed.
    pub fn display_name<'a>(&'a self, station_id: &'a str) -> &'a str {
        self.name.as_deref().unwrap_or(station_id)
    }
}

/// Snapshot of the station → sensor → log tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RawLogStore {
    pub stations: BTreeMap<String, Station>,
}

impl RawLogStore {
    /// Build a snapshot from loosely shaped JSON.
    ///
    /// Nodes that do not have the expected shape are skipped rather than
    /// failing the whole snapshot. `null` yields an empty store.
    pub fn from_value(value: serde_json::Value) -> Self {
        Self {
            stations: collect_lenient(value),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    /// Total number of logs across every station and sensor.
    pub fn log_count(&self) -> usize {
        self.stations
            .values()
            .flat_map(|station| station.sensors.values())
            .map(|sensor| sensor.logs.len())
            .sum()
    }
}

impl<'de> Deserialize<'de> for RawLogStore {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(Self::from_value(value))
    }
}

/// Deserialize an ID-keyed map, dropping entries that fail to parse.
fn lenient_map<'de, D, T>(deserializer: D) -> Result<BTreeMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.map(collect_lenient).unwrap_or_default())
}

pub(crate) fn collect_lenient<T: DeserializeOwned>(value: serde_json::Value) -> BTreeMap<String, T> {
    let serde_json::Value::Object(entries) = value else {
        return BTreeMap::new();
    };

    entries
        .into_iter()
        .filter_map(|(id, node)| match serde_json::from_value(node) {
            Ok(parsed) => Some((id, parsed)),
            Err(e) => {
                tracing::debug!(node = %id, error = %e, "skipping malformed node");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reading_completeness() {
        let reading = AccelerationReading::new(1.0, 2.0, 3.0);
        assert!(reading.complete().is_some());

        let partial = AccelerationReading {
            z: None,
            ..reading
        };
        assert!(partial.complete().is_none());
    }

    #[test]
    fn test_missing_axis_is_not_zero() {
        let reading: AccelerationReading = serde_json::from_value(json!({"x": 1.0, "y": 0.0})).unwrap();
        assert_eq!(reading.z, None);
    }

    #[test]
    fn test_sample_magnitude() {
        let sample = AccelerationSample {
            x: 3.0,
            y: 4.0,
            z: 0.0,
        };
        assert!((sample.magnitude() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_activity_labels() {
        assert_eq!(serde_json::to_value(Activity::Still).unwrap(), json!("still."));
        assert_eq!(Activity::Running.to_string(), "running");
    }

    #[test]
    fn test_activity_record_is_flat() {
        let record = ActivityRecord {
            classification: ActivityClassification {
                x: 1.0,
                y: 2.0,
                z: 3.0,
                timestamp: 1_700_000_000,
                activity: Activity::Walking,
            },
            source: ActivitySource::Cloud,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["activity"], "walking");
        assert_eq!(value["source"], "cloud");
        assert_eq!(value["timestamp"], 1_700_000_000);
        assert_eq!(ActivitySource::Edge.to_string(), "edge");
    }

    #[test]
    fn test_sensor_kind_round_trip_names() {
        for kind in SensorKind::ALL {
            assert_eq!(SensorKind::from_type_name(kind.type_name()), Some(kind));
        }
        assert_eq!(SensorKind::from_type_name("pressure"), None);
    }

    #[test]
    fn test_snapshot_skips_malformed_nodes() {
        let store = RawLogStore::from_value(json!({
            "s1": {
                "name": "Tango",
                "sensors": {
                    "t1": {
                        "name": "temperatureTango",
                        "type": "temperature",
                        "logs": {
                            "ok": {"timestamp": 10, "sensorName": "temperatureTango", "sensorType": "temperature", "value": 1.5},
                            "no-value": {"timestamp": 11, "sensorName": "temperatureTango"},
                            "garbage": "not a log"
                        }
                    },
                    "broken": 42
                }
            },
            "s2": "not a station",
            "s3": {"name": "Charlie"}
        }));

        assert_eq!(store.stations.len(), 2);
        let tango = &store.stations["s1"];
        assert_eq!(tango.sensors.len(), 1);
        assert_eq!(tango.sensors["t1"].logs.len(), 1);
        assert!(store.stations["s3"].sensors.is_empty());
        assert_eq!(store.log_count(), 1);
    }

    #[test]
    fn test_null_snapshot_is_empty() {
        assert!(RawLogStore::from_value(serde_json::Value::Null).is_empty());
        let parsed: RawLogStore = serde_json::from_str("null").unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_display_name_fallback() {
        let station = Station::default();
        assert_eq!(station.display_name("abc"), "abc");
    }
}
