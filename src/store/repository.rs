//! Domain operations over the key-path store.
//!
//! Records are kept under four top-level paths:
//! - `WeatherStation/{stationID}`: station metadata
//! - `Sensor/{sensorID}`: sensor metadata, with `stationID`
//! - `Log/{logID}`: telemetry logs, with `sensorID`
//! - `ActivityLog/{recordID}`: classified activities
//!
//! Reading the station tree joins the three telemetry paths into a
//! [`RawLogStore`].

use super::{join_path, KeyValueStore, StoreError};
use crate::model::types::collect_lenient;
use crate::model::{ActivityRecord, LogEntry, RawLogStore, Sensor, SensorKind, Station};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

pub const STATIONS_PATH: &str = "WeatherStation";
pub const SENSORS_PATH: &str = "Sensor";
pub const LOGS_PATH: &str = "Log";
pub const ACTIVITY_PATH: &str = "ActivityLog";

/// Demo stations created by [`TelemetryRepository::seed_demo`]: name, latitude, longitude.
const DEMO_STATIONS: [(&str, f64, f64); 2] = [
    ("Tango", 9.582515, 45.202579),
    ("Charlie", 10.493317, 43.677184),
];

/// Shared handle to the telemetry records.
#[derive(Clone)]
pub struct TelemetryRepository {
    store: Arc<dyn KeyValueStore>,
}

impl TelemetryRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// All sensors, each with the logs whose `sensorID` names it.
    pub fn sensors(&self) -> Result<BTreeMap<String, Sensor>, StoreError> {
        let mut sensors: BTreeMap<String, Sensor> = self.read_map(SENSORS_PATH)?;
        let logs: BTreeMap<String, LogEntry> = self.read_map(LOGS_PATH)?;

        for (log_id, log) in logs {
            let Some(sensor_id) = log.sensor_id.as_deref() else {
                continue;
            };
            if let Some(sensor) = sensors.get_mut(sensor_id) {
                sensor.logs.insert(log_id, log);
            }
        }

        Ok(sensors)
    }

    /// The station → sensor → log tree.
    ///
    /// Sensors whose `stationID` names no station are left out.
    pub fn weather_stations(&self) -> Result<RawLogStore, StoreError> {
        let mut stations: BTreeMap<String, Station> = self.read_map(STATIONS_PATH)?;

        for (sensor_id, sensor) in self.sensors()? {
            let Some(station_id) = sensor.station_id.as_deref() else {
                continue;
            };
            if let Some(station) = stations.get_mut(station_id) {
                station.sensors.insert(sensor_id, sensor);
            }
        }

        Ok(RawLogStore { stations })
    }

    /// Store a log under a fresh ID and return the ID.
    pub fn append_log(&self, log: &LogEntry) -> Result<String, StoreError> {
        self.append(LOGS_PATH, log)
    }

    /// Store an activity record under a fresh ID and return the ID.
    pub fn append_activity(&self, record: &ActivityRecord) -> Result<String, StoreError> {
        self.append(ACTIVITY_PATH, record)
    }

    /// All stored activity records.
    pub fn activity_logs(&self) -> Result<BTreeMap<String, ActivityRecord>, StoreError> {
        self.read_map(ACTIVITY_PATH)
    }

    /// Register stations, replacing any with the same ID.
    pub fn put_stations(&self, stations: &BTreeMap<String, Station>) -> Result<(), StoreError> {
        let mut records = serde_json::Map::new();
        for (id, station) in stations {
            // Sensors are stored under their own path
            let bare = Station {
                sensors: BTreeMap::new(),
                ..station.clone()
            };
            records.insert(id.clone(), to_value(&bare)?);
        }
        self.store.merge(STATIONS_PATH, Value::Object(records))
    }

    /// Register sensors, replacing any with the same ID.
    pub fn put_sensors(&self, sensors: &BTreeMap<String, Sensor>) -> Result<(), StoreError> {
        let mut records = serde_json::Map::new();
        for (id, sensor) in sensors {
            // Logs are stored under their own path
            let bare = Sensor {
                logs: BTreeMap::new(),
                ..sensor.clone()
            };
            records.insert(id.clone(), to_value(&bare)?);
        }
        self.store.merge(SENSORS_PATH, Value::Object(records))
    }

    /// Create the two demo stations with one sensor of every kind each.
    pub fn seed_demo(&self) -> Result<RawLogStore, StoreError> {
        let mut stations = BTreeMap::new();
        let mut sensors = BTreeMap::new();

        for (name, latitude, longitude) in DEMO_STATIONS {
            let station_id = Uuid::new_v4().to_string();

            for kind in SensorKind::ALL {
                sensors.insert(
                    Uuid::new_v4().to_string(),
                    Sensor {
                        name: Some(demo_sensor_name(kind, name)),
                        sensor_type: Some(kind.type_name().to_string()),
                        station_id: Some(station_id.clone()),
                        connection_string: None,
                        logs: BTreeMap::new(),
                    },
                );
            }

            stations.insert(
                station_id,
                Station {
                    name: Some(name.to_string()),
                    latitude: Some(latitude),
                    longitude: Some(longitude),
                    sensors: BTreeMap::new(),
                },
            );
        }

        self.put_stations(&stations)?;
        self.put_sensors(&sensors)?;
        tracing::info!(
            stations = stations.len(),
            sensors = sensors.len(),
            "seeded demo stations"
        );

        self.weather_stations()
    }

    fn append<T: Serialize>(&self, base: &str, record: &T) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        self.store.set(&join_path(&[base, &id]), to_value(record)?)?;
        Ok(id)
    }

    fn read_map<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<BTreeMap<String, T>, StoreError> {
        Ok(self
            .store
            .get(path)?
            .map(collect_lenient)
            .unwrap_or_default())
    }
}

fn to_value<T: Serialize>(record: &T) -> Result<Value, StoreError> {
    serde_json::to_value(record).map_err(|e| StoreError::SerializeError(e.to_string()))
}

/// `temperatureTango`, `rainHeightCharlie`, ...
fn demo_sensor_name(kind: SensorKind, station: &str) -> String {
    match kind {
        SensorKind::Rain => format!("rainHeight{station}"),
        _ => format!("{}{station}", kind.type_name()),
    }
}
