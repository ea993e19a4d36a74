//! Simulated transmissions for sensors without real hardware attached.
//!
//! Each sensor produces one uniformly random value in the range of its kind.

use crate::model::{LogEntry, Sensor, SensorKind};
use crate::store::{StoreError, TelemetryRepository};
use chrono::{DateTime, TimeZone};
use rand::Rng;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt::Display;
use std::future::Future;
use std::ops::Range;

/// `origin` of simulated logs.
pub const SIMULATED_ORIGIN: &str = "simulated";

/// Value range produced for a sensor kind.
pub fn value_range(kind: Option<SensorKind>) -> Range<f64> {
    match kind {
        Some(SensorKind::Temperature) => -50.0..50.0,
        Some(SensorKind::Humidity) => 0.0..100.0,
        Some(SensorKind::WindDirection) => 0.0..360.0,
        Some(SensorKind::WindIntensity) => 0.0..100.0,
        Some(SensorKind::Rain) | None => 0.0..50.0,
    }
}

/// Produce one simulated log for a sensor.
pub fn simulate_value<R: Rng, Tz: TimeZone>(
    rng: &mut R,
    sensor_id: &str,
    sensor: &Sensor,
    now: &DateTime<Tz>,
) -> LogEntry {
    LogEntry {
        timestamp: now.timestamp(),
        sensor_name: sensor.name.clone().unwrap_or_default(),
        sensor_type: sensor.sensor_type.clone(),
        value: rng.gen_range(value_range(sensor.kind())),
        origin: Some(SIMULATED_ORIGIN.to_string()),
        sensor_id: Some(sensor_id.to_string()),
    }
}

/// Produce one simulated log per sensor, keyed by sensor ID.
pub fn simulate_all<Tz: TimeZone>(
    sensors: &BTreeMap<String, Sensor>,
    now: &DateTime<Tz>,
) -> BTreeMap<String, LogEntry> {
    let mut rng = rand::thread_rng();
    sensors
        .iter()
        .map(|(id, sensor)| (id.clone(), simulate_value(&mut rng, id, sensor, now)))
        .collect()
}

/// Simulate a transmission from every registered sensor and store the logs.
///
/// Returns the stored logs keyed by their new log ID.
pub fn simulate_transmission<Tz: TimeZone>(
    repository: &TelemetryRepository,
    now: &DateTime<Tz>,
) -> Result<BTreeMap<String, LogEntry>, StoreError> {
    simulate_transmission_with(repository, now, |_, _, _| Ok::<(), Infallible>(()))
}

/// Like [`simulate_transmission`], passing each log through `relay` first.
///
/// A log is stored only once `relay` accepts it; rejected logs are skipped
/// with a warning.
pub fn simulate_transmission_with<Tz, F, E>(
    repository: &TelemetryRepository,
    now: &DateTime<Tz>,
    mut relay: F,
) -> Result<BTreeMap<String, LogEntry>, StoreError>
where
    Tz: TimeZone,
    F: FnMut(&str, &Sensor, &LogEntry) -> Result<(), E>,
    E: Display,
{
    let mut stored = BTreeMap::new();
    for (sensor_id, sensor, log) in pending(repository, now)? {
        let outcome = relay(&sensor_id, &sensor, &log);
        keep_if_relayed(repository, &mut stored, &sensor_id, log, outcome)?;
    }

    tracing::info!(logs = stored.len(), "simulated sensor transmission");
    Ok(stored)
}

/// Async form of [`simulate_transmission_with`] for relays that perform I/O.
pub async fn relay_transmission<Tz, F, Fut, E>(
    repository: &TelemetryRepository,
    now: &DateTime<Tz>,
    mut relay: F,
) -> Result<BTreeMap<String, LogEntry>, StoreError>
where
    Tz: TimeZone,
    F: FnMut(String, Sensor, LogEntry) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    let mut stored = BTreeMap::new();
    for (sensor_id, sensor, log) in pending(repository, now)? {
        let outcome = relay(sensor_id.clone(), sensor, log.clone()).await;
        keep_if_relayed(repository, &mut stored, &sensor_id, log, outcome)?;
    }

    tracing::info!(logs = stored.len(), "relayed simulated transmission");
    Ok(stored)
}

/// One simulated log per registered sensor, with the sensor it came from.
fn pending<Tz: TimeZone>(
    repository: &TelemetryRepository,
    now: &DateTime<Tz>,
) -> Result<Vec<(String, Sensor, LogEntry)>, StoreError> {
    let mut sensors = repository.sensors()?;
    Ok(simulate_all(&sensors, now)
        .into_iter()
        .filter_map(|(sensor_id, log)| {
            let sensor = sensors.remove(&sensor_id)?;
            Some((sensor_id, sensor, log))
        })
        .collect())
}

/// Store `log` when the relay accepted it.
fn keep_if_relayed<E: Display>(
    repository: &TelemetryRepository,
    stored: &mut BTreeMap<String, LogEntry>,
    sensor_id: &str,
    log: LogEntry,
    outcome: Result<(), E>,
) -> Result<(), StoreError> {
    if let Err(e) = outcome {
        tracing::warn!(sensor = %sensor_id, "relay failed, log dropped: {e}");
        return Ok(());
    }
    let id = repository.append_log(&log)?;
    stored.insert(id, log);
    Ok(())
}
