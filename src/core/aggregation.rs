//! Log aggregation for the telemetry tables.
//!
//! The stored tree is keyed by station, then sensor, then log. For display it
//! is reshaped into two views:
//! - by station display name, limited to logs from today
//! - by sensor type, limited to logs from the current hour
//!
//! Both views hold formatted rows sorted most recent first.

use crate::core::windowing::RecencyWindow;
use crate::model::{LogEntry, RawLogStore, Sensor, SensorKind};
use chrono::{DateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;

/// Characters of the rendered number kept before the unit.
const VALUE_WIDTH: usize = 5;

/// Unit used when the sensor type is not recognized.
const FALLBACK_UNIT: &str = "mm/h";

/// Group key for sensors without a `type`.
pub const UNTYPED_SENSOR_KEY: &str = "unknown";

/// Date layout of formatted rows, e.g. `03/10/2024 14:05 pm`.
pub const DATE_FORMAT: &str = "%m/%d/%Y %H:%M %P";

/// A log prepared for tabular display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormattedLogRow {
    pub date: String,
    #[serde(rename = "sensorName")]
    pub sensor_name: String,
    #[serde(rename = "sensorType")]
    pub sensor_type: String,
    pub value: String,
    pub station: String,
    pub timestamp: i64,
}

/// Rows grouped by station name or sensor type.
pub type GroupedView = BTreeMap<String, Vec<FormattedLogRow>>;

/// Both views computed from the same snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedViews {
    #[serde(rename = "byStation")]
    pub by_station: GroupedView,
    #[serde(rename = "bySensor")]
    pub by_sensor: GroupedView,
}

/// Group today's logs by the display name of their station.
///
/// Every station present in the snapshot gets a key, even when none of its
/// logs are recent. Stations sharing a name share a group.
pub fn group_by_station<Tz>(raw: &RawLogStore, now: &DateTime<Tz>) -> GroupedView
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let window = RecencyWindow::CalendarDay;
    let mut view = GroupedView::new();

    for (station_id, station) in &raw.stations {
        let station_name = station.display_name(station_id);
        let rows = view.entry(station_name.to_string()).or_default();

        for sensor in station.sensors.values() {
            rows.extend(
                sensor
                    .logs
                    .values()
                    .filter(|log| window.contains_log(log, now))
                    .map(|log| format_row(log, sensor, station_name, now)),
            );
        }
    }

    sort_groups(&mut view);
    view
}

/// Group this hour's logs by the `type` of the sensor that produced them.
///
/// Every sensor type present in the snapshot gets a key, even when none of
/// its logs are recent. Sensors without a type are grouped under
/// [`UNTYPED_SENSOR_KEY`].
pub fn group_by_sensor_type<Tz>(raw: &RawLogStore, now: &DateTime<Tz>) -> GroupedView
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let window = RecencyWindow::ClockHour;
    let mut view = GroupedView::new();

    for (station_id, station) in &raw.stations {
        let station_name = station.display_name(station_id);

        for sensor in station.sensors.values() {
            let key = sensor.sensor_type.as_deref().unwrap_or(UNTYPED_SENSOR_KEY);
            let rows = view.entry(key.to_string()).or_default();

            rows.extend(
                sensor
                    .logs
                    .values()
                    .filter(|log| window.contains_log(log, now))
                    .map(|log| format_row(log, sensor, station_name, now)),
            );
        }
    }

    sort_groups(&mut view);
    view
}

/// Compute both views for the same instant.
pub fn aggregate<Tz>(raw: &RawLogStore, now: &DateTime<Tz>) -> AggregatedViews
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    AggregatedViews {
        by_station: group_by_station(raw, now),
        by_sensor: group_by_sensor_type(raw, now),
    }
}

/// Render a sensor value with the unit of its type.
///
/// The number is cut to its first five characters, not rounded; a leading
/// minus sign counts towards the five. `23.456` becomes `"23.45 C"` and
/// `-23.456` becomes `"-23.4 C"`.
pub fn format_value(value: f64, sensor_type: &str) -> String {
    // Negative zero renders as "0"
    let value = if value == 0.0 { 0.0 } else { value };
    let text = value.to_string();
    let truncated: String = text.chars().take(VALUE_WIDTH).collect();

    let unit = SensorKind::from_type_name(sensor_type)
        .map(|kind| kind.unit())
        .unwrap_or(FALLBACK_UNIT);

    format!("{truncated} {unit}")
}

/// Render a unix timestamp in the zone of `now`.
pub fn format_date<Tz>(timestamp: i64, now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    match now.timezone().timestamp_opt(timestamp, 0).single() {
        Some(local) => local.format(DATE_FORMAT).to_string(),
        None => String::new(),
    }
}

fn format_row<Tz>(
    log: &LogEntry,
    sensor: &Sensor,
    station_name: &str,
    now: &DateTime<Tz>,
) -> FormattedLogRow
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    // The log's own type wins; the sensor's type covers older logs without one
    let sensor_type = log
        .sensor_type
        .as_deref()
        .or(sensor.sensor_type.as_deref())
        .unwrap_or_default();

    FormattedLogRow {
        date: format_date(log.timestamp, now),
        sensor_name: log.sensor_name.clone(),
        sensor_type: sensor_type.to_string(),
        value: format_value(log.value, sensor_type),
        station: station_name.to_string(),
        timestamp: log.timestamp,
    }
}

/// Most recent first; stable so equal timestamps keep snapshot order.
fn sort_groups(view: &mut GroupedView) {
    for rows in view.values_mut() {
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    }
}
