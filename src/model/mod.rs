//! Data model for the telemetry backend.
//!
//! Readings and activities from the phone accelerometer, plus the
//! station → sensor → log tree stored for the weather stations.

pub mod types;

// Re-export commonly used types
pub use types::{
    AccelerationReading, AccelerationSample, Activity, ActivityClassification, ActivityRecord,
    ActivitySource, LogEntry, RawLogStore, Sensor, SensorKind, Station,
};
