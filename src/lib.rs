//! acme-telemetry - weather-station and activity telemetry backend.
//!
//! This library accepts sensor telemetry from weather stations and
//! accelerometer readings from phones, stores it in a key-path JSON tree and
//! serves grouped views of the stored logs.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       acme-telemetry                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────────┐     │
//! │  │   Server    │──▶│ Classifier  │──▶│   Repository    │     │
//! │  │ (HTTP/CLI)  │   │ (activity)  │   │ (key-path tree) │     │
//! │  └─────────────┘   └─────────────┘   └─────────────────┘     │
//! │         │                                    │               │
//! │         ▼                                    ▼               │
//! │  ┌─────────────┐                     ┌─────────────────┐     │
//! │  │  Simulator  │──▶ IoT hub          │   Aggregator    │     │
//! │  │             │                     │ (station/type)  │     │
//! │  └─────────────┘                     └─────────────────┘     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use acme_telemetry::core::evaluate_activity;
//! use acme_telemetry::model::{AccelerationReading, Activity};
//!
//! let readings = [
//!     AccelerationReading::new(0.0, 0.0, 0.0),
//!     AccelerationReading::new(3.0, 0.0, 0.0),
//! ];
//! let classification = evaluate_activity(&readings, &chrono::Utc::now()).unwrap();
//! assert_eq!(classification.activity, Activity::Walking);
//! ```

pub mod config;
pub mod core;
pub mod model;
pub mod simulator;
pub mod store;

#[cfg(feature = "hub")]
pub mod hub;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError};
pub use core::{
    aggregate, evaluate_activity, format_value, group_by_sensor_type, group_by_station,
    ActivityError, AggregatedViews, FormattedLogRow, GroupedView, RecencyWindow,
};
pub use model::{
    AccelerationReading, Activity, ActivityClassification, ActivityRecord, LogEntry, RawLogStore,
};
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError, TelemetryRepository};

// Hub re-exports (when enabled)
#[cfg(feature = "hub")]
pub use hub::{BlockingHubClient, HubClient, HubConnection, HubError};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
