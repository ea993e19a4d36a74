//! Core telemetry logic.
//!
//! This module contains:
//! - Activity classification from accelerometer readings
//! - Recency windows for filtering logs
//! - Aggregation of the stored log tree into display views

pub mod activity;
pub mod aggregation;
pub mod windowing;

// Re-export commonly used types
pub use activity::{evaluate_activity, ActivityError, ReadingPosition};
pub use aggregation::{
    aggregate, format_value, group_by_sensor_type, group_by_station, AggregatedViews,
    FormattedLogRow, GroupedView,
};
pub use windowing::RecencyWindow;
