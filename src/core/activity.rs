//! Activity classification from accelerometer readings.
//!
//! Two consecutive readings are reduced to their magnitudes; the absolute
//! change between them decides whether the user is still, walking or running.

use crate::model::{AccelerationReading, Activity, ActivityClassification};
use chrono::{DateTime, TimeZone};

/// Magnitude change at which movement counts as walking.
pub const WALKING_THRESHOLD: f64 = 2.0;

/// Magnitude change at which movement counts as running.
pub const RUNNING_THRESHOLD: f64 = 4.0;

/// Number of readings a classification consumes.
pub const READINGS_PER_EVALUATION: usize = 2;

/// Which of the two readings is being referred to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadingPosition {
    First,
    Second,
}

impl std::fmt::Display for ReadingPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadingPosition::First => f.write_str("first"),
            ReadingPosition::Second => f.write_str("second"),
        }
    }
}

/// Classification errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityError {
    /// One of x, y or z is absent on a reading
    MissingCoordinate(ReadingPosition),
    /// Anything other than exactly two readings was supplied
    InvalidReadingCount(usize),
}

impl ActivityError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            ActivityError::MissingCoordinate(_) => "MISSING_COORDINATE",
            ActivityError::InvalidReadingCount(_) => "INVALID_READING_COUNT",
        }
    }
}

impl std::fmt::Display for ActivityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivityError::MissingCoordinate(position) => {
                write!(f, "missing one coordinate in {position} reading")
            }
            ActivityError::InvalidReadingCount(count) => write!(
                f,
                "expected {READINGS_PER_EVALUATION} readings, got {count}"
            ),
        }
    }
}

impl std::error::Error for ActivityError {}

/// Map a magnitude change onto an activity label.
pub fn classify_delta(delta: f64) -> Activity {
    if delta < WALKING_THRESHOLD {
        Activity::Still
    } else if delta < RUNNING_THRESHOLD {
        Activity::Walking
    } else {
        Activity::Running
    }
}

/// Classify the user's activity from two consecutive readings.
///
/// The result carries the second reading's coordinates and `now` as its
/// timestamp. The first reading only contributes to the magnitude change.
pub fn evaluate_activity<Tz: TimeZone>(
    readings: &[AccelerationReading],
    now: &DateTime<Tz>,
) -> Result<ActivityClassification, ActivityError> {
    let [first, second] = readings else {
        return Err(ActivityError::InvalidReadingCount(readings.len()));
    };

    let first = first
        .complete()
        .ok_or(ActivityError::MissingCoordinate(ReadingPosition::First))?;
    let second = second
        .complete()
        .ok_or(ActivityError::MissingCoordinate(ReadingPosition::Second))?;

    let first_magnitude = first.magnitude();
    let second_magnitude = second.magnitude();
    let delta = (first_magnitude - second_magnitude).abs();

    tracing::debug!(first_magnitude, second_magnitude, delta, "evaluated readings");

    Ok(ActivityClassification {
        x: second.x,
        y: second.y,
        z: second.z,
        timestamp: now.timestamp(),
        activity: classify_delta(delta),
    })
}
