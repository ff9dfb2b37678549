/// Core data types for the reservoir water-level monitoring service.
///
/// This module defines the shared domain model imported by all other
/// modules. It contains no I/O and no external collaborators, only types
/// and the error taxonomy.

use chrono::{NaiveDate, NaiveDateTime};

// ---------------------------------------------------------------------------
// Measurement types
// ---------------------------------------------------------------------------

/// A single stored water-level measurement.
///
/// Timestamps are timezone-naive local time, exactly as the upstream
/// hydrology API reports them. `timestamp` is unique across the whole
/// store; the `water_level` table enforces this with a UNIQUE constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub id: i32,
    /// Calendar day of the reading (redundant with `timestamp`, kept as a
    /// separate column so per-day grouping stays an indexed query).
    pub date: NaiveDate,
    pub timestamp: NaiveDateTime,
    /// Water level in meters.
    pub value: f64,
    pub unit: String,
}

/// One row of the first-reading-per-day view: the value at the minimum
/// timestamp of each recorded day. Derived on every read, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyReading {
    pub date: NaiveDate,
    pub value: f64,
}

/// A validated reading fetched from the hydrology API, ready for insert.
/// Produced by `ingest::hydro::parse_measure`; not yet assigned a row id.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelReading {
    pub date: NaiveDate,
    pub timestamp: NaiveDateTime,
    pub value: f64,
    pub unit: String,
}

// ---------------------------------------------------------------------------
// KPI snapshot
// ---------------------------------------------------------------------------

/// Trend indicators computed from the full measurement series.
///
/// Each `vs_*` field is the current value minus the nearest reading at or
/// before the corresponding reference instant. A field is `None` when no
/// reading exists that far back — never zero.
#[derive(Debug, Clone, PartialEq)]
pub struct KpiSnapshot {
    pub latest_timestamp: NaiveDateTime,
    /// Current water level in meters.
    pub latest_value: f64,
    pub vs_1d: Option<f64>,
    pub vs_3d: Option<f64>,
    pub vs_1w: Option<f64>,
    /// Average daily change over the trailing week: `vs_1w / 7`.
    pub weekly_trend_rate: Option<f64>,
    pub vs_1m: Option<f64>,
    pub vs_2m: Option<f64>,
    pub vs_1y: Option<f64>,
    pub vs_2y: Option<f64>,
    pub vs_3y: Option<f64>,
}

// ---------------------------------------------------------------------------
// Forecast output
// ---------------------------------------------------------------------------

/// A single projected water level. Only future-dated points are ever
/// returned by the forecast engine; in-sample fit values stay internal.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastPoint {
    pub timestamp: NaiveDateTime,
    pub predicted_value: f64,
}

// ---------------------------------------------------------------------------
// Threshold lines
// ---------------------------------------------------------------------------

/// A named water-level threshold, maintained through the dashboard and
/// consumed here only as commentary-generation input.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdLine {
    pub id: i32,
    pub name: String,
    pub description: String,
    /// Threshold level in meters.
    pub value: f64,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can arise when fetching a day of data from the hydrology
/// API. Scoped to a single day: the sync loop logs these and moves on,
/// leaving the day pending for the next run.
#[derive(Debug, PartialEq)]
pub enum HydroApiError {
    /// Non-2xx HTTP response from the API.
    HttpError(u16),
    /// Transport-level failure (DNS, connect, timeout).
    RequestFailed(String),
    /// The response body could not be deserialized.
    ParseError(String),
}

impl std::fmt::Display for HydroApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HydroApiError::HttpError(code) => write!(f, "HTTP error: {}", code),
            HydroApiError::RequestFailed(msg) => write!(f, "Request failed: {}", msg),
            HydroApiError::ParseError(msg) => write!(f, "Parse error: {}", msg),
        }
    }
}

impl std::error::Error for HydroApiError {}

/// A single fetched record could not be interpreted. Scoped to that
/// record: logged, skipped, and the rest of the day's batch continues.
#[derive(Debug, PartialEq)]
pub enum ValidationError {
    /// The reported value is not a real number.
    BadValue(String),
    /// The date or time field does not match `dd-mm-yyyy` / `HH:MM`.
    BadTimestamp(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::BadValue(raw) => {
                write!(f, "value '{}' is not a number", raw)
            }
            ValidationError::BadTimestamp(raw) => {
                write!(f, "timestamp '{}' is not dd-mm-yyyy HH:MM", raw)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// The ignore-dates configuration could not be read. Callers degrade to
/// an empty list; this never aborts a sync run.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    /// TOML syntax or schema error.
    Malformed(String),
    /// An entry in the list is not a valid `dd-mm-yyyy` date.
    BadDate(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "cannot read config: {}", e),
            ConfigError::Malformed(msg) => write!(f, "malformed config: {}", msg),
            ConfigError::BadDate(raw) => write!(f, "bad ignore date '{}'", raw),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}
