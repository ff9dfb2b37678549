/// Ignore-dates configuration.
///
/// Days listed in `ignore_dates.toml` are excluded from gap-filling and
/// from the today/last-day refresh — known outages or periods that were
/// intentionally never recorded. The file is reloaded at the start of
/// every sync run; an unreadable or malformed file degrades to an empty
/// list at the call site, it never aborts a run.
///
/// File format:
///
/// ```toml
/// ignore_dates = ["25-12-2022", "01-01-2023"]
/// ```

use chrono::NaiveDate;
use serde::Deserialize;

use crate::model::ConfigError;

pub const IGNORE_DATES_FILE: &str = "./ignore_dates.toml";

/// Date format used by the ignore list and the hydrology API alike.
pub const DAY_FORMAT: &str = "%d-%m-%Y";

#[derive(Debug, Deserialize)]
struct IgnoreDatesFile {
    #[serde(default)]
    ignore_dates: Vec<String>,
}

/// Parse a `dd-mm-yyyy` day string.
pub fn parse_day(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DAY_FORMAT).ok()
}

/// Format a day as `dd-mm-yyyy` for API requests and log lines.
pub fn format_day(day: NaiveDate) -> String {
    day.format(DAY_FORMAT).to_string()
}

/// Load the ignore list from a TOML file. Every entry must be a valid
/// `dd-mm-yyyy` date; a single bad entry fails the whole load so that a
/// typo is noticed instead of silently un-ignoring a day.
pub fn load_ignore_dates(path: &str) -> Result<Vec<NaiveDate>, ConfigError> {
    let raw = std::fs::read_to_string(path)?;
    let file: IgnoreDatesFile =
        toml::from_str(&raw).map_err(|e| ConfigError::Malformed(e.to_string()))?;

    let mut dates = Vec::with_capacity(file.ignore_dates.len());
    for entry in &file.ignore_dates {
        match parse_day(entry) {
            Some(day) => dates.push(day),
            None => return Err(ConfigError::BadDate(entry.clone())),
        }
    }
    Ok(dates)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
