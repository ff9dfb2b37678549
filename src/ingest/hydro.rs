/// Hydrology API client.
///
/// Retrieves water-level readings for the monitored reservoir from the
/// external hydrology service. Requests are keyed by calendar day in
/// `dd-mm-yyyy` form; the response lists every reading recorded that day:
///
/// ```json
/// { "chroniques": [ { "date": "07-07-2021", "heure": "08:00",
///                     "valeur": 642.18, "unite": "mNGF" }, ... ] }
/// ```
///
/// The `valeur` field arrives as either a JSON number or a numeric
/// string depending on the day, so validation happens per record in
/// `parse_measure` rather than in the deserializer.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use std::time::Duration;

use crate::config::format_day;
use crate::model::{HydroApiError, LevelReading, ValidationError};

const HYDRO_BASE_URL: &str = "https://data.niv-eau.fr";

/// Upstream identifier of the one monitored site.
const HYDRO_SITE_ID: &str = "198";

/// Environment variable holding the API access token, sent as the
/// service's custom auth header when present.
const HYDRO_TOKEN_ENV: &str = "HYDRO_API_TOKEN";
const HYDRO_AUTH_HEADER: &str = "laetis";

const REQUEST_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// API Response Structures
// ============================================================================

/// One day's response from the hydrology API.
#[derive(Debug, Deserialize)]
pub struct HydroDayResponse {
    #[serde(default)]
    pub chroniques: Vec<RawMeasure>,
}

/// A single reading as reported on the wire, unvalidated.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RawMeasure {
    /// `dd-mm-yyyy`
    pub date: String,
    /// `HH:MM`
    #[serde(rename = "heure")]
    pub time: String,
    /// Number or numeric string.
    #[serde(rename = "valeur")]
    pub value: serde_json::Value,
    #[serde(rename = "unite", default)]
    pub unit: String,
}

// ============================================================================
// Measurement source seam
// ============================================================================

/// One day's worth of readings from the external source. The sync
/// orchestrator depends on this trait rather than on a concrete HTTP
/// client, so it can be driven by an in-memory fake in tests.
pub trait MeasurementSource {
    fn fetch_day(&self, day: NaiveDate) -> Result<Vec<RawMeasure>, HydroApiError>;
}

// ============================================================================
// HTTP client
// ============================================================================

/// Build the blocking HTTP client used for all API calls. The timeout is
/// mandatory — a hung fetch must not stall the whole sync run.
pub fn build_client() -> Result<reqwest::blocking::Client, reqwest::Error> {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
        .build()
}

/// Real API client. Reads the access token from the environment once at
/// construction; requests go out unauthenticated if it is unset.
pub struct HydroApiClient {
    http: reqwest::blocking::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HydroApiClient {
    pub fn new(http: reqwest::blocking::Client) -> Self {
        HydroApiClient {
            http,
            base_url: HYDRO_BASE_URL.to_string(),
            auth_token: std::env::var(HYDRO_TOKEN_ENV).ok(),
        }
    }

    /// Override the endpoint, for integration tests against a local stub.
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn day_url(&self, day: NaiveDate) -> String {
        format!(
            "{}/hydro/lieu/{}/{}",
            self.base_url,
            HYDRO_SITE_ID,
            format_day(day)
        )
    }
}

impl MeasurementSource for HydroApiClient {
    fn fetch_day(&self, day: NaiveDate) -> Result<Vec<RawMeasure>, HydroApiError> {
        let mut request = self.http.get(self.day_url(day));
        if let Some(token) = &self.auth_token {
            request = request.header(HYDRO_AUTH_HEADER, token);
        }

        let response = request
            .send()
            .map_err(|e| HydroApiError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(HydroApiError::HttpError(response.status().as_u16()));
        }

        let body: HydroDayResponse = response
            .json()
            .map_err(|e| HydroApiError::ParseError(e.to_string()))?;

        Ok(body.chroniques)
    }
}

// ============================================================================
// Per-record validation
// ============================================================================

/// Interpret the wire `valeur` as a real number.
fn parse_value(value: &serde_json::Value) -> Result<f64, ValidationError> {
    match value {
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ValidationError::BadValue(n.to_string())),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ValidationError::BadValue(s.clone())),
        other => Err(ValidationError::BadValue(other.to_string())),
    }
}

/// Validate one wire record into a reading ready for insert. Failures are
/// scoped to this record; the caller logs and continues with the rest of
/// the day's batch.
pub fn parse_measure(raw: &RawMeasure) -> Result<LevelReading, ValidationError> {
    let combined = format!("{} {}", raw.date.trim(), raw.time.trim());
    let timestamp = NaiveDateTime::parse_from_str(&combined, "%d-%m-%Y %H:%M")
        .map_err(|_| ValidationError::BadTimestamp(combined.clone()))?;

    let value = parse_value(&raw.value)?;

    Ok(LevelReading {
        date: timestamp.date(),
        timestamp,
        value,
        unit: raw.unit.clone(),
    })
}

// ============================================================================
// Tests
// ============================================================================
