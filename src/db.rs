/// Measurement store backed by PostgreSQL.
///
/// Owns the one shared mutable resource in the service: the `water_level`
/// table. The UNIQUE constraint on `measured_at` is the storage-boundary
/// guarantee that makes every insert idempotent: overlapping sync runs
/// cannot create duplicate rows even without external locking.
///
/// The handle is explicit and passed to whoever needs it; there is no
/// ambient global connection. Open once per process, drop on shutdown.

use chrono::{NaiveDate, NaiveDateTime};
use postgres::{Client, NoTls};
use std::io::Write;

use crate::model::{DailyReading, Measurement, ThresholdLine};

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Idempotent schema setup, run once at startup before any component
/// touches the store. `measured_at` carries the uniqueness invariant.
const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS water_level (
    id          SERIAL PRIMARY KEY,
    date_event  DATE NOT NULL,
    measured_at TIMESTAMP NOT NULL,
    value       DOUBLE PRECISION NOT NULL,
    unit        TEXT NOT NULL,
    UNIQUE (measured_at)
);

CREATE INDEX IF NOT EXISTS water_level_date_idx
    ON water_level (date_event);

CREATE TABLE IF NOT EXISTS commentary_calls (
    id                SERIAL PRIMARY KEY,
    category          TEXT NOT NULL,
    model             TEXT NOT NULL,
    prompt            TEXT NOT NULL,
    response          TEXT NOT NULL,
    prompt_tokens     INT NOT NULL,
    completion_tokens INT NOT NULL,
    total_tokens      INT NOT NULL,
    created_at        TIMESTAMP NOT NULL DEFAULT localtimestamp
);

CREATE INDEX IF NOT EXISTS commentary_calls_category_idx
    ON commentary_calls (category, created_at DESC);

CREATE TABLE IF NOT EXISTS threshold_line (
    id          SERIAL PRIMARY KEY,
    name        TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    value       DOUBLE PRECISION NOT NULL,
    is_deleted  BOOLEAN NOT NULL DEFAULT FALSE,
    created_at  TIMESTAMP NOT NULL DEFAULT localtimestamp,
    deleted_at  TIMESTAMP
);
";

// ---------------------------------------------------------------------------
// Store handle
// ---------------------------------------------------------------------------

pub struct WaterLevelStore {
    client: Client,
}

impl WaterLevelStore {
    /// Connect to the database. A failure here is a construction-level
    /// fault; the caller is expected to terminate, not retry.
    pub fn connect(database_url: &str) -> Result<Self, postgres::Error> {
        let client = Client::connect(database_url, NoTls)?;
        Ok(WaterLevelStore { client })
    }

    /// Create all tables and indexes if they do not exist yet.
    pub fn init_schema(&mut self) -> Result<(), postgres::Error> {
        self.client.batch_execute(SCHEMA_SQL)
    }

    // -----------------------------------------------------------------------
    // Measurements
    // -----------------------------------------------------------------------

    /// True iff a measurement with this exact timestamp is stored.
    pub fn exists(&mut self, timestamp: NaiveDateTime) -> Result<bool, postgres::Error> {
        let row = self.client.query_opt(
            "SELECT 1 FROM water_level WHERE measured_at = $1",
            &[&timestamp],
        )?;
        Ok(row.is_some())
    }

    /// Insert a measurement unless one already exists at that timestamp.
    /// Returns whether a row was actually inserted. The ON CONFLICT clause
    /// makes this atomic; no separate existence check races against it.
    pub fn insert_measurement(
        &mut self,
        date: NaiveDate,
        timestamp: NaiveDateTime,
        value: f64,
        unit: &str,
    ) -> Result<bool, postgres::Error> {
        let inserted = self.client.execute(
            "INSERT INTO water_level (date_event, measured_at, value, unit)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (measured_at) DO NOTHING",
            &[&date, &timestamp, &value, &unit],
        )?;
        Ok(inserted > 0)
    }

    /// Full series, ascending by timestamp.
    pub fn all_measurements(&mut self) -> Result<Vec<Measurement>, postgres::Error> {
        let rows = self.client.query(
            "SELECT id, date_event, measured_at, value, unit
             FROM water_level
             ORDER BY measured_at ASC",
            &[],
        )?;
        Ok(rows
            .iter()
            .map(|row| Measurement {
                id: row.get(0),
                date: row.get(1),
                timestamp: row.get(2),
                value: row.get(3),
                unit: row.get(4),
            })
            .collect())
    }

    /// First reading of each recorded day, ascending by date.
    ///
    /// DISTINCT ON picks the row with the minimum timestamp per day; the
    /// trailing `id` sort breaks the (constraint-impossible) tie of two
    /// rows sharing a day's minimum timestamp in favor of the earliest
    /// insert. Recomputed on every call, never cached across writes.
    pub fn first_per_day(&mut self) -> Result<Vec<DailyReading>, postgres::Error> {
        let rows = self.client.query(
            "SELECT DISTINCT ON (date_event) date_event, value
             FROM water_level
             ORDER BY date_event ASC, measured_at ASC, id ASC",
            &[],
        )?;
        Ok(rows
            .iter()
            .map(|row| DailyReading {
                date: row.get(0),
                value: row.get(1),
            })
            .collect())
    }

    /// Most recent calendar day with at least one measurement.
    pub fn last_recorded_day(&mut self) -> Result<Option<NaiveDate>, postgres::Error> {
        let row = self
            .client
            .query_one("SELECT MAX(date_event) FROM water_level", &[])?;
        Ok(row.get(0))
    }

    // -----------------------------------------------------------------------
    // Gap detection
    // -----------------------------------------------------------------------

    /// Calendar days in `[start, today]` with zero recorded measurements,
    /// ascending. Runs entirely in SQL: a generated date range anti-joined
    /// against the distinct recorded days, so cost is linear in the number
    /// of days regardless of how many measurements exist.
    pub fn missing_days(
        &mut self,
        start: NaiveDate,
        today: NaiveDate,
    ) -> Result<Vec<NaiveDate>, postgres::Error> {
        let rows = self.client.query(
            "SELECT d.day::date
             FROM generate_series($1::date, $2::date, interval '1 day') AS d(day)
             WHERE d.day::date NOT IN (SELECT DISTINCT date_event FROM water_level)
             ORDER BY d.day ASC",
            &[&start, &today],
        )?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    // -----------------------------------------------------------------------
    // Commentary call audit
    // -----------------------------------------------------------------------

    /// Record one commentary generation. The audit trail exists solely to
    /// enforce the per-category rate limits.
    #[allow(clippy::too_many_arguments)]
    pub fn log_commentary_call(
        &mut self,
        category: &str,
        model: &str,
        prompt: &str,
        response: &str,
        prompt_tokens: i32,
        completion_tokens: i32,
        total_tokens: i32,
        created_at: NaiveDateTime,
    ) -> Result<(), postgres::Error> {
        self.client.execute(
            "INSERT INTO commentary_calls
               (category, model, prompt, response,
                prompt_tokens, completion_tokens, total_tokens, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            &[
                &category,
                &model,
                &prompt,
                &response,
                &prompt_tokens,
                &completion_tokens,
                &total_tokens,
                &created_at,
            ],
        )?;
        Ok(())
    }

    /// Timestamp and text of the most recent call for a category.
    pub fn last_commentary_call(
        &mut self,
        category: &str,
    ) -> Result<Option<(NaiveDateTime, String)>, postgres::Error> {
        let row = self.client.query_opt(
            "SELECT created_at, response
             FROM commentary_calls
             WHERE category = $1
             ORDER BY created_at DESC
             LIMIT 1",
            &[&category],
        )?;
        Ok(row.map(|r| (r.get(0), r.get(1))))
    }

    /// Number of calls already made for a category on the given day.
    pub fn commentary_calls_on(
        &mut self,
        category: &str,
        day: NaiveDate,
    ) -> Result<i64, postgres::Error> {
        let row = self.client.query_one(
            "SELECT COUNT(*) FROM commentary_calls
             WHERE category = $1 AND created_at::date = $2",
            &[&category, &day],
        )?;
        Ok(row.get(0))
    }

    // -----------------------------------------------------------------------
    // Threshold lines
    // -----------------------------------------------------------------------

    /// All non-deleted threshold lines, descending by level.
    pub fn threshold_lines(&mut self) -> Result<Vec<ThresholdLine>, postgres::Error> {
        let rows = self.client.query(
            "SELECT id, name, description, value
             FROM threshold_line
             WHERE is_deleted = FALSE
             ORDER BY value DESC",
            &[],
        )?;
        Ok(rows
            .iter()
            .map(|row| ThresholdLine {
                id: row.get(0),
                name: row.get(1),
                description: row.get(2),
                value: row.get(3),
            })
            .collect())
    }

    pub fn create_threshold_line(
        &mut self,
        name: &str,
        description: &str,
        value: f64,
    ) -> Result<(), postgres::Error> {
        self.client.execute(
            "INSERT INTO threshold_line (name, description, value)
             VALUES ($1, $2, $3)",
            &[&name, &description, &value],
        )?;
        Ok(())
    }

    /// Threshold lines are never hard-deleted; the dashboard expects
    /// history to survive.
    pub fn soft_delete_threshold_line(&mut self, id: i32) -> Result<(), postgres::Error> {
        self.client.execute(
            "UPDATE threshold_line
             SET is_deleted = TRUE, deleted_at = localtimestamp
             WHERE id = $1",
            &[&id],
        )?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Export
    // -----------------------------------------------------------------------

    /// Write the full series as CSV, ascending by timestamp.
    pub fn export_csv<W: Write>(&mut self, out: &mut W) -> Result<(), Box<dyn std::error::Error>> {
        writeln!(out, "id,date_event,measured_at,value,unit")?;
        for m in self.all_measurements()? {
            writeln!(
                out,
                "{},{},{},{},{}",
                m.id,
                m.date.format("%Y-%m-%d"),
                m.timestamp.format("%Y-%m-%d %H:%M:%S"),
                m.value,
                m.unit
            )?;
        }
        Ok(())
    }
}
