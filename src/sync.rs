/// Ingestion orchestrator.
///
/// Brings the measurement store up to date against the hydrology API:
/// fetches every day that has no recorded measurement, then refreshes
/// today and the most recently recorded day to pick up late-arriving
/// readings. Every fetch is safe to repeat (the store's idempotent
/// insert absorbs duplicates), so any failure simply leaves its day
/// pending for the next run.
///
/// Error scoping is strict: a fetch failure costs one day, a validation
/// failure costs one record, and neither aborts the batch. Only a
/// storage-level error propagates.
///
/// # Clock and config injection
/// `synchronize_at` takes `today` and the ignore list as parameters
/// instead of reading the wall clock and the config file, keeping
/// orchestration decisions deterministic in tests. `synchronize` is the
/// production wrapper that supplies both.

use chrono::{Local, NaiveDate};
use rand::Rng;
use std::time::Duration;

use crate::config::{self, format_day, IGNORE_DATES_FILE};
use crate::db::WaterLevelStore;
use crate::ingest::hydro::{self, MeasurementSource};
use crate::logging::{self, DataSource};

/// First day with upstream data for the monitored site.
pub fn default_start_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2021, 7, 7).expect("valid fixed start date")
}

// ---------------------------------------------------------------------------
// Outcome accounting
// ---------------------------------------------------------------------------

/// Tallies for one sync run, reported through the sync summary log line.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    /// Days for which a fetch was attempted (gap fill + refreshes).
    pub days_attempted: usize,
    /// Days whose fetch failed; they stay pending for the next run.
    pub days_failed: usize,
    /// New rows written to the store.
    pub rows_inserted: usize,
    /// Rows skipped because their timestamp was already recorded.
    pub rows_skipped: usize,
    /// Records dropped by per-record validation.
    pub rows_invalid: usize,
}

#[derive(Debug, Default)]
struct DayResult {
    fetch_ok: bool,
    inserted: usize,
    skipped: usize,
    invalid: usize,
}

// ---------------------------------------------------------------------------
// Pure helpers
// ---------------------------------------------------------------------------

/// Drop every day that appears in the ignore list, preserving order.
pub fn filter_ignored(days: Vec<NaiveDate>, ignored: &[NaiveDate]) -> Vec<NaiveDate> {
    days.into_iter().filter(|d| !ignored.contains(d)).collect()
}

/// Courtesy throttle between consecutive API fetches: 100-500 ms,
/// randomized so scheduled runs don't hit the upstream in lockstep.
fn pacing_delay() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(100..=500))
}

// ---------------------------------------------------------------------------
// Per-day fetch + upsert
// ---------------------------------------------------------------------------

/// Fetch one day from the source and upsert every valid record. Fetch and
/// validation failures are logged here and absorbed; only storage errors
/// bubble up.
fn fetch_and_upsert_day(
    store: &mut WaterLevelStore,
    source: &dyn MeasurementSource,
    day: NaiveDate,
) -> Result<DayResult, postgres::Error> {
    let day_str = format_day(day);
    let mut result = DayResult::default();

    let raw_measures = match source.fetch_day(day) {
        Ok(measures) => measures,
        Err(e) => {
            logging::log_hydro_failure(&day_str, "day fetch", &e);
            return Ok(result);
        }
    };
    result.fetch_ok = true;

    if raw_measures.is_empty() {
        logging::info(DataSource::Hydro, Some(&day_str), "no measures reported");
        return Ok(result);
    }

    for raw in &raw_measures {
        let reading = match hydro::parse_measure(raw) {
            Ok(reading) => reading,
            Err(e) => {
                logging::warn(
                    DataSource::Hydro,
                    Some(&day_str),
                    &format!("record dropped: {}", e),
                );
                result.invalid += 1;
                continue;
            }
        };

        if store.insert_measurement(
            reading.date,
            reading.timestamp,
            reading.value,
            &reading.unit,
        )? {
            result.inserted += 1;
        } else {
            result.skipped += 1;
        }
    }

    logging::info(
        DataSource::Hydro,
        Some(&day_str),
        &format!(
            "{} new records ({} already stored, {} invalid)",
            result.inserted, result.skipped, result.invalid
        ),
    );
    Ok(result)
}

// ---------------------------------------------------------------------------
// Synchronization
// ---------------------------------------------------------------------------

/// Run one full sync against the wall clock, with pacing enabled and the
/// ignore list loaded from its default path. An unreadable or malformed
/// list degrades to empty with a warning; it never aborts the run.
pub fn synchronize(
    store: &mut WaterLevelStore,
    source: &dyn MeasurementSource,
    start_date: NaiveDate,
) -> Result<SyncOutcome, postgres::Error> {
    let ignored = match config::load_ignore_dates(IGNORE_DATES_FILE) {
        Ok(dates) => dates,
        Err(e) => {
            logging::warn(
                DataSource::Config,
                None,
                &format!("ignore list unavailable, treating as empty: {}", e),
            );
            Vec::new()
        }
    };
    synchronize_at(
        store,
        source,
        start_date,
        Local::now().date_naive(),
        &ignored,
        true,
    )
}

/// Sync with an explicit `today` and ignore list. Steps:
/// 1. gap-fill every missing day in `[start_date, today]` minus the
///    ignore list;
/// 2. refresh today unconditionally (mid-day data is always incomplete)
///    unless ignored;
/// 3. refresh the last recorded day if it differs from today and is not
///    ignored; the previous run may have ended mid-day.
///
/// The today/last-day overlap needs no special case: when they coincide
/// the second refresh is skipped, and any duplicate fetch deduplicates
/// through the idempotent insert anyway.
pub fn synchronize_at(
    store: &mut WaterLevelStore,
    source: &dyn MeasurementSource,
    start_date: NaiveDate,
    today: NaiveDate,
    ignored: &[NaiveDate],
    pace: bool,
) -> Result<SyncOutcome, postgres::Error> {
    let mut outcome = SyncOutcome::default();

    let missing = store.missing_days(start_date, today)?;
    let pending = filter_ignored(missing, ignored);
    logging::info(
        DataSource::System,
        None,
        &format!("{} missing day(s) to fill", pending.len()),
    );

    let mut record = |outcome: &mut SyncOutcome, day_result: &DayResult| {
        outcome.days_attempted += 1;
        if !day_result.fetch_ok {
            outcome.days_failed += 1;
        }
        outcome.rows_inserted += day_result.inserted;
        outcome.rows_skipped += day_result.skipped;
        outcome.rows_invalid += day_result.invalid;
    };

    for day in &pending {
        let day_result = fetch_and_upsert_day(store, source, *day)?;
        record(&mut outcome, &day_result);
        if pace {
            std::thread::sleep(pacing_delay());
        }
    }

    // Today's data is necessarily incomplete mid-day; always refresh it
    // even when it is not in the missing set.
    if !ignored.contains(&today) {
        let day_result = fetch_and_upsert_day(store, source, today)?;
        record(&mut outcome, &day_result);
    } else {
        logging::info(
            DataSource::System,
            Some(&format_day(today)),
            "today is in the ignore list, skipping refresh",
        );
    }

    // The last sync may have ended mid-day; readings recorded upstream
    // since then only show up by re-fetching that day.
    if let Some(last_day) = store.last_recorded_day()? {
        if last_day != today && !ignored.contains(&last_day) {
            logging::info(
                DataSource::System,
                Some(&format_day(last_day)),
                "refreshing last recorded day",
            );
            let day_result = fetch_and_upsert_day(store, source, last_day)?;
            record(&mut outcome, &day_result);
        }
    }

    logging::log_sync_summary(
        outcome.days_attempted,
        outcome.days_failed,
        outcome.rows_inserted,
    );
    Ok(outcome)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
