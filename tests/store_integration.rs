/// Integration tests for the measurement store and the sync pipeline.
///
/// These tests verify:
/// 1. Idempotent insert through the UNIQUE(measured_at) constraint
/// 2. First-per-day and gap-detection read views
/// 3. Full sync loop against a fake measurement source (failure isolation,
///    ignore list, today/last-day refresh)
/// 4. Commentary rate limiting against the audit table
///
/// Prerequisites:
/// - PostgreSQL running and reachable
/// - DATABASE_URL set in .env
///
/// They are #[ignore]d so normal CI builds don't depend on a database.
/// Run with: cargo test --test store_integration -- --ignored --test-threads=1
///
/// Test rows live far in the past (the 1990s) so they can never collide
/// with real site data; each test cleans that range before it starts.

use chrono::{NaiveDate, NaiveDateTime};
use postgres::{Client, NoTls};
use std::cell::RefCell;
use std::collections::HashMap;
use std::env;

use levmon_service::commentary::{self, GeneratedText, TextGenerator};
use levmon_service::db::WaterLevelStore;
use levmon_service::ingest::hydro::{MeasurementSource, RawMeasure};
use levmon_service::model::{HydroApiError, KpiSnapshot};
use levmon_service::sync;

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn database_url() -> String {
    dotenv::dotenv().ok();
    env::var("DATABASE_URL").expect("DATABASE_URL must be set")
}

fn setup_store() -> WaterLevelStore {
    let mut store =
        WaterLevelStore::connect(&database_url()).expect("Failed to connect to test database");
    store.init_schema().expect("Schema init failed");
    store
}

/// Raw client for cleanup; the store itself deliberately has no delete.
fn raw_client() -> Client {
    Client::connect(&database_url(), NoTls).expect("Failed to connect for cleanup")
}

fn cleanup_test_data(client: &mut Client) {
    let _ = client.execute(
        "DELETE FROM water_level WHERE date_event BETWEEN '1990-01-01' AND '1999-12-31'",
        &[],
    );
    let _ = client.execute(
        "DELETE FROM commentary_calls WHERE model = 'fake-test-model'",
        &[],
    );
}

/// The throttle keys off the newest audit row of a category, so the
/// commentary tests need their category empty, not just free of fake
/// rows. Only run these against a dedicated test database.
fn reset_commentary(client: &mut Client) {
    let _ = client.execute(
        "DELETE FROM commentary_calls WHERE category IN ('trend', 'annual_comparison')",
        &[],
    );
}

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn at(day: NaiveDate, h: u32, min: u32) -> NaiveDateTime {
    day.and_hms_opt(h, min, 0).unwrap()
}

fn stored_count(client: &mut Client, day: NaiveDate) -> i64 {
    client
        .query_one(
            "SELECT COUNT(*) FROM water_level WHERE date_event = $1",
            &[&day],
        )
        .map(|row| row.get(0))
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Fake collaborators
// ---------------------------------------------------------------------------

/// In-memory measurement source: canned readings per day, with optional
/// per-day failures. Counts fetches so tests can assert on call volume.
struct FakeSource {
    days: HashMap<NaiveDate, Vec<RawMeasure>>,
    failing_days: Vec<NaiveDate>,
    fetches: RefCell<Vec<NaiveDate>>,
}

impl FakeSource {
    fn new() -> Self {
        FakeSource {
            days: HashMap::new(),
            failing_days: Vec::new(),
            fetches: RefCell::new(Vec::new()),
        }
    }

    fn with_day(mut self, day: NaiveDate, readings: &[(&str, f64)]) -> Self {
        let measures = readings
            .iter()
            .map(|(time, value)| RawMeasure {
                date: day.format("%d-%m-%Y").to_string(),
                time: time.to_string(),
                value: serde_json::json!(value),
                unit: "mNGF".to_string(),
            })
            .collect();
        self.days.insert(day, measures);
        self
    }

    fn failing_on(mut self, day: NaiveDate) -> Self {
        self.failing_days.push(day);
        self
    }
}

impl MeasurementSource for FakeSource {
    fn fetch_day(&self, day: NaiveDate) -> Result<Vec<RawMeasure>, HydroApiError> {
        self.fetches.borrow_mut().push(day);
        if self.failing_days.contains(&day) {
            return Err(HydroApiError::HttpError(500));
        }
        Ok(self.days.get(&day).cloned().unwrap_or_default())
    }
}

/// Text generator that returns a numbered response per call.
struct FakeGenerator {
    calls: RefCell<usize>,
}

impl FakeGenerator {
    fn new() -> Self {
        FakeGenerator {
            calls: RefCell::new(0),
        }
    }

    fn call_count(&self) -> usize {
        *self.calls.borrow()
    }
}

impl TextGenerator for FakeGenerator {
    fn generate(
        &self,
        _system: &str,
        _prompt: &str,
    ) -> Result<GeneratedText, Box<dyn std::error::Error>> {
        *self.calls.borrow_mut() += 1;
        Ok(GeneratedText {
            model: "fake-test-model".to_string(),
            content: format!("generated text #{}", self.calls.borrow()),
            prompt_tokens: 100,
            completion_tokens: 20,
            total_tokens: 120,
        })
    }
}

fn test_snapshot() -> KpiSnapshot {
    KpiSnapshot {
        latest_timestamp: at(d(1995, 6, 10), 8, 0),
        latest_value: 641.5,
        vs_1d: Some(-0.02),
        vs_3d: Some(-0.05),
        vs_1w: Some(-0.2),
        weekly_trend_rate: Some(-0.2 / 7.0),
        vs_1m: None,
        vs_2m: None,
        vs_1y: None,
        vs_2y: None,
        vs_3y: None,
    }
}

// ---------------------------------------------------------------------------
// 1. Store invariants
// ---------------------------------------------------------------------------

#[test]
#[ignore] // Requires PostgreSQL - see module header
fn test_insert_is_idempotent() {
    let mut store = setup_store();
    let mut cleanup = raw_client();
    cleanup_test_data(&mut cleanup);

    let day = d(1995, 3, 1);
    let timestamp = at(day, 8, 0);

    let first = store
        .insert_measurement(day, timestamp, 641.0, "mNGF")
        .unwrap();
    let second = store
        .insert_measurement(day, timestamp, 999.0, "mNGF")
        .unwrap();

    assert!(first, "first insert should report inserted");
    assert!(!second, "duplicate timestamp must report not-inserted");
    assert_eq!(stored_count(&mut cleanup, day), 1);

    // The original value survives; duplicates never overwrite.
    let series = store.all_measurements().unwrap();
    let row = series.iter().find(|m| m.timestamp == timestamp).unwrap();
    assert_eq!(row.value, 641.0);

    cleanup_test_data(&mut cleanup);
}

#[test]
#[ignore] // Requires PostgreSQL - see module header
fn test_exists_reflects_inserts() {
    let mut store = setup_store();
    let mut cleanup = raw_client();
    cleanup_test_data(&mut cleanup);

    let timestamp = at(d(1995, 3, 2), 14, 30);
    assert!(!store.exists(timestamp).unwrap());
    store
        .insert_measurement(d(1995, 3, 2), timestamp, 640.8, "mNGF")
        .unwrap();
    assert!(store.exists(timestamp).unwrap());

    cleanup_test_data(&mut cleanup);
}

#[test]
#[ignore] // Requires PostgreSQL - see module header
fn test_first_per_day_picks_earliest_reading() {
    let mut store = setup_store();
    let mut cleanup = raw_client();
    cleanup_test_data(&mut cleanup);

    let d1 = d(1995, 4, 1);
    let d2 = d(1995, 4, 2);
    store.insert_measurement(d1, at(d1, 14, 0), 12.0, "m").unwrap();
    store.insert_measurement(d1, at(d1, 8, 0), 10.0, "m").unwrap();
    store.insert_measurement(d2, at(d2, 9, 0), 11.0, "m").unwrap();

    let daily: Vec<_> = store
        .first_per_day()
        .unwrap()
        .into_iter()
        .filter(|r| r.date >= d1 && r.date <= d2)
        .collect();

    assert_eq!(daily.len(), 2);
    assert_eq!((daily[0].date, daily[0].value), (d1, 10.0));
    assert_eq!((daily[1].date, daily[1].value), (d2, 11.0));

    cleanup_test_data(&mut cleanup);
}

#[test]
#[ignore] // Requires PostgreSQL - see module header
fn test_missing_days_gap_completeness() {
    let mut store = setup_store();
    let mut cleanup = raw_client();
    cleanup_test_data(&mut cleanup);

    // Measurements on D1 and D3 inside [D1, D5]: the gaps are exactly
    // D2, D4 and D5.
    let d1 = d(1995, 5, 1);
    store.insert_measurement(d1, at(d1, 8, 0), 1.0, "m").unwrap();
    let d3 = d(1995, 5, 3);
    store.insert_measurement(d3, at(d3, 8, 0), 3.0, "m").unwrap();

    let missing = store.missing_days(d1, d(1995, 5, 5)).unwrap();
    assert_eq!(missing, vec![d(1995, 5, 2), d(1995, 5, 4), d(1995, 5, 5)]);

    cleanup_test_data(&mut cleanup);
}

// ---------------------------------------------------------------------------
// 2. Sync pipeline with a fake source
// ---------------------------------------------------------------------------

#[test]
#[ignore] // Requires PostgreSQL - see module header
fn test_sync_fills_gaps_and_tolerates_day_failures() {
    let mut store = setup_store();
    let mut cleanup = raw_client();
    cleanup_test_data(&mut cleanup);

    let start = d(1996, 1, 1);
    let today = d(1996, 1, 4);
    let source = FakeSource::new()
        .with_day(d(1996, 1, 1), &[("08:00", 640.0), ("14:00", 640.2)])
        .with_day(d(1996, 1, 2), &[("08:00", 640.4)])
        .failing_on(d(1996, 1, 3))
        .with_day(today, &[("08:00", 640.8)]);

    let outcome = sync::synchronize_at(&mut store, &source, start, today, &[], false).unwrap();

    // Day 3 failed but days 1, 2 and 4 landed.
    assert_eq!(outcome.days_failed, 1);
    assert_eq!(outcome.rows_inserted, 4);
    assert_eq!(stored_count(&mut cleanup, d(1996, 1, 1)), 2);
    assert_eq!(stored_count(&mut cleanup, d(1996, 1, 3)), 0);
    assert_eq!(stored_count(&mut cleanup, today), 1);

    // The failed day is self-healing: a second run retries it.
    let missing = store.missing_days(start, today).unwrap();
    assert_eq!(missing, vec![d(1996, 1, 3)]);

    cleanup_test_data(&mut cleanup);
}

#[test]
#[ignore] // Requires PostgreSQL - see module header
fn test_sync_rerun_refreshes_today_without_duplicates() {
    let mut store = setup_store();
    let mut cleanup = raw_client();
    cleanup_test_data(&mut cleanup);

    let start = d(1996, 2, 1);
    let today = d(1996, 2, 2);
    let source = FakeSource::new()
        .with_day(start, &[("08:00", 640.0)])
        .with_day(today, &[("08:00", 640.5), ("12:00", 640.6)]);

    let first = sync::synchronize_at(&mut store, &source, start, today, &[], false).unwrap();
    assert_eq!(first.rows_inserted, 3);

    // Second run: nothing is missing, but today is still re-fetched and
    // every already-stored row deduplicates through the insert.
    let second = sync::synchronize_at(&mut store, &source, start, today, &[], false).unwrap();
    assert_eq!(second.rows_inserted, 0);
    assert_eq!(second.rows_skipped, 2);
    assert_eq!(stored_count(&mut cleanup, today), 2);

    assert!(
        source.fetches.borrow().iter().filter(|f| **f == today).count() >= 2,
        "today must be re-fetched on every run"
    );

    cleanup_test_data(&mut cleanup);
}

#[test]
#[ignore] // Requires PostgreSQL - see module header
fn test_sync_drops_invalid_records_but_keeps_the_rest() {
    let mut store = setup_store();
    let mut cleanup = raw_client();
    cleanup_test_data(&mut cleanup);

    let today = d(1996, 3, 1);
    let mut source = FakeSource::new().with_day(today, &[("08:00", 640.0)]);
    source.days.get_mut(&today).unwrap().push(RawMeasure {
        date: today.format("%d-%m-%Y").to_string(),
        time: "09:00".to_string(),
        value: serde_json::json!("not-a-number"),
        unit: "mNGF".to_string(),
    });

    let outcome = sync::synchronize_at(&mut store, &source, today, today, &[], false).unwrap();

    assert_eq!(outcome.rows_inserted, 1);
    assert_eq!(outcome.rows_invalid, 1);
    assert_eq!(stored_count(&mut cleanup, today), 1);

    cleanup_test_data(&mut cleanup);
}

#[test]
#[ignore] // Requires PostgreSQL - see module header
fn test_ignored_days_are_never_fetched() {
    let mut store = setup_store();
    let mut cleanup = raw_client();
    cleanup_test_data(&mut cleanup);

    // Today and one missing day are on the ignore list: neither the gap
    // fill nor the today refresh may touch them.
    let start = d(1997, 1, 1);
    let today = d(1997, 1, 3);
    let ignored = [d(1997, 1, 2), today];
    let source = FakeSource::new()
        .with_day(start, &[("08:00", 640.0)])
        .with_day(d(1997, 1, 2), &[("08:00", 640.2)])
        .with_day(today, &[("08:00", 640.4)]);

    let outcome =
        sync::synchronize_at(&mut store, &source, start, today, &ignored, false).unwrap();

    let fetched = source.fetches.borrow();
    assert!(fetched.contains(&start));
    assert!(!fetched.contains(&d(1997, 1, 2)), "ignored gap day was fetched");
    assert!(!fetched.contains(&today), "ignored today was refreshed");

    assert_eq!(outcome.rows_inserted, 1);
    assert_eq!(stored_count(&mut cleanup, start), 1);
    assert_eq!(stored_count(&mut cleanup, d(1997, 1, 2)), 0);
    assert_eq!(stored_count(&mut cleanup, today), 0);

    cleanup_test_data(&mut cleanup);
}

// ---------------------------------------------------------------------------
// 3. Commentary rate limiting
// ---------------------------------------------------------------------------

#[test]
#[ignore] // Requires PostgreSQL - see module header
fn test_trend_commentary_is_cached_within_the_window() {
    let mut store = setup_store();
    let mut cleanup = raw_client();
    cleanup_test_data(&mut cleanup);
    reset_commentary(&mut cleanup);

    let generator = FakeGenerator::new();
    let kpis = test_snapshot();
    let now = at(d(1995, 6, 10), 9, 0);

    let first =
        commentary::generate_trend_commentary(&mut store, &generator, &kpis, &[], now).unwrap();
    // Two hours later: inside the 6-hour window, the cached text comes
    // back and the generator is not called again.
    let later = at(d(1995, 6, 10), 11, 0);
    let second =
        commentary::generate_trend_commentary(&mut store, &generator, &kpis, &[], later).unwrap();

    assert_eq!(first, "generated text #1");
    assert_eq!(second, first);
    assert_eq!(generator.call_count(), 1);

    let audited: i64 = cleanup
        .query_one(
            "SELECT COUNT(*) FROM commentary_calls WHERE model = 'fake-test-model'",
            &[],
        )
        .unwrap()
        .get(0);
    assert_eq!(audited, 1, "throttled call must not write an audit row");

    cleanup_test_data(&mut cleanup);
}

#[test]
#[ignore] // Requires PostgreSQL - see module header
fn test_trend_commentary_regenerates_after_the_window() {
    let mut store = setup_store();
    let mut cleanup = raw_client();
    cleanup_test_data(&mut cleanup);
    reset_commentary(&mut cleanup);

    let generator = FakeGenerator::new();
    let kpis = test_snapshot();

    let first = commentary::generate_trend_commentary(
        &mut store,
        &generator,
        &kpis,
        &[],
        at(d(1995, 6, 10), 8, 0),
    )
    .unwrap();
    let second = commentary::generate_trend_commentary(
        &mut store,
        &generator,
        &kpis,
        &[],
        at(d(1995, 6, 10), 14, 0),
    )
    .unwrap();

    assert_ne!(first, second);
    assert_eq!(generator.call_count(), 2);

    cleanup_test_data(&mut cleanup);
}

#[test]
#[ignore] // Requires PostgreSQL - see module header
fn test_annual_comparison_is_limited_to_one_per_day() {
    let mut store = setup_store();
    let mut cleanup = raw_client();
    cleanup_test_data(&mut cleanup);
    reset_commentary(&mut cleanup);

    let generator = FakeGenerator::new();
    let kpis = test_snapshot();

    let first = commentary::generate_annual_comparison(
        &mut store,
        &generator,
        &kpis,
        at(d(1995, 7, 1), 8, 0),
    )
    .unwrap();
    // Much later the same day - still throttled.
    let second = commentary::generate_annual_comparison(
        &mut store,
        &generator,
        &kpis,
        at(d(1995, 7, 1), 23, 0),
    )
    .unwrap();
    // Next day - allowed again.
    let third = commentary::generate_annual_comparison(
        &mut store,
        &generator,
        &kpis,
        at(d(1995, 7, 2), 8, 0),
    )
    .unwrap();

    assert_eq!(second, first);
    assert_ne!(third, first);
    assert_eq!(generator.call_count(), 2);

    cleanup_test_data(&mut cleanup);
}

// ---------------------------------------------------------------------------
// 4. Threshold lines
// ---------------------------------------------------------------------------

#[test]
#[ignore] // Requires PostgreSQL - see module header
fn test_threshold_lines_order_and_soft_delete() {
    let mut store = setup_store();
    let mut cleanup = raw_client();
    let _ = cleanup.execute(
        "DELETE FROM threshold_line WHERE name LIKE 'TEST %'",
        &[],
    );

    store
        .create_threshold_line("TEST low", "pontoon grounds", 639.5)
        .unwrap();
    store
        .create_threshold_line("TEST high", "spillway active", 644.0)
        .unwrap();

    let lines: Vec<_> = store
        .threshold_lines()
        .unwrap()
        .into_iter()
        .filter(|t| t.name.starts_with("TEST "))
        .collect();
    assert_eq!(lines.len(), 2);
    // Descending by level.
    assert_eq!(lines[0].name, "TEST high");
    assert_eq!(lines[1].name, "TEST low");

    store.soft_delete_threshold_line(lines[1].id).unwrap();
    let remaining: Vec<_> = store
        .threshold_lines()
        .unwrap()
        .into_iter()
        .filter(|t| t.name.starts_with("TEST "))
        .collect();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].name, "TEST high");

    let _ = cleanup.execute(
        "DELETE FROM threshold_line WHERE name LIKE 'TEST %'",
        &[],
    );
}
