/// Service entry point: one sync-and-report cycle per invocation.
///
/// Intended to run from cron (or by the dashboard before rendering).
/// Brings the store up to date, then prints the KPI snapshot and the
/// forecast tail. Missing data renders as neutral text — per-day fetch
/// failures never make it here, only the absence they leave behind.
///
/// `levmon_service export <path>` dumps the full series as CSV instead.

use chrono::Local;
use std::process::exit;

use levmon_service::analysis::forecast::{
    forecast_water_level, ForecastError, DEFAULT_HORIZON_DAYS,
};
use levmon_service::analysis::kpi::compute_kpis;
use levmon_service::db::WaterLevelStore;
use levmon_service::ingest::hydro::{self, HydroApiClient};
use levmon_service::logging::{self, DataSource, LogLevel};
use levmon_service::sync;

const LOG_FILE: &str = "levmon.log";

fn fmt_delta(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:+.3} m", v),
        None => "n/a".to_string(),
    }
}

fn main() {
    dotenv::dotenv().ok();
    logging::init_logger(LogLevel::Info, Some(LOG_FILE), true);

    // Construction-level faults (no DATABASE_URL, unreachable backend,
    // failed migration) terminate here; nothing past this point does.
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("DATABASE_URL must be set (see .env)");
            exit(1);
        }
    };
    let mut store = match WaterLevelStore::connect(&database_url) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Cannot connect to database: {}", e);
            exit(1);
        }
    };
    if let Err(e) = store.init_schema() {
        eprintln!("Schema initialization failed: {}", e);
        exit(1);
    }

    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(String::as_str) == Some("export") {
        let path = args.get(2).map(String::as_str).unwrap_or("water_level.csv");
        let mut file = match std::fs::File::create(path) {
            Ok(f) => f,
            Err(e) => {
                eprintln!("Cannot create {}: {}", path, e);
                exit(1);
            }
        };
        match store.export_csv(&mut file) {
            Ok(()) => println!("Exported series to {}", path),
            Err(e) => {
                eprintln!("Export failed: {}", e);
                exit(1);
            }
        }
        return;
    }

    // --- Ingestion ---------------------------------------------------------

    let http = match hydro::build_client() {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Cannot build HTTP client: {}", e);
            exit(1);
        }
    };
    let source = HydroApiClient::new(http);

    println!("🔄 Synchronizing measurement store...");
    if let Err(e) = sync::synchronize(&mut store, &source, sync::default_start_date()) {
        // Mid-run storage failure; readings fetched so far are committed.
        logging::error(DataSource::Database, None, &format!("sync aborted: {}", e));
        exit(1);
    }

    // --- Read side ---------------------------------------------------------

    let series = match store.all_measurements() {
        Ok(series) => series,
        Err(e) => {
            logging::error(DataSource::Database, None, &format!("read failed: {}", e));
            exit(1);
        }
    };

    let Some(kpis) = compute_kpis(&series) else {
        println!("No data available for the monitored site.");
        return;
    };

    println!();
    println!(
        "Last reading: {}, level {:.2} m",
        kpis.latest_timestamp.format("%d %B %Y %H:%M"),
        kpis.latest_value
    );
    println!("  vs yesterday:   {}", fmt_delta(kpis.vs_1d));
    println!("  vs 3 days ago:  {}", fmt_delta(kpis.vs_3d));
    println!("  vs last week:   {}", fmt_delta(kpis.vs_1w));
    println!(
        "  7-day trend:    {}",
        match kpis.weekly_trend_rate {
            Some(rate) => format!("{:+.3} m/day", rate),
            None => "n/a".to_string(),
        }
    );
    println!("  vs last month:  {}", fmt_delta(kpis.vs_1m));
    println!("  vs 2 months:    {}", fmt_delta(kpis.vs_2m));
    println!("  vs last year:   {}", fmt_delta(kpis.vs_1y));
    println!("  vs 2 years:     {}", fmt_delta(kpis.vs_2y));
    println!("  vs 3 years:     {}", fmt_delta(kpis.vs_3y));

    // The engine itself decides whether there is enough usable history;
    // it drops non-finite readings before counting.
    match forecast_water_level(&series, DEFAULT_HORIZON_DAYS, Local::now().naive_local()) {
        Ok(points) => match (points.first(), points.last()) {
            (Some(first), Some(last)) => {
                println!(
                    "\nForecast: {:.2} m on {}, {:.2} m on {} ({} points over {} days)",
                    first.predicted_value,
                    first.timestamp.format("%d %B %Y"),
                    last.predicted_value,
                    last.timestamp.format("%d %B %Y"),
                    points.len(),
                    DEFAULT_HORIZON_DAYS,
                );
            }
            _ => println!("\nForecast unavailable."),
        },
        Err(ForecastError::InsufficientHistory { .. }) => {
            println!("\nForecast unavailable (not enough history yet).");
        }
        Err(e) => {
            logging::warn(DataSource::Forecast, None, &e.to_string());
            println!("\nForecast unavailable.");
        }
    }
}
