/// KPI engine: comparative trend indicators for the water level.
///
/// All comparisons use nearest-prior semantics: "the value one week ago"
/// means the latest reading at or before that instant, not a reading at
/// exactly that instant. Sampling is irregular (several readings per day
/// in normal operation, multi-day holes around outages), so an exact
/// lookup would come up empty most of the time.
///
/// Everything here is pure computation over the series passed in; the
/// caller decides how fresh a series to read from the store.

use chrono::Duration;

use crate::model::{KpiSnapshot, Measurement};

// Reference offsets, in days. Months and years are fixed-length spans,
// not calendar arithmetic: "one month ago" is 30 days, matching how the
// dashboard labels these deltas.
const OFFSET_1D: i64 = 1;
const OFFSET_3D: i64 = 3;
const OFFSET_1W: i64 = 7;
const OFFSET_1M: i64 = 30;
const OFFSET_2M: i64 = 60;
const OFFSET_1Y: i64 = 365;
const OFFSET_2Y: i64 = 730;
const OFFSET_3Y: i64 = 1095;

// ---------------------------------------------------------------------------
// Nearest-prior lookup
// ---------------------------------------------------------------------------

fn debug_assert_ascending(series: &[Measurement]) {
    debug_assert!(
        series.windows(2).all(|w| w[0].timestamp <= w[1].timestamp),
        "series must be ascending by timestamp"
    );
}

/// Latest value at or before `target`. `None` when every reading is
/// later than the target instant.
///
/// Requires `series` ascending by timestamp (the store's `all_measurements`
/// ordering); the binary search gives garbage otherwise.
pub fn closest_value_at(
    series: &[Measurement],
    target: chrono::NaiveDateTime,
) -> Option<f64> {
    debug_assert_ascending(series);
    let idx = series.partition_point(|m| m.timestamp <= target);
    if idx == 0 {
        None
    } else {
        Some(series[idx - 1].value)
    }
}

// ---------------------------------------------------------------------------
// Snapshot computation
// ---------------------------------------------------------------------------

/// Compute the full indicator snapshot from the measurement series.
/// Returns `None` for an empty series; no data is a displayable state,
/// not a fault.
pub fn compute_kpis(series: &[Measurement]) -> Option<KpiSnapshot> {
    debug_assert_ascending(series);
    let current = series.last()?;

    let delta = |days: i64| -> Option<f64> {
        closest_value_at(series, current.timestamp - Duration::days(days))
            .map(|reference| current.value - reference)
    };

    let vs_1w = delta(OFFSET_1W);

    Some(KpiSnapshot {
        latest_timestamp: current.timestamp,
        latest_value: current.value,
        vs_1d: delta(OFFSET_1D),
        vs_3d: delta(OFFSET_3D),
        vs_1w,
        weekly_trend_rate: vs_1w.map(|d| d / OFFSET_1W as f64),
        vs_1m: delta(OFFSET_1M),
        vs_2m: delta(OFFSET_2M),
        vs_1y: delta(OFFSET_1Y),
        vs_2y: delta(OFFSET_2Y),
        vs_3y: delta(OFFSET_3Y),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
