/// Forecast engine: additive seasonal projection of the water level.
///
/// Fits an additive model to the full measurement history:
///
/// ```text
/// level(t) = trend(t) + daily(t) + yearly(t)
/// ```
///
/// with a linear trend and Fourier-series seasonality terms for the daily
/// and yearly cycles, estimated jointly by least squares. Projections are
/// produced at daily steps past the last observation and filtered to
/// strictly future points — in-sample fit values never leave this module.
///
/// A reservoir level has a strong annual cycle (snowmelt fill, summer
/// drawdown) and a weak daily one, which is exactly the structure this
/// model family captures; anything fancier would overfit the single
/// site's history.

use chrono::{Duration, NaiveDateTime};
use std::f64::consts::PI;

use crate::model::{ForecastPoint, Measurement};

/// Fewer observations than this and the seasonal terms are meaningless.
pub const MIN_OBSERVATIONS: usize = 48;

/// Projection length used by the dashboard.
pub const DEFAULT_HORIZON_DAYS: u32 = 160;

const DAILY_PERIOD_DAYS: f64 = 1.0;
const YEARLY_PERIOD_DAYS: f64 = 365.25;
const DAILY_ORDER: usize = 3;
const YEARLY_ORDER: usize = 8;

/// Intercept + slope + a sin/cos pair per Fourier term.
const NUM_COEFFS: usize = 2 + 2 * DAILY_ORDER + 2 * YEARLY_ORDER;

/// Ridge term added to the normal equations. Observations taken at the
/// same time every day make the daily Fourier columns collinear with the
/// intercept; the penalty keeps the system solvable without visibly
/// biasing predictions.
const RIDGE_LAMBDA: f64 = 1e-4;

const SECONDS_PER_DAY: f64 = 86_400.0;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// The model could not be fit or could not produce a projection. Callers
/// render this as a "forecast unavailable" state, never a crash.
#[derive(Debug, PartialEq)]
pub enum ForecastError {
    InsufficientHistory { required: usize, available: usize },
    /// The normal equations were numerically singular or produced
    /// non-finite coefficients.
    DegenerateFit(String),
}

impl std::fmt::Display for ForecastError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForecastError::InsufficientHistory {
                required,
                available,
            } => write!(
                f,
                "not enough history to forecast: {} readings, need {}",
                available, required
            ),
            ForecastError::DegenerateFit(msg) => write!(f, "model fit failed: {}", msg),
        }
    }
}

impl std::error::Error for ForecastError {}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Fitted additive seasonal model. `origin` anchors t = 0 at the first
/// observation so the trend column stays well-scaled.
pub struct SeasonalModel {
    coeffs: [f64; NUM_COEFFS],
    origin: NaiveDateTime,
}

/// Regressor row for an instant `t_days` after the origin.
fn design_row(t_days: f64) -> [f64; NUM_COEFFS] {
    let mut row = [0.0; NUM_COEFFS];
    row[0] = 1.0;
    row[1] = t_days;
    let mut i = 2;
    for k in 1..=DAILY_ORDER {
        let angle = 2.0 * PI * k as f64 * t_days / DAILY_PERIOD_DAYS;
        row[i] = angle.cos();
        row[i + 1] = angle.sin();
        i += 2;
    }
    for k in 1..=YEARLY_ORDER {
        let angle = 2.0 * PI * k as f64 * t_days / YEARLY_PERIOD_DAYS;
        row[i] = angle.cos();
        row[i + 1] = angle.sin();
        i += 2;
    }
    row
}

/// Solve `a * x = b` in place by Gaussian elimination with partial
/// pivoting. `a` is the (symmetric, ridge-stabilized) normal matrix.
fn solve_linear_system(
    a: &mut [[f64; NUM_COEFFS]; NUM_COEFFS],
    b: &mut [f64; NUM_COEFFS],
) -> Result<[f64; NUM_COEFFS], ForecastError> {
    let n = NUM_COEFFS;

    for col in 0..n {
        // Pivot selection
        let mut pivot_row = col;
        for row in (col + 1)..n {
            if a[row][col].abs() > a[pivot_row][col].abs() {
                pivot_row = row;
            }
        }
        if a[pivot_row][col].abs() < 1e-12 {
            return Err(ForecastError::DegenerateFit(
                "singular normal equations".to_string(),
            ));
        }
        if pivot_row != col {
            a.swap(col, pivot_row);
            b.swap(col, pivot_row);
        }

        // Eliminate below
        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    // Back substitution
    let mut x = [0.0; NUM_COEFFS];
    for col in (0..n).rev() {
        let mut sum = b[col];
        for k in (col + 1)..n {
            sum -= a[col][k] * x[k];
        }
        x[col] = sum / a[col][col];
    }

    if x.iter().any(|v| !v.is_finite()) {
        return Err(ForecastError::DegenerateFit(
            "non-finite coefficients".to_string(),
        ));
    }
    Ok(x)
}

impl SeasonalModel {
    /// Fit the model to `(timestamp, value)` observations by least
    /// squares on the normal equations.
    pub fn fit(points: &[(NaiveDateTime, f64)]) -> Result<Self, ForecastError> {
        if points.len() < MIN_OBSERVATIONS {
            return Err(ForecastError::InsufficientHistory {
                required: MIN_OBSERVATIONS,
                available: points.len(),
            });
        }

        let origin = points[0].0;
        let t_of = |ts: NaiveDateTime| (ts - origin).num_seconds() as f64 / SECONDS_PER_DAY;

        let mut xtx = [[0.0; NUM_COEFFS]; NUM_COEFFS];
        let mut xty = [0.0; NUM_COEFFS];

        for (ts, value) in points {
            let row = design_row(t_of(*ts));
            for i in 0..NUM_COEFFS {
                xty[i] += row[i] * value;
                for j in i..NUM_COEFFS {
                    xtx[i][j] += row[i] * row[j];
                }
            }
        }
        // Mirror the upper triangle and stabilize the diagonal.
        for i in 0..NUM_COEFFS {
            for j in 0..i {
                xtx[i][j] = xtx[j][i];
            }
            xtx[i][i] += RIDGE_LAMBDA;
        }

        let coeffs = solve_linear_system(&mut xtx, &mut xty)?;
        Ok(SeasonalModel { coeffs, origin })
    }

    /// Model value at an arbitrary instant, in-sample or not.
    pub fn predict_at(&self, ts: NaiveDateTime) -> f64 {
        let t_days = (ts - self.origin).num_seconds() as f64 / SECONDS_PER_DAY;
        let row = design_row(t_days);
        row.iter()
            .zip(self.coeffs.iter())
            .map(|(x, c)| x * c)
            .sum()
    }
}

// ---------------------------------------------------------------------------
// Forecast entry point
// ---------------------------------------------------------------------------

/// Fit the seasonal model to the full history and project `horizon_days`
/// daily steps past the last observation. Only points strictly after
/// `now` are returned.
///
/// Readings with a non-finite value are dropped before fitting; if that
/// leaves too few observations the result is `InsufficientHistory`.
pub fn forecast_water_level(
    series: &[Measurement],
    horizon_days: u32,
    now: NaiveDateTime,
) -> Result<Vec<ForecastPoint>, ForecastError> {
    let points: Vec<(NaiveDateTime, f64)> = series
        .iter()
        .filter(|m| m.value.is_finite())
        .map(|m| (m.timestamp, m.value))
        .collect();

    let last_observed = match points.last() {
        Some((ts, _)) => *ts,
        None => {
            return Err(ForecastError::InsufficientHistory {
                required: MIN_OBSERVATIONS,
                available: 0,
            });
        }
    };
    let model = SeasonalModel::fit(&points)?;

    let forecast = (1..=i64::from(horizon_days))
        .map(|d| last_observed + Duration::days(d))
        .filter(|ts| *ts > now)
        .map(|ts| ForecastPoint {
            timestamp: ts,
            predicted_value: model.predict_at(ts),
        })
        .collect();

    Ok(forecast)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
