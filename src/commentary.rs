/// Rate-limited commentary generation seam.
///
/// The natural-language commentary itself is produced by an external
/// text-generation collaborator behind the `TextGenerator` trait; what
/// lives here is the resource-access control around it. Generation is
/// expensive and quota-bound, so each category is throttled against the
/// `commentary_calls` audit table:
///
/// - trend commentary: at most one call per 6-hour window and ten per
///   calendar day;
/// - annual comparison: at most one call per calendar day.
///
/// A throttled request returns the last generated text for its category
/// (or a placeholder when none exists yet) and writes no audit row.

use chrono::{Duration, NaiveDateTime};

use crate::db::WaterLevelStore;
use crate::logging::{self, DataSource};
use crate::model::{KpiSnapshot, ThresholdLine};

pub const TREND_MIN_GAP_HOURS: i64 = 6;
pub const TREND_DAILY_LIMIT: i64 = 10;
pub const ANNUAL_DAILY_LIMIT: i64 = 1;

const THROTTLED_PLACEHOLDER: &str =
    "Commentary generation is throttled; try again later.";
const UNAVAILABLE_PLACEHOLDER: &str = "Commentary unavailable.";

const SYSTEM_PROMPT: &str =
    "You are a hydrology expert writing for a reservoir operations dashboard.";

// ---------------------------------------------------------------------------
// Categories
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentaryCategory {
    /// Short-term operational commentary from the recent trend deltas.
    Trend,
    /// One-line comparison of the current level against the same date in
    /// the previous three years.
    AnnualComparison,
}

impl CommentaryCategory {
    /// Stable identifier used in the audit table.
    pub fn as_str(&self) -> &'static str {
        match self {
            CommentaryCategory::Trend => "trend",
            CommentaryCategory::AnnualComparison => "annual_comparison",
        }
    }
}

// ---------------------------------------------------------------------------
// Generator seam
// ---------------------------------------------------------------------------

/// One completed generation, with the usage accounting the audit table
/// records.
#[derive(Debug, Clone)]
pub struct GeneratedText {
    pub model: String,
    pub content: String,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub total_tokens: i32,
}

/// External text-generation collaborator. Injected so the rate-limit
/// logic is testable with a fake that never touches the network.
pub trait TextGenerator {
    fn generate(
        &self,
        system: &str,
        prompt: &str,
    ) -> Result<GeneratedText, Box<dyn std::error::Error>>;
}

// ---------------------------------------------------------------------------
// Throttle policy (pure)
// ---------------------------------------------------------------------------

/// Whether a trend generation may run at `now`, given the time of the
/// last trend call and the number already made today. A call exactly at
/// the 6-hour mark is allowed.
pub fn trend_call_allowed(
    last_call: Option<NaiveDateTime>,
    calls_today: i64,
    now: NaiveDateTime,
) -> bool {
    if calls_today >= TREND_DAILY_LIMIT {
        return false;
    }
    match last_call {
        None => true,
        Some(at) => now - at >= Duration::hours(TREND_MIN_GAP_HOURS),
    }
}

/// Whether an annual-comparison generation may run today.
pub fn annual_call_allowed(calls_today: i64) -> bool {
    calls_today < ANNUAL_DAILY_LIMIT
}

// ---------------------------------------------------------------------------
// Prompt construction (pure)
// ---------------------------------------------------------------------------

fn fmt_delta(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:+.3} m", v),
        None => "n/a".to_string(),
    }
}

/// Prompt for operational trend commentary: the recent deltas plus the
/// configured threshold lines the operator steers by.
pub fn build_trend_prompt(kpis: &KpiSnapshot, thresholds: &[ThresholdLine]) -> String {
    let mut parts = vec![
        "Advise a boat operator on a dam-regulated reservoir whether to act on the \
         current water level: do nothing, pull the boat back on the pontoon, or move \
         it elsewhere. The boat draws 0.4 m and is moored to a floating pontoon."
            .to_string(),
        String::new(),
        "<data>".to_string(),
        format!(
            "Last reading: {}",
            kpis.latest_timestamp.format("%d %B %Y %H:%M")
        ),
        format!("Current level: {:.2} m", kpis.latest_value),
        format!("Change vs yesterday: {}", fmt_delta(kpis.vs_1d)),
        format!("Change vs 3 days ago: {}", fmt_delta(kpis.vs_3d)),
        format!("Change vs last week: {}", fmt_delta(kpis.vs_1w)),
        format!(
            "7-day trend: {}",
            match kpis.weekly_trend_rate {
                Some(rate) => format!("{:+.3} m/day", rate),
                None => "n/a".to_string(),
            }
        ),
        "</data>".to_string(),
        String::new(),
        "<thresholds>".to_string(),
    ];
    for t in thresholds {
        parts.push(format!("- {} ({:.2} m): {}", t.name, t.value, t.description));
    }
    parts.push("</thresholds>".to_string());
    parts.push(
        "<instruction>Write ONE clear, concise sentence telling the operator what to \
         do with the boat. Be factual, base the recommendation on the data above, and \
         mention a threshold if one is near or crossed.</instruction>"
            .to_string(),
    );
    parts.join("\n")
}

/// Prompt for the annual comparison: current level against the nearest
/// prior reading one, two and three years back.
pub fn build_annual_prompt(kpis: &KpiSnapshot) -> String {
    let year = kpis.latest_timestamp.date().format("%Y");
    let current_year: i32 = year.to_string().parse().unwrap_or(0);
    [
        "Compare only the current reservoir level with the levels of the last three \
         years at the same date."
            .to_string(),
        "<data>".to_string(),
        format!("Current level: {:.2} m", kpis.latest_value),
        format!("vs {}: {}", current_year - 1, fmt_delta(kpis.vs_1y)),
        format!("vs {}: {}", current_year - 2, fmt_delta(kpis.vs_2y)),
        format!("vs {}: {}", current_year - 3, fmt_delta(kpis.vs_3y)),
        "</data>".to_string(),
        "<instruction>Write ONE neutral, concise sentence summarizing whether the \
         current level is higher than, comparable to, or lower than the previous \
         years.</instruction>"
            .to_string(),
    ]
    .join("\n")
}

// ---------------------------------------------------------------------------
// Generation with throttling
// ---------------------------------------------------------------------------

/// Check the throttle, generate if allowed, audit the call. The stored
/// last response stands in for a throttled call; a generator failure
/// yields a neutral placeholder, never an error the dashboard would show
/// raw. Only storage errors propagate.
fn generate_with_throttle(
    store: &mut WaterLevelStore,
    generator: &dyn TextGenerator,
    category: CommentaryCategory,
    prompt: &str,
    now: NaiveDateTime,
) -> Result<String, postgres::Error> {
    let last = store.last_commentary_call(category.as_str())?;
    let calls_today = store.commentary_calls_on(category.as_str(), now.date())?;

    let allowed = match category {
        CommentaryCategory::Trend => {
            trend_call_allowed(last.as_ref().map(|(at, _)| *at), calls_today, now)
        }
        CommentaryCategory::AnnualComparison => annual_call_allowed(calls_today),
    };

    if !allowed {
        logging::debug(
            DataSource::Llm,
            None,
            &format!("{} generation throttled, serving cached text", category.as_str()),
        );
        return Ok(last
            .map(|(_, text)| text)
            .unwrap_or_else(|| THROTTLED_PLACEHOLDER.to_string()));
    }

    match generator.generate(SYSTEM_PROMPT, prompt) {
        Ok(generated) => {
            store.log_commentary_call(
                category.as_str(),
                &generated.model,
                prompt,
                &generated.content,
                generated.prompt_tokens,
                generated.completion_tokens,
                generated.total_tokens,
                now,
            )?;
            Ok(generated.content)
        }
        Err(e) => {
            logging::error(
                DataSource::Llm,
                None,
                &format!("{} generation failed: {}", category.as_str(), e),
            );
            Ok(UNAVAILABLE_PLACEHOLDER.to_string())
        }
    }
}

/// Operational trend commentary for the dashboard header.
pub fn generate_trend_commentary(
    store: &mut WaterLevelStore,
    generator: &dyn TextGenerator,
    kpis: &KpiSnapshot,
    thresholds: &[ThresholdLine],
    now: NaiveDateTime,
) -> Result<String, postgres::Error> {
    let prompt = build_trend_prompt(kpis, thresholds);
    generate_with_throttle(store, generator, CommentaryCategory::Trend, &prompt, now)
}

/// One-line annual comparison.
pub fn generate_annual_comparison(
    store: &mut WaterLevelStore,
    generator: &dyn TextGenerator,
    kpis: &KpiSnapshot,
    now: NaiveDateTime,
) -> Result<String, postgres::Error> {
    let prompt = build_annual_prompt(kpis);
    generate_with_throttle(
        store,
        generator,
        CommentaryCategory::AnnualComparison,
        &prompt,
        now,
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
