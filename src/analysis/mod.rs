/// Read-side analytics for the water-level monitoring service.
///
/// Both submodules are pure consumers of the store's full-series view:
/// they mutate nothing and can run concurrently with ingestion, since
/// they only ever observe committed rows.
///
/// Submodules:
/// - `kpi` — trend indicators via nearest-prior lookups.
/// - `forecast` — additive seasonal projection of future levels.

pub mod forecast;
pub mod kpi;
