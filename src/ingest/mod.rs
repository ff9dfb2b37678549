/// External data ingestion.
///
/// Submodules:
/// - `hydro` — client for the hydrology measurement API, plus the
///   `MeasurementSource` seam the orchestrator consumes.

pub mod hydro;
