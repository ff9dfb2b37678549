/// Reservoir water-level monitoring service.
///
/// Core pipeline: the sync orchestrator fills historical gaps from the
/// hydrology API into the PostgreSQL measurement store; the analysis
/// modules derive trend KPIs and a seasonal forecast from the stored
/// series; the commentary module guards the external text-generation
/// quota. The dashboard itself is a separate consumer of these values.

pub mod analysis;
pub mod commentary;
pub mod config;
pub mod db;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod sync;
