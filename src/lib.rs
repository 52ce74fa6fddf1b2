/// Hydrological time-series unification and gap repair.
///
/// Flow observations from yearly archives, a local backfill file and a
/// real-time values table are extracted, normalized, cleaned onto a regular
/// grid, merged, and repaired across the boundary gap. Weather feeds are
/// finished onto the same grids so they can be joined to the flow series.

pub mod analysis;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod report;
pub mod stations;
