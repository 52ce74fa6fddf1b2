/// Time-series unification for the flow service.
///
/// Every function here is a pure transformation from one frame to the
/// next; none of them performs I/O.
///
/// Submodules:
/// - `clean`: regular-grid re-indexing, dedup and forward-fill.
/// - `merge`: historical + real-time merge onto the union grid.
/// - `repair`: seasonal substitution across the boundary gap.
/// - `resample`: weather joins, column pruning, daily aggregation.

pub mod clean;
pub mod merge;
pub mod repair;
pub mod resample;
