//! Deterministic compute engines that turn raw events and price series into the
//! derived columns the rest of the platform reads: trend context, forward-return
//! outcomes, track-record stats, and insider-cluster detection.
//!
//! Every engine here is a pure function plus a thin `sqlx`-touching orchestration
//! wrapper, following the same split as `aggregator::rollup`.

pub mod clusters;
pub mod outcomes;
pub mod stats;
pub mod trend;

pub use clusters::{compute_clusters_for_ticker, sweep_clusters, Candidate, ClusterResult};
pub use outcomes::{compute_outcomes_for_event, compute_side_outcome, HorizonOutcome, SideOutcome};
pub use stats::{compute_stats_for_owner_issuer, summarize, SideStats};
pub use trend::{compute_trend, compute_trend_for_event, TrendResult};
