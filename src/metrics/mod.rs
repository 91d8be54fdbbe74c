//! Metric tallies and scoring
//!
//! Raw records gathered by the fetch engine are folded into a [`MetricTally`] per
//! (organization, identity) pair by [`fold`]. The [`ScoreEngine`] turns a finished tally into a
//! single weighted score.
//!
//! Folding only ever increments counters or inserts into sets, so it is order independent. That
//! property is what allows tallies to be built page by page and checkpointed in between.

mod accumulator;
mod score;
mod tally;

pub use accumulator::{fold, fold_all};
pub use score::{ScoreEngine, Weights};
pub use tally::{Metric, MetricTally};
