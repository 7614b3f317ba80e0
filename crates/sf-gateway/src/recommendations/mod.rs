//! Recommendation engine.
//!
//! A background scan reads a state snapshot, a window of recent event log
//! entries and the metric history, runs every [`ScoringRule`] and records
//! the resulting suggestions in the [`RecommendationBook`]. Recommendations
//! are derived data: applying one goes through the normal compile and
//! execute path.

pub mod book;
pub mod engine;
pub mod rules;

pub use book::{RecommendationBook, ScanSummary};
pub use engine::{ActionOutcome, RecommendationEngine};
pub use rules::{CpuTrend, ScoringRule, Signals, SustainedCpuHigh, SustainedCpuLow};
