//! Aggregation of profiled events into collapsed stacks and metrics.
//!
//! This module transforms a session's events into:
//! - Collapsed stack format (for flamegraph generation)
//! - Hot path analysis (top time consumers)
//! - Time distribution and per-operator statistics

pub mod metrics;
pub mod stack_builder;

// Re-export main types and functions
pub use metrics::{
    calculate_hot_paths, calculate_time_distribution, summarize_operators, HotPath,
    OperatorSummary, TimeDistribution,
};
pub use stack_builder::{build_collapsed_stacks, CollapsedStack, StackMetric};
