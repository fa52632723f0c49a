//! Calculate performance metrics and hot paths from profiled events.
//!
//! Hot paths are the call paths that consume the most time.
//! These are the primary targets for optimization.

use super::stack_builder::CollapsedStack;
use crate::normalize::ExportedEvent;
use log::debug;
use serde::Serialize;
use std::collections::HashMap;

/// A hot path in the execution (stack trace with time)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HotPath {
    /// Collapsed stack representation (e.g., "main;forward;matmul")
    pub stack: String,

    /// Time attributed to this path in microseconds
    pub time_us: u64,

    /// Percentage of total time
    pub percentage: f64,
}

/// Calculate hot paths from collapsed stacks
///
/// **Public** - main entry point for metrics calculation
///
/// # Arguments
/// * `stacks` - Collapsed stacks from stack_builder
/// * `total_us` - Total time the percentages refer to
/// * `top_n` - Number of top paths to return (e.g., 10)
///
/// # Returns
/// Vector of hot paths, sorted by time (descending)
pub fn calculate_hot_paths(stacks: &[CollapsedStack], total_us: u64, top_n: usize) -> Vec<HotPath> {
    debug!("Calculating top {} hot paths from {} stacks", top_n, stacks.len());

    // Stacks are already sorted by weight from stack_builder
    stacks
        .iter()
        .take(top_n)
        .map(|stack| create_hot_path(stack, total_us))
        .collect()
}

/// Create a HotPath from a CollapsedStack
///
/// **Private** - internal conversion
fn create_hot_path(stack: &CollapsedStack, total_us: u64) -> HotPath {
    let percentage = if total_us > 0 {
        (stack.weight as f64 / total_us as f64) * 100.0
    } else {
        0.0
    };

    HotPath {
        stack: stack.stack.clone(),
        time_us: stack.weight,
        percentage,
    }
}

/// Time distribution statistics
///
/// **Public** - returned from calculate_time_distribution
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimeDistribution {
    /// Total time across all stacks
    pub total_us: u64,

    /// Number of unique stacks
    pub stack_count: usize,

    pub mean_us_per_stack: u64,

    pub median_us_per_stack: u64,

    /// Time consumed by the top 10% of stacks
    pub top_10_percent_us: u64,

    /// Percentage of total time in the top 10%
    pub top_10_percent_percentage: f64,
}

/// Calculate time distribution statistics
///
/// **Public** - provides summary statistics
pub fn calculate_time_distribution(stacks: &[CollapsedStack]) -> TimeDistribution {
    if stacks.is_empty() {
        return TimeDistribution::default();
    }

    let total: u64 = stacks.iter().map(|s| s.weight).sum();
    let count = stacks.len();
    let mean = total / count as u64;

    let mut weights: Vec<u64> = stacks.iter().map(|s| s.weight).collect();
    weights.sort_unstable();
    let median = weights[weights.len() / 2];

    // Top 10% of stacks
    let top_count = (count as f64 * 0.1).ceil() as usize;
    let top_us: u64 = stacks.iter().take(top_count).map(|s| s.weight).sum();

    TimeDistribution {
        total_us: total,
        stack_count: count,
        mean_us_per_stack: mean,
        median_us_per_stack: median,
        top_10_percent_us: top_us,
        top_10_percent_percentage: if total > 0 {
            (top_us as f64 / total as f64) * 100.0
        } else {
            0.0
        },
    }
}

impl TimeDistribution {
    /// Returns true if the top 10% of stacks take more than 80% of the time
    pub fn is_highly_concentrated(&self) -> bool {
        self.top_10_percent_percentage > 80.0
    }

    /// Get human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "Total: {} us | Stacks: {} | Mean: {} | Median: {} | Top 10%: {:.1}%",
            self.total_us,
            self.stack_count,
            self.mean_us_per_stack,
            self.median_us_per_stack,
            self.top_10_percent_percentage
        )
    }
}

/// Per-operator totals
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperatorSummary {
    pub name: String,
    pub count: u64,
    pub total_us: i64,
    pub max_us: i64,
    /// Sum of estimated flops, when estimated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flops: Option<u64>,
}

/// Aggregate host operator events by name, longest total first
pub fn summarize_operators(events: &[ExportedEvent]) -> Vec<OperatorSummary> {
    let mut by_name: HashMap<&str, OperatorSummary> = HashMap::new();

    for event in events.iter().filter(|e| e.activity_type.is_host_side() && e.scope.is_some()) {
        let entry = by_name.entry(event.name.as_str()).or_insert_with(|| OperatorSummary {
            name: event.name.clone(),
            count: 0,
            total_us: 0,
            max_us: 0,
            flops: None,
        });
        entry.count += 1;
        entry.total_us += event.duration_us;
        entry.max_us = entry.max_us.max(event.duration_us);
        if let Some(flops) = event.flops {
            entry.flops = Some(entry.flops.unwrap_or(0) + flops);
        }
    }

    let mut summaries: Vec<OperatorSummary> = by_name.into_values().collect();
    summaries.sort_by(|a, b| b.total_us.cmp(&a.total_us).then_with(|| a.name.cmp(&b.name)));
    summaries
}
