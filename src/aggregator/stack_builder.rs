//! Build collapsed stack format from profiled events.
//!
//! Collapsed stacks are the input format for flamegraph generation.
//! Format: "parent;child;grandchild weight"
//!
//! Example: "main;forward;linear;addmm 120"
//! This means: the interpreter was in main -> forward when `linear` ran,
//! and `addmm` nested inside it spent 120 us of its own time.

use crate::normalize::ExportedEvent;
use crate::record::EventTree;
use crate::trace::ActivityKind;
use log::debug;
use std::collections::HashMap;

/// A single collapsed stack entry
///
/// **Public** - used by flamegraph generator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollapsedStack {
    /// Stack trace as semicolon-separated string
    pub stack: String,

    /// Weight in microseconds
    pub weight: u64,
}

impl CollapsedStack {
    pub fn new(stack: String, weight: u64) -> Self {
        Self { stack, weight }
    }

    /// `stack weight` line as read by flamegraph tools
    pub fn to_line(&self) -> String {
        format!("{} {}", self.stack, self.weight)
    }
}

/// What the stack weights measure
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StackMetric {
    /// Host self time of each op
    #[default]
    CpuTime,
    /// Device activity time, attributed to the launching op
    DeviceTime,
}

/// Build collapsed stacks from a session's events
///
/// **Public** - main entry point for stack building
///
/// # Arguments
/// * `events` - Exported events; the first `tree.records().len()` mirror the tree
/// * `tree` - Drained records with their parent/child links
/// * `metric` - Which time to attribute to each stack
///
/// # Returns
/// Vector of collapsed stacks, one per unique path, heaviest first
///
/// # Algorithm
/// 1. Prefix each op with the interpreter stack of its root op
/// 2. Append the op nesting from the event tree
/// 3. Weight by self time (CPU) or by linked device activity time (device)
/// 4. Aggregate by unique stack (sum weights)
pub fn build_collapsed_stacks(
    events: &[ExportedEvent],
    tree: &EventTree,
    metric: StackMetric,
) -> Vec<CollapsedStack> {
    let records = tree.records();
    debug!(
        "Building {:?} collapsed stacks from {} events",
        metric,
        events.len()
    );

    let host_count = records.len().min(events.len());
    let host_stack = |idx: usize| -> String {
        let mut root = idx;
        while let Some(parent) = records[root].parent {
            root = parent;
        }
        let mut frames: Vec<&str> = events[root]
            .stack
            .iter()
            .flatten()
            .map(String::as_str)
            .collect();
        frames.extend(tree.path(idx));
        frames.join(";")
    };

    let mut stack_map: HashMap<String, u64> = HashMap::new();

    match metric {
        StackMetric::CpuTime => {
            for (idx, record) in records.iter().enumerate().take(host_count) {
                if !record.is_span() {
                    continue;
                }
                let children_ns: i64 = record
                    .children
                    .iter()
                    .map(|&c| &records[c])
                    .filter(|c| c.is_span())
                    .map(|c| c.duration_ns())
                    .sum();
                let self_us = (record.duration_ns() - children_ns).max(0) / 1000;
                if self_us > 0 {
                    *stack_map.entry(host_stack(idx)).or_insert(0) += self_us as u64;
                }
            }
        }
        StackMetric::DeviceTime => {
            let launchers: HashMap<u64, usize> = events[..host_count]
                .iter()
                .enumerate()
                .filter(|(_, e)| e.correlation_id != 0)
                .map(|(idx, e)| (e.correlation_id, idx))
                .collect();

            for event in &events[host_count..] {
                if event.activity_type.is_host_side() || event.duration_us <= 0 {
                    continue;
                }
                let prefix = launchers
                    .get(&event.linked_correlation_id)
                    .map(|&idx| host_stack(idx));
                let stack = match prefix {
                    Some(prefix) => format!("{};{}", prefix, event.name),
                    None => format!("{};{}", kind_label(event.activity_type), event.name),
                };
                *stack_map.entry(stack).or_insert(0) += event.duration_us as u64;
            }
        }
    }

    let mut stacks: Vec<CollapsedStack> = stack_map
        .into_iter()
        .map(|(stack, weight)| CollapsedStack::new(stack, weight))
        .collect();

    stacks.sort_by(|a, b| b.weight.cmp(&a.weight).then_with(|| a.stack.cmp(&b.stack)));

    debug!("Built {} unique collapsed stacks", stacks.len());

    stacks
}

fn kind_label(kind: ActivityKind) -> &'static str {
    match kind {
        ActivityKind::GpuMemcpy | ActivityKind::GpuMemset => "[memory transfer]",
        _ => "[unlinked]",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{EventKind, OperationFields, RawEventRecord};
    use pretty_assertions::assert_eq;

    fn record(name: &str, start_us: i64, end_us: i64, parent: Option<usize>, children: Vec<usize>) -> RawEventRecord {
        RawEventRecord {
            start_time_ns: start_us * 1000,
            end_time_ns: end_us * 1000,
            start_tid: 1,
            correlation_id: 0,
            kind: EventKind::Operation(OperationFields::new(name)),
            parent,
            children,
        }
    }

    fn event(name: &str, correlation_id: u64, stack: Option<&[&str]>) -> ExportedEvent {
        let mut event = ExportedEvent::new(name);
        event.correlation_id = correlation_id;
        event.stack = stack.map(|s| s.iter().map(|f| f.to_string()).collect());
        event
    }

    fn fixture() -> (Vec<ExportedEvent>, EventTree) {
        let tree = EventTree::new(vec![
            record("linear", 0, 100, None, vec![1]),
            record("addmm", 10, 80, Some(0), vec![]),
        ]);
        let events = vec![
            event("linear", 1, Some(&["main", "forward"])),
            event("addmm", 2, Some(&["main", "forward"])),
        ];
        (events, tree)
    }

    #[test]
    fn test_cpu_stacks_use_self_time() {
        let (events, tree) = fixture();
        let stacks = build_collapsed_stacks(&events, &tree, StackMetric::CpuTime);

        assert_eq!(
            stacks,
            vec![
                CollapsedStack::new("main;forward;linear;addmm".to_string(), 70),
                CollapsedStack::new("main;forward;linear".to_string(), 30),
            ]
        );
    }

    #[test]
    fn test_device_stacks_attribute_to_launcher() {
        let (mut events, tree) = fixture();
        let mut kernel = ExportedEvent::new("gemm_kernel");
        kernel.activity_type = ActivityKind::ConcurrentKernel;
        kernel.duration_us = 40;
        kernel.linked_correlation_id = 2;
        let mut copy = ExportedEvent::new("HtoD");
        copy.activity_type = ActivityKind::GpuMemcpy;
        copy.duration_us = 5;
        events.push(kernel);
        events.push(copy);

        let stacks = build_collapsed_stacks(&events, &tree, StackMetric::DeviceTime);

        assert_eq!(
            stacks,
            vec![
                CollapsedStack::new("main;forward;linear;addmm;gemm_kernel".to_string(), 40),
                CollapsedStack::new("[memory transfer];HtoD".to_string(), 5),
            ]
        );
    }

    #[test]
    fn test_to_line() {
        let stack = CollapsedStack::new("main;execute".to_string(), 1000);
        assert_eq!(stack.to_line(), "main;execute 1000");
    }
}
