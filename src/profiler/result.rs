//! Result of a finished profiling session.

use crate::aggregator::{build_collapsed_stacks, CollapsedStack, StackMetric};
use crate::flamegraph::{generate_flamegraph, FlamegraphConfig};
use crate::normalize::ExportedEvent;
use crate::output::{write_collapsed_stacks, write_svg};
use crate::record::EventTree;
use crate::trace::{Trace, TraceSink};
use crate::utils::error::{FlamegraphError, TraceError};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Events, event tree and trace produced by `Profiler::disable`
pub struct ProfilerResult {
    trace_start_us: i64,
    events: Vec<ExportedEvent>,
    trace: Option<Trace>,
    event_tree: EventTree,
    sink: Option<Arc<dyn TraceSink>>,
}

impl ProfilerResult {
    pub(crate) fn new(
        trace_start_us: i64,
        events: Vec<ExportedEvent>,
        trace: Option<Trace>,
        event_tree: EventTree,
        sink: Arc<dyn TraceSink>,
    ) -> Self {
        Self {
            trace_start_us,
            events,
            trace,
            event_tree,
            sink: Some(sink),
        }
    }

    /// Result of a session that produced no trace (on-demand, annotation-only)
    pub fn empty() -> Self {
        Self {
            trace_start_us: 0,
            events: Vec::new(),
            trace: None,
            event_tree: EventTree::default(),
            sink: None,
        }
    }

    pub fn trace_start_us(&self) -> i64 {
        self.trace_start_us
    }

    pub fn events(&self) -> &[ExportedEvent] {
        &self.events
    }

    pub fn event_tree(&self) -> &EventTree {
        &self.event_tree
    }

    pub fn trace(&self) -> Option<&Trace> {
        self.trace.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.trace.is_none()
    }

    /// Save the trace through the sink that produced it
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), TraceError> {
        match (&self.trace, &self.sink) {
            (Some(trace), Some(sink)) => sink.save(trace, path.as_ref()),
            _ => Err(TraceError::NoTrace),
        }
    }

    /// Collapsed stacks weighted by `metric`, heaviest first
    pub fn collapsed_stacks(&self, metric: StackMetric) -> Vec<CollapsedStack> {
        build_collapsed_stacks(&self.events, &self.event_tree, metric)
    }

    /// Write collapsed stacks in `frame;frame weight` text form
    pub fn export_stacks(&self, path: impl AsRef<Path>, metric: StackMetric) -> Result<(), TraceError> {
        write_collapsed_stacks(&self.collapsed_stacks(metric), path)
    }

    /// Render and write an SVG flamegraph of CPU self time
    pub fn export_flamegraph(
        &self,
        path: impl AsRef<Path>,
        config: &FlamegraphConfig,
    ) -> Result<(), FlamegraphError> {
        let stacks = self.collapsed_stacks(StackMetric::CpuTime);
        let svg = generate_flamegraph(&stacks, Some(config))?;
        write_svg(&svg, path)?;
        Ok(())
    }
}

impl fmt::Debug for ProfilerResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfilerResult")
            .field("trace_start_us", &self.trace_start_us)
            .field("events", &self.events.len())
            .field("has_trace", &self.trace.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_result_has_nothing_to_save() {
        let result = ProfilerResult::empty();
        assert!(result.is_empty());
        assert!(result.events().is_empty());
        assert!(result.event_tree().is_empty());

        let temp_dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            result.save(temp_dir.path().join("trace.json")),
            Err(TraceError::NoTrace)
        ));
    }
}
