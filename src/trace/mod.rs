//! Trace activities and the sink that turns them into a trace file.
//!
//! This module handles:
//! - The activity model shared by the profiler and sinks
//! - The `TraceSink` seam
//! - A Chrome trace-event JSON sink

pub mod activity;
pub mod chrome;
pub mod sink;

// Re-export main types
pub use activity::{ActivityKind, CpuTrace, Flow, FlowKind, Trace, TraceActivity};
pub use chrome::ChromeTraceSink;
pub use sink::TraceSink;
