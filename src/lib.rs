//! Exec Profiler
//!
//! An in-process execution profiler. Instrumented code reports operator
//! spans, allocations and backend events through [`profiler::Profiler`];
//! at stop the records are drained, normalized into uniform events,
//! linked forward to backward, interleaved with the interpreter call
//! stack and handed to a trace sink.
//!
//! ## Getting Started
//!
//! ```no_run
//! use exec_profiler::profiler::{ActivityType, Profiler, ProfilerConfig, ProfilerMode, SpanStart};
//! use std::collections::{BTreeSet, HashSet};
//!
//! let profiler = Profiler::new();
//! let config = ProfilerConfig::new(ProfilerMode::Standard).with_input_shapes(true);
//! profiler
//!     .enable(config, &BTreeSet::from([ActivityType::Cpu]), &HashSet::new())
//!     .unwrap();
//!
//! if let Some(span) = profiler.on_span_start(SpanStart::new("aten::mm")) {
//!     profiler.on_span_end(span);
//! }
//!
//! let result = profiler.disable().unwrap();
//! result.save("trace.json").unwrap();
//! ```
//!
//! The `exec-profiler` binary runs a synthetic workload and validates
//! saved traces.

pub mod aggregator;
pub mod clock;
pub mod commands;
pub mod device;
pub mod flamegraph;
pub mod merge;
pub mod normalize;
pub mod output;
pub mod profiler;
pub mod record;
pub mod trace;
pub mod tracer;
pub mod utils;
