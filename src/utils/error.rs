//! Error types for the entire crate.
//!
//! We use `thiserror` for library-style errors with custom types,
//! and `anyhow` for application-level error propagation in main.rs and commands.

use crate::profiler::ProfilerMode;
use thiserror::Error;

/// Errors surfaced by the profiler session boundary (enable / disable / reporting)
#[derive(Error, Debug)]
pub enum ProfilerError {
    #[error("Profiler is already enabled on this thread")]
    AlreadyEnabled,

    #[error("Can't disable profiler when it's not running")]
    NotRunning,

    #[error("No activities specified for profiler")]
    NoActivities,

    #[error("Profiler mode {0:?} cannot be enabled")]
    UnsupportedMode(ProfilerMode),

    #[error("Post processing callback is not supported: {0}")]
    PostProcessUnsupported(&'static str),

    #[error("On-demand profiling must enable CPU tracing")]
    OnDemandRequiresCpu,

    #[error("Not supported while on-demand profiling is active: {0}")]
    OnDemandUnsupported(&'static str),

    #[error("Failed to register instrumentation callbacks: {0}")]
    CallbackRegistration(#[from] RegistrationError),

    #[error("Record queue has already been drained")]
    AlreadyDrained,

    #[error("Call stack replay mismatch: frame {expected} exited but top of stack is {found:?}")]
    StackMismatch { expected: usize, found: Option<usize> },

    #[error("Profiler expects only single threaded call stack tracing (frame {frame} reported thread {thread_id})")]
    MultiThreadedTracer { frame: usize, thread_id: u64 },

    #[error("Activity count mismatch: {activities} trace activities for {events} exported events")]
    ActivityCountMismatch { activities: usize, events: usize },

    #[error("Trace sink failure: {0}")]
    Trace(#[from] TraceError),
}

/// Errors raised by trace sinks and trace file output
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("No trace was produced for this session")]
    NoTrace,

    #[error("Trace sink was finalized before it was started")]
    NotStarted,

    #[error("Failed to write file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid output path: {0}")]
    InvalidPath(String),
}

/// Errors reported by an accelerator event timer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimerError {
    #[error("Unknown device event handle: {0}")]
    UnknownEvent(u64),

    #[error("Device error: {0}")]
    Device(String),
}

/// Errors reported by an instrumentation callback registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("Callback registry is full ({0} callbacks registered)")]
    Exhausted(usize),

    #[error("Unknown callback handle: {0}")]
    UnknownHandle(u64),
}

/// Errors that can occur while loading a profiling configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors that can occur during flamegraph generation
#[derive(Error, Debug)]
pub enum FlamegraphError {
    #[error("Empty stack data")]
    EmptyStacks,

    #[error("Failed to render flamegraph: {0}")]
    Render(String),

    #[error("Failed to write flamegraph: {0}")]
    Output(#[from] TraceError),
}
