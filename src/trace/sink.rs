//! Trace-writing backend consumed by the profiler.

use super::activity::{CpuTrace, Trace};
use crate::profiler::ActivityType;
use crate::utils::error::TraceError;
use std::collections::BTreeSet;
use std::path::Path;

/// Receives the CPU side of a session and produces the final trace.
///
/// Call order for one session: `prepare`, `start`, any number of
/// correlation pushes/pops, `transfer_cpu_trace`, then `finalize`.
pub trait TraceSink: Send + Sync {
    /// Configure which activity families will be collected
    fn prepare(&self, _activities: &BTreeSet<ActivityType>) -> Result<(), TraceError> {
        Ok(())
    }

    /// Begin collecting at wall-clock `start_us`
    fn start(&self, start_us: i64) -> Result<(), TraceError>;

    /// Correlation id of the host span now running on the calling thread
    fn push_correlation_id(&self, _correlation_id: u64, _user_scope: bool) {}

    fn pop_correlation_id(&self, _user_scope: bool) {}

    /// Hand over every CPU-side activity of the session
    fn transfer_cpu_trace(&self, cpu_trace: CpuTrace, end_us: i64);

    /// Stop collecting and produce the merged trace
    fn finalize(&self) -> Result<Trace, TraceError>;

    /// Persist a finalized trace
    fn save(&self, trace: &Trace, path: &Path) -> Result<(), TraceError>;
}
