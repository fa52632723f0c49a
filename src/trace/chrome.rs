//! In-process trace sink writing Chrome trace-event JSON.
//!
//! Device-side activities are fed in by whatever observes the accelerator
//! (a driver callback, a simulator, a test) through
//! [`ChromeTraceSink::record_device_activity`]. Activities without an explicit
//! launcher are correlated to the host span open on the reporting thread.

use super::activity::{CpuTrace, Trace, TraceActivity};
use super::sink::TraceSink;
use crate::output::json::write_trace;
use crate::profiler::ActivityType;
use crate::utils::config::TRACE_NAME;
use crate::utils::error::TraceError;
use crate::utils::thread::current_thread_id;
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

#[derive(Debug, Default)]
struct SinkState {
    activities: BTreeSet<ActivityType>,
    start_us: Option<i64>,
    end_us: i64,
    cpu_traces: Vec<CpuTrace>,
    device_activities: Vec<TraceActivity>,
    /// Open host correlation ids per thread
    correlation_stacks: HashMap<u64, Vec<u64>>,
    user_correlation_stacks: HashMap<u64, Vec<u64>>,
}

/// Default [`TraceSink`] keeping everything in memory until saved
#[derive(Debug, Default)]
pub struct ChromeTraceSink {
    state: Mutex<SinkState>,
}

impl ChromeTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report an activity observed on a device.
    ///
    /// Host-side kinds are rejected since the profiler reports those itself.
    pub fn record_device_activity(&self, mut activity: TraceActivity) {
        if activity.kind.is_host_side() {
            warn!("Ignoring host-side activity '{}' reported as device activity", activity.name);
            return;
        }

        let mut state = self.state.lock();
        if activity.linked_correlation_id.is_none() {
            activity.linked_correlation_id = state
                .correlation_stacks
                .get(&current_thread_id())
                .and_then(|stack| stack.last().copied());
        }
        state.device_activities.push(activity);
    }
}

impl TraceSink for ChromeTraceSink {
    fn prepare(&self, activities: &BTreeSet<ActivityType>) -> Result<(), TraceError> {
        self.state.lock().activities = activities.clone();
        Ok(())
    }

    fn start(&self, start_us: i64) -> Result<(), TraceError> {
        debug!("Trace sink started at {} us", start_us);
        self.state.lock().start_us = Some(start_us);
        Ok(())
    }

    fn push_correlation_id(&self, correlation_id: u64, user_scope: bool) {
        let mut state = self.state.lock();
        let stacks = if user_scope {
            &mut state.user_correlation_stacks
        } else {
            &mut state.correlation_stacks
        };
        stacks.entry(current_thread_id()).or_default().push(correlation_id);
    }

    fn pop_correlation_id(&self, user_scope: bool) {
        let mut state = self.state.lock();
        let stacks = if user_scope {
            &mut state.user_correlation_stacks
        } else {
            &mut state.correlation_stacks
        };
        if let Some(stack) = stacks.get_mut(&current_thread_id()) {
            stack.pop();
        }
    }

    fn transfer_cpu_trace(&self, cpu_trace: CpuTrace, end_us: i64) {
        let mut state = self.state.lock();
        debug!(
            "Received CPU trace '{}' with {} activities",
            cpu_trace.name,
            cpu_trace.activities.len()
        );
        state.end_us = state.end_us.max(end_us);
        state.cpu_traces.push(cpu_trace);
    }

    fn finalize(&self) -> Result<Trace, TraceError> {
        let mut state = self.state.lock();
        let start_us = state.start_us.ok_or(TraceError::NotStarted)?;

        let mut activities: Vec<TraceActivity> = std::mem::take(&mut state.cpu_traces)
            .into_iter()
            .flat_map(|cpu| cpu.activities)
            .collect();

        let device_activities = std::mem::take(&mut state.device_activities);
        if state.activities.contains(&ActivityType::Device) {
            activities.extend(device_activities);
        } else if !device_activities.is_empty() {
            debug!(
                "Dropping {} device activities; device collection was not requested",
                device_activities.len()
            );
        }

        // Stable: ties keep host-before-device order
        activities.sort_by_key(|a| a.start_us);

        let end_us = activities
            .iter()
            .map(|a| a.end_us)
            .fold(state.end_us.max(start_us), i64::max);

        Ok(Trace {
            name: TRACE_NAME.to_string(),
            start_us,
            end_us,
            activities,
        })
    }

    fn save(&self, trace: &Trace, path: &Path) -> Result<(), TraceError> {
        write_trace(trace, path)
    }
}
