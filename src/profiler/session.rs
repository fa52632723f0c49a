//! One profiling session: configuration, record queue and finalization.
//!
//! A session is created by `Profiler::enable`, fed by the instrumentation
//! hooks (possibly from many threads through an `Arc<Session>`), and
//! finalized exactly once by `Profiler::disable`.

use super::config::{ActivityType, ProfilerConfig, ProfilerMode};
use super::registry::CallbackHandle;
use crate::clock::{Clock, ClockConverter};
use crate::device::{record_or_warn, DeviceEventHandle, DeviceTimer};
use crate::merge::{merge_call_stacks, ForwardBackwardLinker};
use crate::normalize::{exported_event, normalize_event, ExportedEvent, PostProcessFn};
use crate::record::{
    AllocationFields, BackendFields, Device, EventTree, ExtraArg, ExtraArgs, InputMetadata,
    OpHandle, OperationFields, RecordQueue, RecordScope,
};
use crate::trace::{CpuTrace, Trace, TraceActivity, TraceSink};
use crate::tracer::CallStackFrame;
use crate::utils::config::TRACE_NAME;
use crate::utils::error::ProfilerError;
use crate::utils::thread::current_thread_id;
use log::{debug, info, trace};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_CORRELATION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique, monotonically increasing id for a host span
pub fn next_correlation_id() -> u64 {
    NEXT_CORRELATION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Everything the instrumentation knows when a span begins
#[derive(Debug, Clone, PartialEq)]
pub struct SpanStart {
    pub name: String,
    pub scope: RecordScope,
    pub sequence_number: i64,
    pub forward_tid: u64,
    pub inputs: InputMetadata,
    pub extra_args: ExtraArgs,
    pub call_stack: Vec<String>,
    pub module_hierarchy: Vec<String>,
    pub is_async: bool,
    pub debug_handle: i64,
}

impl SpanStart {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: RecordScope::Function,
            sequence_number: -1,
            forward_tid: 0,
            inputs: InputMetadata::default(),
            extra_args: ExtraArgs::new(),
            call_stack: Vec::new(),
            module_hierarchy: Vec::new(),
            is_async: false,
            debug_handle: -1,
        }
    }

    pub fn with_scope(mut self, scope: RecordScope) -> Self {
        self.scope = scope;
        self
    }

    /// Mark the span as part of a forward/backward chain.
    ///
    /// `forward_tid` is non-zero only for backward ops.
    pub fn with_sequence(mut self, sequence_number: i64, forward_tid: u64) -> Self {
        self.sequence_number = sequence_number;
        self.forward_tid = forward_tid;
        self
    }

    pub fn with_inputs(mut self, shapes: Vec<Vec<i64>>, dtypes: Vec<String>) -> Self {
        self.inputs = InputMetadata { shapes, dtypes };
        self
    }

    pub fn with_extra_arg(mut self, key: impl Into<String>, value: ExtraArg) -> Self {
        self.extra_args.insert(key.into(), value);
        self
    }

    pub fn with_call_stack(mut self, frames: Vec<String>) -> Self {
        self.call_stack = frames;
        self
    }

    pub fn with_module_hierarchy(mut self, modules: Vec<String>) -> Self {
        self.module_hierarchy = modules;
        self
    }

    pub fn with_debug_handle(mut self, debug_handle: i64) -> Self {
        self.debug_handle = debug_handle;
        self
    }

    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }
}

/// Output of [`Session::finalize`]
pub struct FinalizedSession {
    pub events: Vec<ExportedEvent>,
    pub trace: Option<Trace>,
    pub event_tree: EventTree,
}

/// State of one active profiling session
pub struct Session {
    config: ProfilerConfig,
    activities: BTreeSet<ActivityType>,
    scopes: HashSet<RecordScope>,
    start_time_us: i64,
    owner_tid: u64,
    clock: Arc<dyn Clock>,
    clock_converter: ClockConverter,
    record_queue: RecordQueue,
    sink: Arc<dyn TraceSink>,
    device_timer: Option<Arc<dyn DeviceTimer>>,
    post_process: Mutex<Option<PostProcessFn>>,
    callback_handle: Mutex<Option<CallbackHandle>>,
    finalize_lock: Mutex<()>,
}

impl Session {
    pub(crate) fn new(
        config: ProfilerConfig,
        activities: BTreeSet<ActivityType>,
        scopes: HashSet<RecordScope>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn TraceSink>,
        device_timer: Option<Arc<dyn DeviceTimer>>,
    ) -> Self {
        let clock_converter = ClockConverter::new(Arc::clone(&clock));
        let start_time_us = clock.unix_now_us();

        Self {
            config,
            activities,
            scopes,
            start_time_us,
            owner_tid: current_thread_id(),
            clock,
            clock_converter,
            record_queue: RecordQueue::new(),
            sink,
            device_timer,
            post_process: Mutex::new(None),
            callback_handle: Mutex::new(None),
            finalize_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    pub fn mode(&self) -> ProfilerMode {
        self.config.mode
    }

    pub fn activities(&self) -> &BTreeSet<ActivityType> {
        &self.activities
    }

    pub fn start_time_us(&self) -> i64 {
        self.start_time_us
    }

    pub fn sink(&self) -> Arc<dyn TraceSink> {
        Arc::clone(&self.sink)
    }

    pub fn collects_cpu(&self) -> bool {
        self.activities.contains(&ActivityType::Cpu)
    }

    /// Whether spans of `scope` are recorded; an empty scope set means all
    pub fn scope_enabled(&self, scope: RecordScope) -> bool {
        self.scopes.is_empty() || self.scopes.contains(&scope)
    }

    pub(crate) fn scopes(&self) -> &HashSet<RecordScope> {
        &self.scopes
    }

    pub(crate) fn set_post_process(&self, callback: PostProcessFn) {
        *self.post_process.lock() = Some(callback);
    }

    pub(crate) fn set_callback_handle(&self, handle: CallbackHandle) {
        *self.callback_handle.lock() = Some(handle);
    }

    pub(crate) fn take_callback_handle(&self) -> Option<CallbackHandle> {
        self.callback_handle.lock().take()
    }

    fn record_device_event(&self) -> Option<DeviceEventHandle> {
        self.device_timer
            .as_ref()
            .and_then(|timer| record_or_warn(timer.as_ref()))
    }

    /// Hook run when an instrumented span begins.
    ///
    /// Returns `None` when the span is not recorded by this session.
    pub fn on_span_start(&self, span: SpanStart) -> Option<OpHandle> {
        if !self.config.mode.records_events() {
            trace!("Annotation range push: {}", span.name);
            return None;
        }
        if !self.collects_cpu() || !self.scope_enabled(span.scope) {
            return None;
        }

        let correlation_id = next_correlation_id();
        let user_scope = span.scope == RecordScope::UserScope;

        let mut op = OperationFields::new(span.name);
        op.scope = span.scope;
        op.sequence_number = span.sequence_number;
        op.forward_tid = span.forward_tid;
        op.end_tid = current_thread_id();
        op.is_async = span.is_async;
        op.debug_handle = span.debug_handle;
        if self.config.report_input_shapes {
            op.inputs = span.inputs;
        }
        if self.config.with_flops {
            op.extra_args = span.extra_args;
        }
        if self.config.with_stack {
            op.call_stack = span.call_stack;
        }
        if self.config.with_modules {
            op.module_hierarchy = span.module_hierarchy;
        }
        if self.config.mode == ProfilerMode::GpuFallback {
            op.device_fallback.start = self.record_device_event();
        }

        self.sink.push_correlation_id(correlation_id, user_scope);
        Some(
            self.record_queue
                .begin_op(op, self.clock.approximate_now(), correlation_id),
        )
    }

    /// Hook run when a span returned by [`on_span_start`](Self::on_span_start) ends
    pub fn on_span_end(&self, handle: OpHandle) {
        let end_ticks = self.clock.approximate_now();
        let fallback_end = if self.config.mode == ProfilerMode::GpuFallback {
            self.record_device_event()
        } else {
            None
        };

        self.record_queue
            .end_op(&handle, end_ticks, current_thread_id(), fallback_end);
        self.sink
            .pop_correlation_id(handle.scope() == RecordScope::UserScope);
    }

    /// Record an allocation (positive size) or free (negative size)
    pub fn report_memory_usage(
        &self,
        ptr: usize,
        alloc_size: i64,
        total_allocated: i64,
        total_reserved: i64,
        device: Device,
    ) {
        if !self.config.profile_memory || !self.config.mode.records_events() {
            return;
        }

        self.record_queue.emplace_allocation_event(
            self.clock.approximate_now(),
            AllocationFields {
                ptr,
                alloc_size,
                total_allocated,
                total_reserved,
                device,
            },
        );
    }

    /// Record a span executed by a backend, timed in wall-clock microseconds
    pub fn report_backend_event(
        &self,
        start_us: i64,
        end_us: i64,
        debug_handle: i64,
        scope: RecordScope,
        name: impl Into<String>,
        backend: impl Into<String>,
    ) {
        if !self.config.mode.records_events() {
            return;
        }

        self.record_queue.emplace_backend_event(
            start_us,
            end_us,
            BackendFields {
                name: name.into(),
                backend: backend.into(),
                scope,
                debug_handle,
                call_stack: Vec::new(),
                module_hierarchy: Vec::new(),
            },
        );
    }

    /// Drain, normalize, link and merge the session's records.
    ///
    /// `frames` are the call-stack tracer's frames, if it ran. The CPU trace
    /// is handed to the sink; except in on-demand mode the sink is finalized
    /// and the device activities it reports are appended to the events.
    pub fn finalize(
        &self,
        frames: Option<&[CallStackFrame]>,
    ) -> Result<FinalizedSession, ProfilerError> {
        let _guard = self.finalize_lock.lock();

        let end_us = self.clock.unix_now_us();
        let converter = self.clock_converter.make_converter();
        let records = self.record_queue.drain(&converter)?;

        let process_id = std::process::id() as i64;
        let mut events = Vec::with_capacity(records.len());
        let mut activities = Vec::with_capacity(records.len());
        {
            let post_process = self.post_process.lock();
            for record in &records {
                let mut event = exported_event(record);
                let annotations = normalize_event(record, &mut event, post_process.as_ref());
                event.annotations = annotations;
                activities.push(host_activity(&event, process_id));
                events.push(event);
            }
        }

        if activities.len() != events.len() {
            return Err(ProfilerError::ActivityCountMismatch {
                activities: activities.len(),
                events: events.len(),
            });
        }

        if self.config.experimental.link_forward_backward {
            ForwardBackwardLinker::new().link(&events, &mut activities);
        }

        let activities = match frames {
            Some(frames) => merge_call_stacks(
                &mut events,
                activities,
                frames,
                process_id,
                self.owner_tid as i64,
            )?,
            None => activities,
        };

        self.sink.transfer_cpu_trace(
            CpuTrace {
                name: TRACE_NAME.to_string(),
                start_us: self.start_time_us,
                end_us,
                activities,
            },
            end_us,
        );

        let trace = if self.config.mode == ProfilerMode::OnDemand {
            None
        } else {
            let trace = self.sink.finalize()?;
            events.extend(trace.device_activities().map(device_event));
            Some(trace)
        };

        info!(
            "Session finalized with {} events ({} records)",
            events.len(),
            records.len()
        );
        debug!(
            "Trace window {} us .. {} us",
            self.start_time_us, end_us
        );

        Ok(FinalizedSession {
            events,
            trace,
            event_tree: EventTree::new(records),
        })
    }
}

/// Host-side activity mirroring a normalized event
fn host_activity(event: &ExportedEvent, process_id: i64) -> TraceActivity {
    let mut activity = TraceActivity::new(
        event.name.clone(),
        event.activity_type,
        event.start_us,
        event.end_us(),
    );
    activity.device = process_id;
    activity.resource = event.start_thread_id as i64;
    activity.correlation_id = event.correlation_id;
    activity.metadata = event.annotations.clone();
    activity
}

/// Exported event for an activity the sink collected on a device
fn device_event(activity: &TraceActivity) -> ExportedEvent {
    ExportedEvent {
        name: activity.name.clone(),
        activity_type: activity.kind,
        device_type: activity.kind.device_type(),
        device_index: activity.device,
        device_resource_id: activity.resource,
        start_us: activity.start_us,
        duration_us: activity.duration_us().max(0),
        correlation_id: activity.correlation_id,
        linked_correlation_id: activity.linked_correlation_id.unwrap_or(0),
        annotations: activity.metadata.clone(),
        ..ExportedEvent::default()
    }
}
