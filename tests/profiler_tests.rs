use exec_profiler::clock::{Clock, ManualClock};
use exec_profiler::output::read_trace;
use exec_profiler::profiler::{
    ActivityType, BoundedRegistry, CallbackHandle, CallbackRegistry, CallbackSpec, Profiler,
    ProfilerBuilder, ProfilerConfig, ProfilerMode, SpanStart,
};
use exec_profiler::record::{Device, DeviceType, RecordScope};
use exec_profiler::trace::{ActivityKind, CpuTrace, FlowKind, Trace, TraceSink};
use exec_profiler::tracer::{CallStackTracer, RecordingTracer};
use exec_profiler::utils::config::MEMORY_EVENT_NAME;
use exec_profiler::utils::current_thread_id;
use exec_profiler::utils::error::{ProfilerError, RegistrationError, TraceError};
use pretty_assertions::assert_eq;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::Arc;

const ORIGIN_NS: i64 = 1_700_000_000_000_000_000;

fn cpu() -> BTreeSet<ActivityType> {
    BTreeSet::from([ActivityType::Cpu])
}

fn manual_profiler() -> (Arc<ManualClock>, Profiler) {
    let clock = Arc::new(ManualClock::new(ORIGIN_NS));
    let profiler = Profiler::builder().clock(clock.clone()).build();
    (clock, profiler)
}

#[test]
fn test_matmul_span_is_exported_with_annotations() {
    let (clock, profiler) = manual_profiler();
    let config = ProfilerConfig::new(ProfilerMode::Standard).with_input_shapes(true);
    profiler.enable(config, &cpu(), &HashSet::new()).unwrap();

    clock.advance_us(10);
    let span = SpanStart::new("aten::matmul")
        .with_sequence(3, 7)
        .with_inputs(
            vec![vec![2, 3], vec![3, 4]],
            vec!["float".to_string(), "float".to_string()],
        );
    let handle = profiler.on_span_start(span).unwrap();
    clock.advance_us(100);
    profiler.on_span_end(handle);

    let result = profiler.disable().unwrap();
    assert_eq!(result.events().len(), 1);

    let event = &result.events()[0];
    assert_eq!(event.name, "aten::matmul");
    assert_eq!(event.activity_type, ActivityKind::CpuOp);
    assert_eq!(event.start_us, clock.unix_us_at(10));
    assert_eq!(event.duration_us, 100);
    assert_eq!(event.sequence_nr, 3);
    assert_eq!(event.fwd_thread_id, 7);
    assert_eq!(event.start_thread_id, current_thread_id());
    assert_eq!(event.annotation("Input Dims"), Some("[[2, 3], [3, 4]]"));
    assert_eq!(event.annotation("Input type"), Some("[\"float\", \"float\"]"));
    assert_eq!(event.annotation("Sequence number"), Some("3"));
    assert_eq!(event.annotation("Fwd thread id"), Some("7"));
    assert!(event.correlation_id > 0);

    let trace = result.trace().unwrap();
    assert_eq!(trace.activities.len(), 1);
    assert_eq!(trace.activities[0].correlation_id, event.correlation_id);
}

#[test]
fn test_input_shapes_dropped_when_not_requested() {
    let (clock, profiler) = manual_profiler();
    profiler
        .enable(ProfilerConfig::new(ProfilerMode::Standard), &cpu(), &HashSet::new())
        .unwrap();

    let span = SpanStart::new("aten::add").with_inputs(vec![vec![4]], vec!["int".to_string()]);
    let handle = profiler.on_span_start(span).unwrap();
    clock.advance_us(5);
    profiler.on_span_end(handle);

    let result = profiler.disable().unwrap();
    let event = &result.events()[0];
    assert_eq!(event.shapes, None);
    assert_eq!(event.annotation("Input Dims"), None);
}

#[test]
fn test_allocation_event() {
    let (clock, profiler) = manual_profiler();
    let config = ProfilerConfig::new(ProfilerMode::Standard).with_memory(true);
    profiler.enable(config, &cpu(), &HashSet::new()).unwrap();

    clock.advance_us(42);
    profiler.report_memory_usage(0xdead, 256, 1024, 2048, Device::new(DeviceType::Cpu, 0));

    let result = profiler.disable().unwrap();
    assert_eq!(result.events().len(), 1);

    let event = &result.events()[0];
    assert_eq!(event.name, MEMORY_EVENT_NAME);
    assert_eq!(event.activity_type, ActivityKind::CpuInstantEvent);
    assert_eq!(event.start_us, clock.unix_us_at(42));
    assert_eq!(event.duration_us, 0);
    assert_eq!(event.n_bytes, 256);
    assert_eq!(event.device_index, 0);
    assert_eq!(event.correlation_id, 0);
    assert_eq!(event.annotation("Bytes"), Some("256"));
    assert_eq!(event.annotation("Total Allocated"), Some("1024"));
    assert_eq!(event.annotation("Total Reserved"), Some("2048"));
    assert_eq!(event.annotation("Device Type"), Some("0"));
    assert_eq!(event.annotation("Device Id"), Some("0"));
}

#[test]
fn test_memory_ignored_without_profile_memory() {
    let (_clock, profiler) = manual_profiler();
    profiler
        .enable(ProfilerConfig::new(ProfilerMode::Standard), &cpu(), &HashSet::new())
        .unwrap();
    profiler.report_memory_usage(0x1, 64, -1, -1, Device::cpu());

    let result = profiler.disable().unwrap();
    assert!(result.events().is_empty());
}

#[test]
fn test_second_enable_keeps_running_session() {
    let (clock, profiler) = manual_profiler();
    let config = ProfilerConfig::new(ProfilerMode::Standard);
    profiler.enable(config.clone(), &cpu(), &HashSet::new()).unwrap();

    let handle = profiler.on_span_start(SpanStart::new("first")).unwrap();
    clock.advance_us(3);
    profiler.on_span_end(handle);

    let err = profiler.enable(config, &cpu(), &HashSet::new()).unwrap_err();
    assert!(matches!(err, ProfilerError::AlreadyEnabled));
    assert!(profiler.is_enabled());

    let result = profiler.disable().unwrap();
    let names: Vec<&str> = result.events().iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["first"]);
}

#[test]
fn test_disable_without_session_fails() {
    let (_clock, profiler) = manual_profiler();
    assert!(matches!(profiler.disable(), Err(ProfilerError::NotRunning)));
}

#[test]
fn test_enable_without_activities_fails() {
    let (_clock, profiler) = manual_profiler();
    let err = profiler
        .enable(ProfilerConfig::new(ProfilerMode::Standard), &BTreeSet::new(), &HashSet::new())
        .unwrap_err();
    assert!(matches!(err, ProfilerError::NoActivities));
    assert!(!profiler.is_enabled());
}

#[test]
fn test_disabled_mode_is_rejected() {
    let (_clock, profiler) = manual_profiler();
    let err = profiler
        .enable(ProfilerConfig::default(), &cpu(), &HashSet::new())
        .unwrap_err();
    assert!(matches!(err, ProfilerError::UnsupportedMode(ProfilerMode::Disabled)));
}

#[test]
fn test_scope_filter_skips_other_scopes() {
    let (clock, profiler) = manual_profiler();
    let scopes = HashSet::from([RecordScope::UserScope]);
    profiler
        .enable(ProfilerConfig::new(ProfilerMode::Standard), &cpu(), &scopes)
        .unwrap();

    assert!(profiler.on_span_start(SpanStart::new("aten::mm")).is_none());
    let handle = profiler
        .on_span_start(SpanStart::new("step").with_scope(RecordScope::UserScope))
        .unwrap();
    clock.advance_us(1);
    profiler.on_span_end(handle);

    let result = profiler.disable().unwrap();
    assert_eq!(result.events().len(), 1);
    assert_eq!(result.events()[0].activity_type, ActivityKind::UserAnnotation);
}

#[test]
fn test_on_demand_session() {
    let (clock, profiler) = manual_profiler();
    let config = ProfilerConfig::new(ProfilerMode::OnDemand);
    profiler.enable(config.clone(), &cpu(), &HashSet::new()).unwrap();
    // Second enable is a no-op
    profiler.enable(config, &cpu(), &HashSet::new()).unwrap();

    let err = profiler
        .report_backend_event(0, 10, 1, RecordScope::Function, "delegate", "xnnpack")
        .unwrap_err();
    assert!(matches!(err, ProfilerError::OnDemandUnsupported(_)));

    let worker = {
        let session = profiler.session().unwrap();
        let clock = clock.clone();
        std::thread::spawn(move || {
            let handle = session.on_span_start(SpanStart::new("worker_op")).unwrap();
            clock.advance_us(2);
            session.on_span_end(handle);
        })
    };
    worker.join().unwrap();

    let result = profiler.disable().unwrap();
    assert!(result.is_empty());
    assert!(!profiler.is_enabled());
}

#[test]
fn test_on_demand_requires_cpu() {
    let (_clock, profiler) = manual_profiler();
    let err = profiler
        .enable(
            ProfilerConfig::new(ProfilerMode::OnDemand),
            &BTreeSet::from([ActivityType::Device]),
            &HashSet::new(),
        )
        .unwrap_err();
    assert!(matches!(err, ProfilerError::OnDemandRequiresCpu));
}

#[test]
fn test_annotation_only_records_nothing() {
    let (_clock, profiler) = manual_profiler();
    profiler
        .enable(ProfilerConfig::new(ProfilerMode::AnnotationOnly), &cpu(), &HashSet::new())
        .unwrap();
    assert!(profiler.on_span_start(SpanStart::new("range")).is_none());

    let result = profiler.disable().unwrap();
    assert!(result.is_empty());
}

#[test]
fn test_forward_backward_link_latest_forward_wins() {
    let (clock, profiler) = manual_profiler();
    profiler
        .enable(ProfilerConfig::new(ProfilerMode::Standard), &cpu(), &HashSet::new())
        .unwrap();
    let tid = current_thread_id();

    for name in ["mul_first", "mul_second"] {
        let handle = profiler
            .on_span_start(SpanStart::new(name).with_sequence(5, 0))
            .unwrap();
        clock.advance_us(10);
        profiler.on_span_end(handle);
    }

    let handle = profiler
        .on_span_start(
            SpanStart::new("mul_backward")
                .with_scope(RecordScope::BackwardFunction)
                .with_sequence(5, tid),
        )
        .unwrap();
    clock.advance_us(10);
    profiler.on_span_end(handle);

    let result = profiler.disable().unwrap();
    let trace = result.trace().unwrap();
    let flows: Vec<(&str, u64, bool)> = trace
        .activities
        .iter()
        .filter_map(|a| a.flow.map(|f| (a.name.as_str(), f.id, f.start)))
        .collect();
    assert_eq!(flows, vec![("mul_second", 1, true), ("mul_backward", 1, false)]);
    assert!(trace
        .activities
        .iter()
        .filter_map(|a| a.flow)
        .all(|f| f.kind == FlowKind::ForwardBackward));
}

#[test]
fn test_stack_tracer_frames_are_merged() {
    let clock = Arc::new(ManualClock::new(0));
    let tracer = RecordingTracer::new(clock.clone() as Arc<dyn Clock>);
    let profiler = Profiler::builder()
        .clock(clock.clone())
        .tracer(Arc::new(tracer.clone()))
        .build();
    let config = ProfilerConfig::new(ProfilerMode::Standard).with_stack(true);
    profiler.enable(config, &cpu(), &HashSet::new()).unwrap();

    clock.set_us(10);
    {
        let _main = tracer.frame("main");
        clock.set_us(20);
        {
            let _forward = tracer.frame("forward");
            clock.set_us(30);
            let handle = profiler.on_span_start(SpanStart::new("aten::mm")).unwrap();
            clock.set_us(40);
            profiler.on_span_end(handle);
            clock.set_us(50);
        }
        clock.set_us(60);
    }

    let result = profiler.disable().unwrap();
    assert_eq!(result.events().len(), 1);
    assert_eq!(
        result.events()[0].stack,
        Some(vec!["main".to_string(), "forward".to_string()])
    );

    let trace = result.trace().unwrap();
    let names: Vec<&str> = trace.activities.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["main", "forward", "aten::mm"]);
    let op = trace.activities.iter().find(|a| a.name == "aten::mm").unwrap();
    assert_eq!(op.metadata_value("caller_id"), Some("1"));
    assert!(!tracer.is_active());
}

#[test]
fn test_saved_trace_reads_back() {
    let temp_dir = tempfile::tempdir().unwrap();
    let path = temp_dir.path().join("nested").join("trace.json");

    let (clock, profiler) = manual_profiler();
    let config = ProfilerConfig::new(ProfilerMode::Standard).with_input_shapes(true);
    profiler.enable(config, &cpu(), &HashSet::new()).unwrap();
    let span = SpanStart::new("aten::relu").with_inputs(vec![vec![8]], vec!["float".to_string()]);
    let handle = profiler.on_span_start(span).unwrap();
    clock.advance_us(25);
    profiler.on_span_end(handle);

    let result = profiler.disable().unwrap();
    result.save(&path).unwrap();

    let file = read_trace(&path).unwrap();
    let events: Vec<_> = file.complete_events().collect();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].name, "aten::relu");
    assert_eq!(events[0].dur, Some(25));

    let trace = file.to_trace();
    assert_eq!(trace.activities[0].metadata_value("Input Dims"), Some("[[8]]"));
}

#[test]
fn test_durations_are_never_negative() {
    let (clock, profiler) = manual_profiler();
    profiler
        .enable(ProfilerConfig::new(ProfilerMode::Standard), &cpu(), &HashSet::new())
        .unwrap();

    clock.set_us(100);
    profiler
        .report_backend_event(clock.unix_us_at(100), clock.unix_us_at(90), 3, RecordScope::Function, "delegate", "xnnpack")
        .unwrap();
    let handle = profiler.on_span_start(SpanStart::new("op")).unwrap();
    profiler.on_span_end(handle);

    let result = profiler.disable().unwrap();
    assert_eq!(result.events().len(), 2);
    assert!(result.events().iter().all(|e| e.duration_us >= 0));
}

#[test]
fn test_gpu_fallback_measures_device_time() {
    use exec_profiler::device::HostEventTimer;

    let clock = Arc::new(ManualClock::new(0));
    let timer = Arc::new(HostEventTimer::new());
    let profiler = Profiler::builder()
        .clock(clock.clone())
        .device_timer(timer.clone())
        .build();
    profiler
        .enable(ProfilerConfig::new(ProfilerMode::GpuFallback), &cpu(), &HashSet::new())
        .unwrap();

    let handle = profiler.on_span_start(SpanStart::new("aten::conv2d")).unwrap();
    clock.advance_us(50);
    profiler.on_span_end(handle);

    let result = profiler.disable().unwrap();
    let event = &result.events()[0];
    assert!(event.device_elapsed_us(timer.as_ref()) >= 0);

    // Events recorded without fallback timing report the sentinel
    let plain = exec_profiler::normalize::ExportedEvent::new("plain");
    assert_eq!(plain.device_elapsed_us(timer.as_ref()), -1);
}

/// Sink whose collection never starts
struct OfflineSink;

impl TraceSink for OfflineSink {
    fn start(&self, _start_us: i64) -> Result<(), TraceError> {
        Err(TraceError::InvalidPath("sink offline".to_string()))
    }

    fn transfer_cpu_trace(&self, _cpu_trace: CpuTrace, _end_us: i64) {}

    fn finalize(&self) -> Result<Trace, TraceError> {
        Err(TraceError::NotStarted)
    }

    fn save(&self, _trace: &Trace, _path: &Path) -> Result<(), TraceError> {
        Err(TraceError::NoTrace)
    }
}

/// Registry that accepts callbacks but cannot remove them
struct StickyRegistry;

impl CallbackRegistry for StickyRegistry {
    fn add_callback(&self, _spec: CallbackSpec) -> Result<CallbackHandle, RegistrationError> {
        Ok(CallbackHandle(1))
    }

    fn remove_callback(&self, handle: CallbackHandle) -> Result<(), RegistrationError> {
        Err(RegistrationError::UnknownHandle(handle.0))
    }
}

fn stack_profiler(clock: &Arc<ManualClock>, tracer: &RecordingTracer) -> ProfilerBuilder {
    Profiler::builder()
        .clock(clock.clone())
        .tracer(Arc::new(tracer.clone()))
}

#[test]
fn test_full_registry_fails_enable_without_tracing() {
    let clock = Arc::new(ManualClock::new(0));
    let tracer = RecordingTracer::new(clock.clone() as Arc<dyn Clock>);
    let profiler = stack_profiler(&clock, &tracer)
        .registry(Arc::new(BoundedRegistry::new(0)))
        .build();

    let err = profiler
        .enable(ProfilerConfig::new(ProfilerMode::Standard).with_stack(true), &cpu(), &HashSet::new())
        .unwrap_err();
    assert!(matches!(
        err,
        ProfilerError::CallbackRegistration(RegistrationError::Exhausted(0))
    ));

    assert!(!profiler.is_enabled());
    assert!(!tracer.is_active());
    assert_eq!(tracer.enter("stale_frame"), None);
    assert!(tracer.events().is_empty());
}

#[test]
fn test_sink_start_failure_releases_callbacks() {
    let clock = Arc::new(ManualClock::new(0));
    let tracer = RecordingTracer::new(clock.clone() as Arc<dyn Clock>);
    let registry = Arc::new(BoundedRegistry::new(1));
    let profiler = stack_profiler(&clock, &tracer)
        .registry(registry.clone())
        .sink(Arc::new(OfflineSink))
        .build();

    let err = profiler
        .enable(ProfilerConfig::new(ProfilerMode::Standard).with_stack(true), &cpu(), &HashSet::new())
        .unwrap_err();
    assert!(matches!(err, ProfilerError::Trace(TraceError::InvalidPath(_))));
    assert!(registry.is_empty());
    assert!(!tracer.is_active());

    let err = profiler
        .enable(ProfilerConfig::new(ProfilerMode::OnDemand), &cpu(), &HashSet::new())
        .unwrap_err();
    assert!(matches!(err, ProfilerError::Trace(_)));
    assert!(registry.is_empty());
    assert!(!profiler.is_enabled());
}

#[test]
fn test_disable_survives_callback_removal_failure() {
    let clock = Arc::new(ManualClock::new(0));
    let tracer = RecordingTracer::new(clock.clone() as Arc<dyn Clock>);
    let profiler = stack_profiler(&clock, &tracer)
        .registry(Arc::new(StickyRegistry))
        .build();
    profiler
        .enable(ProfilerConfig::new(ProfilerMode::Standard).with_stack(true), &cpu(), &HashSet::new())
        .unwrap();

    let handle = profiler.on_span_start(SpanStart::new("aten::mm")).unwrap();
    clock.advance_us(10);
    profiler.on_span_end(handle);

    let result = profiler.disable().unwrap();
    assert_eq!(result.events().len(), 1);
    assert!(!tracer.is_active());
    assert!(!profiler.is_enabled());
}

#[test]
fn test_post_process_resolves_debug_handles() {
    let (clock, profiler) = manual_profiler();
    let callback: exec_profiler::normalize::PostProcessFn =
        Box::new(|debug_handle, stack, modules| {
            stack.push(format!("model.py({})", debug_handle));
            modules.push("top".to_string());
        });
    profiler
        .enable_with_post_process(
            ProfilerConfig::new(ProfilerMode::Standard),
            &cpu(),
            callback,
            &HashSet::new(),
        )
        .unwrap();

    let handle = profiler
        .on_span_start(SpanStart::new("aten::conv2d").with_debug_handle(42))
        .unwrap();
    clock.advance_us(5);
    profiler.on_span_end(handle);

    let result = profiler.disable().unwrap();
    let event = &result.events()[0];
    assert_eq!(event.stack, Some(vec!["model.py(42)".to_string()]));
    assert_eq!(event.module_hierarchy, Some(vec!["top".to_string()]));
    assert_eq!(event.annotation("Call stack"), Some("\"model.py(42)\""));
    assert_eq!(event.annotation("Module Hierarchy"), Some("\"top\""));
}

#[test]
fn test_post_process_rejected_outside_thread_sessions() {
    let (_clock, profiler) = manual_profiler();
    let noop = || -> exec_profiler::normalize::PostProcessFn { Box::new(|_, _, _| {}) };

    for mode in [ProfilerMode::AnnotationOnly, ProfilerMode::OnDemand] {
        let err = profiler
            .enable_with_post_process(ProfilerConfig::new(mode), &cpu(), noop(), &HashSet::new())
            .unwrap_err();
        assert!(matches!(err, ProfilerError::PostProcessUnsupported(_)));
        assert!(!profiler.is_enabled());
    }

    profiler
        .enable(ProfilerConfig::new(ProfilerMode::OnDemand), &cpu(), &HashSet::new())
        .unwrap();
    let err = profiler
        .enable_with_post_process(
            ProfilerConfig::new(ProfilerMode::Standard),
            &cpu(),
            noop(),
            &HashSet::new(),
        )
        .unwrap_err();
    assert!(matches!(err, ProfilerError::PostProcessUnsupported(_)));
    profiler.disable().unwrap();
}

#[test]
fn test_module_hierarchy_follows_with_modules() {
    for with_modules in [true, false] {
        let (clock, profiler) = manual_profiler();
        let config = ProfilerConfig::new(ProfilerMode::Standard).with_modules(with_modules);
        profiler.enable(config, &cpu(), &HashSet::new()).unwrap();

        let span = SpanStart::new("aten::linear")
            .with_module_hierarchy(vec!["top".to_string(), "encoder".to_string()]);
        let handle = profiler.on_span_start(span).unwrap();
        clock.advance_us(3);
        profiler.on_span_end(handle);

        let result = profiler.disable().unwrap();
        let event = &result.events()[0];
        if with_modules {
            assert_eq!(
                event.module_hierarchy,
                Some(vec!["top".to_string(), "encoder".to_string()])
            );
            assert_eq!(event.annotation("Module Hierarchy"), Some("\"top.encoder\""));
        } else {
            assert_eq!(event.module_hierarchy, None);
            assert_eq!(event.annotation("Module Hierarchy"), None);
        }
    }
}
