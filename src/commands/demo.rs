//! Demo command implementation.
//!
//! The demo command:
//! 1. Builds a profiler with the recording call-stack tracer
//! 2. Runs a synthetic forward/backward workload on several threads
//! 3. Disables the profiler and collects the result
//! 4. Builds collapsed stacks and metrics
//! 5. Writes the trace, stacks and flamegraph

use super::models::DemoArgs;
use crate::aggregator::{calculate_hot_paths, calculate_time_distribution, summarize_operators, StackMetric};
use crate::clock::{Clock, SystemClock};
use crate::device::HostEventTimer;
use crate::flamegraph::{generate_text_summary, FlamegraphConfig};
use crate::profiler::{
    ActivityType, Profiler, ProfilerConfig, ProfilerMode, ProfilerResult, Session, SpanStart,
};
use crate::record::{Device, DeviceType, ExtraArg, RecordScope};
use crate::trace::{ActivityKind, ChromeTraceSink, TraceActivity};
use crate::tracer::RecordingTracer;
use crate::utils::thread::current_thread_id;
use anyhow::{bail, Context, Result};
use log::{debug, info};
use std::collections::{BTreeSet, HashSet};
use std::hint::black_box;
use std::sync::Arc;
use std::time::{Duration, Instant};

const HIDDEN: i64 = 64;
const BATCH: i64 = 8;
const MAX_WORKER_THREADS: usize = 64;

/// Execute the demo command
///
/// **Public** - main entry point called from main.rs
///
/// # Returns
/// The profiling result, after every requested file was written
pub fn execute_demo(args: DemoArgs) -> Result<ProfilerResult> {
    let start_time = Instant::now();

    let config = match &args.config {
        Some(path) => ProfilerConfig::from_json_file(path)
            .with_context(|| format!("Failed to load profiler config {}", path.display()))?,
        None => ProfilerConfig::new(ProfilerMode::Standard)
            .with_input_shapes(true)
            .with_flops(true)
            .with_stack(args.with_stack)
            .with_memory(args.profile_memory),
    };

    let mut activities = BTreeSet::from([ActivityType::Cpu]);
    if args.with_device {
        activities.insert(ActivityType::Device);
    }

    info!("Step 1/5: Building profiler ({:?} mode)...", config.mode);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let tracer = RecordingTracer::new(Arc::clone(&clock));
    let sink = Arc::new(ChromeTraceSink::new());
    let profiler = Profiler::builder()
        .clock(Arc::clone(&clock))
        .tracer(Arc::new(tracer.clone()))
        .sink(sink.clone())
        .device_timer(Arc::new(HostEventTimer::new()))
        .build();

    profiler
        .enable(config, &activities, &HashSet::new())
        .context("Failed to enable profiler")?;

    info!(
        "Step 2/5: Running {} iterations on {} worker threads...",
        args.iterations, args.threads
    );
    let workload = Workload {
        profiler: &profiler,
        tracer: &tracer,
        sink: args.with_device.then_some(sink.as_ref()),
        clock: clock.as_ref(),
    };
    workload.run(args.iterations, args.threads);

    info!("Step 3/5: Collecting results...");
    let result = profiler.disable().context("Failed to disable profiler")?;
    debug!("Collected {} events", result.events().len());

    info!("Step 4/5: Building collapsed stacks...");
    let stacks = result.collapsed_stacks(StackMetric::CpuTime);
    let distribution = calculate_time_distribution(&stacks);
    info!("Time distribution: {}", distribution.summary());

    let hot_paths = calculate_hot_paths(&stacks, distribution.total_us, args.top_paths);
    for (i, path) in hot_paths.iter().take(3).enumerate() {
        debug!("  {}. {} us ({:.1}%): {}", i + 1, path.time_us, path.percentage, path.stack);
    }

    info!("Step 5/5: Writing output files...");
    result
        .save(&args.output_json)
        .context("Failed to write trace JSON")?;
    info!("✓ Trace written to: {}", args.output_json.display());

    if let Some(stacks_path) = &args.output_stacks {
        result
            .export_stacks(stacks_path, StackMetric::CpuTime)
            .context("Failed to write collapsed stacks")?;
        info!("✓ Collapsed stacks written to: {}", stacks_path.display());
    }

    if let Some(svg_path) = &args.output_svg {
        let fg_config = args.flamegraph_config.clone().unwrap_or_else(FlamegraphConfig::new);
        result
            .export_flamegraph(svg_path, &fg_config)
            .context("Failed to write flamegraph SVG")?;
        info!("✓ Flamegraph written to: {}", svg_path.display());
    }

    if args.print_summary {
        println!("\n{}", "=".repeat(80));
        println!("PROFILE SUMMARY");
        println!("{}", "=".repeat(80));
        println!("Events:        {}", result.events().len());
        println!("Unique Stacks: {}", stacks.len());
        println!("Self Time:     {} us", distribution.total_us);
        println!("\n{}", generate_text_summary(&stacks, args.top_paths, distribution.total_us));
        println!("\n  TOP OPERATORS");
        for op in summarize_operators(result.events()).iter().take(10) {
            println!(
                "  {:<24} calls {:>4}  total {:>8} us  max {:>6} us",
                op.name, op.count, op.total_us, op.max_us
            );
        }
        println!("{}", "=".repeat(80));
    }

    info!("Demo completed in {:.2}s", start_time.elapsed().as_secs_f64());

    Ok(result)
}

/// Validate demo arguments before running
///
/// **Public** - called by main.rs before execute_demo
pub fn validate_args(args: &DemoArgs) -> Result<()> {
    if args.output_json.as_os_str().is_empty() {
        bail!("Output path cannot be empty");
    }

    if args.iterations == 0 {
        bail!("Iterations must be at least 1");
    }

    if args.threads == 0 || args.threads > MAX_WORKER_THREADS {
        bail!("Worker threads must be between 1 and {}", MAX_WORKER_THREADS);
    }

    if args.top_paths == 0 {
        bail!("top_paths must be greater than 0");
    }

    if let Some(config) = &args.config {
        if !config.is_file() {
            bail!("Config file not found: {}", config.display());
        }
    }

    Ok(())
}

/// Synthetic model: `Linear` modules running `linear -> mm` forward on the
/// main thread and `mm_backward` on worker threads
struct Workload<'a> {
    profiler: &'a Profiler,
    tracer: &'a RecordingTracer,
    sink: Option<&'a ChromeTraceSink>,
    clock: &'a dyn Clock,
}

impl Workload<'_> {
    fn run(&self, iterations: usize, threads: usize) {
        let forward_tid = current_thread_id();

        {
            let _main = self.tracer.frame("demo.py(12): main");
            for iteration in 0..iterations {
                let _forward = self.tracer.frame("demo.py(30): forward");
                for layer in 0..2u64 {
                    let _module = self.tracer.module_frame("nn.Module: Linear", layer);
                    self.forward_layer(iteration as i64 * 2 + layer as i64);
                }
            }
        }

        // Backward runs on workers with no interpreter frames
        let Some(session) = self.profiler.session() else {
            return;
        };
        let workers = threads.max(1);
        std::thread::scope(|scope| {
            for worker in 0..workers {
                let session = Arc::clone(&session);
                scope.spawn(move || {
                    let mut sequence = worker;
                    while sequence < iterations * 2 {
                        backward_op(&session, sequence as i64, forward_tid);
                        sequence += workers;
                    }
                });
            }
        });
    }

    fn forward_layer(&self, sequence: i64) {
        let linear = SpanStart::new("aten::linear")
            .with_sequence(sequence, 0)
            .with_inputs(
                vec![vec![BATCH, HIDDEN], vec![HIDDEN, HIDDEN]],
                vec!["float".to_string(), "float".to_string()],
            );
        let Some(linear) = self.profiler.on_span_start(linear) else {
            return;
        };

        self.profiler
            .report_memory_usage(0x7f00_0000, BATCH * HIDDEN * 4, 1 << 20, 2 << 20, Device::cpu());

        let mm = SpanStart::new("aten::mm")
            .with_inputs(
                vec![vec![BATCH, HIDDEN], vec![HIDDEN, HIDDEN]],
                vec!["float".to_string(), "float".to_string()],
            )
            .with_extra_arg("mat1_size", ExtraArg::IntList(vec![BATCH, HIDDEN]))
            .with_extra_arg("mat2_size", ExtraArg::IntList(vec![HIDDEN, HIDDEN]));
        if let Some(mm) = self.profiler.on_span_start(mm) {
            let launch_us = self.clock.unix_now_us();
            busy_wait(Duration::from_micros(150));
            if let Some(sink) = self.sink {
                let mut kernel = TraceActivity::new(
                    "gemm_64x64_kernel",
                    ActivityKind::ConcurrentKernel,
                    launch_us + 5,
                    launch_us + 95,
                );
                kernel.resource = 7;
                sink.record_device_activity(kernel);
            }
            self.profiler.on_span_end(mm);
        }

        busy_wait(Duration::from_micros(40));
        self.profiler.report_memory_usage(
            0x7f00_0000,
            -(BATCH * HIDDEN * 4),
            1 << 20,
            2 << 20,
            Device::new(DeviceType::Cpu, 0),
        );
        self.profiler.on_span_end(linear);
    }
}

fn backward_op(session: &Session, sequence: i64, forward_tid: u64) {
    let span = SpanStart::new("aten::mm_backward")
        .with_scope(RecordScope::BackwardFunction)
        .with_sequence(sequence, forward_tid);
    if let Some(handle) = session.on_span_start(span) {
        busy_wait(Duration::from_micros(120));
        session.on_span_end(handle);
    }
}

/// Spin so the span has a measurable duration
fn busy_wait(duration: Duration) {
    let start = Instant::now();
    let mut acc = 0u64;
    while start.elapsed() < duration {
        acc = black_box(acc.wrapping_mul(31).wrapping_add(7));
    }
    black_box(acc);
}
