use crate::output::read_trace;
use crate::trace::FlowKind;
use crate::utils::config::SCHEMA_VERSION;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Validate a trace JSON file and print statistics
pub fn validate_trace_file(file_path: PathBuf) -> Result<()> {
    println!("Validating trace: {}", file_path.display());

    let file = read_trace(&file_path)
        .with_context(|| format!("Failed to read trace {}", file_path.display()))?;
    let trace = file.to_trace();

    let mut by_category: BTreeMap<&str, usize> = BTreeMap::new();
    for event in file.complete_events() {
        *by_category.entry(event.cat.as_str()).or_insert(0) += 1;
    }
    let links = trace
        .activities
        .iter()
        .filter_map(|a| a.flow)
        .filter(|f| f.kind == FlowKind::ForwardBackward && f.start)
        .count();

    println!("✓ Valid trace JSON");
    println!("  Schema Version: {}", file.schema_version);
    println!("  Trace: {}", file.trace_name);
    println!("  Generated: {}", file.generated_at);
    println!("  Window: {} us", file.end_time_us - file.base_time_us);
    println!("  Events: {}", file.trace_events.len());
    for (category, count) in &by_category {
        println!("    {:<24} {}", category, count);
    }
    println!("  Forward/Backward Links: {}", links);

    if file.schema_version != SCHEMA_VERSION {
        println!(
            "  ⚠ Schema version {} differs from current {}",
            file.schema_version, SCHEMA_VERSION
        );
    }

    Ok(())
}

/// Display schema information
pub fn display_schema(show_details: bool) {
    println!("Exec Profiler Trace Schema (Chrome trace-event JSON)");
    println!("Current Version: {}", SCHEMA_VERSION);
    println!();

    if show_details {
        println!("Schema Structure:");
        println!("  schemaVersion: string  - Schema version (e.g., '1.0.0')");
        println!("  traceName: string      - Producer name");
        println!("  baseTimeUs: number     - Session start (Unix us)");
        println!("  endTimeUs: number      - Session end (Unix us)");
        println!("  generatedAt: string    - RFC 3339 timestamp");
        println!("  traceEvents: array     - Trace events");
        println!("    ph: string           - 'X' complete, 's'/'f' flow start/finish");
        println!("    cat: string          - cpu_op, cpu_instant_event, kernel, ...");
        println!("    name: string         - Event name");
        println!("    pid / tid: number    - Process / thread lane");
        println!("    ts: number           - Start (Unix us)");
        println!("    dur: number?         - Duration in us");
        println!("    id: number?          - Flow id (forward/backward link)");
        println!("    args: object?        - Annotations (Input Dims, Call stack, ...)");
    } else {
        println!("Use --show for detailed schema information");
    }
}

/// Display version information
pub fn display_version() {
    println!("Exec Profiler v{}", env!("CARGO_PKG_VERSION"));
    println!("Trace Schema: v{}", SCHEMA_VERSION);
    println!();
    println!("An in-process execution profiler producing Chrome traces and flamegraphs.");
}
