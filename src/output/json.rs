//! JSON trace output writer.
//!
//! Writes finalized traces as Chrome trace-event JSON files.

use super::schema::TraceFile;
use super::validate_output_path;
use crate::trace::Trace;
use crate::utils::error::TraceError;
use chrono::Utc;
use log::{debug, info};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Write a trace to a JSON file
///
/// **Public** - main entry point for trace output
///
/// # Arguments
/// * `trace` - Finalized trace from the sink
/// * `output_path` - Path to output JSON file
///
/// # Errors
/// * `TraceError::Io` - I/O error during write
/// * `TraceError::Serialization` - JSON serialization error
/// * `TraceError::InvalidPath` - Path cannot be created or is invalid
pub fn write_trace(trace: &Trace, output_path: impl AsRef<Path>) -> Result<(), TraceError> {
    let output_path = output_path.as_ref();

    info!("Writing trace to: {}", output_path.display());

    validate_output_path(output_path)?;

    let file = TraceFile::from_trace(trace, Utc::now().to_rfc3339());
    let mut writer = BufWriter::new(File::create(output_path)?);
    serde_json::to_writer(&mut writer, &file)?;
    writer.flush()?;

    info!(
        "Trace written successfully ({} events, {} bytes)",
        file.trace_events.len(),
        calculate_file_size(output_path)
    );

    Ok(())
}

/// Render a trace as pretty-printed JSON
///
/// **Public** - useful for tests and debugging
pub fn trace_to_string(trace: &Trace) -> Result<String, TraceError> {
    let file = TraceFile::from_trace(trace, Utc::now().to_rfc3339());
    Ok(serde_json::to_string_pretty(&file)?)
}

/// Calculate file size in bytes
///
/// **Private** - internal utility
fn calculate_file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Read a trace file written by [`write_trace`]
///
/// **Public** - used by `validate` and tests
///
/// # Errors
/// * `TraceError::Io` - File read error
/// * `TraceError::Serialization` - JSON parse error
pub fn read_trace(input_path: impl AsRef<Path>) -> Result<TraceFile, TraceError> {
    let input_path = input_path.as_ref();

    debug!("Reading trace from: {}", input_path.display());

    let reader = BufReader::new(File::open(input_path)?);
    let file: TraceFile = serde_json::from_reader(reader)?;

    debug!(
        "Trace loaded: schema {}, {} events",
        file.schema_version,
        file.trace_events.len()
    );

    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::{ActivityKind, TraceActivity};
    use tempfile::NamedTempFile;

    fn create_test_trace() -> Trace {
        let mut op = TraceActivity::new("matmul", ActivityKind::CpuOp, 1_000, 1_100);
        op.correlation_id = 1;
        op.add_metadata("Sequence number", "3");
        Trace {
            name: "exec-profiler".to_string(),
            start_us: 1_000,
            end_us: 1_200,
            activities: vec![op],
        }
    }

    #[test]
    fn test_write_and_read_trace() {
        let trace = create_test_trace();
        let temp_file = NamedTempFile::new().unwrap();

        write_trace(&trace, temp_file.path()).unwrap();
        let loaded = read_trace(temp_file.path()).unwrap();

        assert_eq!(loaded.schema_version, "1.0.0");
        assert_eq!(loaded.base_time_us, 1_000);
        assert_eq!(loaded.trace_events.len(), 1);
        assert_eq!(loaded.trace_events[0].dur, Some(100));
        assert_eq!(loaded.to_trace().activities[0].name, "matmul");
    }

    #[test]
    fn test_write_creates_parent_dirs() {
        let temp_dir = tempfile::tempdir().unwrap();
        let nested_path = temp_dir.path().join("nested/dirs/trace.json");

        write_trace(&create_test_trace(), &nested_path).unwrap();

        assert!(nested_path.exists());
    }

    #[test]
    fn test_trace_to_string_contains_events() {
        let json = trace_to_string(&create_test_trace()).unwrap();
        assert!(json.contains("traceEvents"));
        assert!(json.contains("matmul"));
    }
}
