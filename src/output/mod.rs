//! Output writers for traces, stacks and flamegraphs.
//!
//! This module handles writing data to disk in various formats:
//! - Chrome trace-event JSON
//! - Collapsed stack text
//! - SVG flamegraphs

pub mod json;
pub mod schema;
pub mod stacks;
pub mod svg;

use crate::utils::error::TraceError;
use log::debug;
use std::path::Path;

// Re-export main functions
pub use json::{read_trace, trace_to_string, write_trace};
pub use schema::{TraceEvent, TraceFile};
pub use stacks::write_collapsed_stacks;
pub use svg::write_svg;

/// Validate that an output path is writable, creating parent directories
///
/// **Private** - shared by every writer in this module
fn validate_output_path(path: &Path) -> Result<(), TraceError> {
    if path.as_os_str().is_empty() {
        return Err(TraceError::InvalidPath("Path is empty".to_string()));
    }

    // Check if we're trying to overwrite a directory
    if path.is_dir() {
        return Err(TraceError::InvalidPath(format!(
            "Path is a directory: {}",
            path.display()
        )));
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            debug!("Creating parent directories: {}", parent.display());
            std::fs::create_dir_all(parent).map_err(|e| {
                TraceError::InvalidPath(format!("Cannot create directory {}: {}", parent.display(), e))
            })?;
        }
    }

    Ok(())
}
