//! Collapsed stack text output (`frame;frame;frame weight` per line).

use super::validate_output_path;
use crate::aggregator::CollapsedStack;
use crate::utils::error::TraceError;
use log::info;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Write collapsed stacks, one per line, in the order given
pub fn write_collapsed_stacks(
    stacks: &[CollapsedStack],
    output_path: impl AsRef<Path>,
) -> Result<(), TraceError> {
    let output_path = output_path.as_ref();

    info!("Writing {} collapsed stacks to: {}", stacks.len(), output_path.display());

    validate_output_path(output_path)?;

    let mut writer = BufWriter::new(File::create(output_path)?);
    for stack in stacks {
        writeln!(writer, "{}", stack.to_line())?;
    }
    writer.flush()?;

    Ok(())
}
