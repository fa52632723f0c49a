//! Normalization of drained records into exported events.

pub mod exported;
pub mod fields;
pub mod flops;
pub mod format;

pub use exported::{Annotations, ExportedEvent};
pub use fields::{exported_event, normalize_event, PostProcessFn};
pub use flops::compute_flops;
