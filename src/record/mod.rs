//! Raw event records and the per-thread queues that collect them.
//!
//! This module handles:
//! - The record data model (operation spans, backend spans, allocations)
//! - Thread-confined appends from instrumentation hooks
//! - Draining, time conversion and event-tree resolution at session stop

pub mod event;
pub mod queue;
pub mod tree;

// Re-export main types
pub use event::{
    AllocationFields, BackendFields, Device, DeviceType, EventKind, ExtraArg, ExtraArgs,
    InputMetadata, OperationFields, RawEventRecord, RecordScope,
};
pub use queue::{OpHandle, RecordQueue, SubQueue};
pub use tree::EventTree;
