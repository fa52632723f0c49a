//! Configuration and constants shared across the profiler.

/// Current schema version written into saved traces
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Name of the CPU trace span handed to the trace sink
pub const TRACE_NAME: &str = "exec-profiler";

/// Name given to every exported allocation event
pub const MEMORY_EVENT_NAME: &str = "[memory]";

/// Capacity of the default instrumentation callback registry
pub const MAX_REGISTERED_CALLBACKS: usize = 16;

/// Label used for a missing call-stack frame reference
pub const NULL_FRAME_LABEL: &str = "null";

// Annotation keys attached to operation and backend events
pub const ANNOTATION_INPUT_DIMS: &str = "Input Dims";
pub const ANNOTATION_INPUT_TYPE: &str = "Input type";
pub const ANNOTATION_FWD_THREAD: &str = "Fwd thread id";
pub const ANNOTATION_SEQUENCE_NR: &str = "Sequence number";
pub const ANNOTATION_BACKEND: &str = "Backend";
pub const ANNOTATION_CALL_STACK: &str = "Call stack";
pub const ANNOTATION_MODULE_HIERARCHY: &str = "Module Hierarchy";

// Annotation keys attached to allocation events
pub const ANNOTATION_DEVICE_TYPE: &str = "Device Type";
pub const ANNOTATION_DEVICE_ID: &str = "Device Id";
pub const ANNOTATION_ADDR: &str = "Addr";
pub const ANNOTATION_BYTES: &str = "Bytes";
pub const ANNOTATION_TOTAL_ALLOCATED: &str = "Total Allocated";
pub const ANNOTATION_TOTAL_RESERVED: &str = "Total Reserved";

// Annotation keys written by the call-stack merge
pub const ANNOTATION_FRAME_ID: &str = "Frame id";
pub const ANNOTATION_FRAME_PARENT_ID: &str = "Frame parent id";
pub const ANNOTATION_FRAME_THREAD: &str = "Frame thread";
pub const ANNOTATION_FRAME_MODULE_ID: &str = "Frame module id";
pub const ANNOTATION_CALLER_ID: &str = "caller_id";
