//! Raw event records produced by the instrumentation hooks.
//!
//! Every record shares a handful of common fields; the kind-specific payload
//! lives in [`EventKind`], which the normalizer matches exhaustively.

use crate::device::DeviceFallback;
use crate::utils::config::MEMORY_EVENT_NAME;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Device family an event ran on
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    #[default]
    Cpu,
    Cuda,
    Hip,
    Xla,
    Xpu,
    Mps,
    Meta,
    PrivateUse1,
}

impl DeviceType {
    /// Numeric code written into annotations
    pub fn code(self) -> i8 {
        match self {
            DeviceType::Cpu => 0,
            DeviceType::Cuda => 1,
            DeviceType::Hip => 6,
            DeviceType::Xla => 9,
            DeviceType::Xpu => 12,
            DeviceType::Mps => 13,
            DeviceType::Meta => 14,
            DeviceType::PrivateUse1 => 20,
        }
    }
}

/// A device type plus index (`-1` = current / unspecified)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Device {
    pub device_type: DeviceType,
    pub index: i8,
}

impl Device {
    pub fn new(device_type: DeviceType, index: i8) -> Self {
        Self { device_type, index }
    }

    pub fn cpu() -> Self {
        Self::new(DeviceType::Cpu, -1)
    }
}

impl Default for Device {
    fn default() -> Self {
        Self::cpu()
    }
}

/// Instrumentation scope a span was recorded under
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordScope {
    #[default]
    Function,
    BackwardFunction,
    ScriptFunction,
    KernelFunctionDtype,
    Custom,
    UserScope,
    StaticRuntimeOp,
    StaticRuntimeModel,
}

impl RecordScope {
    pub const ALL: [RecordScope; 8] = [
        RecordScope::Function,
        RecordScope::BackwardFunction,
        RecordScope::ScriptFunction,
        RecordScope::KernelFunctionDtype,
        RecordScope::Custom,
        RecordScope::UserScope,
        RecordScope::StaticRuntimeOp,
        RecordScope::StaticRuntimeModel,
    ];

    pub fn code(self) -> i8 {
        self as i8
    }
}

/// Value of an extra operator argument used for flop estimation
#[derive(Debug, Clone, PartialEq)]
pub enum ExtraArg {
    Int(i64),
    IntList(Vec<i64>),
}

pub type ExtraArgs = BTreeMap<String, ExtraArg>;

/// Input shapes and dtypes captured when `report_input_shapes` is set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputMetadata {
    pub shapes: Vec<Vec<i64>>,
    pub dtypes: Vec<String>,
}

/// Payload of an operator span
#[derive(Debug, Clone, PartialEq)]
pub struct OperationFields {
    pub name: String,
    pub scope: RecordScope,
    /// `>= 0` when the op belongs to a forward/backward chain
    pub sequence_number: i64,
    pub forward_tid: u64,
    pub end_tid: u64,
    pub inputs: InputMetadata,
    pub extra_args: ExtraArgs,
    pub call_stack: Vec<String>,
    pub module_hierarchy: Vec<String>,
    pub is_async: bool,
    pub debug_handle: i64,
    pub device_fallback: DeviceFallback,
}

impl OperationFields {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: RecordScope::Function,
            sequence_number: -1,
            forward_tid: 0,
            end_tid: 0,
            inputs: InputMetadata::default(),
            extra_args: ExtraArgs::new(),
            call_stack: Vec::new(),
            module_hierarchy: Vec::new(),
            is_async: false,
            debug_handle: -1,
            device_fallback: DeviceFallback::default(),
        }
    }
}

/// Payload of an event reported by an execution backend
#[derive(Debug, Clone, PartialEq)]
pub struct BackendFields {
    pub name: String,
    pub backend: String,
    pub scope: RecordScope,
    pub debug_handle: i64,
    pub call_stack: Vec<String>,
    pub module_hierarchy: Vec<String>,
}

/// Payload of a memory allocation (positive size) or free (negative size)
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationFields {
    /// Pointer value, display only
    pub ptr: usize,
    pub alloc_size: i64,
    /// `-1` when unknown
    pub total_allocated: i64,
    /// `-1` when unknown
    pub total_reserved: i64,
    pub device: Device,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Operation(OperationFields),
    Backend(BackendFields),
    Allocation(AllocationFields),
}

/// A finalized record, times in Unix nanoseconds
#[derive(Debug, Clone, PartialEq)]
pub struct RawEventRecord {
    pub start_time_ns: i64,
    pub end_time_ns: i64,
    pub start_tid: u64,
    /// Process-unique for operations; `0` for backend and allocation events
    pub correlation_id: u64,
    pub kind: EventKind,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

impl RawEventRecord {
    pub fn name(&self) -> &str {
        match &self.kind {
            EventKind::Operation(op) => &op.name,
            EventKind::Backend(backend) => &backend.name,
            EventKind::Allocation(_) => MEMORY_EVENT_NAME,
        }
    }

    pub fn device_type(&self) -> DeviceType {
        match &self.kind {
            EventKind::Allocation(alloc) => alloc.device.device_type,
            EventKind::Operation(_) | EventKind::Backend(_) => DeviceType::Cpu,
        }
    }

    pub fn duration_ns(&self) -> i64 {
        self.end_time_ns - self.start_time_ns
    }

    /// Whether this record can enclose other records in the event tree
    pub fn is_span(&self) -> bool {
        !matches!(self.kind, EventKind::Allocation(_))
    }
}
