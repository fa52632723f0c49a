//! The uniform exported event handed back to callers.

use crate::device::{elapsed_or_sentinel, DeviceFallback, DeviceTimer};
use crate::record::{DeviceType, RecordScope};
use crate::trace::ActivityKind;
use serde::{Deserialize, Serialize};

/// Key/value annotations in insertion order
pub type Annotations = Vec<(String, String)>;

/// One event of a finished profiling session
///
/// Optional fields are only set when they apply to the event kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedEvent {
    pub name: String,
    pub activity_type: ActivityKind,
    pub device_type: DeviceType,
    pub device_index: i64,
    pub device_resource_id: i64,
    pub start_us: i64,
    pub duration_us: i64,
    pub correlation_id: u64,
    pub start_thread_id: u64,
    pub end_thread_id: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<RecordScope>,
    pub debug_handle: i64,
    pub is_async: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shapes: Option<Vec<Vec<i64>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dtypes: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flops: Option<u64>,

    /// `-1` when the event is not part of a forward/backward chain
    pub sequence_nr: i64,
    pub fwd_thread_id: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_hierarchy: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,

    pub n_bytes: i64,
    /// Correlation id of the host op that launched a device-side event
    pub linked_correlation_id: u64,

    #[serde(skip)]
    pub device_fallback: DeviceFallback,

    #[serde(default)]
    pub annotations: Annotations,
}

impl Default for ExportedEvent {
    fn default() -> Self {
        Self {
            name: String::new(),
            activity_type: ActivityKind::CpuOp,
            device_type: DeviceType::Cpu,
            device_index: -1,
            device_resource_id: 0,
            start_us: 0,
            duration_us: 0,
            correlation_id: 0,
            start_thread_id: 0,
            end_thread_id: 0,
            scope: None,
            debug_handle: -1,
            is_async: false,
            shapes: None,
            dtypes: None,
            flops: None,
            sequence_nr: -1,
            fwd_thread_id: 0,
            stack: None,
            module_hierarchy: None,
            backend: None,
            n_bytes: 0,
            linked_correlation_id: 0,
            device_fallback: DeviceFallback::default(),
            annotations: Annotations::new(),
        }
    }
}

impl ExportedEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn end_us(&self) -> i64 {
        self.start_us + self.duration_us
    }

    /// True when an explicit (non-empty) call stack is attached
    pub fn has_stack(&self) -> bool {
        self.stack.as_ref().is_some_and(|s| !s.is_empty())
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Device-measured duration of the span, `-1` if unavailable
    pub fn device_elapsed_us(&self, timer: &dyn DeviceTimer) -> i64 {
        elapsed_or_sentinel(timer, &self.device_fallback)
    }
}
