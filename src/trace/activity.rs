//! Activities exchanged with the trace sink.
//!
//! The CPU side of a session is handed over as a [`CpuTrace`]; the sink
//! answers with a finalized [`Trace`] which may also contain device-side
//! activities it collected on its own.

use crate::record::DeviceType;
use serde::{Deserialize, Serialize};

/// Kind of a trace activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    #[default]
    CpuOp,
    CpuInstantEvent,
    UserAnnotation,
    InterpreterFunction,
    GpuMemcpy,
    GpuMemset,
    ConcurrentKernel,
    GpuUserAnnotation,
    ExternalCorrelation,
    DeviceRuntime,
    Overhead,
}

impl ActivityKind {
    /// Activities produced by the profiler itself rather than the sink
    pub fn is_host_side(self) -> bool {
        matches!(
            self,
            ActivityKind::CpuOp
                | ActivityKind::CpuInstantEvent
                | ActivityKind::UserAnnotation
                | ActivityKind::InterpreterFunction
        )
    }

    pub fn device_type(self) -> DeviceType {
        match self {
            ActivityKind::GpuMemcpy
            | ActivityKind::GpuMemset
            | ActivityKind::ConcurrentKernel
            | ActivityKind::GpuUserAnnotation => DeviceType::Cuda,
            ActivityKind::CpuOp
            | ActivityKind::CpuInstantEvent
            | ActivityKind::UserAnnotation
            | ActivityKind::InterpreterFunction
            | ActivityKind::ExternalCorrelation
            | ActivityKind::DeviceRuntime
            | ActivityKind::Overhead => DeviceType::Cpu,
        }
    }

    /// Category string used in exported trace files
    pub fn category(self) -> &'static str {
        match self {
            ActivityKind::CpuOp => "cpu_op",
            ActivityKind::CpuInstantEvent => "cpu_instant_event",
            ActivityKind::UserAnnotation => "user_annotation",
            ActivityKind::InterpreterFunction => "interpreter_function",
            ActivityKind::GpuMemcpy => "gpu_memcpy",
            ActivityKind::GpuMemset => "gpu_memset",
            ActivityKind::ConcurrentKernel => "kernel",
            ActivityKind::GpuUserAnnotation => "gpu_user_annotation",
            ActivityKind::ExternalCorrelation => "external_correlation",
            ActivityKind::DeviceRuntime => "device_runtime",
            ActivityKind::Overhead => "overhead",
        }
    }

    /// Inverse of [`category`](Self::category)
    pub fn from_category(category: &str) -> Option<Self> {
        let kind = match category {
            "cpu_op" => ActivityKind::CpuOp,
            "cpu_instant_event" => ActivityKind::CpuInstantEvent,
            "user_annotation" => ActivityKind::UserAnnotation,
            "interpreter_function" => ActivityKind::InterpreterFunction,
            "gpu_memcpy" => ActivityKind::GpuMemcpy,
            "gpu_memset" => ActivityKind::GpuMemset,
            "kernel" => ActivityKind::ConcurrentKernel,
            "gpu_user_annotation" => ActivityKind::GpuUserAnnotation,
            "external_correlation" => ActivityKind::ExternalCorrelation,
            "device_runtime" => ActivityKind::DeviceRuntime,
            "overhead" => ActivityKind::Overhead,
            _ => return None,
        };
        Some(kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    ForwardBackward,
}

/// Flow link between two activities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flow {
    pub id: u64,
    pub kind: FlowKind,
    /// True on the originating side of the link
    pub start: bool,
}

/// One entry of a trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceActivity {
    pub name: String,
    pub kind: ActivityKind,
    /// Process / device lane
    pub device: i64,
    /// Thread / stream lane
    pub resource: i64,
    pub start_us: i64,
    pub end_us: i64,
    pub correlation_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linked_correlation_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<Flow>,
    #[serde(default)]
    pub metadata: Vec<(String, String)>,
}

impl TraceActivity {
    pub fn new(name: impl Into<String>, kind: ActivityKind, start_us: i64, end_us: i64) -> Self {
        Self {
            name: name.into(),
            kind,
            device: 0,
            resource: 0,
            start_us,
            end_us,
            correlation_id: 0,
            linked_correlation_id: None,
            flow: None,
            metadata: Vec::new(),
        }
    }

    pub fn duration_us(&self) -> i64 {
        self.end_us - self.start_us
    }

    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.push((key.into(), value.into()));
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// CPU-side activities of one session, handed to the sink at stop
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CpuTrace {
    pub name: String,
    pub start_us: i64,
    pub end_us: i64,
    pub activities: Vec<TraceActivity>,
}

/// Finalized trace returned by the sink
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub name: String,
    pub start_us: i64,
    pub end_us: i64,
    pub activities: Vec<TraceActivity>,
}

impl Trace {
    /// Activities the sink collected itself (kernels, copies, runtime calls)
    pub fn device_activities(&self) -> impl Iterator<Item = &TraceActivity> {
        self.activities.iter().filter(|a| !a.kind.is_host_side())
    }
}
