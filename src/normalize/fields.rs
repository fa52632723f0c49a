//! Per-kind field extraction for drained records.

use super::exported::{Annotations, ExportedEvent};
use super::flops::compute_flops;
use super::format::{dtypes_to_str, quoted, shapes_to_str, stacks_to_str};
use crate::record::{
    AllocationFields, BackendFields, EventKind, OperationFields, RawEventRecord, RecordScope,
};
use crate::trace::ActivityKind;
use crate::utils::config::{
    ANNOTATION_ADDR, ANNOTATION_BACKEND, ANNOTATION_BYTES, ANNOTATION_CALL_STACK,
    ANNOTATION_DEVICE_ID, ANNOTATION_DEVICE_TYPE, ANNOTATION_FWD_THREAD, ANNOTATION_INPUT_DIMS,
    ANNOTATION_INPUT_TYPE, ANNOTATION_MODULE_HIERARCHY, ANNOTATION_SEQUENCE_NR,
    ANNOTATION_TOTAL_ALLOCATED, ANNOTATION_TOTAL_RESERVED,
};

/// Callback resolving a debug handle into call stack and module hierarchy.
///
/// Receives the debug handle plus the recorded stack and module lists, which
/// it may rewrite in place.
pub type PostProcessFn = Box<dyn Fn(i64, &mut Vec<String>, &mut Vec<String>) + Send + Sync>;

/// Build the exported event with the fields every record kind shares
pub fn exported_event(record: &RawEventRecord) -> ExportedEvent {
    let activity_type = match &record.kind {
        EventKind::Operation(op) if op.scope == RecordScope::UserScope => {
            ActivityKind::UserAnnotation
        }
        EventKind::Operation(_) | EventKind::Backend(_) => ActivityKind::CpuOp,
        EventKind::Allocation(_) => ActivityKind::CpuInstantEvent,
    };

    ExportedEvent {
        name: record.name().to_string(),
        activity_type,
        device_type: record.device_type(),
        device_resource_id: record.start_tid as i64,
        start_us: record.start_time_ns / 1000,
        duration_us: (record.end_time_ns / 1000 - record.start_time_ns / 1000).max(0),
        correlation_id: record.correlation_id,
        start_thread_id: record.start_tid,
        end_thread_id: record.start_tid,
        ..ExportedEvent::default()
    }
}

/// Fill the kind-specific fields of `event` and return its annotations.
///
/// Never fails: missing optional data simply leaves fields unset.
pub fn normalize_event(
    record: &RawEventRecord,
    event: &mut ExportedEvent,
    post_process: Option<&PostProcessFn>,
) -> Annotations {
    let mut annotations = Annotations::new();

    match &record.kind {
        EventKind::Operation(op) => {
            normalize_operation(op, event, &mut annotations);
            resolve_stacks(
                op.debug_handle,
                &op.call_stack,
                &op.module_hierarchy,
                post_process,
                event,
                &mut annotations,
            );
        }
        EventKind::Backend(backend) => {
            normalize_backend(backend, record.start_tid, event, &mut annotations);
            resolve_stacks(
                backend.debug_handle,
                &backend.call_stack,
                &backend.module_hierarchy,
                post_process,
                event,
                &mut annotations,
            );
        }
        EventKind::Allocation(alloc) => normalize_allocation(alloc, event, &mut annotations),
    }

    annotations
}

fn push(annotations: &mut Annotations, key: &str, value: String) {
    annotations.push((key.to_string(), value));
}

fn normalize_operation(op: &OperationFields, event: &mut ExportedEvent, annotations: &mut Annotations) {
    event.end_thread_id = op.end_tid;
    event.scope = Some(op.scope);
    event.debug_handle = op.debug_handle;
    event.is_async = op.is_async;

    if !op.inputs.shapes.is_empty() {
        push(annotations, ANNOTATION_INPUT_DIMS, shapes_to_str(&op.inputs.shapes));
        event.shapes = Some(op.inputs.shapes.clone());
    }
    if !op.inputs.dtypes.is_empty() {
        push(annotations, ANNOTATION_INPUT_TYPE, dtypes_to_str(&op.inputs.dtypes));
        event.dtypes = Some(op.inputs.dtypes.clone());
    }
    if !op.extra_args.is_empty() {
        event.flops = Some(compute_flops(&op.name, &op.extra_args));
    }

    event.device_fallback = op.device_fallback;

    if op.sequence_number >= 0 {
        event.sequence_nr = op.sequence_number;
        event.fwd_thread_id = op.forward_tid;
        push(annotations, ANNOTATION_FWD_THREAD, op.forward_tid.to_string());
        push(annotations, ANNOTATION_SEQUENCE_NR, op.sequence_number.to_string());
    }
}

fn normalize_backend(
    backend: &BackendFields,
    start_tid: u64,
    event: &mut ExportedEvent,
    annotations: &mut Annotations,
) {
    event.end_thread_id = start_tid;
    event.scope = Some(backend.scope);
    event.debug_handle = backend.debug_handle;
    event.backend = Some(backend.backend.clone());

    if !backend.backend.is_empty() {
        push(annotations, ANNOTATION_BACKEND, quoted(&backend.backend));
    }
}

fn normalize_allocation(alloc: &AllocationFields, event: &mut ExportedEvent, annotations: &mut Annotations) {
    event.device_index = alloc.device.index as i64;
    event.n_bytes = alloc.alloc_size;

    push(annotations, ANNOTATION_DEVICE_TYPE, alloc.device.device_type.code().to_string());
    push(annotations, ANNOTATION_DEVICE_ID, alloc.device.index.to_string());
    push(annotations, ANNOTATION_ADDR, alloc.ptr.to_string());
    push(annotations, ANNOTATION_BYTES, alloc.alloc_size.to_string());
    if alloc.total_allocated >= 0 {
        push(annotations, ANNOTATION_TOTAL_ALLOCATED, alloc.total_allocated.to_string());
    }
    if alloc.total_reserved >= 0 {
        push(annotations, ANNOTATION_TOTAL_RESERVED, alloc.total_reserved.to_string());
    }
}

fn resolve_stacks(
    debug_handle: i64,
    call_stack: &[String],
    module_hierarchy: &[String],
    post_process: Option<&PostProcessFn>,
    event: &mut ExportedEvent,
    annotations: &mut Annotations,
) {
    let mut stack = call_stack.to_vec();
    let mut modules = module_hierarchy.to_vec();
    if let Some(callback) = post_process {
        callback(debug_handle, &mut stack, &mut modules);
    }

    if !stack.is_empty() {
        push(annotations, ANNOTATION_CALL_STACK, stacks_to_str(&stack, ";"));
        event.stack = Some(stack);
    }
    if !modules.is_empty() {
        push(annotations, ANNOTATION_MODULE_HIERARCHY, stacks_to_str(&modules, "."));
        event.module_hierarchy = Some(modules);
    }
}
