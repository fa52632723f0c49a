//! Per-thread record queues.
//!
//! Each producing thread appends into its own sub-queue, so the hot path only
//! ever touches a lock nobody else holds. `drain` runs once at session stop:
//! it empties every sub-queue, converts timestamps, orders the records and
//! resolves the event tree.

use super::event::{
    AllocationFields, BackendFields, EventKind, OperationFields, RawEventRecord, RecordScope,
};
use super::tree::link_parents;
use crate::clock::TimeConverter;
use crate::device::DeviceEventHandle;
use crate::utils::error::ProfilerError;
use crate::utils::thread::current_thread_id;
use log::debug;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Timestamp as captured by a producer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stamp {
    /// Monotonic ticks, converted at drain time
    Approximate(u64),
    /// Already wall-clock nanoseconds (backend-reported events)
    UnixNs(i64),
}

impl Stamp {
    fn to_unix_ns(self, converter: &TimeConverter) -> i64 {
        match self {
            Stamp::Approximate(ticks) => converter.convert(ticks),
            Stamp::UnixNs(ns) => ns,
        }
    }
}

#[derive(Debug)]
struct QueuedRecord {
    sequence: u64,
    start: Stamp,
    end: Option<Stamp>,
    start_tid: u64,
    correlation_id: u64,
    kind: EventKind,
}

/// Records appended by one producing thread
#[derive(Debug)]
pub struct SubQueue {
    tid: u64,
    records: Mutex<Vec<QueuedRecord>>,
}

impl SubQueue {
    fn new(tid: u64) -> Self {
        Self {
            tid,
            records: Mutex::new(Vec::new()),
        }
    }
}

/// Pending span returned by [`RecordQueue::begin_op`]
#[derive(Debug)]
pub struct OpHandle {
    subqueue: Arc<SubQueue>,
    index: usize,
    correlation_id: u64,
    scope: RecordScope,
}

impl OpHandle {
    pub fn correlation_id(&self) -> u64 {
        self.correlation_id
    }

    pub fn scope(&self) -> RecordScope {
        self.scope
    }
}

/// All sub-queues of one session
#[derive(Debug, Default)]
pub struct RecordQueue {
    subqueues: RwLock<HashMap<u64, Arc<SubQueue>>>,
    next_sequence: AtomicU64,
    drained: AtomicBool,
}

impl RecordQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sub-queue owned by the calling thread, created on first use
    pub fn subqueue(&self) -> Arc<SubQueue> {
        let tid = current_thread_id();
        if let Some(existing) = self.subqueues.read().get(&tid) {
            return Arc::clone(existing);
        }

        let mut subqueues = self.subqueues.write();
        Arc::clone(
            subqueues
                .entry(tid)
                .or_insert_with(|| Arc::new(SubQueue::new(tid))),
        )
    }

    fn push(&self, subqueue: &SubQueue, record_fn: impl FnOnce(u64) -> QueuedRecord) -> usize {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let mut records = subqueue.records.lock();
        records.push(record_fn(sequence));
        records.len() - 1
    }

    /// Open a span at monotonic time `start_ticks`
    pub fn begin_op(&self, op: OperationFields, start_ticks: u64, correlation_id: u64) -> OpHandle {
        let subqueue = self.subqueue();
        let tid = subqueue.tid;
        let scope = op.scope;
        let index = self.push(&subqueue, |sequence| QueuedRecord {
            sequence,
            start: Stamp::Approximate(start_ticks),
            end: None,
            start_tid: tid,
            correlation_id,
            kind: EventKind::Operation(op),
        });

        OpHandle {
            subqueue,
            index,
            correlation_id,
            scope,
        }
    }

    /// Close a span opened by [`begin_op`](Self::begin_op)
    pub fn end_op(
        &self,
        handle: &OpHandle,
        end_ticks: u64,
        end_tid: u64,
        fallback_end: Option<DeviceEventHandle>,
    ) {
        let mut records = handle.subqueue.records.lock();
        let Some(record) = records.get_mut(handle.index) else {
            debug!("Span {} ended after its queue was drained", handle.correlation_id);
            return;
        };

        record.end = Some(Stamp::Approximate(end_ticks));
        if let EventKind::Operation(op) = &mut record.kind {
            op.end_tid = end_tid;
            if fallback_end.is_some() {
                op.device_fallback.end = fallback_end;
            }
        }
    }

    /// Append an instantaneous allocation event
    pub fn emplace_allocation_event(&self, ticks: u64, alloc: AllocationFields) {
        let subqueue = self.subqueue();
        let tid = subqueue.tid;
        self.push(&subqueue, |sequence| QueuedRecord {
            sequence,
            start: Stamp::Approximate(ticks),
            end: Some(Stamp::Approximate(ticks)),
            start_tid: tid,
            correlation_id: 0,
            kind: EventKind::Allocation(alloc),
        });
    }

    /// Append a completed backend span reported in wall-clock microseconds
    pub fn emplace_backend_event(&self, start_us: i64, end_us: i64, backend: BackendFields) {
        let subqueue = self.subqueue();
        let tid = subqueue.tid;
        self.push(&subqueue, |sequence| QueuedRecord {
            sequence,
            start: Stamp::UnixNs(start_us.saturating_mul(1000)),
            end: Some(Stamp::UnixNs(end_us.saturating_mul(1000))),
            start_tid: tid,
            correlation_id: 0,
            kind: EventKind::Backend(backend),
        });
    }

    /// Collect every finalized record, ordered by start time.
    ///
    /// Callable once per session; in-flight spans are dropped.
    pub fn drain(&self, converter: &TimeConverter) -> Result<Vec<RawEventRecord>, ProfilerError> {
        if self.drained.swap(true, Ordering::SeqCst) {
            return Err(ProfilerError::AlreadyDrained);
        }

        let subqueues: Vec<Arc<SubQueue>> = self.subqueues.read().values().cloned().collect();

        let mut queued = Vec::new();
        let mut in_flight = 0usize;
        for subqueue in &subqueues {
            for record in subqueue.records.lock().drain(..) {
                match record.end {
                    Some(end) => queued.push((record, end)),
                    None => in_flight += 1,
                }
            }
        }

        if in_flight > 0 {
            debug!("Dropping {} in-flight spans without an end timestamp", in_flight);
        }

        let mut stamped: Vec<(u64, RawEventRecord)> = queued
            .into_iter()
            .map(|(record, end)| {
                let start_time_ns = record.start.to_unix_ns(converter);
                let end_time_ns = end.to_unix_ns(converter).max(start_time_ns);
                (
                    record.sequence,
                    RawEventRecord {
                        start_time_ns,
                        end_time_ns,
                        start_tid: record.start_tid,
                        correlation_id: record.correlation_id,
                        kind: record.kind,
                        parent: None,
                        children: Vec::new(),
                    },
                )
            })
            .collect();

        stamped.sort_by(|(seq_a, a), (seq_b, b)| {
            a.start_time_ns.cmp(&b.start_time_ns).then(seq_a.cmp(seq_b))
        });

        let mut records: Vec<RawEventRecord> = stamped.into_iter().map(|(_, r)| r).collect();
        link_parents(&mut records);

        debug!(
            "Drained {} records from {} sub-queues",
            records.len(),
            subqueues.len()
        );

        Ok(records)
    }
}
