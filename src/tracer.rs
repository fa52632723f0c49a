//! Interpreter call-stack tracing.
//!
//! A call-stack tracer records function and module frames in a separate
//! stream from the operation records. The stack-merge step later replays
//! that stream against the operation timeline. [`RecordingTracer`] is the
//! in-memory tracer used when frames are pushed explicitly by the host.

use crate::clock::Clock;
use crate::utils::thread::current_thread_id;
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Index of a frame in the tracer's frame arena
pub type FrameId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallType {
    Function,
    /// `module_id` identifies the module instance being called
    Module { module_id: u64 },
    NativeFunction,
}

/// One traced call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallStackFrame {
    pub name: String,
    pub start_us: i64,
    pub end_us: i64,
    pub parent: Option<FrameId>,
    /// Position of the enter in the total enter/exit order
    pub call_idx: u64,
    /// Position of the exit in the total enter/exit order
    pub return_idx: u64,
    /// `0` for the first traced thread
    pub thread_id: u64,
    pub call_type: CallType,
}

/// Source of interpreter call-stack frames
pub trait CallStackTracer: Send + Sync {
    fn start(&self);

    /// Stop recording; frames still open are closed at the current time
    fn stop(&self);

    fn clear(&self);

    /// Every frame recorded since the last `clear`, in call order
    fn events(&self) -> Vec<CallStackFrame>;
}

#[derive(Debug, Default)]
struct TracerState {
    active: bool,
    frames: Vec<CallStackFrame>,
    open: HashMap<u64, Vec<FrameId>>,
    thread_ids: HashMap<u64, u64>,
    next_index: u64,
}

impl TracerState {
    fn next_index(&mut self) -> u64 {
        let idx = self.next_index;
        self.next_index += 1;
        idx
    }

    fn traced_thread_id(&mut self, os_tid: u64) -> u64 {
        let next = self.thread_ids.len() as u64;
        *self.thread_ids.entry(os_tid).or_insert(next)
    }

    fn close(&mut self, frame: FrameId, end_us: i64) {
        let return_idx = self.next_index();
        if let Some(f) = self.frames.get_mut(frame) {
            f.end_us = end_us.max(f.start_us);
            f.return_idx = return_idx;
        }
    }
}

/// Tracer fed by explicit [`enter`](Self::enter) / [`exit`](Self::exit) calls.
///
/// Cloning gives another handle on the same frame arena.
#[derive(Clone)]
pub struct RecordingTracer {
    state: Arc<Mutex<TracerState>>,
    clock: Arc<dyn Clock>,
}

impl RecordingTracer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(TracerState::default())),
            clock,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.lock().active
    }

    /// Push a plain function frame; `None` while the tracer is stopped
    pub fn enter(&self, name: impl Into<String>) -> Option<FrameId> {
        self.enter_with(name, CallType::Function)
    }

    pub fn enter_module(&self, name: impl Into<String>, module_id: u64) -> Option<FrameId> {
        self.enter_with(name, CallType::Module { module_id })
    }

    pub fn enter_with(&self, name: impl Into<String>, call_type: CallType) -> Option<FrameId> {
        let start_us = self.clock.unix_now_us();
        let os_tid = current_thread_id();

        let mut state = self.state.lock();
        if !state.active {
            return None;
        }

        let thread_id = state.traced_thread_id(os_tid);
        let parent = state.open.get(&os_tid).and_then(|stack| stack.last().copied());
        let call_idx = state.next_index();
        let id = state.frames.len();
        state.frames.push(CallStackFrame {
            name: name.into(),
            start_us,
            end_us: start_us,
            parent,
            call_idx,
            return_idx: call_idx,
            thread_id,
            call_type,
        });
        state.open.entry(os_tid).or_default().push(id);
        Some(id)
    }

    /// Pop the innermost open frame of the calling thread
    pub fn exit(&self) -> Option<FrameId> {
        let end_us = self.clock.unix_now_us();
        let os_tid = current_thread_id();

        let mut state = self.state.lock();
        let frame = state.open.get_mut(&os_tid).and_then(|stack| stack.pop())?;
        state.close(frame, end_us);
        Some(frame)
    }

    /// Enter a function frame that exits when the guard drops
    pub fn frame(&self, name: impl Into<String>) -> FrameGuard<'_> {
        let entered = self.enter(name).is_some();
        FrameGuard { tracer: self, entered }
    }

    pub fn module_frame(&self, name: impl Into<String>, module_id: u64) -> FrameGuard<'_> {
        let entered = self.enter_module(name, module_id).is_some();
        FrameGuard { tracer: self, entered }
    }
}

impl CallStackTracer for RecordingTracer {
    fn start(&self) {
        debug!("Call stack tracer started");
        self.state.lock().active = true;
    }

    fn stop(&self) {
        let end_us = self.clock.unix_now_us();
        let mut state = self.state.lock();
        state.active = false;

        // Innermost frames close first so return order stays nested
        let open: Vec<Vec<FrameId>> = state.open.drain().map(|(_, stack)| stack).collect();
        for stack in open {
            for frame in stack.into_iter().rev() {
                state.close(frame, end_us);
            }
        }
        debug!("Call stack tracer stopped with {} frames", state.frames.len());
    }

    fn clear(&self) {
        let mut state = self.state.lock();
        state.frames.clear();
        state.open.clear();
        state.thread_ids.clear();
        state.next_index = 0;
    }

    fn events(&self) -> Vec<CallStackFrame> {
        self.state.lock().frames.clone()
    }
}

/// Exits its frame on drop
pub struct FrameGuard<'a> {
    tracer: &'a RecordingTracer,
    entered: bool,
}

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        if self.entered {
            self.tracer.exit();
        }
    }
}
