//! Interleaving of the interpreter call-stack stream with primary activities.
//!
//! Frames are replayed in enter/exit order against the sorted start times of
//! the primary activities to find the innermost frame active when each
//! activity started (its caller). Frames are then emitted as synthetic
//! activities in between the primary ones, and primary events without an
//! explicit stack inherit the caller chain.

use crate::normalize::format::stacks_to_str;
use crate::normalize::ExportedEvent;
use crate::trace::{ActivityKind, TraceActivity};
use crate::tracer::{CallStackFrame, CallType, FrameId};
use crate::utils::config::{
    ANNOTATION_CALLER_ID, ANNOTATION_CALL_STACK, ANNOTATION_FRAME_ID, ANNOTATION_FRAME_MODULE_ID,
    ANNOTATION_FRAME_PARENT_ID, ANNOTATION_FRAME_THREAD, NULL_FRAME_LABEL,
};
use crate::utils::error::ProfilerError;
use log::debug;
use std::collections::HashMap;

/// Enter or exit of one frame during replay
#[derive(Debug, Clone, Copy)]
struct Replay {
    time_us: i64,
    order_idx: u64,
    frame: FrameId,
    enter: bool,
}

impl Replay {
    fn pair(id: FrameId, frame: &CallStackFrame) -> [Replay; 2] {
        [
            Replay { time_us: frame.start_us, order_idx: frame.call_idx, frame: id, enter: true },
            Replay { time_us: frame.end_us, order_idx: frame.return_idx, frame: id, enter: false },
        ]
    }
}

/// Dense module ids: the n-th distinct instance of a module name gets `n`
#[derive(Debug, Default)]
struct ModuleIds<'a> {
    counters: HashMap<&'a str, usize>,
    ids: HashMap<u64, usize>,
}

impl<'a> ModuleIds<'a> {
    fn record(&mut self, frame: &'a CallStackFrame) -> Option<usize> {
        let CallType::Module { module_id } = frame.call_type else {
            return None;
        };
        let counters = &mut self.counters;
        let id = *self.ids.entry(module_id).or_insert_with(|| {
            let counter = counters.entry(frame.name.as_str()).or_insert(0);
            let id = *counter;
            *counter += 1;
            id
        });
        Some(id)
    }
}

fn frame_label(frame: Option<FrameId>) -> String {
    frame.map_or_else(|| NULL_FRAME_LABEL.to_string(), |id| id.to_string())
}

/// Caller chain of `frame`, root first
fn caller_names(frames: &[CallStackFrame], frame: Option<FrameId>) -> Vec<String> {
    let mut names = Vec::new();
    let mut cursor = frame;
    while let Some(current) = cursor.and_then(|id| frames.get(id)) {
        names.push(current.name.clone());
        cursor = current.parent;
    }
    names.reverse();
    names
}

/// Synthetic activity standing for one traced frame
fn frame_activity<'a>(
    id: FrameId,
    frame: &'a CallStackFrame,
    module_ids: &mut ModuleIds<'a>,
    process_id: i64,
    main_thread: i64,
) -> TraceActivity {
    let mut activity = TraceActivity::new(
        frame.name.clone(),
        ActivityKind::InterpreterFunction,
        frame.start_us,
        frame.end_us,
    );
    activity.device = process_id;
    activity.resource = main_thread;
    activity.add_metadata(ANNOTATION_FRAME_ID, frame_label(Some(id)));
    activity.add_metadata(ANNOTATION_FRAME_PARENT_ID, frame_label(frame.parent));
    activity.add_metadata(ANNOTATION_FRAME_THREAD, frame.thread_id.to_string());
    if let Some(module_id) = module_ids.record(frame) {
        activity.add_metadata(ANNOTATION_FRAME_MODULE_ID, module_id.to_string());
    }
    activity
}

/// Merge traced frames into `activities`.
///
/// `events[i]` must be the exported event behind `activities[i]`. Frame
/// activities are placed on the `process_id` / `main_thread` lane.
///
/// # Errors
/// * `MultiThreadedTracer` - a frame was traced on a secondary thread
/// * `ActivityCountMismatch` - events and activities are not aligned
/// * `StackMismatch` - the replayed exits do not nest
pub fn merge_call_stacks(
    events: &mut [ExportedEvent],
    activities: Vec<TraceActivity>,
    frames: &[CallStackFrame],
    process_id: i64,
    main_thread: i64,
) -> Result<Vec<TraceActivity>, ProfilerError> {
    if let Some((frame, f)) = frames.iter().enumerate().find(|(_, f)| f.thread_id != 0) {
        return Err(ProfilerError::MultiThreadedTracer { frame, thread_id: f.thread_id });
    }

    if frames.is_empty() {
        return Ok(activities);
    }

    if activities.len() != events.len() {
        return Err(ProfilerError::ActivityCountMismatch {
            activities: activities.len(),
            events: events.len(),
        });
    }

    debug!(
        "Merging {} call stack frames into {} activities",
        frames.len(),
        activities.len()
    );

    let mut start_times: Vec<i64> = activities.iter().map(|a| a.start_us).collect();
    start_times.sort_unstable();

    let mut replay: Vec<Replay> = frames
        .iter()
        .enumerate()
        .flat_map(|(id, frame)| Replay::pair(id, frame))
        .collect();
    replay.sort_by_key(|r| (r.time_us, r.order_idx));

    let mut module_ids = ModuleIds::default();
    let mut stack: Vec<FrameId> = Vec::new();
    let mut caller_at: HashMap<i64, Option<FrameId>> = HashMap::new();
    let mut cursor = replay.iter().peekable();

    for t in start_times {
        while let Some(entry) = cursor.next_if(|r| r.time_us <= t) {
            if entry.enter {
                stack.push(entry.frame);
                module_ids.record(&frames[entry.frame]);
            } else {
                match stack.last() {
                    Some(&top) if top == entry.frame => {
                        stack.pop();
                    }
                    found => {
                        return Err(ProfilerError::StackMismatch {
                            expected: entry.frame,
                            found: found.copied(),
                        })
                    }
                }
            }
        }
        caller_at.insert(t, stack.last().copied());
    }

    let mut merged = Vec::with_capacity(activities.len() + frames.len());
    let mut pending = frames.iter().enumerate().peekable();

    for (mut activity, event) in activities.into_iter().zip(events.iter_mut()) {
        while let Some((id, frame)) = pending.next_if(|(_, f)| f.end_us <= activity.end_us) {
            merged.push(frame_activity(id, frame, &mut module_ids, process_id, main_thread));
        }

        let caller = caller_at.get(&activity.start_us).copied().flatten();
        activity.add_metadata(ANNOTATION_CALLER_ID, frame_label(caller));

        if !event.has_stack() {
            let names = caller_names(frames, caller);
            let rendered = stacks_to_str(&names, ";");
            activity.add_metadata(ANNOTATION_CALL_STACK, rendered.clone());
            event.annotations.push((ANNOTATION_CALL_STACK.to_string(), rendered));
            event.stack = Some(names);
        }

        merged.push(activity);
    }

    for (id, frame) in pending {
        merged.push(frame_activity(id, frame, &mut module_ids, process_id, main_thread));
    }

    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn frame(name: &str, start: i64, end: i64, parent: Option<FrameId>, idx: (u64, u64)) -> CallStackFrame {
        CallStackFrame {
            name: name.to_string(),
            start_us: start,
            end_us: end,
            parent,
            call_idx: idx.0,
            return_idx: idx.1,
            thread_id: 0,
            call_type: CallType::Function,
        }
    }

    fn op(name: &str, start: i64, end: i64) -> (ExportedEvent, TraceActivity) {
        let mut event = ExportedEvent::new(name);
        event.start_us = start;
        event.duration_us = end - start;
        (event, TraceActivity::new(name, ActivityKind::CpuOp, start, end))
    }

    fn split(ops: Vec<(ExportedEvent, TraceActivity)>) -> (Vec<ExportedEvent>, Vec<TraceActivity>) {
        ops.into_iter().unzip()
    }

    #[test]
    fn test_no_frames_is_pass_through() {
        let (mut events, activities) = split(vec![op("a", 0, 10), op("b", 5, 8)]);
        let before = events.clone();

        let merged = merge_call_stacks(&mut events, activities.clone(), &[], 1, 1).unwrap();

        assert_eq!(merged, activities);
        assert_eq!(events, before);
    }

    #[test]
    fn test_caller_stack_and_frame_interleaving() {
        let frames = vec![
            frame("main", 0, 100, None, (0, 5)),
            frame("forward", 10, 40, Some(0), (1, 2)),
            frame("backward", 50, 90, Some(0), (3, 4)),
        ];
        let (mut events, activities) = split(vec![op("matmul", 20, 30), op("matmul_backward", 60, 70)]);

        let merged = merge_call_stacks(&mut events, activities, &frames, 9, 3).unwrap();

        let names: Vec<&str> = merged.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["matmul", "matmul_backward", "main", "forward", "backward"]);

        assert_eq!(merged[0].metadata_value("caller_id"), Some("1"));
        assert_eq!(events[0].stack, Some(vec!["main".to_string(), "forward".to_string()]));
        assert_eq!(events[0].annotation("Call stack"), Some("\"main;forward\""));
        assert_eq!(events[1].stack, Some(vec!["main".to_string(), "backward".to_string()]));

        let forward = &merged[3];
        assert_eq!(forward.kind, ActivityKind::InterpreterFunction);
        assert_eq!((forward.device, forward.resource), (9, 3));
        assert_eq!(forward.metadata_value("Frame id"), Some("1"));
        assert_eq!(forward.metadata_value("Frame parent id"), Some("0"));
        assert_eq!(merged[2].metadata_value("Frame parent id"), Some("null"));
        assert_eq!(merged[2].metadata_value("Frame thread"), Some("0"));
    }

    #[test]
    fn test_equal_timestamps_replay_in_call_order() {
        // "inner" exits and "next" enters at t=10; the exit was first
        let frames = vec![
            frame("outer", 0, 30, None, (0, 5)),
            frame("inner", 0, 10, Some(0), (1, 2)),
            frame("next", 10, 20, Some(0), (3, 4)),
        ];
        let (mut events, activities) = split(vec![op("op", 10, 12)]);

        let merged = merge_call_stacks(&mut events, activities, &frames, 0, 0).unwrap();

        let op = merged.iter().find(|a| a.name == "op").unwrap();
        assert_eq!(op.metadata_value("caller_id"), Some("2"));
        assert_eq!(events[0].stack, Some(vec!["outer".to_string(), "next".to_string()]));
    }

    #[test]
    fn test_explicit_stack_is_kept() {
        let frames = vec![frame("main", 0, 100, None, (0, 1))];
        let (mut events, activities) = split(vec![op("scripted", 10, 20)]);
        events[0].stack = Some(vec!["model.py(3): forward".to_string()]);

        let merged = merge_call_stacks(&mut events, activities, &frames, 0, 0).unwrap();

        assert_eq!(events[0].stack, Some(vec!["model.py(3): forward".to_string()]));
        assert_eq!(merged[0].metadata_value("caller_id"), Some("0"));
        assert_eq!(merged[0].metadata_value("Call stack"), None);
    }

    #[test]
    fn test_module_ids_are_dense_per_name() {
        let mut frames = vec![
            frame("Linear", 0, 10, None, (0, 1)),
            frame("Linear", 20, 30, None, (2, 3)),
            frame("Linear", 40, 50, None, (4, 5)),
            frame("Conv2d", 60, 70, None, (6, 7)),
        ];
        frames[0].call_type = CallType::Module { module_id: 100 };
        frames[1].call_type = CallType::Module { module_id: 200 };
        frames[2].call_type = CallType::Module { module_id: 100 };
        frames[3].call_type = CallType::Module { module_id: 300 };
        let (mut events, activities) = split(vec![
            op("a", 5, 6),
            op("b", 25, 26),
            op("c", 45, 46),
            op("d", 65, 66),
        ]);

        let merged = merge_call_stacks(&mut events, activities, &frames, 0, 0).unwrap();

        let module_ids: Vec<&str> = merged
            .iter()
            .filter_map(|a| a.metadata_value("Frame module id"))
            .collect();
        assert_eq!(module_ids, vec!["0", "1", "0", "0"]);
    }

    #[test]
    fn test_multi_threaded_frames_rejected() {
        let mut frames = vec![frame("main", 0, 10, None, (0, 1))];
        frames[0].thread_id = 2;
        let (mut events, activities) = split(vec![op("a", 1, 2)]);

        let result = merge_call_stacks(&mut events, activities, &frames, 0, 0);
        assert!(matches!(
            result,
            Err(ProfilerError::MultiThreadedTracer { frame: 0, thread_id: 2 })
        ));
    }

    #[test]
    fn test_activity_count_mismatch() {
        let frames = vec![frame("main", 0, 10, None, (0, 1))];
        let (mut events, mut activities) = split(vec![op("a", 1, 2)]);
        activities.push(TraceActivity::new("extra", ActivityKind::CpuOp, 3, 4));

        let result = merge_call_stacks(&mut events, activities, &frames, 0, 0);
        assert!(matches!(
            result,
            Err(ProfilerError::ActivityCountMismatch { activities: 2, events: 1 })
        ));
    }

    #[test]
    fn test_non_nested_exit_is_a_mismatch() {
        // "b" enters inside "a" but exits after it
        let frames = vec![
            frame("a", 0, 10, None, (0, 2)),
            frame("b", 5, 15, Some(0), (1, 3)),
        ];
        let (mut events, activities) = split(vec![op("late", 20, 21)]);

        let result = merge_call_stacks(&mut events, activities, &frames, 0, 0);
        assert!(matches!(
            result,
            Err(ProfilerError::StackMismatch { expected: 0, found: Some(1) })
        ));
    }
}
