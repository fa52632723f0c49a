//! Forward/backward flow links.
//!
//! A backward op carries the sequence number and thread of the forward op
//! that created its autograd node. Among forward candidates sharing a
//! `(thread, sequence)` key, the latest to start is the one that launched
//! the backward op.

use crate::normalize::ExportedEvent;
use crate::trace::{Flow, FlowKind, TraceActivity};
use log::debug;
use std::collections::HashMap;

/// Links backward activities to their forward activity.
///
/// Link ids start at 1 and are unique per linker.
#[derive(Debug)]
pub struct ForwardBackwardLinker {
    forward_ops: HashMap<(u64, i64), usize>,
    next_link_id: u64,
}

impl Default for ForwardBackwardLinker {
    fn default() -> Self {
        Self {
            forward_ops: HashMap::new(),
            next_link_id: 1,
        }
    }
}

impl ForwardBackwardLinker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Visit `events[i]` / `activities[i]` pairs in order and set flows.
    ///
    /// Returns the number of links created.
    pub fn link(&mut self, events: &[ExportedEvent], activities: &mut [TraceActivity]) -> usize {
        let mut links = 0;

        for (idx, event) in events.iter().enumerate().take(activities.len()) {
            if event.sequence_nr < 0 {
                continue;
            }

            if event.fwd_thread_id > 0 {
                let key = (event.fwd_thread_id, event.sequence_nr);
                let Some(&forward_idx) = self.forward_ops.get(&key) else {
                    continue;
                };
                let id = self.next_link_id;
                self.next_link_id += 1;

                activities[forward_idx].flow = Some(Flow { id, kind: FlowKind::ForwardBackward, start: true });
                activities[idx].flow = Some(Flow { id, kind: FlowKind::ForwardBackward, start: false });
                links += 1;
            } else if event.start_thread_id != 0 {
                let key = (event.start_thread_id, event.sequence_nr);
                let start_us = activities[idx].start_us;
                let replace = self
                    .forward_ops
                    .get(&key)
                    .map_or(true, |&existing| start_us >= activities[existing].start_us);
                if replace {
                    self.forward_ops.insert(key, idx);
                }
            }
        }

        debug!("Created {} forward/backward links", links);
        links
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::ActivityKind;

    fn op(name: &str, tid: u64, seq: i64, fwd_tid: u64, start: i64) -> (ExportedEvent, TraceActivity) {
        let mut event = ExportedEvent::new(name);
        event.start_thread_id = tid;
        event.sequence_nr = seq;
        event.fwd_thread_id = fwd_tid;
        event.start_us = start;
        (event, TraceActivity::new(name, ActivityKind::CpuOp, start, start + 10))
    }

    #[test]
    fn test_latest_forward_candidate_wins() {
        let (events, mut activities): (Vec<_>, Vec<_>) = vec![
            op("mul", 4, 5, 0, 100),
            op("add", 4, 5, 0, 150),
            op("add_backward", 9, 5, 4, 300),
        ]
        .into_iter()
        .unzip();

        let links = ForwardBackwardLinker::new().link(&events, &mut activities);

        assert_eq!(links, 1);
        assert_eq!(activities[0].flow, None);
        assert_eq!(
            activities[1].flow,
            Some(Flow { id: 1, kind: FlowKind::ForwardBackward, start: true })
        );
        assert_eq!(
            activities[2].flow,
            Some(Flow { id: 1, kind: FlowKind::ForwardBackward, start: false })
        );
    }

    #[test]
    fn test_unmatched_and_unsequenced_ops_stay_unlinked() {
        let (events, mut activities): (Vec<_>, Vec<_>) = vec![
            op("relu", 4, -1, 0, 10),
            op("orphan_backward", 9, 8, 4, 20),
            op("mul", 4, 2, 0, 30),
            op("other_thread_backward", 9, 2, 5, 40),
        ]
        .into_iter()
        .unzip();

        let links = ForwardBackwardLinker::new().link(&events, &mut activities);

        assert_eq!(links, 0);
        assert!(activities.iter().all(|a| a.flow.is_none()));
    }

    #[test]
    fn test_link_ids_are_sequential() {
        let (events, mut activities): (Vec<_>, Vec<_>) = vec![
            op("a", 1, 0, 0, 0),
            op("b", 1, 1, 0, 10),
            op("b_backward", 2, 1, 1, 20),
            op("a_backward", 2, 0, 1, 30),
        ]
        .into_iter()
        .unzip();

        ForwardBackwardLinker::new().link(&events, &mut activities);

        let ids: Vec<u64> = activities.iter().filter_map(|a| a.flow.map(|f| f.id)).collect();
        assert_eq!(ids, vec![2, 1, 1, 2]);
    }
}
