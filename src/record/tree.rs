//! Parent/child resolution for drained records.
//!
//! Per producing thread, a record nests under the innermost span that is
//! still open when it starts. Records with no open span are roots.

use super::event::RawEventRecord;
use std::collections::HashMap;

/// Fill `parent` / `children` of records already sorted by start time
pub(crate) fn link_parents(records: &mut [RawEventRecord]) {
    let mut open_spans: HashMap<u64, Vec<usize>> = HashMap::new();

    for idx in 0..records.len() {
        let start = records[idx].start_time_ns;
        let stack = open_spans.entry(records[idx].start_tid).or_default();

        while let Some(&top) = stack.last() {
            if records[top].end_time_ns <= start {
                stack.pop();
            } else {
                break;
            }
        }

        if let Some(&parent) = stack.last() {
            records[idx].parent = Some(parent);
            records[parent].children.push(idx);
        }

        if records[idx].is_span() {
            stack.push(idx);
        }
    }
}

/// Drained records with their resolved hierarchy
#[derive(Debug, Clone, Default)]
pub struct EventTree {
    records: Vec<RawEventRecord>,
}

impl EventTree {
    pub fn new(records: Vec<RawEventRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[RawEventRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Indices of records without a parent
    pub fn roots(&self) -> impl Iterator<Item = usize> + '_ {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.parent.is_none())
            .map(|(idx, _)| idx)
    }

    pub fn children(&self, idx: usize) -> &[usize] {
        self.records
            .get(idx)
            .map(|r| r.children.as_slice())
            .unwrap_or(&[])
    }

    /// Names from the root down to `idx`
    pub fn path(&self, idx: usize) -> Vec<&str> {
        let mut names = Vec::new();
        let mut cursor = Some(idx);
        while let Some(current) = cursor.and_then(|i| self.records.get(i)) {
            names.push(current.name());
            cursor = current.parent;
        }
        names.reverse();
        names
    }
}
