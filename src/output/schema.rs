//! On-disk trace schema (Chrome trace-event format).
//!
//! The file is a JSON object whose `traceEvents` array can be loaded by
//! chrome://tracing or Perfetto. A few extra top-level fields identify the
//! producer and the schema revision.

use crate::trace::{ActivityKind, Flow, FlowKind, Trace, TraceActivity};
use crate::utils::config::SCHEMA_VERSION;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Flow events pair a forward op with its backward op
const FLOW_CATEGORY: &str = "fwdbwd";
const FLOW_NAME: &str = "fwdbwd";

const ARG_EXTERNAL_ID: &str = "External id";
const ARG_LINKED_ID: &str = "Linked correlation id";

/// Top-level trace file structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceFile {
    /// Schema version for compatibility checking
    #[serde(rename = "schemaVersion")]
    pub schema_version: String,

    #[serde(rename = "traceName")]
    pub trace_name: String,

    #[serde(rename = "baseTimeUs")]
    pub base_time_us: i64,

    #[serde(rename = "endTimeUs")]
    pub end_time_us: i64,

    /// RFC 3339 time the file was written
    #[serde(rename = "generatedAt")]
    pub generated_at: String,

    #[serde(rename = "traceEvents")]
    pub trace_events: Vec<TraceEvent>,
}

/// One entry of `traceEvents`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Phase: `X` complete event, `s`/`f` flow start/finish
    pub ph: String,
    pub cat: String,
    pub name: String,
    pub pid: i64,
    pub tid: i64,
    pub ts: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dur: Option<i64>,

    /// Flow id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,

    /// Flow binding point
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bp: Option<String>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub args: Map<String, Value>,
}

impl TraceFile {
    /// Convert an in-memory trace into its file representation
    pub fn from_trace(trace: &Trace, generated_at: String) -> Self {
        let mut trace_events = Vec::with_capacity(trace.activities.len());

        for activity in &trace.activities {
            trace_events.push(complete_event(activity));
            if let Some(flow) = activity.flow {
                trace_events.push(flow_event(activity, flow));
            }
        }

        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            trace_name: trace.name.clone(),
            base_time_us: trace.start_us,
            end_time_us: trace.end_us,
            generated_at,
            trace_events,
        }
    }

    /// Rebuild the trace from complete and flow events.
    ///
    /// Metadata values that were written as JSON strings come back unquoted.
    pub fn to_trace(&self) -> Trace {
        let mut activities = Vec::new();
        let mut flows: Vec<(i64, i64, i64, Flow)> = Vec::new();

        for event in &self.trace_events {
            match event.ph.as_str() {
                "X" => activities.push(activity_from_event(event)),
                "s" | "f" => {
                    if let Some(id) = event.id {
                        let flow = Flow {
                            id,
                            kind: FlowKind::ForwardBackward,
                            start: event.ph == "s",
                        };
                        flows.push((event.pid, event.tid, event.ts, flow));
                    }
                }
                _ => {}
            }
        }

        for (pid, tid, ts, flow) in flows {
            let owner = activities.iter_mut().find(|a| {
                a.device == pid
                    && a.resource == tid
                    && a.flow.is_none()
                    && if flow.start { a.start_us == ts } else { a.end_us == ts }
            });
            if let Some(activity) = owner {
                activity.flow = Some(flow);
            }
        }

        Trace {
            name: self.trace_name.clone(),
            start_us: self.base_time_us,
            end_us: self.end_time_us,
            activities,
        }
    }

    pub fn complete_events(&self) -> impl Iterator<Item = &TraceEvent> {
        self.trace_events.iter().filter(|e| e.ph == "X")
    }

    pub fn flow_events(&self) -> impl Iterator<Item = &TraceEvent> {
        self.trace_events.iter().filter(|e| e.ph == "s" || e.ph == "f")
    }
}

fn complete_event(activity: &TraceActivity) -> TraceEvent {
    let mut args = Map::new();
    args.insert(ARG_EXTERNAL_ID.to_string(), Value::from(activity.correlation_id));
    if let Some(linked) = activity.linked_correlation_id {
        args.insert(ARG_LINKED_ID.to_string(), Value::from(linked));
    }
    for (key, value) in &activity.metadata {
        // Annotation values are written JSON-ready; plain text stays a string
        let parsed = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.clone()));
        args.insert(key.clone(), parsed);
    }

    TraceEvent {
        ph: "X".to_string(),
        cat: activity.kind.category().to_string(),
        name: activity.name.clone(),
        pid: activity.device,
        tid: activity.resource,
        ts: activity.start_us,
        dur: Some(activity.duration_us()),
        id: None,
        bp: None,
        args,
    }
}

fn flow_event(activity: &TraceActivity, flow: Flow) -> TraceEvent {
    let (ph, ts, bp) = if flow.start {
        ("s", activity.start_us, None)
    } else {
        ("f", activity.end_us, Some("e".to_string()))
    };

    TraceEvent {
        ph: ph.to_string(),
        cat: FLOW_CATEGORY.to_string(),
        name: FLOW_NAME.to_string(),
        pid: activity.device,
        tid: activity.resource,
        ts,
        dur: None,
        id: Some(flow.id),
        bp,
        args: Map::new(),
    }
}

fn activity_from_event(event: &TraceEvent) -> TraceActivity {
    let kind = ActivityKind::from_category(&event.cat).unwrap_or_default();
    let mut activity = TraceActivity::new(
        event.name.clone(),
        kind,
        event.ts,
        event.ts + event.dur.unwrap_or(0),
    );
    activity.device = event.pid;
    activity.resource = event.tid;

    for (key, value) in &event.args {
        match key.as_str() {
            ARG_EXTERNAL_ID => activity.correlation_id = value.as_u64().unwrap_or(0),
            ARG_LINKED_ID => activity.linked_correlation_id = value.as_u64(),
            _ => {
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                activity.add_metadata(key.clone(), text);
            }
        }
    }

    activity
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn linked_pair() -> Trace {
        let mut forward = TraceActivity::new("linear", ActivityKind::CpuOp, 10, 40);
        forward.correlation_id = 1;
        forward.add_metadata("Sequence number", "5");
        forward.add_metadata("Input Dims", "[[2, 3]]");
        forward.flow = Some(Flow { id: 1, kind: FlowKind::ForwardBackward, start: true });

        let mut backward = TraceActivity::new("linear_backward", ActivityKind::CpuOp, 50, 90);
        backward.correlation_id = 2;
        backward.resource = 3;
        backward.flow = Some(Flow { id: 1, kind: FlowKind::ForwardBackward, start: false });

        Trace {
            name: "exec-profiler".to_string(),
            start_us: 0,
            end_us: 100,
            activities: vec![forward, backward],
        }
    }

    #[test]
    fn test_flow_events_emitted_for_linked_activities() {
        let file = TraceFile::from_trace(&linked_pair(), "2024-01-01T00:00:00Z".to_string());

        assert_eq!(file.complete_events().count(), 2);
        let flows: Vec<(&str, i64)> = file.flow_events().map(|e| (e.ph.as_str(), e.ts)).collect();
        assert_eq!(flows, vec![("s", 10), ("f", 90)]);

        let first = file.complete_events().next().unwrap();
        assert_eq!(first.args["Input Dims"], serde_json::json!([[2, 3]]));
        assert_eq!(first.args["Sequence number"], serde_json::json!(5));
    }

    #[test]
    fn test_to_trace_restores_flows_and_metadata() {
        let original = linked_pair();
        let file = TraceFile::from_trace(&original, String::new());
        let restored = file.to_trace();

        assert_eq!(restored.activities.len(), 2);
        assert_eq!(restored.activities[0].flow, original.activities[0].flow);
        assert_eq!(restored.activities[1].flow, original.activities[1].flow);
        assert_eq!(restored.activities[0].metadata_value("Sequence number"), Some("5"));
        assert_eq!(restored.activities[1].correlation_id, 2);
    }
}
