//! String renderings used for annotation values.
//!
//! Values are written so that a JSON trace writer can embed them raw:
//! lists render as JSON arrays and joined stacks are quoted.

/// `[[2, 3], [3, 4]]`
pub fn shapes_to_str(shapes: &[Vec<i64>]) -> String {
    let inner: Vec<String> = shapes
        .iter()
        .map(|shape| {
            let dims: Vec<String> = shape.iter().map(i64::to_string).collect();
            format!("[{}]", dims.join(", "))
        })
        .collect();
    format!("[{}]", inner.join(", "))
}

/// `value` as a JSON string literal, escapes included
pub fn quoted(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}

/// `["float", "int"]`
pub fn dtypes_to_str(dtypes: &[String]) -> String {
    let items: Vec<String> = dtypes.iter().map(|d| quoted(d)).collect();
    format!("[{}]", items.join(", "))
}

/// Joined frames wrapped in quotes, e.g. `"main;forward;linear"`
pub fn stacks_to_str(frames: &[String], delim: &str) -> String {
    quoted(&frames.join(delim))
}
