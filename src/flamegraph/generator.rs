//! SVG flamegraph generation using inferno.
//!
//! Collapsed stacks are rendered as interactive SVG flamegraphs, plus a
//! terminal summary of the hottest paths.

use crate::aggregator::stack_builder::CollapsedStack;
use crate::utils::error::FlamegraphError;
use inferno::flamegraph::{self, Options};
use log::info;

/// Flamegraph configuration
#[derive(Debug, Clone)]
pub struct FlamegraphConfig {
    pub title: String,
    pub width: usize,
    /// Render icicle-style, roots at the top
    pub inverted: bool,
}

impl Default for FlamegraphConfig {
    fn default() -> Self {
        Self {
            title: "Execution Profile".to_string(),
            width: 1200,
            inverted: false,
        }
    }
}

impl FlamegraphConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width;
        self
    }

    pub fn with_inverted(mut self, inverted: bool) -> Self {
        self.inverted = inverted;
        self
    }
}

/// Generate SVG flamegraph from collapsed stacks
pub fn generate_flamegraph(
    stacks: &[CollapsedStack],
    config: Option<&FlamegraphConfig>,
) -> Result<String, FlamegraphError> {
    if stacks.is_empty() {
        return Err(FlamegraphError::EmptyStacks);
    }

    let config = config.cloned().unwrap_or_default();
    info!("Generating flamegraph with {} stacks", stacks.len());

    let mut options = Options::default();
    options.title = config.title.clone();
    options.count_name = "us".to_string();
    options.image_width = Some(config.width);
    options.direction = if config.inverted {
        flamegraph::Direction::Inverted
    } else {
        flamegraph::Direction::Straight
    };

    let lines: Vec<String> = stacks.iter().map(CollapsedStack::to_line).collect();
    let mut svg = Vec::new();
    flamegraph::from_lines(&mut options, lines.iter().map(String::as_str), &mut svg)
        .map_err(|e| FlamegraphError::Render(e.to_string()))?;

    let svg_content = String::from_utf8_lossy(&svg).into_owned();
    info!("Flamegraph generated successfully ({} bytes)", svg_content.len());
    Ok(svg_content)
}

fn get_ansi_color(name: &str) -> &'static str {
    if name.starts_with('[') {
        "\x1b[32m" // Green: memory and synthetic entries
    } else if name.contains("backward") {
        "\x1b[35m" // Magenta
    } else if name.contains("mm") || name.contains("conv") {
        "\x1b[31;1m" // Red: compute heavy
    } else if name.contains("copy") || name.contains("memcpy") || name.contains("to") {
        "\x1b[33m" // Yellow
    } else {
        "\x1b[90m" // Gray
    }
}

/// Create a text summary with percentages and table formatting
pub fn generate_text_summary(stacks: &[CollapsedStack], max_lines: usize, total_us: u64) -> String {
    let mut lines = Vec::new();

    lines.push("  EXECUTION HOT PATHS".to_string());
    lines.push(format!("  ┏{}┳{}┳{}┓", "━".repeat(44), "━".repeat(14), "━".repeat(9)));
    lines.push(format!(
        "  ┃ {:<42} ┃ {:^12} ┃ {:^7} ┃",
        "Call Stack (Hottest First)", "TIME (us)", "%"
    ));
    lines.push(format!("  ┣{}╋{}╋{}┫", "━".repeat(44), "━".repeat(14), "━".repeat(9)));

    let total = total_us.max(1);

    for stack in stacks.iter().take(max_lines) {
        let percentage = (stack.weight as f64 / total as f64) * 100.0;

        let op_name = stack.stack.rsplit(';').next().unwrap_or(&stack.stack);
        let color = get_ansi_color(op_name);
        let reset = "\x1b[0m";

        // Keep the innermost frames when the stack is too long to display
        let char_count = stack.stack.chars().count();
        let display_stack = if char_count > 42 {
            let tail: String = stack.stack.chars().skip(char_count - 39).collect();
            format!("...{}", tail)
        } else {
            stack.stack.clone()
        };

        lines.push(format!(
            "  ┃ {}{:<42}{} ┃ {:>12} ┃ {:>6.1}% ┃",
            color, display_stack, reset, stack.weight, percentage
        ));
    }

    lines.push(format!("  ┗{}┻{}┻{}┛", "━".repeat(44), "━".repeat(14), "━".repeat(9)));

    if stacks.len() > max_lines {
        lines.push(String::new());
        lines.push(format!("   (Showing top {} of {} unique paths)", max_lines, stacks.len()));
    }

    lines.join("\n")
}
