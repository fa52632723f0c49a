use crate::flamegraph::FlamegraphConfig;
use std::path::PathBuf;

/// Arguments for the demo command
///
/// **Public** - used by main.rs to construct from CLI args
#[derive(Debug, Clone)]
pub struct DemoArgs {
    /// Output path for the Chrome trace JSON
    pub output_json: PathBuf,

    /// Output path for SVG flamegraph (optional)
    pub output_svg: Option<PathBuf>,

    /// Output path for collapsed stacks (optional)
    pub output_stacks: Option<PathBuf>,

    /// Profiling configuration file; flags below apply when absent
    pub config: Option<PathBuf>,

    /// Trace interpreter frames with the recording tracer
    pub with_stack: bool,

    /// Record allocation events
    pub profile_memory: bool,

    /// Simulate device kernels and collect device activities
    pub with_device: bool,

    /// Worker threads running backward ops
    pub threads: usize,

    /// Forward/backward iterations
    pub iterations: usize,

    /// Number of top hot paths to show
    pub top_paths: usize,

    /// Flamegraph configuration
    pub flamegraph_config: Option<FlamegraphConfig>,

    /// Print text summary to stdout
    pub print_summary: bool,
}

impl Default for DemoArgs {
    fn default() -> Self {
        Self {
            output_json: PathBuf::from("trace.json"),
            output_svg: None,
            output_stacks: None,
            config: None,
            with_stack: true,
            profile_memory: true,
            with_device: false,
            threads: 2,
            iterations: 4,
            top_paths: 20,
            flamegraph_config: None,
            print_summary: false,
        }
    }
}
