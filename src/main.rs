//! Exec Profiler CLI
//!
//! Runs a synthetic workload under the in-process profiler and
//! inspects the Chrome traces it produces.

use anyhow::Result;
use clap::{Parser, Subcommand};
use env_logger::Env;
use std::path::PathBuf;

use exec_profiler::commands::{
    display_schema, display_version, execute_demo, validate_args, validate_trace_file, DemoArgs,
};
use exec_profiler::flamegraph::FlamegraphConfig;

/// Exec Profiler - in-process execution profiling
#[derive(Parser, Debug)]
#[command(name = "exec-profiler")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Profile a synthetic forward/backward workload
    Demo {
        /// Output path for the Chrome trace JSON
        #[arg(short, long, default_value = "trace.json")]
        output: PathBuf,

        /// Output path for SVG flamegraph (optional)
        #[arg(short, long)]
        flamegraph: Option<PathBuf>,

        /// Output path for collapsed stacks (optional)
        #[arg(long)]
        stacks: Option<PathBuf>,

        /// Profiler configuration JSON (overrides the flags below)
        #[arg(short, long, env = "EXEC_PROFILER_CONFIG")]
        config: Option<PathBuf>,

        /// Skip interpreter call-stack tracing
        #[arg(long)]
        no_stack: bool,

        /// Skip allocation events
        #[arg(long)]
        no_memory: bool,

        /// Simulate device kernels
        #[arg(long)]
        device: bool,

        /// Worker threads running backward ops
        #[arg(long, default_value = "2")]
        threads: usize,

        /// Forward/backward iterations
        #[arg(long, default_value = "4")]
        iterations: usize,

        /// Number of top hot paths to include
        #[arg(long, default_value = "20")]
        top_paths: usize,

        /// Flamegraph title
        #[arg(long)]
        title: Option<String>,

        /// Flamegraph width in pixels
        #[arg(long, default_value = "1200")]
        width: usize,

        /// Draw the flamegraph root at the top
        #[arg(long)]
        inverted: bool,

        /// Print text summary to stdout
        #[arg(long)]
        summary: bool,
    },

    /// Validate a trace JSON file
    Validate {
        /// Path to trace JSON file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Display schema information
    Schema {
        /// Show full schema details
        #[arg(long)]
        show: bool,
    },

    /// Display version information
    Version,
}

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    // Execute command
    match cli.command {
        Commands::Demo {
            output,
            flamegraph,
            stacks,
            config,
            no_stack,
            no_memory,
            device,
            threads,
            iterations,
            top_paths,
            title,
            width,
            inverted,
            summary,
        } => {
            let fg_config = flamegraph.as_ref().map(|_| {
                let mut fg = FlamegraphConfig::new()
                    .with_width(width)
                    .with_inverted(inverted);
                if let Some(title_str) = title {
                    fg = fg.with_title(title_str);
                }
                fg
            });

            let args = DemoArgs {
                output_json: output,
                output_svg: flamegraph,
                output_stacks: stacks,
                config,
                with_stack: !no_stack,
                profile_memory: !no_memory,
                with_device: device,
                threads,
                iterations,
                top_paths,
                flamegraph_config: fg_config,
                print_summary: summary,
            };

            // Validate args first
            validate_args(&args)?;

            execute_demo(args)?;
        }

        Commands::Validate { file } => {
            validate_trace_file(file)?;
        }

        Commands::Schema { show } => {
            display_schema(show);
        }

        Commands::Version => {
            display_version();
        }
    }

    Ok(())
}
