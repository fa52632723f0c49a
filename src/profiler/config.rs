//! Profiling configuration.
//!
//! Every type here is serde-(de)serializable so a configuration can be kept
//! in a JSON file next to the workload and loaded with
//! [`ProfilerConfig::from_json_file`].

use crate::utils::error::ConfigError;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// How a session collects events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfilerMode {
    #[default]
    Disabled,
    /// Thread-scoped collection through the trace sink
    Standard,
    /// Thread-scoped collection timing spans with device events
    GpuFallback,
    /// Process-global session, enabled from outside the workload
    OnDemand,
    /// Callbacks forward ranges to an external annotation tool; nothing is recorded
    AnnotationOnly,
}

impl ProfilerMode {
    /// Modes that record events into a queue
    pub fn records_events(self) -> bool {
        matches!(
            self,
            ProfilerMode::Standard | ProfilerMode::GpuFallback | ProfilerMode::OnDemand
        )
    }
}

/// Activity family requested from the profiler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Cpu,
    Device,
}

/// Features that may change or go away
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentalConfig {
    /// Add flow links between forward ops and the backward ops they spawned
    pub link_forward_backward: bool,
}

impl Default for ExperimentalConfig {
    fn default() -> Self {
        Self {
            link_forward_backward: true,
        }
    }
}

/// Configuration of one profiling session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerConfig {
    pub mode: ProfilerMode,
    pub report_input_shapes: bool,
    pub profile_memory: bool,
    pub with_stack: bool,
    pub with_flops: bool,
    pub with_modules: bool,
    pub experimental: ExperimentalConfig,
}

impl ProfilerConfig {
    pub fn new(mode: ProfilerMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn with_input_shapes(mut self, enabled: bool) -> Self {
        self.report_input_shapes = enabled;
        self
    }

    pub fn with_memory(mut self, enabled: bool) -> Self {
        self.profile_memory = enabled;
        self
    }

    pub fn with_stack(mut self, enabled: bool) -> Self {
        self.with_stack = enabled;
        self
    }

    pub fn with_flops(mut self, enabled: bool) -> Self {
        self.with_flops = enabled;
        self
    }

    pub fn with_modules(mut self, enabled: bool) -> Self {
        self.with_modules = enabled;
        self
    }

    pub fn with_experimental(mut self, experimental: ExperimentalConfig) -> Self {
        self.experimental = experimental;
        self
    }

    /// Load a configuration from a JSON file; missing fields take defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!("Loading profiler config from: {}", path.display());

        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}
