//! Utility modules for configuration, error handling, and thread identity.

pub mod config;
pub mod error;
pub mod thread;

// Re-export commonly used error types for convenience
pub use error::{
    ConfigError, FlamegraphError, ProfilerError, RegistrationError, TimerError, TraceError,
};
pub use thread::current_thread_id;
