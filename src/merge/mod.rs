//! Post-processing of a session's activities before they reach the sink.
//!
//! This module handles:
//! - Forward/backward flow links between ops sharing a sequence number
//! - Merging the interpreter call-stack stream into the activity stream

pub mod link;
pub mod stack;

// Re-export main types and functions
pub use link::ForwardBackwardLinker;
pub use stack::merge_call_stacks;
