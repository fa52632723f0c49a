//! Small, process-unique thread identifiers.
//!
//! `std::thread::ThreadId` is opaque, so records carry a sequential id
//! assigned the first time a thread touches the profiler.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

/// Id of the calling thread (never 0)
pub fn current_thread_id() -> u64 {
    THREAD_ID.with(|id| *id)
}
