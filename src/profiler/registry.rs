//! Instrumentation callback registry.
//!
//! The profiler does not instrument anything itself: it asks a registry to
//! install enter/exit callbacks for the scopes it cares about, and the host
//! framework calls the profiler hooks from those callbacks.

use crate::record::RecordScope;
use crate::utils::config::MAX_REGISTERED_CALLBACKS;
use crate::utils::error::RegistrationError;
use log::debug;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    /// Fires only on the registering thread
    ThreadLocal,
    /// Fires on every thread
    Global,
}

/// What the profiler asks to be called for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackSpec {
    pub kind: CallbackKind,
    /// Empty means every scope
    pub scopes: HashSet<RecordScope>,
    /// Whether span starts should carry input metadata
    pub needs_inputs: bool,
}

pub trait CallbackRegistry: Send + Sync {
    fn add_callback(&self, spec: CallbackSpec) -> Result<CallbackHandle, RegistrationError>;

    fn remove_callback(&self, handle: CallbackHandle) -> Result<(), RegistrationError>;
}

/// In-memory registry with a fixed number of slots
#[derive(Debug)]
pub struct BoundedRegistry {
    capacity: usize,
    next_handle: AtomicU64,
    callbacks: Mutex<HashMap<u64, CallbackSpec>>,
}

impl BoundedRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            next_handle: AtomicU64::new(1),
            callbacks: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.callbacks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.lock().is_empty()
    }

    pub fn spec(&self, handle: CallbackHandle) -> Option<CallbackSpec> {
        self.callbacks.lock().get(&handle.0).cloned()
    }
}

impl Default for BoundedRegistry {
    fn default() -> Self {
        Self::new(MAX_REGISTERED_CALLBACKS)
    }
}

impl CallbackRegistry for BoundedRegistry {
    fn add_callback(&self, spec: CallbackSpec) -> Result<CallbackHandle, RegistrationError> {
        let mut callbacks = self.callbacks.lock();
        if callbacks.len() >= self.capacity {
            return Err(RegistrationError::Exhausted(callbacks.len()));
        }

        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        debug!("Registered {:?} callback {} for {} scopes", spec.kind, handle, spec.scopes.len());
        callbacks.insert(handle, spec);
        Ok(CallbackHandle(handle))
    }

    fn remove_callback(&self, handle: CallbackHandle) -> Result<(), RegistrationError> {
        self.callbacks
            .lock()
            .remove(&handle.0)
            .map(|_| ())
            .ok_or(RegistrationError::UnknownHandle(handle.0))
    }
}
