//! Accelerator event timing.
//!
//! In GPU-fallback mode the profiler records a device event at the start and
//! end of every span and asks the timer for the elapsed time afterwards.
//! Timer failures never reach the observed workload: they are logged and
//! folded into a `-1` sentinel.

use crate::utils::error::TimerError;
use log::warn;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Opaque handle to a recorded device event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceEventHandle(pub u64);

/// Device events captured around one span in GPU-fallback mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceFallback {
    pub start: Option<DeviceEventHandle>,
    pub end: Option<DeviceEventHandle>,
}

/// Accelerator event timer
pub trait DeviceTimer: Send + Sync {
    /// Record an event on the current device stream
    fn record(&self) -> Result<DeviceEventHandle, TimerError>;

    /// Elapsed microseconds between two recorded events
    fn elapsed_us(&self, start: DeviceEventHandle, end: DeviceEventHandle)
        -> Result<f64, TimerError>;
}

/// Record a device event, logging and discarding failures
pub fn record_or_warn(timer: &dyn DeviceTimer) -> Option<DeviceEventHandle> {
    match timer.record() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Failed to record device event. {}", e);
            None
        }
    }
}

/// Elapsed time between the fallback events, or `-1` if unavailable
pub fn elapsed_or_sentinel(timer: &dyn DeviceTimer, fallback: &DeviceFallback) -> i64 {
    let (Some(start), Some(end)) = (fallback.start, fallback.end) else {
        return -1;
    };

    match timer.elapsed_us(start, end) {
        Ok(us) => us as i64,
        Err(e) => {
            warn!("Failed to measure time between two device events. {}", e);
            -1
        }
    }
}

/// Host-side stand-in for an accelerator timer.
///
/// Stamps events with `Instant`; useful on machines without a device and in
/// the demo workload.
#[derive(Debug, Default)]
pub struct HostEventTimer {
    next_handle: AtomicU64,
    events: Mutex<HashMap<u64, Instant>>,
}

impl HostEventTimer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeviceTimer for HostEventTimer {
    fn record(&self) -> Result<DeviceEventHandle, TimerError> {
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.events.lock().insert(id, Instant::now());
        Ok(DeviceEventHandle(id))
    }

    fn elapsed_us(
        &self,
        start: DeviceEventHandle,
        end: DeviceEventHandle,
    ) -> Result<f64, TimerError> {
        let events = self.events.lock();
        let start_at = events.get(&start.0).ok_or(TimerError::UnknownEvent(start.0))?;
        let end_at = events.get(&end.0).ok_or(TimerError::UnknownEvent(end.0))?;
        Ok(end_at.saturating_duration_since(*start_at).as_secs_f64() * 1e6)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenTimer;

    impl DeviceTimer for BrokenTimer {
        fn record(&self) -> Result<DeviceEventHandle, TimerError> {
            Err(TimerError::Device("device lost".to_string()))
        }

        fn elapsed_us(&self, _: DeviceEventHandle, _: DeviceEventHandle) -> Result<f64, TimerError> {
            Err(TimerError::Device("device lost".to_string()))
        }
    }

    #[test]
    fn test_timer_failure_folds_to_sentinel() {
        let fallback = DeviceFallback {
            start: Some(DeviceEventHandle(1)),
            end: Some(DeviceEventHandle(2)),
        };
        assert_eq!(elapsed_or_sentinel(&BrokenTimer, &fallback), -1);
        assert_eq!(record_or_warn(&BrokenTimer), None);
    }

    #[test]
    fn test_missing_handle_is_sentinel() {
        let timer = HostEventTimer::new();
        let start = timer.record().unwrap();
        let fallback = DeviceFallback { start: Some(start), end: None };
        assert_eq!(elapsed_or_sentinel(&timer, &fallback), -1);
    }

    #[test]
    fn test_host_timer_measures_forward_time() {
        let timer = HostEventTimer::new();
        let start = timer.record().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let end = timer.record().unwrap();

        let fallback = DeviceFallback { start: Some(start), end: Some(end) };
        assert!(elapsed_or_sentinel(&timer, &fallback) >= 1_000);
        assert_eq!(
            timer.elapsed_us(start, DeviceEventHandle(99)),
            Err(TimerError::UnknownEvent(99))
        );
    }
}
