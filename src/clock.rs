//! Monotonic-to-wall-clock time conversion.
//!
//! Instrumentation hooks stamp records with a cheap monotonic reading
//! ("approximate" ticks). At drain time every tick is mapped onto Unix time
//! with a single converter, so all events of a session share one timeline.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

/// Source of both the monotonic and the wall clock
pub trait Clock: Send + Sync {
    /// Monotonic reading in nanosecond ticks
    fn approximate_now(&self) -> u64;

    /// Wall-clock time in nanoseconds since the Unix epoch
    fn unix_now_ns(&self) -> i64;

    /// Wall-clock time in microseconds since the Unix epoch
    fn unix_now_us(&self) -> i64 {
        self.unix_now_ns() / 1000
    }
}

/// Real clock: `Instant` against a process epoch, `chrono` for wall time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

fn process_epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

impl Clock for SystemClock {
    fn approximate_now(&self) -> u64 {
        process_epoch().elapsed().as_nanos() as u64
    }

    fn unix_now_ns(&self) -> i64 {
        let now = Utc::now();
        now.timestamp_nanos_opt()
            .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1000))
    }
}

/// Manually driven clock for tests and replays.
///
/// Wall time is always `unix_origin_ns + ticks`, so conversions are exact.
#[derive(Debug)]
pub struct ManualClock {
    ticks: AtomicU64,
    unix_origin_ns: i64,
}

impl ManualClock {
    pub fn new(unix_origin_ns: i64) -> Self {
        Self {
            ticks: AtomicU64::new(0),
            unix_origin_ns,
        }
    }

    /// Move the clock forward by `us` microseconds
    pub fn advance_us(&self, us: u64) {
        self.ticks.fetch_add(us * 1000, Ordering::SeqCst);
    }

    /// Set the clock to `us` microseconds after its origin
    pub fn set_us(&self, us: u64) {
        self.ticks.store(us * 1000, Ordering::SeqCst);
    }

    /// Wall-clock microseconds corresponding to `us` after the origin
    pub fn unix_us_at(&self, us: u64) -> i64 {
        (self.unix_origin_ns + (us * 1000) as i64) / 1000
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Clock for ManualClock {
    fn approximate_now(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    fn unix_now_ns(&self) -> i64 {
        self.unix_origin_ns + self.ticks.load(Ordering::SeqCst) as i64
    }
}

#[derive(Debug, Clone, Copy)]
struct ClockPair {
    approx: u64,
    unix_ns: i64,
}

impl ClockPair {
    fn sample(clock: &dyn Clock) -> Self {
        Self {
            approx: clock.approximate_now(),
            unix_ns: clock.unix_now_ns(),
        }
    }
}

/// Samples the clock at session start so later readings can be converted
#[derive(Clone)]
pub struct ClockConverter {
    clock: Arc<dyn Clock>,
    start: ClockPair,
}

impl ClockConverter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let start = ClockPair::sample(clock.as_ref());
        Self { clock, start }
    }

    /// Take a second sample and build the linear mapping for this session
    pub fn make_converter(&self) -> TimeConverter {
        let end = ClockPair::sample(self.clock.as_ref());
        let approx_span = end.approx.saturating_sub(self.start.approx);
        let slope = if approx_span == 0 {
            1.0
        } else {
            (end.unix_ns - self.start.unix_ns) as f64 / approx_span as f64
        };

        TimeConverter {
            origin: self.start,
            slope: if slope.is_finite() && slope > 0.0 { slope } else { 1.0 },
        }
    }
}

/// Linear mapping from approximate ticks to Unix nanoseconds
#[derive(Debug, Clone, Copy)]
pub struct TimeConverter {
    origin: ClockPair,
    slope: f64,
}

impl TimeConverter {
    pub fn convert(&self, approx: u64) -> i64 {
        let delta = approx as i64 - self.origin.approx as i64;
        self.origin.unix_ns + (delta as f64 * self.slope).round() as i64
    }
}
