//! Clock sources and the monotonic/wall-clock bridge
//!
//! All duration math runs on monotonic ticks. Wall-clock time is only used to
//! label surveys, through a [`ClockBridge`] that linearly maps ticks onto a
//! baseline pair captured once.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Source of monotonic ticks and wall-clock time
///
/// Substitute [`ManualClock`] to pause and skip time deterministically in tests.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current monotonic tick count
    fn now_ticks(&self) -> u64;

    /// Ticks per second
    fn frequency(&self) -> u64;

    /// Current wall-clock time
    fn system_time(&self) -> SystemTime;

    /// Convert a duration to ticks of this clock
    fn duration_to_ticks(&self, duration: Duration) -> u64 {
        duration_to_ticks(duration, self.frequency())
    }
}

/// Convert a duration to ticks at `frequency` ticks per second
pub fn duration_to_ticks(duration: Duration, frequency: u64) -> u64 {
    (duration.as_nanos() * frequency as u128 / 1_000_000_000) as u64
}

/// Convert ticks at `frequency` ticks per second to a duration
pub fn ticks_to_duration(ticks: u64, frequency: u64) -> Duration {
    if frequency == 0 {
        return Duration::ZERO;
    }
    let nanos = ticks as u128 * 1_000_000_000 / frequency as u128;
    Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
}

/// Real clock backed by [`Instant`], with nanosecond ticks
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ticks(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }

    fn frequency(&self) -> u64 {
        1_000_000_000
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Virtual clock that only moves when told to
///
/// Wall-clock time advances in lockstep with the ticks from a fixed origin.
///
/// ```
/// use chokepoint::clock::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new(1_000);
/// clock.advance(Duration::from_millis(500));
/// assert_eq!(clock.now_ticks(), 500);
/// ```
#[derive(Debug)]
pub struct ManualClock {
    ticks: AtomicU64,
    frequency: u64,
    wall_origin: SystemTime,
}

impl ManualClock {
    /// Clock at tick zero whose wall time starts at the Unix epoch
    pub fn new(frequency: u64) -> Self {
        Self::with_wall_origin(frequency, UNIX_EPOCH)
    }

    pub fn with_wall_origin(frequency: u64, wall_origin: SystemTime) -> Self {
        Self {
            ticks: AtomicU64::new(0),
            frequency: frequency.max(1),
            wall_origin,
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.advance_ticks(duration_to_ticks(duration, self.frequency));
    }

    pub fn advance_ticks(&self, ticks: u64) {
        self.ticks.fetch_add(ticks, Ordering::SeqCst);
    }

    /// Jump to an absolute tick; never moves backwards
    pub fn set_ticks(&self, ticks: u64) {
        self.ticks.fetch_max(ticks, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    fn frequency(&self) -> u64 {
        self.frequency
    }

    fn system_time(&self) -> SystemTime {
        self.wall_origin + ticks_to_duration(self.now_ticks(), self.frequency)
    }
}

/// Linear mapping between monotonic ticks and wall-clock time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockBridge {
    baseline_ticks: u64,
    baseline_wall: SystemTime,
    frequency: u64,
}

impl ClockBridge {
    /// Capture the baseline pair from `clock` now
    pub fn capture(clock: &dyn Clock) -> Self {
        Self {
            baseline_ticks: clock.now_ticks(),
            baseline_wall: clock.system_time(),
            frequency: clock.frequency().max(1),
        }
    }

    pub fn frequency(&self) -> u64 {
        self.frequency
    }

    pub fn ticks_to_system_time(&self, ticks: u64) -> SystemTime {
        if ticks >= self.baseline_ticks {
            self.baseline_wall + ticks_to_duration(ticks - self.baseline_ticks, self.frequency)
        } else {
            self.baseline_wall - ticks_to_duration(self.baseline_ticks - ticks, self.frequency)
        }
    }

    pub fn system_time_to_ticks(&self, time: SystemTime) -> u64 {
        match time.duration_since(self.baseline_wall) {
            Ok(ahead) => self
                .baseline_ticks
                .saturating_add(duration_to_ticks(ahead, self.frequency)),
            Err(behind) => self
                .baseline_ticks
                .saturating_sub(duration_to_ticks(behind.duration(), self.frequency)),
        }
    }

    pub fn ticks_to_duration(&self, ticks: u64) -> Duration {
        ticks_to_duration(ticks, self.frequency)
    }

    pub fn duration_to_ticks(&self, duration: Duration) -> u64 {
        duration_to_ticks(duration, self.frequency)
    }
}
