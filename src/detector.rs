//! The single authority for entering and leaving bottlenecks
//!
//! ```
//! use chokepoint::bottleneck::Bottleneck;
//! use chokepoint::clock::ManualClock;
//! use chokepoint::detector::Detector;
//! use std::sync::Arc;
//!
//! let clock = Arc::new(ManualClock::new(1_000));
//! let detector = Arc::new(Detector::with_clock(clock.clone()));
//! let db = Arc::new(Bottleneck::new("db", 1));
//!
//! let guard = detector.enter_bottleneck(&db);
//! clock.advance_ticks(5);
//! let finished = guard.finish();
//! assert_eq!(finished.limit_used(), 5);
//! ```

use crate::bottleneck::{Bottleneck, BottleneckAccessor};
use crate::channel::{AccessEvent, AccessId, NotificationChannel};
use crate::clock::{Clock, ClockBridge, MonotonicClock};
use crate::error::{Result, SurveyError};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

static GLOBAL_DETECTOR: OnceLock<Arc<Detector>> = OnceLock::new();

const CLOSED: u64 = 1 << 63;

/// End tick of one access, shared by its guard and every surveyor that
/// snapshots it while open
///
/// A snapshot pins the access open until at least the snapshot tick, and the
/// guard closes it no earlier than the latest pin. An access therefore never
/// ends before a tick some surveyor already charged it up to, whatever order
/// the leaving thread and a snapshotting thread run in.
#[derive(Debug)]
pub struct AccessStamp(AtomicU64);

impl AccessStamp {
    pub(crate) fn new(start: u64) -> Self {
        Self(AtomicU64::new(start & !CLOSED))
    }

    /// Tick the access may be charged up to by a snapshot taken at `now`
    ///
    /// While open the access is pinned to end no earlier than `now`. Once
    /// closed, its real end is returned if that came first.
    pub fn pin(&self, now: u64) -> u64 {
        let now = now & !CLOSED;
        match self.0.fetch_update(Ordering::AcqRel, Ordering::Acquire, |cell| {
            (cell & CLOSED == 0 && cell < now).then_some(now)
        }) {
            Err(cell) if cell & CLOSED != 0 => (cell & !CLOSED).min(now),
            _ => now,
        }
    }

    /// End tick once closed
    pub fn end(&self) -> Option<u64> {
        let cell = self.0.load(Ordering::Acquire);
        (cell & CLOSED != 0).then_some(cell & !CLOSED)
    }

    /// Close at `now`, or at the latest pinned tick if that is later
    fn close(&self, now: u64) -> u64 {
        let now = now & !CLOSED;
        let previous = match self.0.fetch_update(Ordering::AcqRel, Ordering::Acquire, |cell| {
            Some(CLOSED | (cell & !CLOSED).max(now))
        }) {
            Ok(cell) | Err(cell) => cell,
        };
        (previous & !CLOSED).max(now)
    }
}

/// Publishes "entered" and "exited" notifications for every access
pub struct Detector {
    clock: Arc<dyn Clock>,
    bridge: ClockBridge,
    next_access_id: AtomicU64,
    entered: NotificationChannel,
    exited: NotificationChannel,
}

impl Detector {
    /// Detector measuring with the real monotonic clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(MonotonicClock::new()))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let bridge = ClockBridge::capture(clock.as_ref());
        Self {
            clock,
            bridge,
            next_access_id: AtomicU64::new(1),
            entered: NotificationChannel::new("entered"),
            exited: NotificationChannel::new("exited"),
        }
    }

    /// Process-wide detector, created on first use with the real clock
    pub fn global() -> &'static Arc<Detector> {
        GLOBAL_DETECTOR.get_or_init(|| Arc::new(Detector::new()))
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn bridge(&self) -> &ClockBridge {
        &self.bridge
    }

    pub fn now_ticks(&self) -> u64 {
        self.clock.now_ticks()
    }

    pub fn entered_channel(&self) -> &NotificationChannel {
        &self.entered
    }

    pub fn exited_channel(&self) -> &NotificationChannel {
        &self.exited
    }

    /// Enter `bottleneck` holding one unit of its capacity
    pub fn enter_bottleneck(self: &Arc<Self>, bottleneck: &Arc<Bottleneck>) -> AccessGuard {
        self.enter(bottleneck, 1)
    }

    /// Enter `bottleneck` holding `units` of its capacity
    pub fn enter_bottleneck_with_units(
        self: &Arc<Self>,
        bottleneck: &Arc<Bottleneck>,
        units: u64,
    ) -> Result<AccessGuard> {
        if units == 0 {
            return Err(SurveyError::InvalidArgument(format!(
                "access to '{}' must hold at least one unit",
                bottleneck.id()
            )));
        }
        Ok(self.enter(bottleneck, units))
    }

    fn enter(self: &Arc<Self>, bottleneck: &Arc<Bottleneck>, units: u64) -> AccessGuard {
        let access_id = self.next_access_id.fetch_add(1, Ordering::Relaxed);
        let accessor = BottleneckAccessor::entered(Arc::clone(bottleneck), self.now_ticks());
        let stamp = Arc::new(AccessStamp::new(accessor.start()));
        tracing::trace!(bottleneck = bottleneck.id(), access_id, units, "entered bottleneck");

        self.entered.publish(&AccessEvent {
            sender: Arc::as_ref(self),
            access_id,
            units,
            accessor: &accessor,
            stamp: &stamp,
        });

        AccessGuard {
            detector: Arc::clone(self),
            access_id,
            units,
            entered: accessor,
            stamp,
            left: false,
        }
    }

    /// Close an access and publish "exited" with the final record
    pub(crate) fn leave_bottleneck(
        &self,
        access_id: AccessId,
        units: u64,
        entered: &BottleneckAccessor,
        stamp: &Arc<AccessStamp>,
    ) -> BottleneckAccessor {
        let finished = entered.finished(stamp.close(self.now_ticks()), units);
        tracing::trace!(
            bottleneck = finished.id(),
            access_id,
            limit_used = finished.limit_used(),
            "left bottleneck"
        );

        self.exited.publish(&AccessEvent {
            sender: self,
            access_id,
            units,
            accessor: &finished,
            stamp,
        });
        finished
    }
}

impl Default for Detector {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Detector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Detector")
            .field("clock", &self.clock)
            .field("entered", &self.entered)
            .field("exited", &self.exited)
            .finish()
    }
}

/// Scoped access to a bottleneck
///
/// Leaving happens exactly once: through [`finish`](Self::finish), or when the
/// guard is dropped.
#[must_use = "dropping the guard immediately leaves the bottleneck"]
pub struct AccessGuard {
    detector: Arc<Detector>,
    access_id: AccessId,
    units: u64,
    entered: BottleneckAccessor,
    stamp: Arc<AccessStamp>,
    left: bool,
}

impl AccessGuard {
    pub fn access_id(&self) -> AccessId {
        self.access_id
    }

    pub fn units(&self) -> u64 {
        self.units
    }

    /// The record as it was when the access was entered
    pub fn accessor(&self) -> &BottleneckAccessor {
        &self.entered
    }

    /// Leave the bottleneck now and return the final record
    pub fn finish(mut self) -> BottleneckAccessor {
        self.left = true;
        self.detector
            .leave_bottleneck(self.access_id, self.units, &self.entered, &self.stamp)
    }
}

impl Drop for AccessGuard {
    fn drop(&mut self) {
        if !self.left {
            self.left = true;
            self.detector
                .leave_bottleneck(self.access_id, self.units, &self.entered, &self.stamp);
        }
    }
}

impl fmt::Debug for AccessGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessGuard")
            .field("access_id", &self.access_id)
            .field("units", &self.units)
            .field("bottleneck", &self.entered.id())
            .finish()
    }
}
