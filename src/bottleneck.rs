//! Bottleneck identities and access records
//!
//! A [`Bottleneck`] names a shared, capacity-limited resource. A
//! [`BottleneckAccessor`] records one access to it, or a merged group of
//! accesses, as an immutable value.
//!
//! # Usage accounting
//!
//! `limit_used` is measured in *limit-ticks*: capacity units held multiplied by
//! monotonic clock ticks held. One unit held for five ticks is five
//! limit-ticks. Utilization is `limit_used / (limit * elapsed)`, the average
//! fraction of the bottleneck's capacity held over the record's time range.
//!
//! ```
//! use chokepoint::bottleneck::{Bottleneck, BottleneckAccessor};
//! use std::sync::Arc;
//!
//! let db = Arc::new(Bottleneck::new("db", 4));
//! let a = BottleneckAccessor::new(db.clone(), 0, Some(10), 1, 20);
//! let b = BottleneckAccessor::new(db, 5, Some(20), 1, 15);
//!
//! let merged = a.combine(&b).unwrap();
//! assert_eq!(merged.access_count(), 2);
//! assert_eq!(merged.limit_used(), 35);
//! assert_eq!(merged.start(), 0);
//! assert_eq!(merged.end(), Some(20));
//! ```

use crate::error::{Result, SurveyError};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Identity of a contended resource
///
/// The limit is informational: the engine measures against it but never
/// enforces it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bottleneck {
    id: String,
    limit: u64,
}

impl Bottleneck {
    pub fn new(id: impl Into<String>, limit: u64) -> Self {
        Self {
            id: id.into(),
            limit,
        }
    }

    /// Stable identifier used as map key and for allow/deny filtering
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Capacity of the resource, in caller-defined units
    pub fn limit(&self) -> u64 {
        self.limit
    }
}

impl fmt::Display for Bottleneck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (limit {})", self.id, self.limit)
    }
}

/// Record of one or more accesses to a bottleneck
///
/// Values are never mutated in place: [`combine`](Self::combine) and
/// [`split`](Self::split) return new records, so aggregates are always
/// replace-on-write.
#[derive(Debug, Clone)]
pub struct BottleneckAccessor {
    bottleneck: Arc<Bottleneck>,
    /// Monotonic tick at which the (earliest) access started
    start: u64,
    /// Monotonic tick at which the (latest) access ended, `None` while open
    end: Option<u64>,
    access_count: u64,
    limit_used: u64,
}

impl BottleneckAccessor {
    pub fn new(
        bottleneck: Arc<Bottleneck>,
        start: u64,
        end: Option<u64>,
        access_count: u64,
        limit_used: u64,
    ) -> Self {
        Self {
            bottleneck,
            start,
            end,
            access_count,
            limit_used,
        }
    }

    /// A freshly entered access: one access, open end, nothing used yet
    pub(crate) fn entered(bottleneck: Arc<Bottleneck>, start: u64) -> Self {
        Self::new(bottleneck, start, None, 1, 0)
    }

    /// Close this access at `end` with `units` capacity units held throughout
    pub(crate) fn finished(&self, end: u64, units: u64) -> Self {
        let end = end.max(self.start);
        Self {
            end: Some(end),
            limit_used: units.saturating_mul(end - self.start),
            ..self.clone()
        }
    }

    /// Usage of a still-open access accumulated up to `now`
    ///
    /// The snapshot is closed at `now` so it can be split and reported like a
    /// completed record.
    pub(crate) fn snapshot(&self, now: u64, units: u64) -> Self {
        self.finished(now, units)
    }

    /// Restrict the reported time range to `[from, to]`
    pub(crate) fn clamp_range(&self, from: u64, to: u64) -> Self {
        let start = self.start.clamp(from, to);
        Self {
            start,
            end: self.end.map(|end| end.clamp(start, to)),
            ..self.clone()
        }
    }

    pub fn bottleneck(&self) -> &Arc<Bottleneck> {
        &self.bottleneck
    }

    /// Shorthand for `bottleneck().id()`
    pub fn id(&self) -> &str {
        self.bottleneck.id()
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    pub fn end(&self) -> Option<u64> {
        self.end
    }

    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    pub fn access_count(&self) -> u64 {
        self.access_count
    }

    pub fn limit_used(&self) -> u64 {
        self.limit_used
    }

    /// Ticks covered by this record; zero while open
    pub fn elapsed(&self) -> u64 {
        self.end
            .map(|end| end.saturating_sub(self.start))
            .unwrap_or(0)
    }

    /// Average fraction of the bottleneck's capacity held over this record
    ///
    /// Zero when the record is open, covers no time, or the bottleneck has no
    /// capacity.
    pub fn utilization(&self) -> f64 {
        let capacity_ticks = self.bottleneck.limit() as f64 * self.elapsed() as f64;
        if capacity_ticks == 0.0 {
            return 0.0;
        }
        self.limit_used as f64 / capacity_ticks
    }

    /// Ascending comparison by utilization
    pub fn cmp_utilization(&self, other: &Self) -> Ordering {
        self.utilization().total_cmp(&other.utilization())
    }

    /// Merge two records of the same bottleneck
    ///
    /// Counts and usage add; the time range becomes the union of both ranges.
    /// An open record contributes no end. The operation is commutative and
    /// associative, so concurrent folding order never changes the result.
    pub fn combine(&self, other: &Self) -> Result<Self> {
        if self.id() != other.id() {
            return Err(SurveyError::InvalidArgument(format!(
                "cannot combine accessors of different bottlenecks: '{}' and '{}'",
                self.id(),
                other.id()
            )));
        }

        Ok(Self {
            bottleneck: Arc::clone(&self.bottleneck),
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            access_count: self.access_count.saturating_add(other.access_count),
            limit_used: self.limit_used.saturating_add(other.limit_used),
        })
    }

    /// Apportion this record across a time boundary
    ///
    /// `baseline_count` and `baseline_used` are amounts already attributed to
    /// earlier windows by previous splits of the same still-open accesses;
    /// they are subtracted first (saturating at zero). The remainder is
    /// divided by time around `boundary`, treating an open record as ending
    /// at `now`:
    ///
    /// - ending at or before `boundary`: everything is retained and nothing is
    ///   carried;
    /// - starting at or after `boundary`: everything is carried and the
    ///   retained part is an empty slice;
    /// - otherwise usage is split in proportion to the ticks on each side,
    ///   and access counts stay with the retained part.
    ///
    /// Returns `(retained, carried)`. Re-combining both reproduces the
    /// baseline-subtracted totals exactly.
    pub fn split(
        &self,
        boundary: u64,
        now: u64,
        baseline_count: u64,
        baseline_used: u64,
    ) -> (Self, Option<Self>) {
        let count = self.access_count.saturating_sub(baseline_count);
        let used = self.limit_used.saturating_sub(baseline_used);
        let effective_end = self.end.unwrap_or(now).max(self.start);

        if effective_end <= boundary {
            let retained = Self {
                access_count: count,
                limit_used: used,
                ..self.clone()
            };
            return (retained, None);
        }

        if self.start >= boundary {
            let retained = Self {
                bottleneck: Arc::clone(&self.bottleneck),
                start: boundary,
                end: Some(boundary),
                access_count: 0,
                limit_used: 0,
            };
            let carried = Self {
                access_count: count,
                limit_used: used,
                ..self.clone()
            };
            return (retained, Some(carried));
        }

        let before = boundary - self.start;
        let after = effective_end - boundary;
        let carried_used = (used as u128 * after as u128 / (before + after) as u128) as u64;

        let retained = Self {
            bottleneck: Arc::clone(&self.bottleneck),
            start: self.start,
            end: Some(boundary),
            access_count: count,
            limit_used: used - carried_used,
        };
        let carried = Self {
            bottleneck: Arc::clone(&self.bottleneck),
            start: boundary,
            end: self.end,
            access_count: 0,
            limit_used: carried_used,
        };
        (retained, Some(carried))
    }
}

impl PartialEq for BottleneckAccessor {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
            && self.start == other.start
            && self.end == other.end
            && self.access_count == other.access_count
            && self.limit_used == other.limit_used
    }
}

impl Eq for BottleneckAccessor {}

impl fmt::Display for BottleneckAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} accesses, {} limit-ticks, {:.2}% utilized",
            self.id(),
            self.access_count,
            self.limit_used,
            self.utilization() * 100.0
        )
    }
}
