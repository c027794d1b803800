// Per-bottleneck aggregate shared by every surveyor
//
// Records are keyed by bottleneck id in a DashMap; folding is an entry-level
// upsert with BottleneckAccessor::combine, so concurrent notifications never
// take a global lock.

use crate::bottleneck::BottleneckAccessor;
use crate::channel::{AccessEvent, AccessListener};
use crate::error::{Result, SurveyError};
use crate::filter::BottleneckFilter;
use crate::report::{BottleneckReport, SurveyReport};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

#[derive(Debug, Clone)]
struct SurveyEntry {
    /// Insertion sequence, used to break utilization ties
    seq: u64,
    accessor: BottleneckAccessor,
}

/// Filtered mapping from bottleneck id to merged access record
pub struct BottleneckSurvey {
    scope_name: String,
    filter: BottleneckFilter,
    next_seq: AtomicU64,
    records: DashMap<String, SurveyEntry>,
}

impl BottleneckSurvey {
    pub fn new(scope_name: impl Into<String>, filter: BottleneckFilter) -> Self {
        Self {
            scope_name: scope_name.into(),
            filter,
            next_seq: AtomicU64::new(0),
            records: DashMap::new(),
        }
    }

    pub fn scope_name(&self) -> &str {
        &self.scope_name
    }

    pub fn filter(&self) -> &BottleneckFilter {
        &self.filter
    }

    /// Filter `accessor` and fold it in; returns whether it was kept
    pub fn record(&self, accessor: &BottleneckAccessor) -> bool {
        if !self.filter.should_survey(accessor.id()) {
            return false;
        }
        self.fold(accessor);
        true
    }

    /// Insert `accessor`, or replace the existing record with the combination
    fn fold(&self, accessor: &BottleneckAccessor) {
        if let Some(mut existing) = self.records.get_mut(accessor.id()) {
            merge_into(&mut existing.accessor, accessor);
            return;
        }

        match self.records.entry(accessor.id().to_string()) {
            Entry::Occupied(mut occupied) => merge_into(&mut occupied.get_mut().accessor, accessor),
            Entry::Vacant(vacant) => {
                vacant.insert(SurveyEntry {
                    seq: self.next_seq.fetch_add(1, AtomicOrdering::Relaxed),
                    accessor: accessor.clone(),
                });
            }
        }
    }

    pub fn get(&self, bottleneck_id: &str) -> Option<BottleneckAccessor> {
        self.records
            .get(bottleneck_id)
            .map(|entry| entry.accessor.clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Bottleneck ids in first-seen order
    pub fn ids(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .map(|entry| entry.accessor.id().to_string())
            .collect()
    }

    /// Current records in first-seen order
    pub fn accessors(&self) -> Vec<BottleneckAccessor> {
        self.entries()
            .into_iter()
            .map(|entry| entry.accessor)
            .collect()
    }

    fn entries(&self) -> Vec<SurveyEntry> {
        let mut entries: Vec<SurveyEntry> = self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        entries.sort_by_key(|entry| entry.seq);
        entries
    }

    /// Record with the highest utilization; the first seen wins ties
    pub fn most_utilized_bottleneck(&self) -> Result<BottleneckAccessor> {
        self.entries()
            .into_iter()
            .reduce(|best, candidate| {
                if candidate.accessor.cmp_utilization(&best.accessor) == Ordering::Greater {
                    candidate
                } else {
                    best
                }
            })
            .map(|entry| entry.accessor)
            .ok_or_else(|| SurveyError::EmptySurvey {
                scope: self.scope_name.clone(),
            })
    }

    /// Up to `count` records, most utilized first
    pub fn most_utilized_bottlenecks(&self, count: usize) -> Vec<BottleneckAccessor> {
        let mut entries = self.entries();
        // Stable sort keeps first-seen order among equal utilizations
        entries.sort_by(|a, b| b.accessor.cmp_utilization(&a.accessor));
        entries
            .into_iter()
            .take(count)
            .map(|entry| entry.accessor)
            .collect()
    }

    pub fn report(&self) -> SurveyReport {
        SurveyReport {
            scope_name: self.scope_name.clone(),
            window: None,
            bottlenecks: self
                .accessors()
                .iter()
                .map(BottleneckReport::from_accessor)
                .collect(),
        }
    }
}

fn merge_into(existing: &mut BottleneckAccessor, accessor: &BottleneckAccessor) {
    match existing.combine(accessor) {
        Ok(merged) => *existing = merged,
        Err(err) => tracing::warn!("dropping access record: {}", err),
    }
}

impl AccessListener for BottleneckSurvey {
    fn on_access(&self, event: &AccessEvent<'_>) {
        self.record(event.accessor);
    }
}

impl fmt::Debug for BottleneckSurvey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BottleneckSurvey")
            .field("scope_name", &self.scope_name)
            .field("filter", &self.filter)
            .field("records", &self.records.len())
            .finish()
    }
}
