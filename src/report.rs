//! Serializable snapshots of finished or in-progress surveys

use crate::bottleneck::BottleneckAccessor;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Wall-clock bounds of a time-window survey
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowBounds {
    /// RFC 3339 start of the window
    pub start: String,
    /// RFC 3339 end of the window (the rotation instant once closed)
    pub end: String,
    /// Configured window size in milliseconds
    pub size_ms: u64,
}

/// Aggregate for a single bottleneck
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BottleneckReport {
    pub id: String,
    pub limit: u64,
    pub access_count: u64,
    /// Capacity units held multiplied by ticks held
    pub limit_used: u64,
    /// Fraction of capacity held over the record's time range
    pub utilization: f64,
    pub start_ticks: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_ticks: Option<u64>,
}

impl BottleneckReport {
    pub fn from_accessor(accessor: &BottleneckAccessor) -> Self {
        Self {
            id: accessor.id().to_string(),
            limit: accessor.bottleneck().limit(),
            access_count: accessor.access_count(),
            limit_used: accessor.limit_used(),
            utilization: accessor.utilization(),
            start_ticks: accessor.start(),
            end_ticks: accessor.end(),
        }
    }
}

/// Snapshot of a survey, in first-seen bottleneck order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyReport {
    pub scope_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<WindowBounds>,
    pub bottlenecks: Vec<BottleneckReport>,
}

impl SurveyReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Sum of access counts across bottlenecks
    pub fn total_accesses(&self) -> u64 {
        self.bottlenecks.iter().map(|b| b.access_count).sum()
    }

    pub fn total_limit_used(&self) -> u64 {
        self.bottlenecks.iter().map(|b| b.limit_used).sum()
    }
}

impl fmt::Display for SurveyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== {} ===", self.scope_name)?;
        if let Some(window) = &self.window {
            writeln!(f, "window: {} .. {} ({} ms)", window.start, window.end, window.size_ms)?;
        }
        if self.bottlenecks.is_empty() {
            return writeln!(f, "(no bottleneck activity)");
        }

        writeln!(
            f,
            "{:<24} {:>8} {:>10} {:>14} {:>8}",
            "bottleneck", "limit", "accesses", "limit-ticks", "util%"
        )?;
        writeln!(f, "{}", "─".repeat(68))?;
        for b in &self.bottlenecks {
            writeln!(
                f,
                "{:<24} {:>8} {:>10} {:>14} {:>8.2}",
                b.id,
                b.limit,
                b.access_count,
                b.limit_used,
                b.utilization * 100.0
            )?;
        }
        Ok(())
    }
}
