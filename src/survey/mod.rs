//! Surveyors: concurrent aggregators over the access stream
//!
//! Every surveyor owns a [`BottleneckSurvey`] and feeds it from one source:
//!
//! | Surveyor | Source | Scope |
//! |---|---|---|
//! | [`CallContextSurveyor`] | [`CallContextDistributor`](crate::distributor::CallContextDistributor) | one logical call chain |
//! | [`ThreadSurveyor`] | [`ThreadDistributor`](crate::distributor::ThreadDistributor) | one OS thread |
//! | [`ProcessSurveyor`] | [`Detector`](crate::detector::Detector) | the whole process |
//! | [`TimeWindowSurveyor`] | [`Detector`](crate::detector::Detector) + timer | rotating wall-clock windows |
//!
//! All four answer the queries of the [`Surveyor`] trait.

mod record;
mod scope;
mod window;

pub use record::BottleneckSurvey;
pub use scope::{
    CallContextSurveyor, ProcessSurveyor, ScopedSurveyor, SurveySource, ThreadSurveyor,
};
pub use window::{SurveyWindow, TimeWindowSurveyor};

use crate::bottleneck::BottleneckAccessor;
use crate::error::Result;
use crate::report::SurveyReport;

/// Queries shared by every surveyor
pub trait Surveyor: Send + Sync {
    fn scope_name(&self) -> String;

    /// Record with the highest utilization; the first seen wins ties
    ///
    /// Fails with [`SurveyError::EmptySurvey`](crate::error::SurveyError::EmptySurvey)
    /// when nothing has been recorded.
    fn most_utilized_bottleneck(&self) -> Result<BottleneckAccessor>;

    /// Up to `count` records in descending utilization order
    fn most_utilized_bottlenecks(&self, count: usize) -> Vec<BottleneckAccessor>;

    fn report(&self) -> SurveyReport;

    /// Stop receiving notifications; calling it again does nothing
    fn dispose(&self);
}
