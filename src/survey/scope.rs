// Call-context, thread and process surveyors
//
// All three share one shape: a BottleneckSurvey subscribed to the "exited"
// channel of some source. The source decides the scope: the detector itself
// for the whole process, or a distributor for a call chain or thread.

use super::record::BottleneckSurvey;
use super::Surveyor;
use crate::bottleneck::BottleneckAccessor;
use crate::channel::{NotificationChannel, SubscriptionId};
use crate::config::SurveyConfig;
use crate::detector::Detector;
use crate::distributor::{CallContextDistributor, ThreadDistributor};
use crate::error::Result;
use crate::filter::BottleneckFilter;
use crate::report::SurveyReport;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Something a scope surveyor can subscribe to
pub trait SurveySource: Send + Sync + 'static {
    /// Channel carrying the "exited" notifications of this scope
    fn exit_channel(&self) -> &NotificationChannel;

    /// Scope name used when the caller does not supply one
    fn default_scope_name(&self) -> String;
}

impl SurveySource for Detector {
    fn exit_channel(&self) -> &NotificationChannel {
        self.exited_channel()
    }

    fn default_scope_name(&self) -> String {
        let name = std::env::current_exe()
            .ok()
            .and_then(|path| {
                path.file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| "unknown".to_string());
        format!("Process {} ({})", name, std::process::id())
    }
}

impl SurveySource for CallContextDistributor {
    fn exit_channel(&self) -> &NotificationChannel {
        self.channel()
    }

    fn default_scope_name(&self) -> String {
        format!("Call Context {}", self.id())
    }
}

impl SurveySource for ThreadDistributor {
    fn exit_channel(&self) -> &NotificationChannel {
        self.channel()
    }

    fn default_scope_name(&self) -> String {
        match self.thread_name() {
            Some(name) => format!("Thread {}", name),
            None => format!("Thread {:?}", self.thread_id()),
        }
    }
}

/// Surveyor attached to a single source for its whole life
///
/// Dropping the surveyor disposes it.
pub struct ScopedSurveyor<S: SurveySource> {
    survey: Arc<BottleneckSurvey>,
    source: Arc<S>,
    subscription: Mutex<Option<SubscriptionId>>,
}

/// Surveys every access in the process
pub type ProcessSurveyor = ScopedSurveyor<Detector>;

/// Surveys accesses made on one OS thread
pub type ThreadSurveyor = ScopedSurveyor<ThreadDistributor>;

/// Surveys accesses made inside one logical call chain
pub type CallContextSurveyor = ScopedSurveyor<CallContextDistributor>;

impl<S: SurveySource> ScopedSurveyor<S> {
    /// Create a surveyor and subscribe it to `source`
    ///
    /// A missing or empty `scope_name` falls back to the source's default.
    pub fn new(
        source: &Arc<S>,
        scope_name: Option<&str>,
        allow: Option<&str>,
        deny: Option<&str>,
    ) -> Result<Self> {
        let filter = BottleneckFilter::from_patterns(allow, deny)?;
        Ok(Self::with_filter(source, scope_name, filter))
    }

    pub fn from_config(source: &Arc<S>, config: &SurveyConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_filter(
            source,
            config.scope_name.as_deref(),
            config.filter()?,
        ))
    }

    fn with_filter(source: &Arc<S>, scope_name: Option<&str>, filter: BottleneckFilter) -> Self {
        let scope_name = scope_name
            .filter(|name| !name.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| source.default_scope_name());
        let survey = Arc::new(BottleneckSurvey::new(scope_name, filter));
        let subscription = source.exit_channel().subscribe(survey.clone());

        Self {
            survey,
            source: Arc::clone(source),
            subscription: Mutex::new(Some(subscription)),
        }
    }

    pub fn survey(&self) -> &BottleneckSurvey {
        &self.survey
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    pub fn is_disposed(&self) -> bool {
        self.subscription
            .lock()
            .map(|subscription| subscription.is_none())
            .unwrap_or(true)
    }
}

impl<S: SurveySource> Surveyor for ScopedSurveyor<S> {
    fn scope_name(&self) -> String {
        self.survey.scope_name().to_string()
    }

    fn most_utilized_bottleneck(&self) -> Result<BottleneckAccessor> {
        self.survey.most_utilized_bottleneck()
    }

    fn most_utilized_bottlenecks(&self, count: usize) -> Vec<BottleneckAccessor> {
        self.survey.most_utilized_bottlenecks(count)
    }

    fn report(&self) -> SurveyReport {
        self.survey.report()
    }

    fn dispose(&self) {
        let taken = match self.subscription.lock() {
            Ok(mut subscription) => subscription.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(id) = taken {
            self.source.exit_channel().unsubscribe(id);
            tracing::debug!(scope = self.survey.scope_name(), "surveyor disposed");
        }
    }
}

impl<S: SurveySource> Drop for ScopedSurveyor<S> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<S: SurveySource> fmt::Debug for ScopedSurveyor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedSurveyor")
            .field("survey", &self.survey)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
