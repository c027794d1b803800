// Configuration for surveyors
//
// Loaded from TOML so a surrounding service can tune surveys without code
// changes. Every field has a default, so an empty file is a valid config.

use crate::error::{Result, SurveyError};
use crate::filter::BottleneckFilter;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Settings shared by every surveyor flavor
///
/// # Example
/// ```
/// use chokepoint::config::SurveyConfig;
///
/// let config = SurveyConfig::from_toml_str(r#"
///     window_size_ms = 500
///     deny = "^internal\\."
/// "#).unwrap();
/// assert_eq!(config.window_size().as_millis(), 500);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurveyConfig {
    /// Scope label; `None` uses the surveyor's generated default
    pub scope_name: Option<String>,

    /// Regex a bottleneck id must match to be surveyed (`None` = all)
    pub allow: Option<String>,

    /// Regex that excludes a bottleneck id, checked before `allow`
    pub deny: Option<String>,

    /// Rotation interval of time-window surveys, in milliseconds
    ///
    /// Default: 60000 (one-minute windows)
    pub window_size_ms: u64,
}

impl Default for SurveyConfig {
    fn default() -> Self {
        Self {
            scope_name: None,
            allow: None,
            deny: None,
            window_size_ms: 60_000,
        }
    }
}

impl SurveyConfig {
    /// One-second windows, for interactive inspection
    pub fn fine_grained() -> Self {
        Self {
            window_size_ms: 1_000,
            ..Self::default()
        }
    }

    /// Hourly windows, for long-running services
    pub fn coarse() -> Self {
        Self {
            window_size_ms: 3_600_000,
            ..Self::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| SurveyError::Config(format!("invalid TOML: {}", e)))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SurveyError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn window_size(&self) -> Duration {
        Duration::from_millis(self.window_size_ms)
    }

    /// Compile the allow and deny patterns
    pub fn filter(&self) -> Result<BottleneckFilter> {
        BottleneckFilter::from_patterns(self.allow.as_deref(), self.deny.as_deref())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.window_size_ms == 0 {
            return Err(SurveyError::InvalidArgument(
                "window_size_ms must be greater than zero".to_string(),
            ));
        }
        self.filter().map(|_| ())
    }
}
