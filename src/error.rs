//! Error types for the survey engine

use thiserror::Error;

/// Errors raised by detectors, surveyors and configuration loading
#[derive(Error, Debug)]
pub enum SurveyError {
    /// A caller passed a value that indicates a wiring bug
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An allow or deny pattern failed to compile
    #[error("Invalid bottleneck pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A "most utilized" query ran against a survey with no records
    #[error("Survey '{scope}' has no bottleneck records")]
    EmptySurvey { scope: String },

    /// Configuration could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SurveyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_survey_message_names_scope() {
        let err = SurveyError::EmptySurvey {
            scope: "Process demo (42)".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Survey 'Process demo (42)' has no bottleneck records"
        );
    }

    #[test]
    fn test_invalid_pattern_keeps_source() {
        let source = regex::Regex::new("(").unwrap_err();
        let err = SurveyError::InvalidPattern {
            pattern: "(".to_string(),
            source,
        };
        assert!(err.to_string().starts_with("Invalid bottleneck pattern '('"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
