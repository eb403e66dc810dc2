use std::time::Duration;

use thiserror::Error;

use crate::expr::ExprError;

#[derive(Debug, Error)]
pub enum InstinctError {
    #[error("unknown rule type: {0}")]
    UnknownRuleType(String),

    #[error("unknown action type: {0}")]
    UnknownActionType(String),

    #[error("invalid {kind} configuration: {message}")]
    InvalidConfig { kind: String, message: String },

    #[error("invalid expression '{expression}': {source}")]
    InvalidExpression {
        expression: String,
        #[source]
        source: ExprError,
    },

    #[error("failed to evaluate '{expression}': {source}")]
    Evaluation {
        expression: String,
        #[source]
        source: ExprError,
    },

    #[error("validation failed: {0}")]
    Invalid(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<InstinctError>,
    },

    #[error("action '{action}' failed: {message}")]
    ActionFailed { action: String, message: String },

    #[error("parallel action '{action}': {count} child action(s) failed: {}", join_errors(.errors))]
    ParallelFailed {
        action: String,
        count: usize,
        errors: Vec<InstinctError>,
    },

    #[error("iterator action '{action}': {count} iteration(s) failed: {}", join_errors(.errors))]
    IteratorFailed {
        action: String,
        count: usize,
        errors: Vec<InstinctError>,
    },

    #[error("plugin error: {0}")]
    Plugin(String),

    #[error("reflex already loaded: {0}")]
    DuplicateReflex(String),

    #[error("reflex '{reflex}' timed out after {timeout:?}")]
    Timeout { reflex: String, timeout: Duration },

    #[error("encountered {count} error(s) while processing event {event_id}")]
    EventFailed {
        event_id: String,
        count: usize,
        errors: Vec<InstinctError>,
    },

    #[error("{}", join_errors(.0))]
    Multiple(Vec<InstinctError>),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, InstinctError>;

impl InstinctError {
    pub fn invalid_config(kind: impl Into<String>, message: impl Into<String>) -> Self {
        InstinctError::InvalidConfig {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn context(self, context: impl Into<String>) -> Self {
        InstinctError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Collapse a list of errors: none is `Ok`, one is itself, more become
    /// [`InstinctError::Multiple`].
    pub fn collect(mut errors: Vec<InstinctError>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(InstinctError::Multiple(errors)),
        }
    }

    /// True for errors raised while building or validating configuration,
    /// as opposed to errors raised while running it.
    pub fn is_config_error(&self) -> bool {
        match self {
            InstinctError::UnknownRuleType(_)
            | InstinctError::UnknownActionType(_)
            | InstinctError::InvalidConfig { .. }
            | InstinctError::InvalidExpression { .. }
            | InstinctError::Invalid(_)
            | InstinctError::Yaml(_)
            | InstinctError::Json(_) => true,
            InstinctError::Context { source, .. } => source.is_config_error(),
            InstinctError::Multiple(errors) => {
                !errors.is_empty() && errors.iter().all(InstinctError::is_config_error)
            }
            _ => false,
        }
    }
}

pub fn join_errors(errors: &[InstinctError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_collapses_errors() {
        assert!(InstinctError::collect(vec![]).is_ok());

        let single = InstinctError::collect(vec![InstinctError::Invalid("a".into())]);
        assert!(matches!(single, Err(InstinctError::Invalid(_))));

        let many = InstinctError::collect(vec![
            InstinctError::Invalid("a".into()),
            InstinctError::Invalid("b".into()),
        ])
        .unwrap_err();
        assert_eq!(
            many.to_string(),
            "validation failed: a; validation failed: b"
        );
    }

    #[test]
    fn event_failure_states_count() {
        let err = InstinctError::EventFailed {
            event_id: "e1".into(),
            count: 2,
            errors: vec![],
        };
        assert_eq!(
            err.to_string(),
            "encountered 2 error(s) while processing event e1"
        );
    }

    #[test]
    fn config_errors_are_classified_through_context() {
        let err = InstinctError::UnknownActionType("nope".into()).context("reflex 'r'");
        assert!(err.is_config_error());
        assert!(!InstinctError::Plugin("boom".into()).is_config_error());
    }
}
