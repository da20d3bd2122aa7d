//! Error types for microsim.
//!
//! All errors in microsim are strongly typed using thiserror.
//! Every error is treated as a programming or configuration defect:
//! nothing in the kernel is retried, and any error aborts the run.

use thiserror::Error;

/// Configuration errors: bad settings, duplicate declarations, unknown names.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Pipeline '{name}' already has a source")]
    DuplicateSource {
        name: String,
    },

    #[error("Missing configuration key '{key}'")]
    MissingKey {
        key: String,
    },

    #[error("Configuration key '{key}' has the wrong type: expected {expected}")]
    WrongType {
        key: String,
        expected: &'static str,
    },

    #[error("Unknown distribution kind '{kind}'")]
    UnknownDistribution {
        kind: String,
    },

    #[error("Invalid parameters for distribution '{kind}': {reason}")]
    InvalidDistribution {
        kind: String,
        reason: String,
    },

    #[error("Unknown component '{name}'")]
    UnknownComponent {
        name: String,
    },

    #[error("Listener priority {priority} is out of range [0, {max}]")]
    PriorityOutOfRange {
        priority: u8,
        max: u8,
    },

    #[error("Failed to read configuration from '{path}': {reason}")]
    Unreadable {
        path: String,
        reason: String,
    },

    #[error("Invalid configuration: {reason}")]
    Invalid {
        reason: String,
    },
}

/// Population table errors.
#[derive(Debug, Error)]
pub enum PopulationError {
    #[error("Access violation: view does not grant column '{column}' (granted: {granted})")]
    AccessViolation {
        column: String,
        granted: String,
    },

    #[error("Column '{column}' already exists as {existing}, cannot recreate as {requested}")]
    ColumnConflict {
        column: String,
        existing: &'static str,
        requested: &'static str,
    },

    #[error("Unknown column '{column}'")]
    UnknownColumn {
        column: String,
    },

    #[error("Column '{column}' holds {actual} values, expected {expected}")]
    TypeMismatch {
        column: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Simulant {index} is out of bounds (population size {size})")]
    IndexOutOfBounds {
        index: usize,
        size: usize,
    },

    #[error("Column '{column}' has {actual} values for an index of length {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },
}

/// Interpolated lookup errors.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("No table bucket matches key {key:?}")]
    Miss {
        key: Vec<String>,
    },

    #[error("Duplicate coordinate point {point:?} in bucket {key:?}")]
    DuplicatePoint {
        key: Vec<String>,
        point: Vec<f64>,
    },

    #[error("Bucket {key:?} does not cover the full grid over {axes:?}")]
    IncompleteGrid {
        key: Vec<String>,
        axes: Vec<String>,
    },

    #[error("Invalid lookup table: {reason}")]
    InvalidTable {
        reason: String,
    },
}

/// Value pipeline errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No source registered for pipeline '{name}'")]
    NoSource {
        name: String,
    },

    #[error("Pipeline '{name}' cannot combine {left} with {right}")]
    IncompatibleValues {
        name: String,
        left: &'static str,
        right: &'static str,
    },

    #[error("Pipeline '{name}' produced {actual}, expected {expected}")]
    UnexpectedShape {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },
}

/// Top-level error type for microsim.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Population error: {0}")]
    Population(#[from] PopulationError),

    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Listener '{listener}' on channel '{channel}' failed: {source}")]
    Listener {
        channel: String,
        listener: String,
        #[source]
        source: Box<SimError>,
    },

    #[error("Invalid lifecycle transition: cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: String,
    },

    #[error("Clock overflow: cannot advance {time} by {step_days} days")]
    ClockOverflow {
        time: String,
        step_days: f64,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl SimError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Returns true if this is a view write outside its granted columns.
    #[must_use]
    pub const fn is_access_violation(&self) -> bool {
        matches!(self, Self::Population(PopulationError::AccessViolation { .. }))
    }

    /// Returns true if this is a lookup bucket miss.
    #[must_use]
    pub const fn is_lookup_miss(&self) -> bool {
        matches!(self, Self::Lookup(LookupError::Miss { .. }))
    }

    /// Returns true if this error was raised inside an event listener.
    #[must_use]
    pub const fn is_listener_failure(&self) -> bool {
        matches!(self, Self::Listener { .. })
    }

    /// Strips listener wrappers and returns the error that started the failure.
    #[must_use]
    pub fn root_cause(&self) -> &Self {
        match self {
            Self::Listener { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Result type alias for microsim operations.
pub type SimResult<T> = Result<T, SimError>;

pub(crate) fn lock_err(context: &'static str) -> SimError {
    SimError::internal(format!("poisoned lock: {context}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_source_message() {
        let err = ConfigurationError::DuplicateSource {
            name: "mortality_rate".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("mortality_rate"));
        assert!(msg.contains("already has a source"));
    }

    #[test]
    fn test_access_violation() {
        let err: SimError = PopulationError::AccessViolation {
            column: "age".to_string(),
            granted: "sex".to_string(),
        }
        .into();
        assert!(err.is_access_violation());
        assert!(!err.is_configuration());
        assert!(format!("{err}").contains("age"));
    }

    #[test]
    fn test_lookup_miss() {
        let err: SimError = LookupError::Miss {
            key: vec!["Female".to_string()],
        }
        .into();
        assert!(err.is_lookup_miss());
        assert!(format!("{err}").contains("Female"));
    }

    #[test]
    fn test_listener_wrapping_keeps_root_cause() {
        let inner: SimError = PipelineError::NoSource {
            name: "cost".to_string(),
        }
        .into();
        let err = SimError::Listener {
            channel: "time_step".to_string(),
            listener: "screening".to_string(),
            source: Box::new(SimError::Listener {
                channel: "followup".to_string(),
                listener: "inner".to_string(),
                source: Box::new(inner),
            }),
        };
        assert!(err.is_listener_failure());
        assert!(matches!(
            err.root_cause(),
            SimError::Pipeline(PipelineError::NoSource { .. })
        ));
        let msg = format!("{err}");
        assert!(msg.contains("time_step"));
        assert!(msg.contains("screening"));
    }

    #[test]
    fn test_internal() {
        let err = SimError::internal("unexpected state");
        assert!(matches!(err, SimError::Internal { .. }));
        assert!(format!("{err}").contains("unexpected state"));
    }

    #[test]
    fn test_configuration_conversion() {
        let err: SimError = ConfigurationError::UnknownDistribution {
            kind: "cauchy".to_string(),
        }
        .into();
        assert!(err.is_configuration());
        assert!(format!("{err}").contains("cauchy"));
    }
}
