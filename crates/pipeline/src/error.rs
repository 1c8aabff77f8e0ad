//! Error types for the pipeline system

use crate::lifecycle::State;
use thiserror::Error;

/// Errors raised by a single processing unit.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UnitError {
    #[error("unknown property '{0}'")]
    InvalidKey(String),

    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("no such pad: {0}")]
    NoSuchPort(String),

    #[error("request pad capacity exceeded (limit {limit})")]
    CapacityExceeded { limit: usize },

    #[error("invalid state transition {from:?} -> {to:?}")]
    InvalidTransition { from: State, to: State },

    #[error("pad '{0}' already exists")]
    DuplicatePad(String),

    #[error("resource unavailable: {0}")]
    Resource(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for UnitError {
    fn from(err: std::io::Error) -> Self {
        UnitError::Io(err.to_string())
    }
}

/// Pipeline-specific error types
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Unit type not registered: {unit_type}")]
    UnknownType { unit_type: String },

    #[error("Failed to create unit '{name}' of type '{unit_type}': {source}")]
    UnitCreation {
        name: String,
        unit_type: String,
        #[source]
        source: UnitError,
    },

    #[error("Unit not found: {name}")]
    UnitNotFound { name: String },

    #[error("Duplicate unit name: {name}")]
    DuplicateUnit { name: String },

    #[error("Unit '{unit}' has no pad '{pad}'")]
    NoSuchPort { unit: String, pad: String },

    #[error("Cannot link {from} -> {to}: {reason}")]
    PortMismatch {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Pad {pad} is already linked")]
    AlreadyLinked { pad: String },

    #[error("Circular dependency detected in pipeline graph")]
    CircularDependency,

    #[error("Invalid pipeline topology: {message}")]
    InvalidTopology { message: String },

    #[error("Invalid pipeline configuration: {message}")]
    InvalidConfiguration { message: String },

    #[error("Unit '{unit}' rejected {from:?} -> {to:?}: {source}")]
    Transition {
        unit: String,
        from: State,
        to: State,
        #[source]
        source: UnitError,
    },

    #[error("Invalid pipeline state transition {from:?} -> {to:?}")]
    InvalidTransition { from: State, to: State },

    #[error("Error in unit '{unit}': {source}")]
    Unit {
        unit: String,
        #[source]
        source: UnitError,
    },

    #[error("Media framework is not initialized")]
    NotInitialized,

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// How a failure is classified for the run as a whole.
///
/// Every class is terminal; nothing in the pipeline retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Unit creation, pad lookup or link failure before the pipeline runs.
    Setup,
    /// A unit rejected a lifecycle transition.
    Transition,
    /// An error event arrived while playing.
    Runtime,
}

impl PipelineError {
    /// Classify this error for reporting.
    pub fn class(&self) -> FailureClass {
        match self {
            PipelineError::Transition { .. } | PipelineError::InvalidTransition { .. } => {
                FailureClass::Transition
            }
            _ => FailureClass::Setup,
        }
    }

    pub(crate) fn unit(unit: &str, source: UnitError) -> Self {
        match source {
            UnitError::NoSuchPort(pad) => PipelineError::NoSuchPort {
                unit: unit.to_string(),
                pad,
            },
            source => PipelineError::Unit {
                unit: unit.to_string(),
                source,
            },
        }
    }
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_classes() {
        let setup = PipelineError::UnknownType {
            unit_type: "nope".to_string(),
        };
        assert_eq!(setup.class(), FailureClass::Setup);

        let transition = PipelineError::Transition {
            unit: "decoder".to_string(),
            from: State::Idle,
            to: State::Ready,
            source: UnitError::Resource("no gpu".to_string()),
        };
        assert_eq!(transition.class(), FailureClass::Transition);
    }

    #[test]
    fn test_missing_pad_maps_to_no_such_port() {
        let err = PipelineError::unit("decoder", UnitError::NoSuchPort("src".to_string()));
        assert!(matches!(
            err,
            PipelineError::NoSuchPort { ref unit, ref pad } if unit == "decoder" && pad == "src"
        ));
    }
}
