//! Error types for the treatment strategy engine.
//!
//! All errors are strongly typed using thiserror. Configuration problems are
//! reported as [`ValidationError`] and are always fatal: the engine never
//! starts a run with a partially valid strategy graph. Problems observed while
//! the simulation is running are reported as [`ExecutionError`]; they point at
//! a gap in build-time validation and the host is expected to abort.

use thiserror::Error;

use crate::context::{DistrictId, LocationIndex};
use crate::strategy::{StrategyId, StrategyKind};
use crate::therapy::TherapyId;

/// Validation errors raised while loading configuration or building strategies.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Unknown strategy type '{type_tag}'")]
    UnknownStrategyType {
        type_tag: String,
    },

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Therapy {therapy_id} is not present in the therapy catalog")]
    UnknownTherapy {
        therapy_id: TherapyId,
    },

    #[error("Strategy {strategy_id} is referenced but not configured")]
    UnknownStrategy {
        strategy_id: StrategyId,
    },

    #[error("Invalid distribution '{field}': {reason}")]
    InvalidDistribution {
        field: String,
        reason: String,
    },

    #[error("Field '{field}' has {actual} entries, expected {expected}")]
    LengthMismatch {
        field: String,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid age boundaries: {reason}")]
    InvalidAgeBoundaries {
        reason: String,
    },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue {
        field: String,
        reason: String,
    },

    #[error("District ID {district} is out of valid range [{min}, {max}]")]
    DistrictOutOfRange {
        district: DistrictId,
        min: DistrictId,
        max: DistrictId,
    },

    #[error("District {district} already has an MFT strategy assigned")]
    DuplicateDistrict {
        district: DistrictId,
    },

    #[error("Number of districts with MFT assigned ({assigned}) is less than total district count ({expected})")]
    DistrictsUnassigned {
        assigned: usize,
        expected: usize,
    },

    #[error("Strategy graph contains a cycle through strategy {strategy_id}")]
    StrategyCycle {
        strategy_id: StrategyId,
    },

    #[error("Strategy ids must be contiguous from 0: expected {expected}, found {found}")]
    NonContiguousStrategyIds {
        expected: StrategyId,
        found: StrategyId,
    },

    #[error("Invalid engine settings: {reason}")]
    InvalidSettings {
        reason: String,
    },

    #[error("Strategy {strategy_id} ('{name}') is invalid: {source}")]
    InvalidStrategy {
        strategy_id: StrategyId,
        name: String,
        #[source]
        source: Box<ValidationError>,
    },
}

impl ValidationError {
    /// Convenience constructor for [`ValidationError::MissingField`].
    #[must_use]
    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Attaches the id and name of the strategy being built.
    #[must_use]
    pub fn in_strategy(self, strategy_id: StrategyId, name: impl Into<String>) -> Self {
        Self::InvalidStrategy {
            strategy_id,
            name: name.into(),
            source: Box::new(self),
        }
    }

    /// Returns the innermost error, skipping strategy context wrappers.
    #[must_use]
    pub fn root_cause(&self) -> &ValidationError {
        match self {
            Self::InvalidStrategy { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Errors observed while the simulation is running.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Strategy not found: {strategy_id}")]
    StrategyNotFound {
        strategy_id: StrategyId,
    },

    #[error("Strategy slot not found: {slot}")]
    SlotNotFound {
        slot: usize,
    },

    #[error("Location {location} is out of range for {locations} configured locations")]
    LocationOutOfRange {
        location: LocationIndex,
        locations: usize,
    },

    #[error("Person is not located in any district")]
    DistrictUnknown,

    #[error("District {district} has no MFT strategy assigned")]
    DistrictNotAssigned {
        district: DistrictId,
    },

    #[error("Selection did not terminate after visiting {visited} strategies")]
    SelectionDidNotTerminate {
        visited: usize,
    },

    #[error("Strategy {strategy_id} is a {kind}, expected NestedMFT or NestedMFTMultiLocation")]
    NotNestedMft {
        strategy_id: StrategyId,
        kind: StrategyKind,
    },

    #[error("Binding strategy {strategy_id} under strategy {parent_id} would create a cycle")]
    WouldCreateCycle {
        strategy_id: StrategyId,
        parent_id: StrategyId,
    },
}

/// Top-level error type for the strategy engine.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Configuration error: {message}")]
    Config {
        message: String,
    },
}

impl StrategyError {
    /// Creates a configuration (I/O or parse) error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this is a configuration loading error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}

impl From<serde_json::Error> for StrategyError {
    fn from(err: serde_json::Error) -> Self {
        Self::config(format!("failed to parse JSON: {err}"))
    }
}

impl From<std::io::Error> for StrategyError {
    fn from(err: std::io::Error) -> Self {
        Self::config(format!("failed to read configuration: {err}"))
    }
}

/// Result type alias for strategy engine operations.
pub type StrategyResult<T> = Result<T, StrategyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_district_out_of_range_message() {
        let err = ValidationError::DistrictOutOfRange {
            district: 12,
            min: 1,
            max: 10,
        };
        let msg = format!("{err}");
        assert!(msg.contains("12"));
        assert!(msg.contains("[1, 10]"));
    }

    #[test]
    fn test_in_strategy_wraps_and_unwraps() {
        let err = ValidationError::UnknownTherapy { therapy_id: 42 }.in_strategy(3, "AL-SFT");
        let msg = format!("{err}");
        assert!(msg.contains("Strategy 3"));
        assert!(msg.contains("AL-SFT"));
        assert!(matches!(
            err.root_cause(),
            ValidationError::UnknownTherapy { therapy_id: 42 }
        ));
    }

    #[test]
    fn test_strategy_error_from_validation() {
        let err: StrategyError = ValidationError::missing("therapy_ids").into();
        assert!(err.is_validation());
        assert!(!err.is_execution());
        assert!(err.to_string().contains("therapy_ids"));
    }

    #[test]
    fn test_strategy_error_from_execution() {
        let err: StrategyError = ExecutionError::DistrictNotAssigned { district: 4 }.into();
        assert!(err.is_execution());
        assert!(err.to_string().contains("District 4"));
    }

    #[test]
    fn test_not_nested_message_names_kind() {
        let err = ExecutionError::NotNestedMft {
            strategy_id: 2,
            kind: StrategyKind::Mft,
        };
        let msg = format!("{err}");
        assert!(msg.contains("Strategy 2"));
        assert!(msg.contains("is a MFT"));
    }

    #[test]
    fn test_strategy_error_from_json() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: StrategyError = parse.into();
        assert!(err.is_config());
    }
}
