use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Represents a result type for operations in the Featurevisor SDK.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors returned by the SDK facade.
///
/// Evaluation itself never fails: faults hit while evaluating a feature are reported inside the
/// [`Evaluation`](crate::Evaluation) as an [`EvaluationError`].
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The datafile could not be parsed as JSON or does not have the expected top-level shape.
    #[error("error parsing datafile")]
    // serde_json::Error is not clonable, so we're wrapping it in an Arc.
    DatafileParse(#[source] Arc<serde_json::Error>),

    /// A hook with the same name is already registered.
    #[error("hook with name {name:?} already exists")]
    DuplicateHook {
        /// Name of the rejected hook.
        name: String,
    },
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::DatafileParse(Arc::new(value))
    }
}

/// A fault that occurred while evaluating a feature. It is attached to an evaluation with reason
/// [`EvaluationReason::Error`](crate::EvaluationReason::Error).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase", tag = "kind")]
#[non_exhaustive]
pub enum EvaluationError {
    /// Feature is present in the datafile but its configuration failed to parse (e.g., an
    /// unrecognized `bucketBy` shape).
    #[error("feature {feature_key:?} has invalid configuration, try upgrading Featurevisor SDK")]
    FeatureParseError {
        /// Key of the broken feature.
        feature_key: String,
    },

    /// Features list each other in `required`, so evaluation would never terminate.
    #[error("required features form a cycle: {}", chain.join(" -> "))]
    RequiredCycle {
        /// Feature keys on the cycle, in evaluation order.
        chain: Vec<String>,
    },

    /// Evaluation panicked, most likely inside a user-provided hook.
    #[error("evaluation panicked: {message}")]
    Panicked {
        /// Panic payload, if it was a string.
        message: String,
    },
}
