use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    datafile::{Force, Required, VariableSchema, VariableValue, Variation, VariationValue},
    EvaluationError,
};

/// What is being evaluated.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "camelCase")]
pub enum EvaluationType {
    /// Whether the feature is enabled.
    Flag,
    /// Which variation the feature resolves to.
    Variation,
    /// Value of one variable of the feature.
    Variable,
}

/// Why an evaluation produced its result. Exactly one reason is attached to each [`Evaluation`].
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy, Hash)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum EvaluationReason {
    FeatureNotFound,
    Disabled,
    Required,
    OutOfRange,
    NoVariations,
    VariationDisabled,
    VariableNotFound,
    VariableDefault,
    VariableDisabled,
    VariableOverride,
    NoMatch,
    Forced,
    Sticky,
    Rule,
    Allocated,
    Error,
}

/// Result of evaluating a feature.
///
/// Only fields meaningful for the `reason` are populated. e.g., `sticky` is only set when reason is
/// [`EvaluationReason::Sticky`], and `bucket_value` only once bucketing happened.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct Evaluation {
    #[serde(rename = "type")]
    pub evaluation_type: EvaluationType,
    pub feature_key: String,
    pub reason: EvaluationReason,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_value: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EvaluationError>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force: Option<Force>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<Required>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sticky: Option<EvaluatedFeature>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation: Option<Variation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation_value: Option<VariationValue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable_value: Option<VariableValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable_schema: Option<VariableSchema>,
}

impl Evaluation {
    /// Create an evaluation with only the mandatory fields set.
    pub fn new(
        evaluation_type: EvaluationType,
        feature_key: impl Into<String>,
        reason: EvaluationReason,
    ) -> Self {
        Evaluation {
            evaluation_type,
            feature_key: feature_key.into(),
            reason,
            bucket_key: None,
            bucket_value: None,
            rule_key: None,
            error: None,
            enabled: None,
            force_index: None,
            force: None,
            required: None,
            sticky: None,
            variation: None,
            variation_value: None,
            variable_key: None,
            variable_value: None,
            variable_schema: None,
        }
    }

    pub(crate) fn error(
        evaluation_type: EvaluationType,
        feature_key: impl Into<String>,
        error: EvaluationError,
    ) -> Self {
        Evaluation {
            error: Some(error),
            ..Evaluation::new(evaluation_type, feature_key, EvaluationReason::Error)
        }
    }

    /// Returns `true` if this is an enabled flag evaluation.
    pub fn is_enabled(&self) -> bool {
        self.enabled == Some(true)
    }

    /// Resolved variation value: either the full variation or its bare value.
    pub fn get_variation_value(&self) -> Option<&str> {
        self.variation
            .as_ref()
            .map(|variation| variation.value.as_str())
            .or(self.variation_value.as_deref())
    }
}

/// Evaluated state of a single feature.
///
/// The same shape is used for sticky features: a caller-supplied outcome that pre-empts
/// datafile-driven evaluation.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatedFeature {
    /// Whether the feature is enabled. A sticky feature without it leaves the flag to the
    /// datafile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Variation value, if the feature has variations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation: Option<VariationValue>,
    /// Variable values by key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<HashMap<String, VariableValue>>,
}

/// Sticky features by feature key.
pub type StickyFeatures = HashMap<String, EvaluatedFeature>;

/// Evaluated features by feature key. Can be passed back as [`StickyFeatures`].
pub type EvaluatedFeatures = HashMap<String, EvaluatedFeature>;
