use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::{
    bucketer::{get_bucket_key, get_bucketed_number},
    datafile::{Feature, Force, Traffic, TryParse, VariableSchema, VariableValue, VariationValue},
    datafile_reader::{get_variation_from_weights, DatafileReader},
    evaluation::{Evaluation, EvaluationReason, EvaluationType, StickyFeatures},
    hooks::{BucketKeyInput, BucketValueInput, Hook},
    Context, EvaluationError,
};

/// What to evaluate and against which context.
///
/// Hooks may rewrite the request in [`Hook::before`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateRequest {
    /// Type of evaluation.
    #[serde(rename = "type")]
    pub evaluation_type: EvaluationType,
    /// Feature to evaluate.
    pub feature_key: String,
    /// Variable to evaluate. Required for [`EvaluationType::Variable`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variable_key: Option<String>,
    /// Context to evaluate against.
    #[serde(default)]
    pub context: Context,
    /// Sticky features that pre-empt evaluation.
    #[serde(default, skip_serializing_if = "StickyFeatures::is_empty")]
    pub sticky: StickyFeatures,
    /// Served when the evaluation resolves no variation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_variation_value: Option<VariationValue>,
    /// Served when the evaluation resolves no variable value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_variable_value: Option<VariableValue>,
}

impl EvaluateRequest {
    fn new(evaluation_type: EvaluationType, feature_key: String, context: Context) -> Self {
        EvaluateRequest {
            evaluation_type,
            feature_key,
            variable_key: None,
            context,
            sticky: StickyFeatures::new(),
            default_variation_value: None,
            default_variable_value: None,
        }
    }

    /// Request to evaluate whether the feature is enabled.
    pub fn flag(feature_key: impl Into<String>, context: Context) -> Self {
        Self::new(EvaluationType::Flag, feature_key.into(), context)
    }

    /// Request to evaluate feature variation.
    pub fn variation(feature_key: impl Into<String>, context: Context) -> Self {
        Self::new(EvaluationType::Variation, feature_key.into(), context)
    }

    /// Request to evaluate a variable of the feature.
    pub fn variable(
        feature_key: impl Into<String>,
        variable_key: impl Into<String>,
        context: Context,
    ) -> Self {
        EvaluateRequest {
            variable_key: Some(variable_key.into()),
            ..Self::new(EvaluationType::Variable, feature_key.into(), context)
        }
    }
}

/// Evaluate `request` through the full hooks pipeline. Never fails: faults (including panics in
/// hooks) are reported as an evaluation with [`EvaluationReason::Error`].
///
/// `before` hooks rewrite the request, the engine evaluates it (calling `bucket_key` and
/// `bucket_value` hooks), default values from the request fill an unset result, then `after`
/// hooks rewrite the evaluation.
pub fn evaluate_with_hooks(
    reader: &DatafileReader,
    request: EvaluateRequest,
    hooks: &[Arc<dyn Hook>],
) -> Evaluation {
    let evaluation_type = request.evaluation_type;
    let feature_key = request.feature_key.clone();

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let request = hooks
            .iter()
            .fold(request, |request, hook| hook.before(request));

        let mut evaluation = evaluate(reader, &request, hooks);
        apply_defaults(&mut evaluation, &request);

        hooks
            .iter()
            .fold(evaluation, |evaluation, hook| hook.after(evaluation, &request))
    }));

    result.unwrap_or_else(|payload| {
        let message = panic_message(payload.as_ref());
        log::error!(target: "featurevisor",
                    feature_key = feature_key.as_str(),
                    message = message.as_str();
                    "evaluation panicked");
        Evaluation::error(
            evaluation_type,
            feature_key,
            EvaluationError::Panicked { message },
        )
    })
}

/// Evaluate `request` without `before`/`after` hooks and default values. Bucketing hooks are still
/// applied.
pub fn evaluate(
    reader: &DatafileReader,
    request: &EvaluateRequest,
    hooks: &[Arc<dyn Hook>],
) -> Evaluation {
    let evaluator = Evaluator {
        reader,
        hooks,
        context: &request.context,
        sticky: &request.sticky,
    };
    evaluator.evaluate(
        request.evaluation_type,
        &request.feature_key,
        request.variable_key.as_deref(),
        &[],
    )
}

fn apply_defaults(evaluation: &mut Evaluation, request: &EvaluateRequest) {
    match evaluation.evaluation_type {
        EvaluationType::Variation if evaluation.get_variation_value().is_none() => {
            if let Some(default) = &request.default_variation_value {
                evaluation.variation_value = Some(default.clone());
            }
        }
        EvaluationType::Variable if evaluation.variable_value.is_none() => {
            if let Some(default) = &request.default_variable_value {
                evaluation.variable_value = Some(default.clone());
            }
        }
        _ => {}
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

struct Evaluator<'a> {
    reader: &'a DatafileReader,
    hooks: &'a [Arc<dyn Hook>],
    context: &'a Context,
    sticky: &'a StickyFeatures,
}

/// Common fields of evaluations for one feature.
struct Subject<'a> {
    evaluation_type: EvaluationType,
    feature_key: &'a str,
    variable_key: Option<&'a str>,
    variable_schema: Option<&'a VariableSchema>,
}

impl Subject<'_> {
    fn evaluation(&self, reason: EvaluationReason) -> Evaluation {
        Evaluation {
            variable_key: self.variable_key.map(str::to_owned),
            variable_schema: self.variable_schema.cloned(),
            ..Evaluation::new(self.evaluation_type, self.feature_key, reason)
        }
    }
}

impl<'a> Evaluator<'a> {
    /// `chain` lists features whose `required` section is being checked, to detect cycles.
    fn evaluate(
        &self,
        evaluation_type: EvaluationType,
        feature_key: &str,
        variable_key: Option<&str>,
        chain: &[&str],
    ) -> Evaluation {
        let evaluation = self.evaluate_stages(evaluation_type, feature_key, variable_key, chain);
        log::debug!(target: "featurevisor",
                    feature_key,
                    variable_key,
                    reason:serde = evaluation.reason,
                    evaluation:serde = evaluation;
                    "evaluated feature");
        evaluation
    }

    fn evaluate_stages(
        &self,
        evaluation_type: EvaluationType,
        feature_key: &str,
        variable_key: Option<&str>,
        chain: &[&str],
    ) -> Evaluation {
        let mut subject = Subject {
            evaluation_type,
            feature_key,
            variable_key,
            variable_schema: None,
        };

        // sticky
        if let Some(evaluation) = self.evaluate_sticky(&subject) {
            return evaluation;
        }

        // existence
        let feature = match self.reader.try_get_feature(feature_key) {
            None => {
                log::warn!(target: "featurevisor", feature_key; "feature not found");
                return subject.evaluation(EvaluationReason::FeatureNotFound);
            }
            Some(TryParse::ParseFailed(_)) => {
                return Evaluation::error(
                    evaluation_type,
                    feature_key,
                    EvaluationError::FeatureParseError {
                        feature_key: feature_key.to_owned(),
                    },
                );
            }
            Some(TryParse::Parsed(feature)) => feature,
        };

        if feature.deprecated && evaluation_type == EvaluationType::Flag {
            log::warn!(target: "featurevisor", feature_key; "feature is deprecated");
        }

        if evaluation_type == EvaluationType::Variable {
            let schema = variable_key.and_then(|key| feature.variables_schema.get(key));
            let Some(schema) = schema else {
                log::warn!(target: "featurevisor", feature_key, variable_key; "variable schema not found");
                return subject.evaluation(EvaluationReason::VariableNotFound);
            };
            if schema.deprecated {
                log::warn!(target: "featurevisor", feature_key, variable_key; "variable is deprecated");
            }
            subject.variable_schema = Some(schema);
        }

        if evaluation_type == EvaluationType::Variation && feature.variations.is_empty() {
            return subject.evaluation(EvaluationReason::NoVariations);
        }

        // disabled
        if evaluation_type != EvaluationType::Flag {
            let flag = self.evaluate(EvaluationType::Flag, feature_key, None, chain);
            if let Some(error) = flag.error {
                return Evaluation::error(evaluation_type, feature_key, error);
            }
            if flag.enabled != Some(true) {
                return self.evaluate_disabled(&subject, feature);
            }
        }

        // forced
        let matched_force = self.reader.get_matched_force(feature, self.context);
        if let Some((force_index, force)) = matched_force {
            if let Some(evaluation) = self.evaluate_force(&subject, feature, force_index, force) {
                return evaluation;
            }
        }

        // required
        if evaluation_type == EvaluationType::Flag && !feature.required.is_empty() {
            match self.required_are_satisfied(feature_key, feature, chain) {
                Err(error) => return Evaluation::error(evaluation_type, feature_key, error),
                Ok(false) => {
                    return Evaluation {
                        enabled: Some(false),
                        required: Some(feature.required.clone()),
                        ..subject.evaluation(EvaluationReason::Required)
                    };
                }
                Ok(true) => {}
            }
        }

        // bucketing
        let bucket_key = self.get_bucket_key(feature_key, feature);
        let bucket_value = self.get_bucket_value(feature_key, &bucket_key);

        let matched_traffic = self.reader.get_matched_traffic(&feature.traffic, self.context);
        let bucketed = |reason: EvaluationReason, traffic: Option<&Traffic>| Evaluation {
            bucket_key: Some(bucket_key.clone()),
            bucket_value: Some(bucket_value),
            rule_key: traffic.map(|traffic| traffic.key.clone()),
            ..subject.evaluation(reason)
        };

        match evaluation_type {
            EvaluationType::Flag => {
                if let Some(traffic) = matched_traffic {
                    if traffic.percentage == 0 {
                        return Evaluation {
                            enabled: Some(false),
                            ..bucketed(EvaluationReason::Rule, Some(traffic))
                        };
                    }

                    // mutually exclusive ranges
                    if !feature.ranges.is_empty() {
                        if feature
                            .ranges
                            .iter()
                            .any(|range| range.contains(bucket_value))
                        {
                            return Evaluation {
                                enabled: Some(traffic.enabled.unwrap_or(true)),
                                ..bucketed(EvaluationReason::Allocated, Some(traffic))
                            };
                        }
                        return Evaluation {
                            enabled: Some(false),
                            ..bucketed(EvaluationReason::OutOfRange, Some(traffic))
                        };
                    }

                    if let Some(enabled) = traffic.enabled {
                        return Evaluation {
                            enabled: Some(enabled),
                            ..bucketed(EvaluationReason::Rule, Some(traffic))
                        };
                    }
                    if bucket_value <= traffic.percentage {
                        return Evaluation {
                            enabled: Some(true),
                            ..bucketed(EvaluationReason::Rule, Some(traffic))
                        };
                    }
                }

                Evaluation {
                    enabled: Some(false),
                    ..bucketed(EvaluationReason::NoMatch, None)
                }
            }

            EvaluationType::Variation => {
                let traffic = matched_traffic.filter(|traffic| traffic.percentage > 0);
                if let Some(traffic) = traffic {
                    if let Some((variation_value, reason)) =
                        self.get_traffic_variation(traffic, bucket_value)
                    {
                        if let Some(variation) = feature.get_variation(variation_value) {
                            return Evaluation {
                                variation_value: Some(variation.value.clone()),
                                variation: Some(variation.clone()),
                                ..bucketed(reason, Some(traffic))
                            };
                        }
                        log::warn!(target: "featurevisor",
                                   feature_key,
                                   variation_value;
                                   "rule refers to unknown variation");
                    }
                }
                bucketed(EvaluationReason::NoMatch, None)
            }

            EvaluationType::Variable => {
                let variable_key = variable_key.unwrap_or_default();
                let traffic = matched_traffic.filter(|traffic| traffic.percentage > 0);
                if let Some(traffic) = traffic {
                    if let Some(value) = traffic.variables.get(variable_key) {
                        return Evaluation {
                            variable_value: Some(value.clone()),
                            ..bucketed(EvaluationReason::Rule, Some(traffic))
                        };
                    }

                    let variation_value = matched_force
                        .and_then(|(_, force)| force.variation.as_deref())
                        .or_else(|| {
                            self.get_traffic_variation(traffic, bucket_value)
                                .map(|(value, _)| value)
                        });
                    let variation =
                        variation_value.and_then(|value| feature.get_variation(value));

                    if let Some(variation) = variation {
                        let matched_override = variation
                            .variable_overrides
                            .get(variable_key)
                            .and_then(|overrides| {
                                overrides.iter().find(|variable_override| {
                                    if let Some(conditions) = &variable_override.conditions {
                                        self.reader
                                            .all_conditions_are_matched(conditions, self.context)
                                    } else if let Some(segments) = &variable_override.segments {
                                        self.reader
                                            .all_segments_are_matched(segments, self.context)
                                    } else {
                                        false
                                    }
                                })
                            });
                        if let Some(variable_override) = matched_override {
                            return Evaluation {
                                variable_value: Some(variable_override.value.clone()),
                                ..bucketed(EvaluationReason::VariableOverride, Some(traffic))
                            };
                        }

                        if let Some(value) = variation.variables.get(variable_key) {
                            return Evaluation {
                                variable_value: Some(value.clone()),
                                ..bucketed(EvaluationReason::Allocated, Some(traffic))
                            };
                        }
                    }
                }

                match subject
                    .variable_schema
                    .and_then(|schema| schema.default_value.as_ref())
                {
                    Some(default_value) => Evaluation {
                        variable_value: Some(default_value.clone()),
                        ..bucketed(EvaluationReason::VariableDefault, None)
                    },
                    None => bucketed(EvaluationReason::VariableNotFound, None),
                }
            }
        }
    }

    fn evaluate_sticky(&self, subject: &Subject<'_>) -> Option<Evaluation> {
        let sticky = self.sticky.get(subject.feature_key)?;

        let evaluation = match subject.evaluation_type {
            EvaluationType::Flag => Evaluation {
                enabled: Some(sticky.enabled?),
                ..subject.evaluation(EvaluationReason::Sticky)
            },
            EvaluationType::Variation => Evaluation {
                variation_value: Some(sticky.variation.clone()?),
                ..subject.evaluation(EvaluationReason::Sticky)
            },
            EvaluationType::Variable => {
                let value = sticky.variables.as_ref()?.get(subject.variable_key?)?;
                Evaluation {
                    variable_value: Some(value.clone()),
                    ..subject.evaluation(EvaluationReason::Sticky)
                }
            }
        };

        Some(Evaluation {
            sticky: Some(sticky.clone()),
            ..evaluation
        })
    }

    fn evaluate_disabled(&self, subject: &Subject<'_>, feature: &Feature) -> Evaluation {
        match subject.evaluation_type {
            EvaluationType::Variable => {
                if let Some(schema) = subject.variable_schema {
                    if let Some(disabled_value) = &schema.disabled_value {
                        return Evaluation {
                            variable_value: Some(disabled_value.clone()),
                            ..subject.evaluation(EvaluationReason::VariableDisabled)
                        };
                    }
                    if schema.use_default_when_disabled {
                        return Evaluation {
                            variable_value: schema.default_value.clone(),
                            ..subject.evaluation(EvaluationReason::VariableDefault)
                        };
                    }
                }
            }
            EvaluationType::Variation => {
                if let Some(value) = &feature.disabled_variation_value {
                    return Evaluation {
                        variation_value: Some(value.clone()),
                        ..subject.evaluation(EvaluationReason::VariationDisabled)
                    };
                }
            }
            EvaluationType::Flag => {}
        }

        Evaluation {
            enabled: Some(false),
            ..subject.evaluation(EvaluationReason::Disabled)
        }
    }

    fn evaluate_force(
        &self,
        subject: &Subject<'_>,
        feature: &Feature,
        force_index: usize,
        force: &Force,
    ) -> Option<Evaluation> {
        let evaluation = match subject.evaluation_type {
            EvaluationType::Flag => Evaluation {
                enabled: Some(force.enabled?),
                ..subject.evaluation(EvaluationReason::Forced)
            },
            EvaluationType::Variation => {
                let variation = feature.get_variation(force.variation.as_deref()?)?;
                Evaluation {
                    variation_value: Some(variation.value.clone()),
                    variation: Some(variation.clone()),
                    ..subject.evaluation(EvaluationReason::Forced)
                }
            }
            EvaluationType::Variable => Evaluation {
                variable_value: Some(force.variables.get(subject.variable_key?)?.clone()),
                ..subject.evaluation(EvaluationReason::Forced)
            },
        };

        Some(Evaluation {
            force_index: Some(force_index),
            force: Some(force.clone()),
            ..evaluation
        })
    }

    /// Returns `Ok(true)` if every required feature is enabled (and has the expected variation).
    fn required_are_satisfied(
        &self,
        feature_key: &str,
        feature: &Feature,
        chain: &[&str],
    ) -> Result<bool, EvaluationError> {
        let mut chain = chain.to_vec();
        chain.push(feature_key);

        for required in &feature.required {
            let required_key = required.key();

            if chain.contains(&required_key) {
                let mut cycle: Vec<String> = chain.iter().map(|key| (*key).to_owned()).collect();
                cycle.push(required_key.to_owned());
                log::error!(target: "featurevisor",
                            feature_key,
                            chain:serde = cycle;
                            "required features form a cycle");
                return Err(EvaluationError::RequiredCycle { chain: cycle });
            }

            let flag = self.evaluate(EvaluationType::Flag, required_key, None, &chain);
            if let Some(error @ EvaluationError::RequiredCycle { .. }) = flag.error {
                return Err(error);
            }
            if flag.enabled != Some(true) {
                log::debug!(target: "featurevisor",
                            feature_key,
                            required_key;
                            "required feature is not enabled");
                return Ok(false);
            }

            if let Some(expected_variation) = required.variation() {
                let variation =
                    self.evaluate(EvaluationType::Variation, required_key, None, &chain);
                if variation.get_variation_value() != Some(expected_variation) {
                    log::debug!(target: "featurevisor",
                                feature_key,
                                required_key,
                                expected_variation;
                                "required feature has a different variation");
                    return Ok(false);
                }
            }
        }

        Ok(true)
    }

    /// Variation assigned by the rule itself, by variation weights, or by static allocation,
    /// in that order.
    fn get_traffic_variation<'t>(
        &self,
        traffic: &'t Traffic,
        bucket_value: u32,
    ) -> Option<(&'t str, EvaluationReason)> {
        if let Some(variation) = &traffic.variation {
            return Some((variation, EvaluationReason::Rule));
        }
        if let Some(weights) = &traffic.variation_weights {
            return get_variation_from_weights(weights, bucket_value)
                .map(|variation| (variation, EvaluationReason::Allocated));
        }
        self.reader
            .get_matched_allocation(traffic, bucket_value)
            .map(|allocation| (allocation.variation.as_str(), EvaluationReason::Allocated))
    }

    fn get_bucket_key(&self, feature_key: &str, feature: &Feature) -> String {
        let bucket_key = get_bucket_key(feature_key, &feature.bucket_by, self.context);
        let input = BucketKeyInput {
            feature_key,
            context: self.context,
            bucket_by: &feature.bucket_by,
        };
        self.hooks
            .iter()
            .fold(bucket_key, |bucket_key, hook| hook.bucket_key(input, bucket_key))
    }

    fn get_bucket_value(&self, feature_key: &str, bucket_key: &str) -> u32 {
        let bucket_value = get_bucketed_number(bucket_key);
        let input = BucketValueInput {
            feature_key,
            context: self.context,
            bucket_key,
        };
        self.hooks
            .iter()
            .fold(bucket_value, |bucket_value, hook| {
                hook.bucket_value(input, bucket_value)
            })
    }
}
