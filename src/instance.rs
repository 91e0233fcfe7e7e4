use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use serde::de::DeserializeOwned;

use crate::{
    child::ChildInstance,
    context::merge_contexts,
    datafile::{DatafileContent, Feature, VariableValue, VariationValue},
    datafile_reader::{DatafileDiff, DatafileReader},
    datafile_store::DatafileStore,
    eval::{evaluate_with_hooks, EvaluateRequest},
    evaluation::{EvaluatedFeature, EvaluatedFeatures, Evaluation, EvaluationType, StickyFeatures},
    hooks::{HookHandle, HooksManager},
    Context, Hook, InstanceConfig, Result,
};

/// Per-call overrides.
#[derive(Debug, Default, Clone)]
pub struct OverrideOptions {
    /// Sticky features merged on top of the instance's sticky features for this call.
    pub sticky: Option<StickyFeatures>,
    /// Served when the evaluation resolves no variation.
    pub default_variation_value: Option<VariationValue>,
    /// Served when the evaluation resolves no variable value.
    pub default_variable_value: Option<VariableValue>,
}

/// Featurevisor SDK instance: evaluates features of the current datafile.
///
/// In order to create an instance, first create [`InstanceConfig`].
///
/// # Examples
/// ```
/// # use featurevisor::{Context, InstanceConfig};
/// let mut config = InstanceConfig::new();
/// config.datafile_json(r#"{
///     "schemaVersion": "2",
///     "revision": "1",
///     "segments": {},
///     "features": {
///         "checkout": {
///             "bucketBy": "userId",
///             "traffic": [{ "key": "everyone", "segments": "*", "percentage": 100000 }]
///         }
///     }
/// }"#).unwrap();
/// let instance = config.to_instance();
///
/// let context: Context = [("userId".to_owned(), "123".into())].into();
/// assert!(instance.is_enabled("checkout", &context));
/// ```
pub struct Instance {
    store: Arc<DatafileStore>,
    hooks: HooksManager,
    context: RwLock<Arc<Context>>,
    sticky: RwLock<Arc<StickyFeatures>>,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("revision", &self.get_revision())
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl Instance {
    /// Create a new `Instance` using the specified configuration.
    ///
    /// ```
    /// # use featurevisor::{InstanceConfig, Instance};
    /// let instance = Instance::new(InstanceConfig::new());
    /// ```
    ///
    /// A configured hook whose name is already taken is logged and skipped.
    pub fn new(config: InstanceConfig) -> Self {
        let hooks = HooksManager::new();
        for hook in config.hooks {
            // `add` logs the duplicate.
            let _ = hooks.add(hook);
        }

        Instance {
            store: Arc::new(DatafileStore::new(config.datafile)),
            hooks,
            context: RwLock::new(Arc::new(config.context)),
            sticky: RwLock::new(Arc::new(config.sticky)),
        }
    }

    /// Replace the datafile. Evaluations that already started finish against the previous one.
    pub fn set_datafile(&self, datafile: DatafileContent) -> DatafileDiff {
        let diff = self.store.set_datafile(datafile);
        log::info!(target: "featurevisor",
                   revision = diff.revision.as_str(),
                   diff:serde = diff;
                   "datafile set");
        diff
    }

    /// Parse and replace the datafile. On parse error, the current datafile is kept.
    pub fn set_datafile_json(&self, json: &str) -> Result<DatafileDiff> {
        let datafile: DatafileContent = serde_json::from_str(json).inspect_err(|err| {
            log::error!(target: "featurevisor", "could not parse datafile: {err}");
        })?;
        Ok(self.set_datafile(datafile))
    }

    /// Revision of the current datafile.
    pub fn get_revision(&self) -> String {
        self.store.get_reader().get_revision().to_owned()
    }

    /// Get feature configuration by key.
    pub fn get_feature(&self, feature_key: &str) -> Option<Feature> {
        self.store.get_reader().get_feature(feature_key).cloned()
    }

    /// Get a snapshot of the current datafile.
    pub fn get_datafile_reader(&self) -> Arc<DatafileReader> {
        self.store.get_reader()
    }

    /// Set instance context. Unless `replace` is set, `context` is merged into the current one.
    pub fn set_context(&self, context: Context, replace: bool) {
        let mut slot = self
            .context
            .write()
            .expect("thread holding context lock should not panic");
        let context = if replace {
            context
        } else {
            merge_contexts(&slot, &context)
        };
        *slot = Arc::new(context);
        log::debug!(target: "featurevisor", replace; "context set");
    }

    /// Current instance context.
    pub fn get_context(&self) -> Arc<Context> {
        self.context
            .read()
            .expect("thread holding context lock should not panic")
            .clone()
    }

    /// Set sticky features. Unless `replace` is set, `sticky` is merged into the current ones.
    pub fn set_sticky(&self, sticky: StickyFeatures, replace: bool) {
        let mut slot = self
            .sticky
            .write()
            .expect("thread holding sticky lock should not panic");
        let sticky = if replace {
            sticky
        } else {
            let mut merged = StickyFeatures::clone(&slot);
            merged.extend(sticky);
            merged
        };
        *slot = Arc::new(sticky);
        log::debug!(target: "featurevisor", replace; "sticky features set");
    }

    /// Current sticky features.
    pub fn get_sticky(&self) -> Arc<StickyFeatures> {
        self.sticky
            .read()
            .expect("thread holding sticky lock should not panic")
            .clone()
    }

    /// Register a hook. Returns a handle that can be used to remove it.
    pub fn add_hook(&self, hook: impl Hook + 'static) -> Result<HookHandle> {
        self.hooks.add(Arc::new(hook))
    }

    /// Remove hook by name. Returns `true` if the hook was registered.
    pub fn remove_hook(&self, name: &str) -> bool {
        self.hooks.remove(name)
    }

    /// Create a child instance with its own context and sticky features. The child evaluates
    /// against this instance's datafile and hooks.
    pub fn spawn(&self, context: Context) -> ChildInstance<'_> {
        ChildInstance::new(self, context)
    }

    fn request(
        &self,
        evaluation_type: EvaluationType,
        feature_key: &str,
        variable_key: Option<&str>,
        context: &Context,
        options: &OverrideOptions,
    ) -> EvaluateRequest {
        let context = merge_contexts(&self.get_context(), context);

        let instance_sticky = self.get_sticky();
        let sticky = match &options.sticky {
            Some(sticky) => {
                let mut merged = StickyFeatures::clone(&instance_sticky);
                merged.extend(sticky.iter().map(|(k, v)| (k.clone(), v.clone())));
                merged
            }
            None => StickyFeatures::clone(&instance_sticky),
        };

        EvaluateRequest {
            evaluation_type,
            feature_key: feature_key.to_owned(),
            variable_key: variable_key.map(str::to_owned),
            context,
            sticky,
            default_variation_value: options.default_variation_value.clone(),
            default_variable_value: options.default_variable_value.clone(),
        }
    }

    fn evaluate(&self, reader: &DatafileReader, request: EvaluateRequest) -> Evaluation {
        evaluate_with_hooks(reader, request, &self.hooks.snapshot())
    }

    /// Evaluate whether the feature is enabled.
    pub fn evaluate_flag(
        &self,
        feature_key: &str,
        context: &Context,
        options: &OverrideOptions,
    ) -> Evaluation {
        let request = self.request(EvaluationType::Flag, feature_key, None, context, options);
        self.evaluate(&self.store.get_reader(), request)
    }

    /// Evaluate feature variation.
    pub fn evaluate_variation(
        &self,
        feature_key: &str,
        context: &Context,
        options: &OverrideOptions,
    ) -> Evaluation {
        let request = self.request(
            EvaluationType::Variation,
            feature_key,
            None,
            context,
            options,
        );
        self.evaluate(&self.store.get_reader(), request)
    }

    /// Evaluate a variable of the feature.
    pub fn evaluate_variable(
        &self,
        feature_key: &str,
        variable_key: &str,
        context: &Context,
        options: &OverrideOptions,
    ) -> Evaluation {
        let request = self.request(
            EvaluationType::Variable,
            feature_key,
            Some(variable_key),
            context,
            options,
        );
        self.evaluate(&self.store.get_reader(), request)
    }

    /// Returns `true` if the feature is enabled for `context`.
    pub fn is_enabled(&self, feature_key: &str, context: &Context) -> bool {
        self.evaluate_flag(feature_key, context, &OverrideOptions::default())
            .is_enabled()
    }

    /// Get variation value of the feature for `context`.
    pub fn get_variation(&self, feature_key: &str, context: &Context) -> Option<VariationValue> {
        self.evaluate_variation(feature_key, context, &OverrideOptions::default())
            .get_variation_value()
            .map(str::to_owned)
    }

    /// Get variable value of the feature for `context`.
    pub fn get_variable(
        &self,
        feature_key: &str,
        variable_key: &str,
        context: &Context,
    ) -> Option<VariableValue> {
        self.evaluate_variable(
            feature_key,
            variable_key,
            context,
            &OverrideOptions::default(),
        )
        .variable_value
    }

    /// Get variable value deserialized into `T`. JSON-encoded strings are decoded first.
    pub fn get_variable_as<T: DeserializeOwned>(
        &self,
        feature_key: &str,
        variable_key: &str,
        context: &Context,
    ) -> Option<T> {
        deserialize_variable(
            feature_key,
            variable_key,
            self.get_variable(feature_key, variable_key, context)?,
        )
    }

    #[allow(missing_docs)]
    pub fn get_variable_boolean(
        &self,
        feature_key: &str,
        variable_key: &str,
        context: &Context,
    ) -> Option<bool> {
        to_boolean(&self.get_variable(feature_key, variable_key, context)?)
    }

    #[allow(missing_docs)]
    pub fn get_variable_string(
        &self,
        feature_key: &str,
        variable_key: &str,
        context: &Context,
    ) -> Option<String> {
        to_string(&self.get_variable(feature_key, variable_key, context)?)
    }

    #[allow(missing_docs)]
    pub fn get_variable_integer(
        &self,
        feature_key: &str,
        variable_key: &str,
        context: &Context,
    ) -> Option<i64> {
        to_integer(&self.get_variable(feature_key, variable_key, context)?)
    }

    #[allow(missing_docs)]
    pub fn get_variable_double(
        &self,
        feature_key: &str,
        variable_key: &str,
        context: &Context,
    ) -> Option<f64> {
        to_double(&self.get_variable(feature_key, variable_key, context)?)
    }

    #[allow(missing_docs)]
    pub fn get_variable_array(
        &self,
        feature_key: &str,
        variable_key: &str,
        context: &Context,
    ) -> Option<Vec<VariableValue>> {
        to_array(self.get_variable(feature_key, variable_key, context)?)
    }

    #[allow(missing_docs)]
    pub fn get_variable_object(
        &self,
        feature_key: &str,
        variable_key: &str,
        context: &Context,
    ) -> Option<serde_json::Map<String, VariableValue>> {
        to_object(self.get_variable(feature_key, variable_key, context)?)
    }

    /// Get a `json` variable. String values are decoded as JSON.
    pub fn get_variable_json(
        &self,
        feature_key: &str,
        variable_key: &str,
        context: &Context,
    ) -> Option<VariableValue> {
        Some(to_json(self.get_variable(feature_key, variable_key, context)?))
    }

    /// Evaluate `feature_keys` (or every feature, if empty) against one datafile snapshot.
    ///
    /// The result can be passed back as sticky features.
    pub fn get_all_evaluations(
        &self,
        context: &Context,
        feature_keys: &[&str],
        options: &OverrideOptions,
    ) -> EvaluatedFeatures {
        let reader = self.store.get_reader();
        let keys: Vec<&str> = if feature_keys.is_empty() {
            reader.get_feature_keys()
        } else {
            feature_keys.to_vec()
        };

        let mut evaluated = EvaluatedFeatures::new();
        for feature_key in keys {
            let enabled = self
                .evaluate(
                    &reader,
                    self.request(EvaluationType::Flag, feature_key, None, context, options),
                )
                .is_enabled();

            let Some(feature) = reader.get_feature(feature_key) else {
                evaluated.insert(
                    feature_key.to_owned(),
                    EvaluatedFeature {
                        enabled: Some(enabled),
                        ..Default::default()
                    },
                );
                continue;
            };

            let variation = if feature.variations.is_empty() {
                None
            } else {
                self.evaluate(
                    &reader,
                    self.request(
                        EvaluationType::Variation,
                        feature_key,
                        None,
                        context,
                        options,
                    ),
                )
                .get_variation_value()
                .map(str::to_owned)
            };

            let variables = if feature.variables_schema.is_empty() {
                None
            } else {
                let mut variable_keys: Vec<&String> = feature.variables_schema.keys().collect();
                variable_keys.sort_unstable();

                let mut variables = HashMap::new();
                for variable_key in variable_keys {
                    let evaluation = self.evaluate(
                        &reader,
                        self.request(
                            EvaluationType::Variable,
                            feature_key,
                            Some(variable_key.as_str()),
                            context,
                            options,
                        ),
                    );
                    if let Some(value) = evaluation.variable_value {
                        variables.insert(variable_key.clone(), value);
                    }
                }
                Some(variables)
            };

            evaluated.insert(
                feature_key.to_owned(),
                EvaluatedFeature {
                    enabled: Some(enabled),
                    variation,
                    variables,
                },
            );
        }

        evaluated
    }
}

pub(crate) fn to_boolean(value: &VariableValue) -> Option<bool> {
    match value {
        VariableValue::Bool(b) => Some(*b),
        VariableValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub(crate) fn to_string(value: &VariableValue) -> Option<String> {
    match value {
        VariableValue::String(s) => Some(s.clone()),
        VariableValue::Null => None,
        other => Some(other.to_string()),
    }
}

pub(crate) fn to_integer(value: &VariableValue) -> Option<i64> {
    match value {
        VariableValue::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        VariableValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn to_double(value: &VariableValue) -> Option<f64> {
    match value {
        VariableValue::Number(n) => n.as_f64(),
        VariableValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn to_array(value: VariableValue) -> Option<Vec<VariableValue>> {
    match to_json(value) {
        VariableValue::Array(items) => Some(items),
        _ => None,
    }
}

pub(crate) fn to_object(value: VariableValue) -> Option<serde_json::Map<String, VariableValue>> {
    match to_json(value) {
        VariableValue::Object(map) => Some(map),
        _ => None,
    }
}

/// `json` variables may arrive JSON-encoded in a string.
pub(crate) fn to_json(value: VariableValue) -> VariableValue {
    match value {
        VariableValue::String(s) => serde_json::from_str(&s).unwrap_or(VariableValue::String(s)),
        other => other,
    }
}

pub(crate) fn deserialize_variable<T: DeserializeOwned>(
    feature_key: &str,
    variable_key: &str,
    value: VariableValue,
) -> Option<T> {
    let value = match value {
        VariableValue::String(s) => match serde_json::from_str::<VariableValue>(&s) {
            Ok(decoded) => decoded,
            Err(_) => VariableValue::String(s),
        },
        other => other,
    };
    serde_json::from_value(value)
        .inspect_err(|err| {
            log::warn!(target: "featurevisor",
                       feature_key,
                       variable_key;
                       "variable value has unexpected type: {err}");
        })
        .ok()
}
