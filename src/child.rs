use std::sync::RwLock;

use serde::de::DeserializeOwned;

use crate::{
    context::merge_contexts,
    datafile::{VariableValue, VariationValue},
    evaluation::{EvaluatedFeatures, Evaluation, StickyFeatures},
    instance::{
        deserialize_variable, to_array, to_boolean, to_double, to_integer, to_json, to_object,
        to_string, Instance, OverrideOptions,
    },
    Context,
};

/// An instance bound to one context (e.g., one user), created with [`Instance::spawn`].
///
/// The child keeps its own context and sticky features and evaluates against the parent's
/// datafile and hooks. Contexts are layered: parent, then child, then per-call.
#[derive(Debug)]
pub struct ChildInstance<'a> {
    parent: &'a Instance,
    context: RwLock<Context>,
    sticky: RwLock<StickyFeatures>,
}

impl<'a> ChildInstance<'a> {
    pub(crate) fn new(parent: &'a Instance, context: Context) -> Self {
        ChildInstance {
            parent,
            context: RwLock::new(context),
            sticky: RwLock::new(StickyFeatures::new()),
        }
    }

    /// Set child context. Unless `replace` is set, `context` is merged into the current one.
    pub fn set_context(&self, context: Context, replace: bool) {
        let mut slot = self
            .context
            .write()
            .expect("thread holding context lock should not panic");
        if replace {
            *slot = context;
        } else {
            slot.extend(context);
        }
    }

    /// Child context, without the parent's.
    pub fn get_context(&self) -> Context {
        self.context
            .read()
            .expect("thread holding context lock should not panic")
            .clone()
    }

    /// Set child sticky features. Unless `replace` is set, `sticky` is merged into the current
    /// ones.
    pub fn set_sticky(&self, sticky: StickyFeatures, replace: bool) {
        let mut slot = self
            .sticky
            .write()
            .expect("thread holding sticky lock should not panic");
        if replace {
            *slot = sticky;
        } else {
            slot.extend(sticky);
        }
    }

    fn layered(&self, context: &Context, options: &OverrideOptions) -> (Context, OverrideOptions) {
        let context = merge_contexts(&self.get_context(), context);

        let mut sticky = self
            .sticky
            .read()
            .expect("thread holding sticky lock should not panic")
            .clone();
        if let Some(call_sticky) = &options.sticky {
            sticky.extend(call_sticky.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let options = OverrideOptions {
            sticky: Some(sticky),
            ..options.clone()
        };
        (context, options)
    }

    /// Evaluate whether the feature is enabled.
    pub fn evaluate_flag(
        &self,
        feature_key: &str,
        context: &Context,
        options: &OverrideOptions,
    ) -> Evaluation {
        let (context, options) = self.layered(context, options);
        self.parent.evaluate_flag(feature_key, &context, &options)
    }

    /// Evaluate feature variation.
    pub fn evaluate_variation(
        &self,
        feature_key: &str,
        context: &Context,
        options: &OverrideOptions,
    ) -> Evaluation {
        let (context, options) = self.layered(context, options);
        self.parent
            .evaluate_variation(feature_key, &context, &options)
    }

    /// Evaluate a variable of the feature.
    pub fn evaluate_variable(
        &self,
        feature_key: &str,
        variable_key: &str,
        context: &Context,
        options: &OverrideOptions,
    ) -> Evaluation {
        let (context, options) = self.layered(context, options);
        self.parent
            .evaluate_variable(feature_key, variable_key, &context, &options)
    }

    /// Returns `true` if the feature is enabled.
    pub fn is_enabled(&self, feature_key: &str, context: &Context) -> bool {
        self.evaluate_flag(feature_key, context, &OverrideOptions::default())
            .is_enabled()
    }

    /// Get variation value of the feature.
    pub fn get_variation(&self, feature_key: &str, context: &Context) -> Option<VariationValue> {
        self.evaluate_variation(feature_key, context, &OverrideOptions::default())
            .get_variation_value()
            .map(str::to_owned)
    }

    /// Get variable value of the feature.
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

    /// See [`Instance::get_variable_as`].
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

    #[allow(missing_docs)]
    pub fn get_variable_json(
        &self,
        feature_key: &str,
        variable_key: &str,
        context: &Context,
    ) -> Option<VariableValue> {
        Some(to_json(self.get_variable(feature_key, variable_key, context)?))
    }

    /// See [`Instance::get_all_evaluations`].
    pub fn get_all_evaluations(
        &self,
        context: &Context,
        feature_keys: &[&str],
        options: &OverrideOptions,
    ) -> EvaluatedFeatures {
        let (context, options) = self.layered(context, options);
        self.parent
            .get_all_evaluations(&context, feature_keys, &options)
    }
}
