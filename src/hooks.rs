//! Hooks intercept evaluations: they can rewrite the request, the bucket key and value, and the
//! resulting [`Evaluation`].
use std::sync::{Arc, RwLock, Weak};

use crate::{datafile::BucketBy, eval::EvaluateRequest, Context, Error, Evaluation, Result};

/// A named evaluation interceptor. All methods but `name` default to passing their input through.
///
/// Hooks run in registration order. They must not panic; a panicking hook turns the evaluation
/// into an error evaluation.
///
/// # Examples
/// ```
/// # use featurevisor::{BucketValueInput, Hook};
/// /// Puts everyone into the same bucket.
/// struct FixedBucket(u32);
///
/// impl Hook for FixedBucket {
///     fn name(&self) -> &str {
///         "fixed-bucket"
///     }
///
///     fn bucket_value(&self, _input: BucketValueInput<'_>, _bucket_value: u32) -> u32 {
///         self.0
///     }
/// }
/// ```
pub trait Hook: Send + Sync {
    /// Unique name of the hook.
    fn name(&self) -> &str;

    /// Rewrite the request before evaluation.
    fn before(&self, request: EvaluateRequest) -> EvaluateRequest {
        request
    }

    /// Rewrite the computed bucket key.
    fn bucket_key(&self, input: BucketKeyInput<'_>, bucket_key: String) -> String {
        let _ = input;
        bucket_key
    }

    /// Rewrite the computed bucket value.
    fn bucket_value(&self, input: BucketValueInput<'_>, bucket_value: u32) -> u32 {
        let _ = input;
        bucket_value
    }

    /// Rewrite the final evaluation.
    fn after(&self, evaluation: Evaluation, request: &EvaluateRequest) -> Evaluation {
        let _ = request;
        evaluation
    }
}

/// Inputs the bucket key was computed from.
#[derive(Debug, Clone, Copy)]
#[allow(missing_docs)]
pub struct BucketKeyInput<'a> {
    pub feature_key: &'a str,
    pub context: &'a Context,
    pub bucket_by: &'a BucketBy,
}

/// Inputs the bucket value was computed from.
#[derive(Debug, Clone, Copy)]
#[allow(missing_docs)]
pub struct BucketValueInput<'a> {
    pub feature_key: &'a str,
    pub context: &'a Context,
    pub bucket_key: &'a str,
}

/// Immutable snapshot of registered hooks.
pub(crate) type Hooks = Arc<[Arc<dyn Hook>]>;

type HooksSlot = RwLock<Hooks>;

/// Ordered registry of hooks. Cloning produces another handle to the same registry.
///
/// Registration replaces the list, so evaluations that already took a snapshot are not affected.
#[derive(Clone)]
pub struct HooksManager {
    hooks: Arc<HooksSlot>,
}

impl Default for HooksManager {
    fn default() -> Self {
        HooksManager::new()
    }
}

impl std::fmt::Debug for HooksManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hooks = self.snapshot();
        f.debug_list()
            .entries(hooks.iter().map(|hook| hook.name()))
            .finish()
    }
}

impl HooksManager {
    /// Create an empty registry.
    pub fn new() -> Self {
        HooksManager {
            hooks: Arc::new(RwLock::new(Arc::from(Vec::new()))),
        }
    }

    /// Register a hook. Returns an error if a hook with the same name is already registered.
    pub fn add(&self, hook: Arc<dyn Hook>) -> Result<HookHandle> {
        let name = hook.name().to_owned();

        let mut slot = self
            .hooks
            .write()
            .expect("thread holding hooks lock should not panic");
        if slot.iter().any(|existing| existing.name() == name) {
            log::error!(target: "featurevisor", hook = name.as_str(); "hook with the same name already exists");
            return Err(Error::DuplicateHook { name });
        }

        let mut hooks = slot.to_vec();
        hooks.push(hook);
        *slot = Arc::from(hooks);

        Ok(HookHandle {
            name,
            hooks: Arc::downgrade(&self.hooks),
        })
    }

    /// Remove hook by name. Returns `true` if the hook was registered.
    pub fn remove(&self, name: &str) -> bool {
        remove_from(&self.hooks, name)
    }

    /// Get current hooks.
    pub(crate) fn snapshot(&self) -> Hooks {
        self.hooks
            .read()
            .expect("thread holding hooks lock should not panic")
            .clone()
    }

    /// Names of the registered hooks, in order.
    pub fn names(&self) -> Vec<String> {
        self.snapshot()
            .iter()
            .map(|hook| hook.name().to_owned())
            .collect()
    }
}

fn remove_from(slot: &HooksSlot, name: &str) -> bool {
    let mut slot = slot
        .write()
        .expect("thread holding hooks lock should not panic");
    let hooks: Vec<_> = slot
        .iter()
        .filter(|hook| hook.name() != name)
        .cloned()
        .collect();
    if hooks.len() == slot.len() {
        return false;
    }
    *slot = Arc::from(hooks);
    true
}

/// Returned from [`HooksManager::add`]; removes the hook it was returned for.
#[derive(Debug, Clone)]
pub struct HookHandle {
    name: String,
    hooks: Weak<HooksSlot>,
}

impl HookHandle {
    /// Name of the registered hook.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unregister the hook. Returns `false` if it was already removed or the registry is gone.
    pub fn remove(&self) -> bool {
        match self.hooks.upgrade() {
            Some(hooks) => remove_from(&hooks, &self.name),
            None => false,
        }
    }
}
