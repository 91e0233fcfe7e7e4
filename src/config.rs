use std::sync::Arc;

use crate::{datafile::DatafileContent, Context, Hook, Instance, Result, StickyFeatures};

/// Configuration for [`Instance`].
#[derive(Default)]
pub struct InstanceConfig {
    pub(crate) datafile: DatafileContent,
    pub(crate) context: Context,
    pub(crate) sticky: StickyFeatures,
    pub(crate) hooks: Vec<Arc<dyn Hook>>,
}

impl InstanceConfig {
    /// Create a default configuration: an empty datafile, no context, no sticky features, and no
    /// hooks.
    ///
    /// ```
    /// # use featurevisor::InstanceConfig;
    /// InstanceConfig::new();
    /// ```
    pub fn new() -> Self {
        InstanceConfig::default()
    }

    /// Set initial datafile.
    pub fn datafile(&mut self, datafile: DatafileContent) -> &mut Self {
        self.datafile = datafile;
        self
    }

    /// Parse initial datafile from JSON.
    ///
    /// ```
    /// # use featurevisor::InstanceConfig;
    /// let mut config = InstanceConfig::new();
    /// config
    ///     .datafile_json(r#"{"schemaVersion": "2", "revision": "1", "segments": {}, "features": {}}"#)
    ///     .unwrap();
    /// ```
    pub fn datafile_json(&mut self, json: &str) -> Result<&mut Self> {
        self.datafile = serde_json::from_str(json)?;
        Ok(self)
    }

    /// Set context that every evaluation starts from. Per-call context is merged on top of it.
    pub fn context(&mut self, context: Context) -> &mut Self {
        self.context = context;
        self
    }

    /// Set sticky features that pre-empt evaluation.
    pub fn sticky(&mut self, sticky: StickyFeatures) -> &mut Self {
        self.sticky = sticky;
        self
    }

    /// Register a hook. Hooks run in the order they were added.
    pub fn hook(&mut self, hook: impl Hook + 'static) -> &mut Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Create a new [`Instance`] using the specified configuration. Of hooks sharing a name, only
    /// the first one is registered.
    ///
    /// ```
    /// # use featurevisor::{InstanceConfig, Instance};
    /// let instance: Instance = InstanceConfig::new().to_instance();
    /// ```
    pub fn to_instance(self) -> Instance {
        Instance::new(self)
    }
}
