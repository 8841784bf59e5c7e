//! Named plugin factories
//!
//! A [`PluginWrapper`] binds a configured name to a zero-arg creator for
//! the plugin's configuration value and a zero-arg creator for the plugin
//! instance. [`PluginWrapper::create_with_error`] runs the full
//! construction protocol (create, merge configuration defaults,
//! `init_once`, `init`), converting any panic along the way into an
//! error, so a buggy plugin can fail startup but never crash it.

use crate::plugin::{Plugin, PluginConfig, PluginContext, PluginGlobal};
use crate::safecall;
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use virta_core::PluginError;

/// A named factory for one plugin role.
///
/// `P` is the role trait object (`dyn Input`, `dyn Decoder`, ...). The
/// wrapper holds the plugin's shared global after construction, for
/// plugins that have one.
pub struct PluginWrapper<P: Plugin + ?Sized> {
    name: String,
    config_creator: Box<dyn Fn() -> PluginConfig + Send + Sync>,
    plugin_creator: Box<dyn Fn() -> Box<P> + Send + Sync>,
    global: OnceLock<Arc<dyn PluginGlobal>>,
}

impl<P: Plugin + ?Sized> PluginWrapper<P> {
    /// Bind a name, a configuration value, and a plugin creator.
    pub fn new(
        name: impl Into<String>,
        config: PluginConfig,
        creator: impl Fn() -> Box<P> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            config_creator: Box::new(move || config.clone()),
            plugin_creator: Box::new(creator),
            global: OnceLock::new(),
        }
    }

    /// The configured plugin name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The shared global produced by `init_once`, if the plugin has one.
    pub fn global(&self) -> Option<&Arc<dyn PluginGlobal>> {
        self.global.get()
    }

    /// Construct and initialize the plugin.
    ///
    /// Runs the creator, merges the user configuration onto the plugin's
    /// `config_struct` defaults, then runs `init_once` and `init`. A panic
    /// in any of those is converted into [`PluginError::Panicked`] and
    /// returned; it never propagates.
    pub fn create_with_error(
        &self,
        ctx: &PluginContext,
    ) -> Result<(Box<P>, Option<Arc<dyn PluginGlobal>>), PluginError> {
        let mut plugin = safecall::call(|| (self.plugin_creator)())?;
        let defaults = safecall::call(|| plugin.config_struct())?;
        let config = merge_config(defaults.unwrap_or(Value::Null), (self.config_creator)());

        let global = safecall::call(|| plugin.init_once(&config, ctx))??;
        safecall::call(|| plugin.init(&config))??;

        if let Some(global) = &global {
            let _ = self.global.set(global.clone());
        }
        Ok((plugin, global))
    }
}

/// Shallow merge of the user configuration onto the plugin's defaults.
///
/// Object keys in `user` win; a non-object `user` value replaces the
/// defaults wholesale, and a `Null` user block keeps the defaults.
pub fn merge_config(defaults: Value, user: Value) -> Value {
    match (defaults, user) {
        (Value::Object(mut base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                base.insert(key, value);
            }
            Value::Object(base)
        }
        (defaults, Value::Null) => defaults,
        (_, user) => user,
    }
}
