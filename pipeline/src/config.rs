//! Pipeline configuration and the topology builder
//!
//! The topology is wired by name: inputs, decoders, filters, and outputs
//! are registered under names, and `filter_chains` maps a chain name to
//! the ordered filter list plus the output set it delivers to. The
//! builder validates every reference at `build()`: an unknown name is a
//! fatal configuration error, the only kind of error that aborts startup.
//!
//! No file format is prescribed; [`PipelineSettings`] is a plain serde
//! structure callers can deserialize from whatever format they load.
//!
//! # Example
//!
//! ```ignore
//! use virta_pipeline::{JsonDecoder, LogOutput, PipelineBuilder, TableLookup};
//!
//! let pipeline = PipelineBuilder::new()
//!     .pool_size(64)
//!     .decoder("json", || Box::new(JsonDecoder::new()))
//!     .output("log", || Box::new(LogOutput::new()))
//!     .filter_chain("default", [] as [&str; 0], ["log"])
//!     .build()?;
//!
//! let bus = pipeline.bus();
//! tokio::spawn(virta_pipeline::signal::listen(bus));
//! pipeline.run().await?;
//! ```

use crate::dispatch::Pipeline;
use crate::error::{PipelineError, Result};
use crate::events::EventBus;
use crate::lookup::{ChainLookup, LookupKey, NoLookup, TableLookup};
use crate::plugin::{Decoder, Filter, Input, Output, Plugin, PluginConfig, PluginContext};
use crate::registry::PluginWrapper;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// An ordered list of filter names plus the output set to deliver to.
///
/// Pure configuration; immutable for the life of the process.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct FilterChainSpec {
    /// Filter names, executed in order
    #[serde(default)]
    pub filters: Vec<String>,
    /// Output names the chain delivers to
    #[serde(default)]
    pub outputs: Vec<String>,
}

/// The immutable configuration shared by every pack and the dispatcher.
#[derive(Debug)]
pub struct SharedConfig {
    /// Number of packs in the pool
    pub pool_size: usize,
    /// Decoder applied to packs that don't name one
    pub default_decoder: String,
    /// Chain used when the lookup misses
    pub default_filter_chain: String,
    /// Chain-name to chain table
    pub filter_chains: HashMap<String, FilterChainSpec>,
}

/// Declarative description of a [`TableLookup`].
#[derive(Debug, Clone, Deserialize)]
pub struct LookupSpec {
    /// Message attribute the table keys on
    pub key: LookupKey,
    /// Attribute value to chain name
    #[serde(default)]
    pub table: HashMap<String, String>,
}

/// Deserializable topology settings.
///
/// Plugin registration stays in code (creators are not data); everything
/// name-shaped can come from configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineSettings {
    /// Pool size override
    pub pool_size: Option<usize>,
    /// Default decoder override
    pub default_decoder: Option<String>,
    /// Default chain override
    pub default_filter_chain: Option<String>,
    /// Chain table entries, merged over chains registered in code
    #[serde(default)]
    pub filter_chains: HashMap<String, FilterChainSpec>,
    /// Lookup description
    pub lookup: Option<LookupSpec>,
}

const DEFAULT_POOL_SIZE: usize = 100;
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Builder for a [`Pipeline`].
pub struct PipelineBuilder {
    pool_size: usize,
    default_decoder: String,
    default_filter_chain: String,
    read_timeout: Duration,
    filter_chains: HashMap<String, FilterChainSpec>,
    lookup: Box<dyn ChainLookup>,
    inputs: HashMap<String, PluginWrapper<dyn Input>>,
    decoders: HashMap<String, PluginWrapper<dyn Decoder>>,
    filters: HashMap<String, PluginWrapper<dyn Filter>>,
    outputs: HashMap<String, PluginWrapper<dyn Output>>,
}

impl PipelineBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            default_decoder: "json".to_string(),
            default_filter_chain: "default".to_string(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            filter_chains: HashMap::new(),
            lookup: Box::new(NoLookup),
            inputs: HashMap::new(),
            decoders: HashMap::new(),
            filters: HashMap::new(),
            outputs: HashMap::new(),
        }
    }

    /// Set the number of packs in the pool.
    ///
    /// This bounds memory and is the backpressure knob: when every pack
    /// is in flight, inputs block on the recycle channel.
    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Set the decoder applied to packs that don't name one.
    pub fn default_decoder(mut self, name: impl Into<String>) -> Self {
        self.default_decoder = name.into();
        self
    }

    /// Set the chain used when the lookup misses.
    pub fn default_filter_chain(mut self, name: impl Into<String>) -> Self {
        self.default_filter_chain = name.into();
        self
    }

    /// Set the timeout handed to input `read` calls.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Declare a filter chain.
    pub fn filter_chain<F, O>(mut self, name: impl Into<String>, filters: F, outputs: O) -> Self
    where
        F: IntoIterator,
        F::Item: Into<String>,
        O: IntoIterator,
        O::Item: Into<String>,
    {
        self.filter_chains.insert(
            name.into(),
            FilterChainSpec {
                filters: filters.into_iter().map(Into::into).collect(),
                outputs: outputs.into_iter().map(Into::into).collect(),
            },
        );
        self
    }

    /// Set the filter-chain lookup.
    pub fn lookup<L: ChainLookup + 'static>(mut self, lookup: L) -> Self {
        self.lookup = Box::new(lookup);
        self
    }

    /// Apply deserialized settings over the builder's current state.
    pub fn settings(mut self, settings: PipelineSettings) -> Self {
        if let Some(pool_size) = settings.pool_size {
            self.pool_size = pool_size;
        }
        if let Some(name) = settings.default_decoder {
            self.default_decoder = name;
        }
        if let Some(name) = settings.default_filter_chain {
            self.default_filter_chain = name;
        }
        self.filter_chains.extend(settings.filter_chains);
        if let Some(spec) = settings.lookup {
            self.lookup = Box::new(TableLookup::new(spec.key, spec.table));
        }
        self
    }

    /// Register an input under a name.
    pub fn input<F>(self, name: impl Into<String>, creator: F) -> Self
    where
        F: Fn() -> Box<dyn Input> + Send + Sync + 'static,
    {
        self.input_with(name, PluginConfig::Null, creator)
    }

    /// Register an input with a configuration block.
    pub fn input_with<F>(mut self, name: impl Into<String>, config: PluginConfig, creator: F) -> Self
    where
        F: Fn() -> Box<dyn Input> + Send + Sync + 'static,
    {
        let name = name.into();
        self.inputs
            .insert(name.clone(), PluginWrapper::new(name, config, creator));
        self
    }

    /// Register a decoder under a name.
    pub fn decoder<F>(self, name: impl Into<String>, creator: F) -> Self
    where
        F: Fn() -> Box<dyn Decoder> + Send + Sync + 'static,
    {
        self.decoder_with(name, PluginConfig::Null, creator)
    }

    /// Register a decoder with a configuration block.
    pub fn decoder_with<F>(
        mut self,
        name: impl Into<String>,
        config: PluginConfig,
        creator: F,
    ) -> Self
    where
        F: Fn() -> Box<dyn Decoder> + Send + Sync + 'static,
    {
        let name = name.into();
        self.decoders
            .insert(name.clone(), PluginWrapper::new(name, config, creator));
        self
    }

    /// Register a filter under a name.
    pub fn filter<F>(self, name: impl Into<String>, creator: F) -> Self
    where
        F: Fn() -> Box<dyn Filter> + Send + Sync + 'static,
    {
        self.filter_with(name, PluginConfig::Null, creator)
    }

    /// Register a filter with a configuration block.
    pub fn filter_with<F>(mut self, name: impl Into<String>, config: PluginConfig, creator: F) -> Self
    where
        F: Fn() -> Box<dyn Filter> + Send + Sync + 'static,
    {
        let name = name.into();
        self.filters
            .insert(name.clone(), PluginWrapper::new(name, config, creator));
        self
    }

    /// Register an output under a name.
    pub fn output<F>(self, name: impl Into<String>, creator: F) -> Self
    where
        F: Fn() -> Box<dyn Output> + Send + Sync + 'static,
    {
        self.output_with(name, PluginConfig::Null, creator)
    }

    /// Register an output with a configuration block.
    pub fn output_with<F>(mut self, name: impl Into<String>, config: PluginConfig, creator: F) -> Self
    where
        F: Fn() -> Box<dyn Output> + Send + Sync + 'static,
    {
        let name = name.into();
        self.outputs
            .insert(name.clone(), PluginWrapper::new(name, config, creator));
        self
    }

    /// Validate the topology and construct every plugin singleton.
    ///
    /// Must run inside a tokio runtime: plugins with worker loops (the
    /// runner adapter, the counter output) spawn them during `init_once`.
    pub fn build(self) -> Result<Pipeline> {
        if self.pool_size == 0 {
            return Err(PipelineError::Config(
                "pool_size must be positive".to_string(),
            ));
        }
        if !self.filter_chains.contains_key(&self.default_filter_chain) {
            return Err(PipelineError::Config(format!(
                "default filter chain {:?} is not declared",
                self.default_filter_chain
            )));
        }
        for (chain_name, chain) in &self.filter_chains {
            for filter in &chain.filters {
                if !self.filters.contains_key(filter) {
                    return Err(PipelineError::UnknownName {
                        kind: "filter",
                        name: format!("{filter} (chain {chain_name})"),
                    });
                }
            }
            for output in &chain.outputs {
                if !self.outputs.contains_key(output) {
                    return Err(PipelineError::UnknownName {
                        kind: "output",
                        name: format!("{output} (chain {chain_name})"),
                    });
                }
            }
        }

        let shared = Arc::new(SharedConfig {
            pool_size: self.pool_size,
            default_decoder: self.default_decoder,
            default_filter_chain: self.default_filter_chain,
            filter_chains: self.filter_chains,
        });
        let bus = Arc::new(EventBus::new());
        let ctx = PluginContext {
            pool_size: shared.pool_size,
            bus: bus.clone(),
        };

        let decoders = build_plugins(self.decoders, &ctx, &bus)?;
        let filters = build_plugins(self.filters, &ctx, &bus)?;
        let outputs = build_plugins(self.outputs, &ctx, &bus)?;
        let inputs = build_plugins(self.inputs, &ctx, &bus)?;

        Ok(Pipeline::new(
            shared,
            self.lookup,
            bus,
            self.read_timeout,
            decoders,
            filters,
            outputs,
            inputs,
        ))
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn build_plugins<P: Plugin + ?Sized>(
    wrappers: HashMap<String, PluginWrapper<P>>,
    ctx: &PluginContext,
    bus: &EventBus,
) -> Result<HashMap<String, Arc<P>>> {
    let mut built = HashMap::with_capacity(wrappers.len());
    for (name, wrapper) in wrappers {
        let (plugin, global) = wrapper
            .create_with_error(ctx)
            .map_err(|source| PipelineError::Plugin {
                name: name.clone(),
                source,
            })?;
        if let Some(global) = global {
            bus.register_global(name.as_str(), global);
        }
        built.insert(name, Arc::from(plugin));
    }
    Ok(built)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::pack::Pack;
    use async_trait::async_trait;
    use virta_core::PluginError;

    struct NullOutput;
    impl Plugin for NullOutput {}
    #[async_trait]
    impl Output for NullOutput {
        async fn deliver(&self, _pack: &Pack) {}
    }

    struct NullFilter;
    impl Plugin for NullFilter {}
    #[async_trait]
    impl Filter for NullFilter {
        async fn filter_msg(&self, _pack: &mut Pack) {}
    }

    #[tokio::test]
    async fn build_validates_pool_size() {
        let err = PipelineBuilder::new()
            .pool_size(0)
            .filter_chain("default", [] as [&str; 0], [] as [&str; 0])
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[tokio::test]
    async fn build_requires_the_default_chain() {
        let err = PipelineBuilder::new().build().unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[tokio::test]
    async fn build_rejects_unknown_chain_filter() {
        let err = PipelineBuilder::new()
            .filter_chain("default", ["ghost"], [] as [&str; 0])
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::UnknownName { kind: "filter", .. }
        ));
    }

    #[tokio::test]
    async fn build_rejects_unknown_chain_output() {
        let err = PipelineBuilder::new()
            .filter_chain("default", [] as [&str; 0], ["ghost"])
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::UnknownName { kind: "output", .. }
        ));
    }

    #[tokio::test]
    async fn build_accepts_a_wired_topology() {
        let pipeline = PipelineBuilder::new()
            .pool_size(2)
            .filter("noop", || Box::new(NullFilter))
            .output("sink", || Box::new(NullOutput))
            .filter_chain("default", ["noop"], ["sink"])
            .build()
            .unwrap();
        assert_eq!(pipeline.config().pool_size, 2);
    }

    #[tokio::test]
    async fn failed_plugin_construction_is_fatal() {
        struct FailingOutput;
        impl Plugin for FailingOutput {
            fn init(&mut self, _config: &PluginConfig) -> std::result::Result<(), PluginError> {
                Err(PluginError::Init("no destination".to_string()))
            }
        }
        #[async_trait]
        impl Output for FailingOutput {
            async fn deliver(&self, _pack: &Pack) {}
        }

        let err = PipelineBuilder::new()
            .output("broken", || Box::new(FailingOutput))
            .filter_chain("default", [] as [&str; 0], ["broken"])
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::Plugin { .. }));
    }

    #[test]
    fn settings_deserialize_and_apply() {
        let settings: PipelineSettings = serde_json::from_str(
            r#"{
                "pool_size": 8,
                "default_filter_chain": "metrics",
                "filter_chains": {
                    "metrics": {"filters": [], "outputs": []}
                },
                "lookup": {"key": "type", "table": {"counter": "metrics"}}
            }"#,
        )
        .unwrap();

        let builder = PipelineBuilder::new().settings(settings);
        assert_eq!(builder.pool_size, 8);
        assert_eq!(builder.default_filter_chain, "metrics");
        assert!(builder.filter_chains.contains_key("metrics"));
    }
}
