//! Plugin model for virta
//!
//! A plugin is any value implementing one of the four stage roles. All
//! roles share the base [`Plugin`] capabilities:
//!
//! - `config_struct` supplies a default configuration value the user's
//!   configuration block is merged onto before `init` runs.
//! - `init_once` runs once per configured name and may produce a shared
//!   [`PluginGlobal`] that receives reload/stop events.
//! - `init` completes per-instance initialization.
//!
//! Every call from the pipeline into plugin code is panic-wrapped; a
//! buggy plugin surfaces as an error (at startup) or a logged drop (at
//! runtime), never as a crashed pipeline.
//!
//! # Stage roles
//!
//! ```text
//! inputs ──► decode ──► filter chain ──► fan-out ──► outputs
//! ```
//!
//! An [`Input`] claims a recycled pack and reads external data into it. A
//! [`Decoder`] parses the pack's raw bytes into its message. A [`Filter`]
//! inspects and mutates the message, and may block the pack or rewrite
//! its output set. An [`Output`] delivers the finished message.

use crate::events::{EventBus, PipelineEvent};
use crate::pack::Pack;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use virta_core::PluginError;

/// Plugin-specific configuration block.
///
/// The loader merges the user's block onto the plugin's
/// [`config_struct`](Plugin::config_struct) defaults before `init` runs.
pub type PluginConfig = serde_json::Value;

/// Startup context threaded to [`Plugin::init_once`].
///
/// Carries the pool size (for sizing per-plugin channel pools) and the
/// event bus (for worker loops that need their own stop subscription).
/// Explicit, constructed once at startup: there are no hidden process
/// globals.
#[derive(Clone)]
pub struct PluginContext {
    /// Number of packs in the pipeline pool
    pub pool_size: usize,
    /// The pipeline's reload/stop event bus
    pub bus: Arc<EventBus>,
}

/// Shared per-plugin-kind state produced by [`Plugin::init_once`].
///
/// Globals are registered on the event bus and receive every broadcast
/// `Reload`/`Stop` under the panic trap.
pub trait PluginGlobal: Send + Sync {
    /// Handle a pipeline event. The default implementation ignores it.
    fn event(&self, _event: PipelineEvent) {}
}

impl std::fmt::Debug for dyn PluginGlobal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PluginGlobal")
    }
}

/// Base capabilities shared by every stage role.
pub trait Plugin: Send + Sync {
    /// Default configuration value the user's block is merged onto.
    fn config_struct(&self) -> Option<PluginConfig> {
        None
    }

    /// One-time initialization for the plugin's configured name.
    ///
    /// Returning a [`PluginGlobal`] registers it for event broadcast.
    fn init_once(
        &mut self,
        _config: &PluginConfig,
        _ctx: &PluginContext,
    ) -> Result<Option<Arc<dyn PluginGlobal>>, PluginError> {
        Ok(None)
    }

    /// Per-instance initialization with the merged configuration.
    fn init(&mut self, _config: &PluginConfig) -> Result<(), PluginError> {
        Ok(())
    }
}

/// An input produces packs by reading external data.
///
/// The input runner claims a pack from the recycle channel *before*
/// calling `read`, which couples the input rate to downstream progress.
#[async_trait]
pub trait Input: Plugin {
    /// Read external data into the pack.
    ///
    /// `timeout` bounds how long the input may wait for data; expiry must
    /// surface as [`PluginError::NoData`], which the runner treats as a
    /// normal poll miss rather than a fault.
    async fn read(&self, pack: &mut Pack, timeout: Option<Duration>) -> Result<(), PluginError>;
}

/// A decoder parses a pack's raw bytes into its message.
pub trait Decoder: Plugin {
    /// Populate `pack.message` from `pack.msg_bytes`.
    fn decode(&self, pack: &mut Pack) -> Result<(), PluginError>;
}

/// A filter transforms a pack between decode and fan-out.
///
/// Filters run sequentially in chain order. Setting `pack.blocked` aborts
/// the chain and recycles the pack; mutating `pack.output_names` rewrites
/// the fan-out set.
#[async_trait]
pub trait Filter: Plugin {
    /// Inspect and possibly mutate the pack.
    async fn filter_msg(&self, pack: &mut Pack);
}

/// An output delivers a finished message to a destination.
///
/// The output runner recycles the pack after `deliver` returns; outputs
/// that hand work to a background writer (see the runner adapter) copy
/// what they need into a scratch buffer first.
#[async_trait]
pub trait Output: Plugin {
    /// Deliver the pack's message.
    async fn deliver(&self, pack: &Pack);
}
