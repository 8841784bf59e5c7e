//! virta-pipeline - Staged message pipeline runtime
//!
//! A fixed pool of reusable [`Pack`] buffers flows through a topology of
//! named stages connected by bounded channels:
//!
//! ```text
//! inputs ──► [data] ──► decode ──► filter chain ──► fan-out ──► outputs
//!    ▲                                                             │
//!    └────────────────────── [recycle] ◄──────────────────────────-┘
//! ```
//!
//! Inputs claim packs from the recycle channel before reading, which
//! couples the input rate to downstream progress; there is no unbounded
//! queue anywhere. Every call into plugin code is panic-trapped, so a
//! buggy plugin can never crash the pipeline. A process-wide event bus
//! broadcasts `Reload` and `Stop`, mapped from SIGHUP and SIGINT by the
//! [`signal`] module.
//!
//! # Example
//!
//! ```ignore
//! use virta_pipeline::{JsonDecoder, LogOutput, PipelineBuilder};
//!
//! #[tokio::main]
//! async fn main() -> virta_pipeline::Result<()> {
//!     let pipeline = PipelineBuilder::new()
//!         .pool_size(64)
//!         .decoder("json", || Box::new(JsonDecoder::new()))
//!         .output("log", || Box::new(LogOutput::new()))
//!         .filter_chain("default", [] as [&str; 0], ["log"])
//!         .build()?;
//!
//!     virta_pipeline::signal::spawn(pipeline.bus());
//!     pipeline.run().await?;
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]

pub mod config;
pub mod decoders;
pub mod dispatch;
mod error;
pub mod events;
pub mod lookup;
pub mod outputs;
pub mod pack;
pub mod plugin;
pub mod registry;
pub mod runner;
mod safecall;
pub mod signal;

pub use config::{
    FilterChainSpec, LookupSpec, PipelineBuilder, PipelineSettings, SharedConfig,
};
pub use decoders::JsonDecoder;
pub use dispatch::{Pipeline, ShutdownReport};
pub use error::{PipelineError, Result};
pub use events::{EventBus, PipelineEvent};
pub use lookup::{ChainLookup, LookupKey, NoLookup, TableLookup};
pub use outputs::{CounterOutput, DebugOutput, LogOutput};
pub use pack::{Pack, SharedPack, PACK_BUFFER_SIZE};
pub use plugin::{
    Decoder, Filter, Input, Output, Plugin, PluginConfig, PluginContext, PluginGlobal,
};
pub use registry::PluginWrapper;
pub use runner::{BatchRunner, BatchWriter, DataRecycler, Runner, RunnerGlobal, Writer};

// Re-export the core data model so plugin crates only need one dependency.
pub use virta_core::{
    CodecError, Field, FieldError, FieldValue, Message, PluginError, ValueFormat, ValueType,
};
