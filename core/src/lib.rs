//! virta-core - Core types for the virta pipeline daemon
//!
//! This crate provides the foundational types shared between the virta
//! pipeline and its plugins (inputs, decoders, filters, outputs):
//!
//! - [`Message`] - the structured event record flowing through the pipeline
//! - [`Field`] - a named, typed, multi-valued message attribute
//! - [`json`] - the reference JSON codec for messages
//! - [`PluginError`] - error type for plugin operations
//!
//! # Why this crate exists
//!
//! Plugins need to construct and inspect messages without depending on the
//! pipeline runtime, and the runtime needs the same types to move messages
//! between stages. Keeping the data model here breaks the cycle:
//!
//! ```text
//! virta-core ◄── virta-pipeline
//!     ▲
//!     └────────── out-of-tree plugins
//! ```

#![deny(unsafe_code)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::panic)]
#![warn(missing_docs)]

mod error;
/// The reference JSON codec
pub mod json;
/// The structured message record and its typed fields
pub mod message;

pub use error::PluginError;
pub use json::CodecError;
pub use message::{
    Field, FieldError, FieldValue, Message, ValueFormat, ValueType, MAX_HEADER_SIZE,
    MAX_MESSAGE_SIZE,
};
