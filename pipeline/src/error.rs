//! Error types for the pipeline runtime

use thiserror::Error;
use virta_core::PluginError;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that abort pipeline startup.
///
/// Runtime faults (decode failures, plugin panics, writer errors) are
/// recovered locally and logged; only the errors below terminate the
/// process, and only during startup.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The topology configuration was rejected
    #[error("configuration error: {0}")]
    Config(String),

    /// A named plugin failed to construct or initialize
    #[error("plugin '{name}' failed to start: {source}")]
    Plugin {
        /// The plugin's configured name
        name: String,
        /// The underlying initialization failure
        #[source]
        source: PluginError,
    },

    /// The configuration referenced a name that was never registered
    #[error("unknown {kind} referenced: {name}")]
    UnknownName {
        /// Role of the missing plugin ("filter", "output", ...)
        kind: &'static str,
        /// The unresolved name
        name: String,
    },

    /// A pipeline channel closed while the pipeline was starting
    #[error("pipeline channel closed")]
    ChannelClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plugin_error_carries_name_and_source() {
        let err = PipelineError::Plugin {
            name: "udp".to_string(),
            source: PluginError::Init("port in use".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "plugin 'udp' failed to start: initialization failed: port in use"
        );
    }

    #[test]
    fn unknown_name_names_the_role() {
        let err = PipelineError::UnknownName {
            kind: "output",
            name: "missing".to_string(),
        };
        assert_eq!(err.to_string(), "unknown output referenced: missing");
    }
}
