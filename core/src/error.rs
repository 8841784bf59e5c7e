//! Error types for virta plugins

use thiserror::Error;

/// Error type for plugin operations
///
/// This is the standard error type returned by all virta plugins: inputs,
/// decoders, filters, outputs, and the writer plugins driven by the runner
/// adapter. It provides structured error categories that map onto the fault
/// surfaces of the pipeline.
///
/// # Example
///
/// ```
/// use virta_core::PluginError;
///
/// fn parse_frame(data: &[u8]) -> Result<(), PluginError> {
///     if data.is_empty() {
///         return Err(PluginError::Decode("empty frame".to_string()));
///     }
///     Ok(())
/// }
///
/// assert!(parse_frame(b"").is_err());
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    /// Initialization failed
    ///
    /// Returned when a plugin fails to initialize during startup.
    /// Startup errors are the only errors that terminate the process.
    #[error("initialization failed: {0}")]
    Init(String),

    /// Plugin configuration was rejected
    #[error("configuration error: {0}")]
    Config(String),

    /// A decoder could not parse the pack's raw bytes
    ///
    /// Non-fatal: the pack is recycled and processing continues.
    #[error("decode failed: {0}")]
    Decode(String),

    /// An input's read timed out without producing data
    ///
    /// Non-fatal by contract: the input runner recycles the pack and
    /// claims another.
    #[error("no data available")]
    NoData,

    /// An input failed to read external data into the pack
    #[error("read failed: {0}")]
    Read(String),

    /// A writer failed to emit a prepared scratch buffer
    #[error("write failed: {0}")]
    Write(String),

    /// A batch writer failed to commit its accumulated batch
    #[error("commit failed: {0}")]
    Commit(String),

    /// A plugin call panicked and was trapped by the pipeline
    ///
    /// The payload is the stringified panic message. The pipeline never
    /// terminates because a plugin faulted; the panic surfaces as this
    /// error instead.
    #[error("plugin panicked: {0}")]
    Panicked(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats() {
        assert_eq!(
            PluginError::Init("bad address".to_string()).to_string(),
            "initialization failed: bad address"
        );
        assert_eq!(
            PluginError::Decode("truncated".to_string()).to_string(),
            "decode failed: truncated"
        );
        assert_eq!(PluginError::NoData.to_string(), "no data available");
        assert_eq!(
            PluginError::Panicked("index out of bounds".to_string()).to_string(),
            "plugin panicked: index out of bounds"
        );
    }

    #[test]
    fn is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<PluginError>();
    }
}
