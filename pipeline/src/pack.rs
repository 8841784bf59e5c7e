//! The Pack carrier and its lifecycle
//!
//! A Pack is the unit that moves through the pipeline: a message plus the
//! routing state the dispatcher needs, plus a reusable scratch buffer for
//! the raw bytes an input read. The pool owns every Pack; at any instant a
//! Pack is referenced by exactly one of the recycle channel, the data
//! channel, a stage invocation, or an output's ingress channel.

use crate::config::SharedConfig;
use std::collections::HashSet;
use std::sync::Arc;
use virta_core::{Message, MAX_HEADER_SIZE, MAX_MESSAGE_SIZE};

/// Bytes reserved in every Pack scratch buffer: the record separator plus
/// the largest framed header and message.
pub const PACK_BUFFER_SIZE: usize = 3 + MAX_HEADER_SIZE + MAX_MESSAGE_SIZE;

/// A Pack fanned out to one or more outputs. The last output to finish
/// delivery reclaims the inner Pack and recycles it.
pub type SharedPack = Arc<Pack>;

/// The mutable carrier flowing through the pipeline.
///
/// Fields are public in the spirit of the carrier being plain state owned
/// by whichever stage currently holds it. Inputs that read raw bytes into
/// `msg_bytes` must truncate it to the bytes actually read; `zero()`
/// restores the full capacity for the next reader.
#[derive(Debug)]
pub struct Pack {
    /// Scratch buffer for raw input bytes, decoded by the decode stage
    pub msg_bytes: Vec<u8>,
    /// The structured message, populated once `decoded` is true
    pub message: Message,
    /// Shared, read-only pipeline configuration
    pub config: Arc<SharedConfig>,
    /// Name of the decoder to apply to `msg_bytes`
    pub decoder: String,
    /// Whether `message` has been populated from the raw bytes
    pub decoded: bool,
    /// Set by a filter (or the panic trap around one) to drop the pack
    pub blocked: bool,
    /// Name of the filter chain to run
    pub filter_chain: String,
    /// Number of filter chains this pack has entered since it left the pool
    pub chain_count: u32,
    /// Output names the current message is destined for
    pub output_names: HashSet<String>,
}

impl Pack {
    /// Create a zeroed Pack bound to the shared configuration.
    pub fn new(config: Arc<SharedConfig>) -> Self {
        Self {
            msg_bytes: vec![0; PACK_BUFFER_SIZE],
            message: Message::default(),
            decoder: config.default_decoder.clone(),
            decoded: false,
            blocked: false,
            filter_chain: config.default_filter_chain.clone(),
            chain_count: 0,
            output_names: HashSet::new(),
            config,
        }
    }

    /// Reset routing state before the Pack returns to the recycle channel.
    ///
    /// The scratch buffer is extended back to its full capacity, the
    /// decoder and filter chain fall back to the configured defaults, and
    /// the output-name set is emptied in place.
    pub fn zero(&mut self) {
        let capacity = self.msg_bytes.capacity();
        self.msg_bytes.resize(capacity, 0);
        self.decoder.clone_from(&self.config.default_decoder);
        self.decoded = false;
        self.blocked = false;
        self.filter_chain.clone_from(&self.config.default_filter_chain);
        self.chain_count = 0;
        self.output_names.clear();
    }

    /// Whether the Pack is in the state `zero()` leaves it in.
    pub fn is_zeroed(&self) -> bool {
        self.msg_bytes.len() == self.msg_bytes.capacity()
            && !self.decoded
            && !self.blocked
            && self.chain_count == 0
            && self.output_names.is_empty()
            && self.decoder == self.config.default_decoder
            && self.filter_chain == self.config.default_filter_chain
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::FilterChainSpec;
    use std::collections::HashMap;

    fn test_config() -> Arc<SharedConfig> {
        Arc::new(SharedConfig {
            pool_size: 4,
            default_decoder: "json".to_string(),
            default_filter_chain: "default".to_string(),
            filter_chains: HashMap::from([(
                "default".to_string(),
                FilterChainSpec {
                    filters: vec![],
                    outputs: vec![],
                },
            )]),
        })
    }

    #[test]
    fn new_pack_is_zeroed() {
        let pack = Pack::new(test_config());
        assert!(pack.is_zeroed());
        assert_eq!(pack.msg_bytes.len(), PACK_BUFFER_SIZE);
        assert_eq!(pack.decoder, "json");
        assert_eq!(pack.filter_chain, "default");
    }

    #[test]
    fn zero_resets_routing_state() {
        let mut pack = Pack::new(test_config());

        pack.msg_bytes.truncate(16);
        pack.decoder = "protobuf".to_string();
        pack.decoded = true;
        pack.blocked = true;
        pack.filter_chain = "errors".to_string();
        pack.chain_count = 3;
        pack.output_names.insert("log".to_string());
        assert!(!pack.is_zeroed());

        pack.zero();

        assert!(pack.is_zeroed());
        assert_eq!(pack.msg_bytes.len(), pack.msg_bytes.capacity());
        assert_eq!(pack.decoder, "json");
        assert_eq!(pack.filter_chain, "default");
        assert!(pack.output_names.is_empty());
    }
}
