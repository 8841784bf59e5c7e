//! Built-in decoders

use crate::pack::Pack;
use crate::plugin::{Decoder, Plugin};
use virta_core::{json, PluginError};

/// Decoder for the reference JSON representation.
///
/// Parses the pack's scratch bytes with [`virta_core::json::decode`] and
/// replaces the pack's message. Inputs feeding this decoder must truncate
/// `msg_bytes` to the bytes actually read.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDecoder;

impl JsonDecoder {
    /// Create a JSON decoder.
    pub fn new() -> Self {
        Self
    }
}

impl Plugin for JsonDecoder {}

impl Decoder for JsonDecoder {
    fn decode(&self, pack: &mut Pack) -> Result<(), PluginError> {
        let message =
            json::decode(&pack.msg_bytes).map_err(|e| PluginError::Decode(e.to_string()))?;
        pack.message = message;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::{FilterChainSpec, SharedConfig};
    use std::collections::HashMap;
    use std::sync::Arc;

    fn test_pack() -> Pack {
        Pack::new(Arc::new(SharedConfig {
            pool_size: 1,
            default_decoder: "json".to_string(),
            default_filter_chain: "default".to_string(),
            filter_chains: HashMap::from([("default".to_string(), FilterChainSpec::default())]),
        }))
    }

    #[test]
    fn decodes_scratch_bytes_into_the_message() {
        let mut pack = test_pack();
        let raw = br#"{"type": "counter", "payload": "3", "severity": 6, "fields": {}}"#;
        pack.msg_bytes.clear();
        pack.msg_bytes.extend_from_slice(raw);

        JsonDecoder::new().decode(&mut pack).unwrap();

        assert_eq!(pack.message.message_type(), Some("counter"));
        assert_eq!(pack.message.payload(), Some("3"));
        assert_eq!(pack.message.severity(), Some(6));
    }

    #[test]
    fn invalid_bytes_are_a_decode_error() {
        let mut pack = test_pack();
        pack.msg_bytes.clear();
        pack.msg_bytes.extend_from_slice(b"junk");

        let err = JsonDecoder::new().decode(&mut pack).unwrap_err();
        assert!(matches!(err, PluginError::Decode(_)));
    }
}
