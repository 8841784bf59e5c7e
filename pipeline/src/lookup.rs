//! Filter-chain lookup
//!
//! The dispatcher asks the configured lookup for a chain name keyed off
//! the message's attributes. When the lookup misses, the pack keeps the
//! chain it is already assigned to (initially the configured default).

use serde::Deserialize;
use std::collections::HashMap;
use virta_core::Message;

/// Maps a message to the name of the filter chain that should process it.
///
/// Implementations must be pure and non-blocking.
pub trait ChainLookup: Send + Sync {
    /// Locate the chain for this message; `None` keeps the pack's
    /// currently-assigned chain.
    fn locate_chain(&self, msg: &Message) -> Option<&str>;
}

/// Lookup that never matches; every pack keeps its default chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLookup;

impl ChainLookup for NoLookup {
    fn locate_chain(&self, _msg: &Message) -> Option<&str> {
        None
    }
}

/// The message attribute a [`TableLookup`] keys on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupKey {
    /// Key on the message type tag
    Type,
    /// Key on the logger name
    Logger,
}

/// Table-driven lookup from a message attribute to a chain name.
#[derive(Debug, Clone)]
pub struct TableLookup {
    key: LookupKey,
    table: HashMap<String, String>,
}

impl TableLookup {
    /// Create a lookup over the given attribute and table.
    pub fn new(key: LookupKey, table: HashMap<String, String>) -> Self {
        Self { key, table }
    }

    /// Lookup keyed on the message type.
    pub fn by_type(table: HashMap<String, String>) -> Self {
        Self::new(LookupKey::Type, table)
    }

    /// Lookup keyed on the logger name.
    pub fn by_logger(table: HashMap<String, String>) -> Self {
        Self::new(LookupKey::Logger, table)
    }
}

impl ChainLookup for TableLookup {
    fn locate_chain(&self, msg: &Message) -> Option<&str> {
        let key = match self.key {
            LookupKey::Type => msg.message_type(),
            LookupKey::Logger => msg.logger(),
        }?;
        self.table.get(key).map(String::as_str)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn typed_message(message_type: &str) -> Message {
        let mut msg = Message::default();
        msg.set_message_type(message_type);
        msg
    }

    #[test]
    fn no_lookup_never_matches() {
        assert_eq!(NoLookup.locate_chain(&typed_message("x")), None);
    }

    #[test]
    fn table_lookup_by_type() {
        let lookup = TableLookup::by_type(HashMap::from([
            ("counter".to_string(), "metrics".to_string()),
            ("oops".to_string(), "errors".to_string()),
        ]));

        assert_eq!(lookup.locate_chain(&typed_message("counter")), Some("metrics"));
        assert_eq!(lookup.locate_chain(&typed_message("oops")), Some("errors"));
        assert_eq!(lookup.locate_chain(&typed_message("other")), None);
        assert_eq!(lookup.locate_chain(&Message::default()), None);
    }

    #[test]
    fn table_lookup_by_logger() {
        let lookup = TableLookup::by_logger(HashMap::from([(
            "auth".to_string(),
            "security".to_string(),
        )]));

        let mut msg = Message::default();
        msg.set_logger("auth");
        msg.set_message_type("ignored");

        assert_eq!(lookup.locate_chain(&msg), Some("security"));
        assert_eq!(lookup.locate_chain(&typed_message("auth")), None);
    }
}
