//! Values computed while provisioning a target, keyed by the address the
//! configuration phase will connect to.

use std::collections::HashMap;

use serde::Serialize;

/// What phase one learned about a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandoffEntry {
    pub source_repo: Option<String>,
    pub version_pin: Option<String>,
    pub resolved_address: String,
}

/// Address-keyed table written by provisioning and read by configuration.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HandoffTable {
    entries: HashMap<String, HandoffEntry>,
}

impl HandoffTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entry under its resolved address, replacing any previous one.
    pub fn record(&mut self, entry: HandoffEntry) {
        self.entries.insert(entry.resolved_address.clone(), entry);
    }

    pub fn get(&self, address: &str) -> Option<&HandoffEntry> {
        self.entries.get(address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_are_keyed_by_address() {
        let mut table = HandoffTable::new();
        table.record(HandoffEntry {
            source_repo: Some("https://github.com/dokku/dokku.git".into()),
            version_pin: Some("v0.4.0".into()),
            resolved_address: "203.0.113.5".into(),
        });
        assert_eq!(table.get("203.0.113.5").and_then(|e| e.version_pin.as_deref()), Some("v0.4.0"));
        assert!(table.get("203.0.113.50").is_none());
    }

    #[test]
    fn later_entry_replaces_earlier() {
        let mut table = HandoffTable::new();
        for pin in ["v0.3.0", "v0.4.0"] {
            table.record(HandoffEntry {
                source_repo: None,
                version_pin: Some(pin.into()),
                resolved_address: "203.0.113.5".into(),
            });
        }
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("203.0.113.5").and_then(|e| e.version_pin.as_deref()), Some("v0.4.0"));
    }
}
