//! Shared type definitions for the berth workspace.
//!
//! - `inventory`: the YAML inventory model (targets, provider settings, defaults)
//! - `report`: step and host outcomes produced by the provisioning and configuration phases
//!
//! The provider-neutral DNS record shape lives at the crate root.

pub mod inventory;
pub mod report;

pub use inventory::{
    DEFAULT_DOKKU_GIT_REPO, DigitalOceanSettings, DnsProviderKind, Inventory, InventoryDefaults, Route53Settings,
    ServerProviderKind, TargetDescriptor,
};
pub use report::{HostReport, PhaseStatus, StepResult, StepStatus, TargetReport};

use serde::{Deserialize, Serialize};

/// Record types berth knows how to register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    A,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
        }
    }
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single DNS record set as seen by berth.
///
/// Names are stored without the trailing root dot and with wildcard labels
/// spelled as `*`, regardless of how the provider encodes them on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    pub name: String,
    pub record_type: RecordType,
    pub values: Vec<String>,
    pub ttl: u32,
}

impl DnsRecord {
    /// Build a single-valued record.
    pub fn new(name: impl Into<String>, record_type: RecordType, value: impl Into<String>, ttl: u32) -> Self {
        Self {
            name: name.into(),
            record_type,
            values: vec![value.into()],
            ttl,
        }
    }
}

/// Normalize a DNS name for comparisons: lowercase, no trailing dot, `\052` decoded to `*`.
pub fn normalize_dns_name(name: &str) -> String {
    name.trim().trim_end_matches('.').replace("\\052", "*").to_ascii_lowercase()
}
