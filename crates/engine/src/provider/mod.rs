//! Provider seams for phase one.
//!
//! Modules:
//! - `digital_ocean`: [`ComputeProvider`] backed by the DigitalOcean v2 API
//! - `route53`: [`DnsProvider`] backed by Route 53
//!
//! A target's providers are chosen once, when the inventory is loaded, and
//! carried as the [`Provisioner`] and [`DnsRegistrar`] variants.

mod digital_ocean;
mod route53;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use berth_api::ApiError;
use berth_types::{DigitalOceanSettings, DnsRecord, RecordType};

pub use digital_ocean::DigitalOceanCompute;
pub use route53::Route53Dns;

/// Parameters for [`ComputeProvider::create_or_get_server`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRequest {
    /// Unique server name; an existing server with this name is reused.
    pub name: String,
    pub key_ids: Vec<u64>,
    pub region: String,
    pub image: String,
    pub size: String,
    pub private_networking: bool,
    pub backups: bool,
}

impl ServerRequest {
    pub fn from_settings(name: &str, key_ids: Vec<u64>, settings: &DigitalOceanSettings) -> Self {
        Self {
            name: name.to_string(),
            key_ids,
            region: settings.region.clone(),
            image: settings.image.clone(),
            size: settings.size.clone(),
            private_networking: settings.private_networking,
            backups: settings.backups_enabled,
        }
    }
}

/// A server that exists and is reachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHandle {
    pub ip_address: String,
    /// True when this call created the server.
    pub changed: bool,
}

/// Creates compute resources.
#[async_trait]
pub trait ComputeProvider: Send + Sync {
    /// Register a public key with the provider and return its id. Reuses an
    /// existing key with the same material or name.
    async fn upload_key(&self, name: &str, public_key: &str) -> Result<u64, ApiError>;

    /// Return the server named `request.name`, creating it when absent.
    async fn create_or_get_server(&self, request: &ServerRequest) -> Result<ServerHandle, ApiError>;
}

/// Reads and writes DNS records.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    async fn get_records(&self, zone: &str, name: &str, record_type: RecordType) -> Result<Vec<DnsRecord>, ApiError>;

    async fn create_record(&self, zone: &str, record: &DnsRecord, overwrite: bool) -> Result<(), ApiError>;
}

/// Compute strategy for a target.
#[derive(Clone, Default)]
pub enum Provisioner {
    /// The target already exists; its name is its address.
    #[default]
    None,
    DigitalOcean {
        provider: Arc<dyn ComputeProvider>,
        settings: DigitalOceanSettings,
    },
}

impl Provisioner {
    pub fn label(&self) -> &'static str {
        match self {
            Provisioner::None => "none",
            Provisioner::DigitalOcean { .. } => "digital_ocean",
        }
    }
}

impl fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provisioner::None => f.write_str("Provisioner::None"),
            Provisioner::DigitalOcean { settings, .. } => f
                .debug_struct("Provisioner::DigitalOcean")
                .field("region", &settings.region)
                .field("image", &settings.image)
                .field("size", &settings.size)
                .finish(),
        }
    }
}

/// DNS strategy for a target.
#[derive(Clone, Default)]
pub enum DnsRegistrar {
    #[default]
    None,
    Route53 { provider: Arc<dyn DnsProvider> },
}

impl DnsRegistrar {
    pub fn label(&self) -> &'static str {
        match self {
            DnsRegistrar::None => "none",
            DnsRegistrar::Route53 { .. } => "route53",
        }
    }
}

impl fmt::Debug for DnsRegistrar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DnsRegistrar::None => f.write_str("DnsRegistrar::None"),
            DnsRegistrar::Route53 { .. } => f.write_str("DnsRegistrar::Route53"),
        }
    }
}
