//! Inventory model: the per-target descriptors berth provisions and configures.
//!
//! Targets preserve authoring order (via `IndexMap`) so runs and plan previews
//! process hosts in the order they appear in the file.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Upstream Dokku repository used when neither the target nor the defaults name one.
pub const DEFAULT_DOKKU_GIT_REPO: &str = "https://github.com/dokku/dokku.git";

const DEFAULT_AUTHORIZED_KEYS_DIR: &str = "~/.ssh/berth.d";
const DEFAULT_KNOWN_HOSTS: &str = "~/.ssh/known_hosts";
const DEFAULT_SSH_USER: &str = "root";
const DEFAULT_SSH_PORT: u16 = 22;

/// Root document of an inventory file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Inventory {
    /// Settings shared by every target.
    #[serde(default)]
    pub defaults: InventoryDefaults,
    /// Target descriptors keyed by target name.
    #[serde(default)]
    pub targets: IndexMap<String, TargetDescriptor>,
}

impl Inventory {
    /// Returns descriptors with their `name` populated from the map key and
    /// inventory-wide defaults applied where the target leaves a value unset.
    pub fn resolved_targets(&self) -> Vec<TargetDescriptor> {
        self.targets
            .iter()
            .map(|(name, descriptor)| {
                let mut resolved = descriptor.clone();
                resolved.name = name.clone();
                if resolved.dokku_git_repo.is_none() {
                    resolved.dokku_git_repo = self.defaults.dokku_git_repo.clone();
                }
                if resolved.dokku_version.is_none() {
                    resolved.dokku_version = self.defaults.dokku_version.clone();
                }
                resolved
            })
            .collect()
    }
}

/// Inventory-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InventoryDefaults {
    /// Local directory scanned for `*.pub` keys.
    #[serde(default = "default_authorized_keys_dir")]
    pub authorized_keys_dir: String,
    /// Local known-hosts file pruned after a droplet is created.
    #[serde(default = "default_known_hosts")]
    pub known_hosts: String,
    #[serde(default = "default_dokku_git_repo")]
    pub dokku_git_repo: Option<String>,
    #[serde(default)]
    pub dokku_version: Option<String>,
}

impl Default for InventoryDefaults {
    fn default() -> Self {
        Self {
            authorized_keys_dir: default_authorized_keys_dir(),
            known_hosts: default_known_hosts(),
            dokku_git_repo: default_dokku_git_repo(),
            dokku_version: None,
        }
    }
}

/// Compute providers berth can create hosts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerProviderKind {
    DigitalOcean,
}

/// DNS providers berth can register records with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DnsProviderKind {
    Route53,
}

/// A logical host to provision and configure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TargetDescriptor {
    /// Target name; populated from the inventory key.
    #[serde(default, skip_serializing)]
    pub name: String,
    #[serde(default)]
    pub server_provider: Option<ServerProviderKind>,
    #[serde(default)]
    pub dns_provider: Option<DnsProviderKind>,
    #[serde(default)]
    pub digital_ocean: Option<DigitalOceanSettings>,
    #[serde(default)]
    pub route53: Option<Route53Settings>,
    /// Dokku source repository.
    #[serde(default)]
    pub dokku_git_repo: Option<String>,
    /// Dokku tag, branch, or commit to check out.
    #[serde(default)]
    pub dokku_version: Option<String>,
    /// Overrides the FQDN reported by the host itself.
    #[serde(default)]
    pub fqdn: Option<String>,
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,
}

impl TargetDescriptor {
    /// Descriptor with no providers and default connection settings.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            server_provider: None,
            dns_provider: None,
            digital_ocean: None,
            route53: None,
            dokku_git_repo: None,
            dokku_version: None,
            fqdn: None,
            ssh_user: default_ssh_user(),
            ssh_port: default_ssh_port(),
        }
    }
}

/// Droplet sizing and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DigitalOceanSettings {
    /// API token; falls back to `DO_API_TOKEN` when omitted.
    #[serde(default)]
    pub api_token: Option<String>,
    pub region: String,
    pub image: String,
    pub size: String,
    #[serde(default)]
    pub private_networking: bool,
    #[serde(default)]
    pub backups_enabled: bool,
}

/// Route 53 credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Route53Settings {
    /// Falls back to `AWS_ACCESS_KEY_ID` when omitted.
    #[serde(default)]
    pub access_key_id: Option<String>,
    /// Falls back to `AWS_SECRET_ACCESS_KEY` when omitted.
    #[serde(default)]
    pub secret_access_key: Option<String>,
}

fn default_authorized_keys_dir() -> String {
    DEFAULT_AUTHORIZED_KEYS_DIR.to_string()
}

fn default_known_hosts() -> String {
    DEFAULT_KNOWN_HOSTS.to_string()
}

fn default_dokku_git_repo() -> Option<String> {
    Some(DEFAULT_DOKKU_GIT_REPO.to_string())
}

fn default_ssh_user() -> String {
    DEFAULT_SSH_USER.to_string()
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}
