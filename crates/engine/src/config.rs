//! Inventory loading: read, interpolate, validate, then select strategies.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use berth_api::{ApiError, AwsCredentials, DigitalOceanClient, Route53Client};
use berth_types::{DnsProviderKind, Inventory, InventoryDefaults, ServerProviderKind, TargetDescriptor};
use berth_util::interpolation::interpolate_option;
use berth_util::{InterpolationError, expand_tilde};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::provider::{DigitalOceanCompute, DnsRegistrar, Provisioner, Route53Dns};

/// Environment variable overriding the inventory location.
pub const INVENTORY_PATH_ENV: &str = "BERTH_INVENTORY";
pub const DEFAULT_INVENTORY_FILE: &str = "berth.yaml";

pub const DIGITALOCEAN_TOKEN_ENV: &str = "DO_API_TOKEN";
pub const AWS_ACCESS_KEY_ID_ENV: &str = "AWS_ACCESS_KEY_ID";
pub const AWS_SECRET_ACCESS_KEY_ENV: &str = "AWS_SECRET_ACCESS_KEY";
pub const AWS_SESSION_TOKEN_ENV: &str = "AWS_SESSION_TOKEN";

static TARGET_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?(\.[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?)*$").expect("target name pattern should compile")
});

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read inventory {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not parse inventory {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("target '{target}': could not interpolate {field}: {source}")]
    Interpolation {
        target: String,
        field: &'static str,
        #[source]
        source: InterpolationError,
    },

    #[error("invalid target name '{name}': {reason}")]
    InvalidTargetName { name: String, reason: String },

    #[error("target '{target}' selects {provider} but has no '{provider}' section")]
    MissingProviderSettings { target: String, provider: &'static str },

    #[error("target '{target}' is missing {field}; set it on the target, under defaults, or via {env_var}")]
    MissingCredential {
        target: String,
        field: &'static str,
        env_var: &'static str,
    },

    #[error("target '{target}' has no {field}; set it on the target or under defaults")]
    MissingDokkuSource { target: String, field: &'static str },

    #[error("target '{target}': {source}")]
    Client {
        target: String,
        #[source]
        source: ApiError,
    },

    #[error("no target named '{0}' in the inventory")]
    UnknownTarget(String),
}

/// A target with its strategies selected.
#[derive(Debug, Clone)]
pub struct TargetPlan {
    pub descriptor: TargetDescriptor,
    pub provisioner: Provisioner,
    pub dns: DnsRegistrar,
}

/// A validated inventory.
#[derive(Debug, Clone)]
pub struct LoadedInventory {
    pub path: PathBuf,
    pub defaults: InventoryDefaults,
    pub targets: Vec<TargetDescriptor>,
}

impl LoadedInventory {
    /// Targets named in `names`, in the order given; every target when empty.
    pub fn select(&self, names: &[String]) -> Result<Vec<TargetDescriptor>, ConfigError> {
        if names.is_empty() {
            return Ok(self.targets.clone());
        }
        names
            .iter()
            .map(|name| {
                self.targets
                    .iter()
                    .find(|target| target.name.eq_ignore_ascii_case(name))
                    .cloned()
                    .ok_or_else(|| ConfigError::UnknownTarget(name.clone()))
            })
            .collect()
    }

    pub fn keys_dir(&self) -> PathBuf {
        expand_tilde(&self.defaults.authorized_keys_dir)
    }

    pub fn known_hosts_path(&self) -> PathBuf {
        expand_tilde(&self.defaults.known_hosts)
    }
}

/// Returns the inventory path, honoring `BERTH_INVENTORY`.
pub fn default_inventory_path() -> PathBuf {
    if let Ok(path) = env::var(INVENTORY_PATH_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(&path);
    }
    PathBuf::from(DEFAULT_INVENTORY_FILE)
}

/// Read, interpolate, and validate the inventory at `path`.
pub fn load_inventory(path: &Path) -> Result<LoadedInventory, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let inventory: Inventory = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    let mut targets = inventory.resolved_targets();
    for target in &mut targets {
        interpolate_target(target)?;
        validate_target(target)?;
    }
    debug!(path = %path.display(), targets = targets.len(), "loaded inventory");

    Ok(LoadedInventory {
        path: path.to_path_buf(),
        defaults: inventory.defaults,
        targets,
    })
}

fn interpolate_target(target: &mut TargetDescriptor) -> Result<(), ConfigError> {
    let name = target.name.clone();
    if let Some(settings) = target.digital_ocean.as_mut() {
        interpolate_option(&mut settings.api_token).map_err(interpolation_error(&name, "digital_ocean.api_token"))?;
    }
    if let Some(settings) = target.route53.as_mut() {
        interpolate_option(&mut settings.access_key_id).map_err(interpolation_error(&name, "route53.access_key_id"))?;
        interpolate_option(&mut settings.secret_access_key).map_err(interpolation_error(&name, "route53.secret_access_key"))?;
    }
    interpolate_option(&mut target.dokku_git_repo).map_err(interpolation_error(&name, "dokku_git_repo"))?;
    interpolate_option(&mut target.dokku_version).map_err(interpolation_error(&name, "dokku_version"))?;
    interpolate_option(&mut target.fqdn).map_err(interpolation_error(&name, "fqdn"))?;
    Ok(())
}

fn interpolation_error<'a>(target: &'a str, field: &'static str) -> impl FnOnce(InterpolationError) -> ConfigError + 'a {
    move |source| ConfigError::Interpolation {
        target: target.to_string(),
        field,
        source,
    }
}

/// Check a resolved target for the settings its providers and phase two need.
pub fn validate_target(target: &TargetDescriptor) -> Result<(), ConfigError> {
    validate_target_name(&target.name)?;

    if target.server_provider == Some(ServerProviderKind::DigitalOcean) && target.digital_ocean.is_none() {
        return Err(ConfigError::MissingProviderSettings {
            target: target.name.clone(),
            provider: "digital_ocean",
        });
    }
    if target.dns_provider == Some(DnsProviderKind::Route53) && target.route53.is_none() {
        return Err(ConfigError::MissingProviderSettings {
            target: target.name.clone(),
            provider: "route53",
        });
    }

    let missing = |value: &Option<String>| value.as_deref().is_none_or(|v| v.trim().is_empty());
    if missing(&target.dokku_git_repo) {
        return Err(ConfigError::MissingDokkuSource {
            target: target.name.clone(),
            field: "dokku_git_repo",
        });
    }
    if missing(&target.dokku_version) {
        return Err(ConfigError::MissingDokkuSource {
            target: target.name.clone(),
            field: "dokku_version",
        });
    }
    Ok(())
}

fn validate_target_name(name: &str) -> Result<(), ConfigError> {
    if name.len() > 253 {
        return Err(ConfigError::InvalidTargetName {
            name: name.to_string(),
            reason: "longer than 253 characters".into(),
        });
    }
    if !TARGET_NAME.is_match(name) {
        return Err(ConfigError::InvalidTargetName {
            name: name.to_string(),
            reason: "must be a DNS hostname (letters, digits, hyphens, dot-separated labels)".into(),
        });
    }
    Ok(())
}

/// Select the provider strategies for a target, building API clients for
/// the providers it names.
pub fn plan_target(target: &TargetDescriptor) -> Result<TargetPlan, ConfigError> {
    let client_error = |source| ConfigError::Client {
        target: target.name.clone(),
        source,
    };

    let provisioner = match (target.server_provider, target.digital_ocean.as_ref()) {
        (None, _) => Provisioner::None,
        (Some(ServerProviderKind::DigitalOcean), None) => {
            return Err(ConfigError::MissingProviderSettings {
                target: target.name.clone(),
                provider: "digital_ocean",
            });
        }
        (Some(ServerProviderKind::DigitalOcean), Some(settings)) => {
            let token = credential(target, settings.api_token.as_deref(), "digital_ocean.api_token", DIGITALOCEAN_TOKEN_ENV)?;
            let client = DigitalOceanClient::new(&token).map_err(client_error)?;
            Provisioner::DigitalOcean {
                provider: Arc::new(DigitalOceanCompute::new(client)),
                settings: settings.clone(),
            }
        }
    };

    let dns = match (target.dns_provider, target.route53.as_ref()) {
        (None, _) => DnsRegistrar::None,
        (Some(DnsProviderKind::Route53), None) => {
            return Err(ConfigError::MissingProviderSettings {
                target: target.name.clone(),
                provider: "route53",
            });
        }
        (Some(DnsProviderKind::Route53), Some(settings)) => {
            let credentials = AwsCredentials {
                access_key_id: credential(target, settings.access_key_id.as_deref(), "route53.access_key_id", AWS_ACCESS_KEY_ID_ENV)?,
                secret_access_key: credential(
                    target,
                    settings.secret_access_key.as_deref(),
                    "route53.secret_access_key",
                    AWS_SECRET_ACCESS_KEY_ENV,
                )?,
                session_token: env::var(AWS_SESSION_TOKEN_ENV).ok().filter(|token| !token.trim().is_empty()),
            };
            let client = Route53Client::new(credentials).map_err(client_error)?;
            DnsRegistrar::Route53 {
                provider: Arc::new(Route53Dns::new(client)),
            }
        }
    };

    debug!(target = %target.name, provisioner = provisioner.label(), dns = dns.label(), "selected strategies");
    Ok(TargetPlan {
        descriptor: target.clone(),
        provisioner,
        dns,
    })
}

fn credential(target: &TargetDescriptor, configured: Option<&str>, field: &'static str, env_var: &'static str) -> Result<String, ConfigError> {
    configured
        .map(str::to_string)
        .or_else(|| env::var(env_var).ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ConfigError::MissingCredential {
            target: target.name.clone(),
            field,
            env_var,
        })
}
