//! DigitalOcean v2 API client.
//!
//! Covers the two resources berth manages: account SSH keys and droplets.
//! Droplets are looked up by name before creation, so repeated runs for the
//! same target reuse the existing machine instead of creating a duplicate.

use std::env;
use std::time::{Duration, Instant};

use reqwest::{Method, RequestBuilder, StatusCode, header};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::{ApiError, build_http_client, validate_base_url};

pub const DEFAULT_BASE_URL: &str = "https://api.digitalocean.com";
/// Overrides the API base URL (localhost is accepted for testing).
pub const BASE_URL_ENV_VAR: &str = "DIGITALOCEAN_API_BASE";
const ALLOWED_DOMAINS: &[&str] = &["digitalocean.com"];
const SERVICE: &str = "DigitalOcean";
const PAGE_SIZE: u32 = 200;

const POLL_INTERVAL: Duration = Duration::from_secs(5);
const WAIT_TIMEOUT: Duration = Duration::from_secs(300);

/// An SSH key registered on the account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SshKey {
    pub id: u64,
    #[serde(default)]
    pub fingerprint: String,
    pub public_key: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Networks {
    #[serde(default)]
    pub v4: Vec<NetworkV4>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkV4 {
    pub ip_address: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// A droplet as returned by the API (only the fields berth reads).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Droplet {
    pub id: u64,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub networks: Networks,
}

impl Droplet {
    /// First public IPv4 address, once the droplet has been assigned one.
    pub fn public_ipv4(&self) -> Option<&str> {
        self.networks
            .v4
            .iter()
            .find(|network| network.kind == "public")
            .map(|network| network.ip_address.as_str())
    }

    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

/// Body of `POST /v2/droplets`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CreateDropletRequest {
    pub name: String,
    pub region: String,
    pub size: String,
    pub image: String,
    pub ssh_keys: Vec<u64>,
    pub private_networking: bool,
    pub backups: bool,
}

#[derive(Debug, Clone)]
pub struct DigitalOceanClient {
    base_url: String,
    http: reqwest::Client,
}

impl DigitalOceanClient {
    /// Construct a client for `token`, honoring `DIGITALOCEAN_API_BASE`.
    pub fn new(token: &str) -> Result<Self, ApiError> {
        let base_url = env::var(BASE_URL_ENV_VAR).unwrap_or_else(|_| DEFAULT_BASE_URL.into());
        Self::with_base_url(token, &base_url)
    }

    pub fn with_base_url(token: &str, base_url: &str) -> Result<Self, ApiError> {
        if token.trim().is_empty() {
            return Err(ApiError::MissingCredential("DigitalOcean API token".into()));
        }
        validate_base_url(base_url, ALLOWED_DOMAINS)?;

        let mut default_headers = header::HeaderMap::new();
        let mut authorization = header::HeaderValue::from_str(&format!("Bearer {}", token.trim()))
            .map_err(|_| ApiError::MissingCredential("DigitalOcean API token contains invalid characters".into()))?;
        authorization.set_sensitive(true);
        default_headers.insert(header::AUTHORIZATION, authorization);
        default_headers.insert(header::ACCEPT, header::HeaderValue::from_static("application/json"));

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: build_http_client(default_headers)?,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        debug!(%url, %method, "building DigitalOcean request");
        self.http.request(method, url)
    }

    /// All SSH keys on the account, following pagination.
    pub async fn list_ssh_keys(&self) -> Result<Vec<SshKey>, ApiError> {
        self.get_all("/v2/account/keys", &[], "ssh_keys").await
    }

    pub async fn create_ssh_key(&self, name: &str, public_key: &str) -> Result<SshKey, ApiError> {
        let body = serde_json::json!({ "name": name, "public_key": public_key.trim() });
        let response = self.request(Method::POST, "/v2/account/keys").json(&body);
        self.send_for::<SshKey>(response, "ssh_key").await
    }

    /// Return the account key holding `public_key` (or named `name`), registering it when absent.
    pub async fn ensure_ssh_key(&self, name: &str, public_key: &str) -> Result<SshKey, ApiError> {
        let existing = self.list_ssh_keys().await?;
        if let Some(key) = find_matching_key(&existing, name, public_key) {
            debug!(key_id = key.id, %name, "reusing registered SSH key");
            return Ok(key.clone());
        }
        let created = self.create_ssh_key(name, public_key).await?;
        info!(key_id = created.id, %name, "registered SSH key");
        Ok(created)
    }

    pub async fn find_droplet_by_name(&self, name: &str) -> Result<Option<Droplet>, ApiError> {
        let droplets: Vec<Droplet> = self.get_all("/v2/droplets", &[("name", name)], "droplets").await?;
        Ok(droplets.into_iter().find(|droplet| droplet.name == name))
    }

    pub async fn get_droplet(&self, id: u64) -> Result<Droplet, ApiError> {
        let response = self.request(Method::GET, &format!("/v2/droplets/{id}"));
        self.send_for::<Droplet>(response, "droplet").await
    }

    pub async fn create_droplet(&self, request: &CreateDropletRequest) -> Result<Droplet, ApiError> {
        let response = self.request(Method::POST, "/v2/droplets").json(request);
        self.send_for::<Droplet>(response, "droplet").await
    }

    /// Poll a droplet until it is active with a public IPv4 address.
    pub async fn wait_for_active(&self, id: u64) -> Result<Droplet, ApiError> {
        let started = Instant::now();
        loop {
            let droplet = self.get_droplet(id).await?;
            if droplet.is_active() && droplet.public_ipv4().is_some() {
                return Ok(droplet);
            }
            if started.elapsed() >= WAIT_TIMEOUT {
                return Err(ApiError::Timeout {
                    what: format!("droplet {id} to become active"),
                    seconds: WAIT_TIMEOUT.as_secs(),
                });
            }
            debug!(droplet_id = id, status = %droplet.status, "waiting for droplet to become active");
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Return the droplet named `request.name`, creating it when absent.
    ///
    /// The boolean is `true` only when a new droplet was created.
    pub async fn ensure_droplet(&self, request: &CreateDropletRequest) -> Result<(Droplet, bool), ApiError> {
        if let Some(existing) = self.find_droplet_by_name(&request.name).await? {
            let droplet = if existing.public_ipv4().is_some() {
                existing
            } else {
                self.wait_for_active(existing.id).await?
            };
            debug!(droplet_id = droplet.id, name = %droplet.name, "droplet already exists");
            return Ok((droplet, false));
        }

        let created = self.create_droplet(request).await?;
        info!(droplet_id = created.id, name = %created.name, region = %request.region, size = %request.size, "created droplet");
        let active = self.wait_for_active(created.id).await?;
        Ok((active, true))
    }

    async fn get_all<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)], key: &str) -> Result<Vec<T>, ApiError> {
        let mut items = Vec::new();
        let mut page: u32 = 1;
        loop {
            let page_text = page.to_string();
            let per_page = PAGE_SIZE.to_string();
            let mut params: Vec<(&str, &str)> = query.to_vec();
            params.push(("page", page_text.as_str()));
            params.push(("per_page", per_page.as_str()));

            let payload = self.send(self.request(Method::GET, path).query(&params)).await?;
            let (mut batch, has_next) = decode_page::<T>(&payload, key)?;
            items.append(&mut batch);
            if !has_next {
                return Ok(items);
            }
            page += 1;
        }
    }

    async fn send_for<T: DeserializeOwned>(&self, request: RequestBuilder, key: &str) -> Result<T, ApiError> {
        let payload = self.send(request).await?;
        let inner = payload.get(key).cloned().ok_or_else(|| ApiError::Decode {
            service: SERVICE,
            message: format!("response has no '{key}' field"),
        })?;
        serde_json::from_value(inner).map_err(|e| ApiError::Decode {
            service: SERVICE,
            message: e.to_string(),
        })
    }

    async fn send(&self, request: RequestBuilder) -> Result<Value, ApiError> {
        let response = request.send().await.map_err(|source| ApiError::Transport { service: SERVICE, source })?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|source| ApiError::Transport { service: SERVICE, source })?;

        if !status.is_success() {
            return Err(ApiError::Status {
                service: SERVICE,
                status: status.as_u16(),
                message: error_message(&text, status),
            });
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| ApiError::Decode {
            service: SERVICE,
            message: e.to_string(),
        })
    }
}

/// Match an account key by key material first, then by name.
fn find_matching_key<'a>(keys: &'a [SshKey], name: &str, public_key: &str) -> Option<&'a SshKey> {
    let wanted = key_material(public_key);
    keys.iter()
        .find(|key| wanted.is_some() && key_material(&key.public_key) == wanted)
        .or_else(|| keys.iter().find(|key| key.name == name))
}

fn key_material(public_key: &str) -> Option<(&str, &str)> {
    let mut fields = public_key.split_whitespace();
    Some((fields.next()?, fields.next()?))
}

fn decode_page<T: DeserializeOwned>(payload: &Value, key: &str) -> Result<(Vec<T>, bool), ApiError> {
    let items = match payload.get(key) {
        Some(Value::Array(items)) => items.clone(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            return Err(ApiError::Decode {
                service: SERVICE,
                message: format!("expected '{key}' to be an array, got {other}"),
            });
        }
    };
    let decoded = items
        .into_iter()
        .map(serde_json::from_value)
        .collect::<Result<Vec<T>, _>>()
        .map_err(|e| ApiError::Decode {
            service: SERVICE,
            message: e.to_string(),
        })?;
    let has_next = payload
        .pointer("/links/pages/next")
        .and_then(Value::as_str)
        .is_some_and(|next| !next.is_empty());
    Ok((decoded, has_next))
}

fn error_message(body: &str, status: StatusCode) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                status.canonical_reason().unwrap_or("unknown error").to_string()
            } else {
                berth_util::redact_sensitive(trimmed)
            }
        })
}
