//! HTTP clients for the external services berth provisions against.
//!
//! - [`DigitalOceanClient`]: SSH key registration and droplet lifecycle on the
//!   DigitalOcean v2 API (bearer-token auth, JSON bodies)
//! - [`Route53Client`]: hosted-zone and record-set access on the Route 53
//!   REST API (SigV4-signed requests, XML bodies)
//!
//! Both clients share the conventions in this module: a 30 second request
//! timeout, a consistent User-Agent, and base-URL validation that only allows
//! plain HTTP for localhost.
//!
//! # Example
//!
//! ```ignore
//! use berth_api::DigitalOceanClient;
//!
//! async fn droplet_ip(token: &str) -> Result<Option<String>, berth_api::ApiError> {
//!     let client = DigitalOceanClient::new(token)?;
//!     let droplet = client.find_droplet_by_name("app.example.com").await?;
//!     Ok(droplet.and_then(|d| d.public_ipv4().map(str::to_string)))
//! }
//! ```

use std::env;
use std::time::Duration;

use reqwest::{Client, Url, header};
use thiserror::Error;

pub mod digital_ocean;
pub mod route53;
pub mod sigv4;

pub use digital_ocean::{CreateDropletRequest, DigitalOceanClient, Droplet, SshKey};
pub use route53::{AwsCredentials, Route53Client};

/// Hostnames allowed for local development regardless of scheme.
const LOCALHOST_DOMAINS: &[&str] = &["localhost", "127.0.0.1"];

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors returned by the provider clients.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing credential: {0}")]
    MissingCredential(String),

    #[error("invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("could not build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request to {service} failed: {source}")]
    Transport {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} returned HTTP {status}: {message}")]
    Status {
        service: &'static str,
        status: u16,
        message: String,
    },

    #[error("could not decode {service} response: {message}")]
    Decode { service: &'static str, message: String },

    #[error("timed out after {seconds}s waiting for {what}")]
    Timeout { what: String, seconds: u64 },

    #[error("{0}")]
    Unexpected(String),
}

pub(crate) fn user_agent() -> String {
    format!("berth/{}; {}", env!("CARGO_PKG_VERSION"), env::consts::OS)
}

/// Build a `reqwest::Client` with the shared defaults and the given headers.
pub(crate) fn build_http_client(default_headers: header::HeaderMap) -> Result<Client, ApiError> {
    Client::builder()
        .default_headers(default_headers)
        .user_agent(user_agent())
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(ApiError::Client)
}

/// Validate that a base URL is acceptable for use by a client.
///
/// Rules:
/// - `localhost` or `127.0.0.1`: any scheme is allowed
/// - otherwise: scheme must be HTTPS and the host must be one of
///   `allowed_domains` or a subdomain thereof
pub fn validate_base_url(base: &str, allowed_domains: &[&str]) -> Result<Url, ApiError> {
    let invalid = |reason: String| ApiError::InvalidBaseUrl {
        url: base.to_string(),
        reason,
    };
    let parsed = Url::parse(base).map_err(|e| invalid(e.to_string()))?;
    let host_name = parsed.host_str().ok_or_else(|| invalid("URL must include a host".into()))?;

    if LOCALHOST_DOMAINS.iter().any(|&allowed| host_name.eq_ignore_ascii_case(allowed)) {
        return Ok(parsed);
    }

    if parsed.scheme() != "https" {
        return Err(invalid(format!("must use https for non-localhost hosts; got '{}://'", parsed.scheme())));
    }

    let is_allowed_domain = allowed_domains.iter().any(|&allowed_domain| {
        host_name.eq_ignore_ascii_case(allowed_domain) || host_name.ends_with(&format!(".{}", allowed_domain))
    });
    if !is_allowed_domain {
        return Err(invalid(format!("host '{}' is not one of {:?} or a subdomain", host_name, allowed_domains)));
    }

    Ok(parsed)
}
