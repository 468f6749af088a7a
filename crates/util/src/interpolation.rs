//! Configuration interpolation for environment variables and secrets.
//!
//! Inventory values may embed `${env:NAME}` or `${secret:NAME}`. Secrets are
//! read from the OS keychain under the `berth` service, or from the process
//! environment when `BERTH_SECRETS_BACKEND=env` (useful in CI).

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

static SERVICE: &str = "berth";
/// Environment variable used to select the secret resolution backend.
pub const SECRETS_BACKEND_ENV_VAR: &str = "BERTH_SECRETS_BACKEND";

static ENV_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{env:([\w+_-]*)}").expect("env pattern should compile"));
static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\$\{secret:([\w+._-]*)}").expect("secret pattern should compile"));

/// Secret resolution backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretsBackend {
    /// Resolve `${secret:NAME}` values via OS keychain (`keyring-rs`).
    Keychain,
    /// Resolve `${secret:NAME}` values from process environment variable `NAME`.
    Environment,
}

impl SecretsBackend {
    fn from_env_var(raw: Option<String>) -> Self {
        match raw.unwrap_or_default().trim().to_ascii_lowercase().as_str() {
            "env" => Self::Environment,
            _ => Self::Keychain,
        }
    }
}

/// Determine the currently configured secrets backend.
pub fn secrets_backend() -> SecretsBackend {
    SecretsBackend::from_env_var(std::env::var(SECRETS_BACKEND_ENV_VAR).ok())
}

/// Interpolate a string value, replacing `${env:NAME}` and `${secret:NAME}` patterns.
pub fn interpolate_string(value: &str) -> Result<String, InterpolationError> {
    let mut resolved = Vec::new();
    for cap in ENV_PATTERN.captures_iter(value) {
        let var_name = cap[1].to_string();
        let env_value = std::env::var(&var_name).map_err(|_| InterpolationError::MissingEnvVar { name: var_name.clone() })?;
        debug!("Interpolated env var: {} -> [REDACTED]", var_name);
        resolved.push((cap[0].to_string(), env_value));
    }

    for cap in SECRET_PATTERN.captures_iter(value) {
        let secret_name = cap[1].to_string();
        let secret_value = resolve_secret(&secret_name)?;
        debug!("Interpolated secret: {} -> [REDACTED]", secret_name);
        resolved.push((cap[0].to_string(), secret_value));
    }

    let mut result = value.to_string();
    for (placeholder, replacement) in resolved {
        result = result.replace(&placeholder, &replacement);
    }
    Ok(result)
}

/// Interpolate an optional value in place.
pub fn interpolate_option(value: &mut Option<String>) -> Result<(), InterpolationError> {
    if let Some(raw) = value.as_mut() {
        *raw = interpolate_string(raw)?;
    }
    Ok(())
}

/// Resolve a secret using the configured secrets backend.
pub fn resolve_secret(name: &str) -> Result<String, InterpolationError> {
    match secrets_backend() {
        SecretsBackend::Environment => std::env::var(name).map_err(|error| InterpolationError::MissingSecret {
            name: name.to_string(),
            error: error.to_string(),
        }),
        SecretsBackend::Keychain => {
            let entry = keychain_entry(name)?;
            entry.get_password().map_err(|e| InterpolationError::MissingSecret {
                name: name.to_string(),
                error: e.to_string(),
            })
        }
    }
}

/// Store a secret in the OS keychain so inventories can reference it as `${secret:NAME}`.
pub fn store_secret(name: &str, value: &str) -> Result<(), InterpolationError> {
    let entry = keychain_entry(name)?;
    entry.set_password(value).map_err(|e| InterpolationError::KeyringError {
        name: name.to_string(),
        error: e.to_string(),
    })?;
    debug!("Stored secret in keychain: {}", name);
    Ok(())
}

fn keychain_entry(name: &str) -> Result<keyring::Entry, InterpolationError> {
    keyring::Entry::new(SERVICE, name).map_err(|e| InterpolationError::KeyringError {
        name: name.to_string(),
        error: e.to_string(),
    })
}

/// Errors that can occur during interpolation.
#[derive(Debug, Error, Clone)]
pub enum InterpolationError {
    #[error("Missing environment variable: {name}")]
    MissingEnvVar { name: String },

    #[error("Missing secret: {name} - {error}")]
    MissingSecret { name: String, error: String },

    #[error("Keyring error for {name}: {error}")]
    KeyringError { name: String, error: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_backend_defaults_to_keychain_when_env_var_is_missing() {
        temp_env::with_var(SECRETS_BACKEND_ENV_VAR, None::<&str>, || {
            assert_eq!(secrets_backend(), SecretsBackend::Keychain);
        });
    }

    #[test]
    fn env_placeholders_are_replaced() {
        temp_env::with_var("BERTH_TEST_DO_TOKEN", Some("dop_v1_test"), || {
            let value = interpolate_string("Bearer ${env:BERTH_TEST_DO_TOKEN}").expect("interpolates");
            assert_eq!(value, "Bearer dop_v1_test");
        });
    }

    #[test]
    fn missing_env_var_is_reported_by_name() {
        temp_env::with_var("BERTH_TEST_ABSENT", None::<&str>, || {
            let error = interpolate_string("${env:BERTH_TEST_ABSENT}").expect_err("should fail");
            assert!(matches!(error, InterpolationError::MissingEnvVar { ref name } if name == "BERTH_TEST_ABSENT"));
        });
    }

    #[test]
    fn secrets_resolve_from_environment_backend() {
        temp_env::with_vars(
            [
                (SECRETS_BACKEND_ENV_VAR, Some("env")),
                ("BERTH_TEST_AWS_SECRET", Some("wJalrXUtnFEMI")),
            ],
            || {
                let value = interpolate_string("${secret:BERTH_TEST_AWS_SECRET}").expect("interpolates");
                assert_eq!(value, "wJalrXUtnFEMI");
            },
        );
    }

    #[test]
    fn plain_values_pass_through() {
        assert_eq!(interpolate_string("nyc3").unwrap(), "nyc3");
    }
}
