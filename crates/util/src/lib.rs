//! Utility helpers shared by the berth engine, API clients, and CLI.
//!
//! - `converge`: pure line/key upserts used to make host edits idempotent
//! - `known_hosts`: anchored removal of trust-store entries
//! - `keys`: discovery of the local public-key set
//! - `interpolation`: `${env:NAME}` / `${secret:NAME}` resolution
//! - `shell`: quoting for commands sent to remote shells

pub mod converge;
pub mod interpolation;
pub mod keys;
pub mod known_hosts;
pub mod path_processing;
pub mod shell;

pub use converge::{ensure_authorized_keys, ensure_lines};
pub use interpolation::{InterpolationError, interpolate_string};
pub use keys::{KeySet, KeySetError, PublicKey};
pub use known_hosts::{KnownHostsError, prune_known_hosts, remove_known_hosts};
pub use path_processing::expand_tilde;
pub use shell::{shell_join, shell_quote};

use once_cell::sync::Lazy;
use regex::Regex;

static REDACTION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(authorization: )([\w\-\.=:/+, ]+)",
        r"(?i)([A-Z0-9_]*?(KEY|TOKEN|SECRET|PASSWORD)[=:] ?)([^\s]+)",
        r"(?i)(Credential=)([^\s,]+)",
        r"(?i)(Signature=)([0-9a-f]+)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("redaction pattern should compile"))
    .collect()
});

/// Redacts values that look like secrets in a string.
///
/// ```rust
/// use berth_util::redact_sensitive;
///
/// let line = redact_sensitive("authorization: Bearer dop_v1_abc123");
/// assert_eq!(line, "authorization: <redacted>");
/// ```
pub fn redact_sensitive(input: &str) -> String {
    let mut redacted = input.to_string();
    for re in REDACTION_PATTERNS.iter() {
        redacted = re
            .replace_all(&redacted, |caps: &regex::Captures| {
                let prefix = caps.get(1).map(|m| m.as_str()).unwrap_or("");
                format!("{}<redacted>", prefix)
            })
            .to_string();
    }
    redacted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_tokens_and_signatures() {
        let line = "DO_API_TOKEN=abc123 Credential=AKIDEXAMPLE/20150830/us-east-1/route53/aws4_request, Signature=5d672d79";
        let redacted = redact_sensitive(line);
        assert!(!redacted.contains("abc123"));
        assert!(!redacted.contains("AKIDEXAMPLE"));
        assert!(!redacted.contains("5d672d79"));
    }

    #[test]
    fn leaves_plain_text_untouched() {
        assert_eq!(redact_sensitive("droplet 203.0.113.5 is active"), "droplet 203.0.113.5 is active");
    }
}
