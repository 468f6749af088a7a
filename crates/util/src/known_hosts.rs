//! Anchored removal of `known_hosts` entries.
//!
//! A line is removed only when one of the comma-separated hosts in its
//! leading field equals a requested host exactly (`[host]:port` forms are
//! compared on the bracketed host). Substring or prefix matches never count,
//! so pruning `203.0.113.5` leaves `203.0.113.50` alone. Hashed entries
//! (`|1|...`) cannot be matched and are kept.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

/// Errors surfaced while rewriting the trust store.
#[derive(Debug, Error)]
pub enum KnownHostsError {
    #[error("could not read known_hosts file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not write known_hosts file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Remove lines whose leading field names any of `hosts`.
///
/// Returns the new contents and the number of removed lines.
pub fn remove_known_hosts(current: &str, hosts: &[&str]) -> (String, usize) {
    let mut removed = 0;
    let mut kept = Vec::new();
    for line in current.lines() {
        if line_matches(line, hosts) {
            removed += 1;
        } else {
            kept.push(line);
        }
    }
    if removed == 0 {
        return (current.to_string(), 0);
    }
    let mut out = kept.join("\n");
    if !kept.is_empty() {
        out.push('\n');
    }
    (out, removed)
}

/// Prune entries for `hosts` from the file at `path`.
///
/// A missing file counts as nothing to remove. The file is only rewritten
/// when at least one line matched.
pub fn prune_known_hosts(path: &Path, hosts: &[&str]) -> Result<usize, KnownHostsError> {
    let current = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(error) if error.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "known_hosts file absent; nothing to prune");
            return Ok(0);
        }
        Err(source) => {
            return Err(KnownHostsError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let (updated, removed) = remove_known_hosts(&current, hosts);
    if removed > 0 {
        fs::write(path, updated).map_err(|source| KnownHostsError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), removed, hosts = ?hosts, "pruned stale known_hosts entries");
    }
    Ok(removed)
}

fn line_matches(line: &str, hosts: &[&str]) -> bool {
    let trimmed = line.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return false;
    }
    let mut fields = trimmed.split_whitespace();
    let Some(mut leading) = fields.next() else {
        return false;
    };
    // `@cert-authority` / `@revoked` markers precede the host field.
    if leading.starts_with('@') {
        match fields.next() {
            Some(next) => leading = next,
            None => return false,
        }
    }
    leading
        .split(',')
        .map(host_of_pattern)
        .any(|candidate| hosts.iter().any(|host| candidate.eq_ignore_ascii_case(host)))
}

fn host_of_pattern(pattern: &str) -> &str {
    pattern
        .strip_prefix('[')
        .and_then(|rest| rest.split_once("]:"))
        .map(|(host, _port)| host)
        .unwrap_or(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
203.0.113.5 ssh-rsa AAAAfirst
203.0.113.50 ssh-rsa AAAAsecond
app.example.com,198.51.100.7 ecdsa-sha2-nistp256 AAAAthird
[app.example.com]:2222 ssh-ed25519 AAAAfourth
|1|hashed= ssh-ed25519 AAAAfifth
";

    #[test]
    fn removal_is_anchored_to_whole_host() {
        let (out, removed) = remove_known_hosts(SAMPLE, &["203.0.113.5"]);
        assert_eq!(removed, 1);
        assert!(!out.contains("AAAAfirst"));
        assert!(out.contains("203.0.113.50 ssh-rsa AAAAsecond"));
    }

    #[test]
    fn removes_any_host_in_comma_list_and_bracketed_ports() {
        let (out, removed) = remove_known_hosts(SAMPLE, &["app.example.com"]);
        assert_eq!(removed, 2);
        assert!(!out.contains("AAAAthird"));
        assert!(!out.contains("AAAAfourth"));
        assert!(out.contains("|1|hashed="));
    }

    #[test]
    fn no_match_returns_input_unchanged() {
        let (out, removed) = remove_known_hosts(SAMPLE, &["192.0.2.1"]);
        assert_eq!(removed, 0);
        assert_eq!(out, SAMPLE);
    }

    #[test]
    fn prune_rewrites_file_only_when_needed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("known_hosts");
        fs::write(&path, SAMPLE).unwrap();

        assert_eq!(prune_known_hosts(&path, &["203.0.113.5", "app.example.com"]).unwrap(), 3);
        assert_eq!(prune_known_hosts(&path, &["203.0.113.5", "app.example.com"]).unwrap(), 0);
        let remaining = fs::read_to_string(&path).unwrap();
        assert_eq!(remaining.lines().count(), 2);
    }

    #[test]
    fn prune_missing_file_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(prune_known_hosts(&dir.path().join("absent"), &["203.0.113.5"]).unwrap(), 0);
    }
}
