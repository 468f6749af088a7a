//! Declarative convergence functions for line-oriented files.
//!
//! Each function takes the current file contents and returns the desired
//! contents plus whether anything changed. Callers only write back when
//! `changed` is true, which keeps repeated runs from touching the file.

/// Ensure each `KEY=value` line is present in an environment-style file.
///
/// A line whose key matches but whose value differs is replaced in place;
/// missing lines are appended. Lines are never duplicated.
///
/// ```rust
/// use berth_util::ensure_lines;
///
/// let (once, changed) = ensure_lines("PATH=/usr/bin\n", &["LANG=en_US.UTF-8"]);
/// assert!(changed);
/// let (twice, changed_again) = ensure_lines(&once, &["LANG=en_US.UTF-8"]);
/// assert!(!changed_again);
/// assert_eq!(once, twice);
/// ```
pub fn ensure_lines(current: &str, desired: &[&str]) -> (String, bool) {
    let mut lines: Vec<String> = current.lines().map(str::to_string).collect();
    let mut changed = false;

    for wanted in desired {
        let key = line_key(wanted);
        let mut matched = false;
        let mut index = 0;
        while index < lines.len() {
            if line_key(&lines[index]) != key {
                index += 1;
                continue;
            }
            if matched {
                // Later duplicates of an already converged key are dropped.
                lines.remove(index);
                changed = true;
                continue;
            }
            matched = true;
            if lines[index] != *wanted {
                lines[index] = wanted.to_string();
                changed = true;
            }
            index += 1;
        }
        if !matched {
            lines.push(wanted.to_string());
            changed = true;
        }
    }

    (join_lines(&lines, current), changed)
}

/// Ensure every public key line is authorized.
///
/// Membership is decided on the key type and base64 blob, so a key already
/// present with a different comment is not added twice. Existing keys are
/// never removed.
pub fn ensure_authorized_keys<'a>(current: &str, keys: impl IntoIterator<Item = &'a str>) -> (String, bool) {
    let mut lines: Vec<String> = current.lines().map(str::to_string).collect();
    let mut changed = false;

    for key in keys {
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let present = match key_identity(key) {
            Some(identity) => lines.iter().any(|line| key_identity(line) == Some(identity)),
            None => lines.iter().any(|line| line.trim() == key),
        };
        if present {
            continue;
        }
        lines.push(key.to_string());
        changed = true;
    }

    (join_lines(&lines, current), changed)
}

fn line_key(line: &str) -> &str {
    let trimmed = line.trim_start();
    let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
    trimmed.split_once('=').map(|(key, _)| key.trim()).unwrap_or(trimmed)
}

/// `(type, blob)` of an OpenSSH public key line, skipping any options prefix.
fn key_identity(line: &str) -> Option<(&str, &str)> {
    let mut fields = line.split_whitespace();
    while let Some(field) = fields.next() {
        if field.starts_with("ssh-") || field.starts_with("ecdsa-") || field.starts_with("sk-") {
            return fields.next().map(|blob| (field, blob));
        }
    }
    None
}

fn join_lines(lines: &[String], original: &str) -> String {
    if lines.is_empty() {
        return original.to_string();
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}
