use std::path::PathBuf;

use dirs_next::home_dir;

/// Expand a leading `~` to the current user's home directory.
///
/// Paths without a tilde prefix are returned unchanged (after trimming).
pub fn expand_tilde(path: &str) -> PathBuf {
    let trimmed = path.trim();
    let home = || home_dir().unwrap_or_else(|| PathBuf::from("~"));
    match trimmed {
        "~" => home(),
        _ => match trimmed.strip_prefix("~/").or_else(|| trimmed.strip_prefix("~\\")) {
            Some(rest) => home().join(rest),
            None => PathBuf::from(trimmed),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_paths_are_unchanged() {
        assert_eq!(expand_tilde(" /etc/hosts "), PathBuf::from("/etc/hosts"));
    }

    #[test]
    fn tilde_prefix_joins_home() {
        if let Some(home) = home_dir() {
            assert_eq!(expand_tilde("~/.ssh/known_hosts"), home.join(".ssh/known_hosts"));
        }
    }
}
