//! Quoting for commands sent to a remote POSIX shell.

/// Quote a word for `sh`, leaving it bare when it only holds safe characters.
///
/// ```rust
/// use berth_util::shell_quote;
///
/// assert_eq!(shell_quote("/root/dokku"), "/root/dokku");
/// assert_eq!(shell_quote("it's"), "'it'\\''s'");
/// assert_eq!(shell_quote(""), "''");
/// ```
pub fn shell_quote(word: &str) -> String {
    if !word.is_empty() && word.chars().all(is_safe) {
        return word.to_string();
    }
    let mut quoted = String::with_capacity(word.len() + 2);
    quoted.push('\'');
    for character in word.chars() {
        if character == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(character);
        }
    }
    quoted.push('\'');
    quoted
}

/// Join words into a command line, quoting each one.
pub fn shell_join<'a>(words: impl IntoIterator<Item = &'a str>) -> String {
    words.into_iter().map(shell_quote).collect::<Vec<_>>().join(" ")
}

fn is_safe(character: char) -> bool {
    character.is_ascii_alphanumeric() || matches!(character, '-' | '_' | '.' | '/' | ':' | '=' | '@' | ',' | '+')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_metacharacters() {
        assert_eq!(shell_quote("a b"), "'a b'");
        assert_eq!(shell_quote("$(rm -rf /)"), "'$(rm -rf /)'");
        assert_eq!(shell_quote("*.example.com"), "'*.example.com'");
    }

    #[test]
    fn joins_words() {
        assert_eq!(shell_join(["git", "checkout", "v1.0"]), "git checkout v1.0");
        assert_eq!(shell_join(["echo", "hello world"]), "echo 'hello world'");
    }
}
