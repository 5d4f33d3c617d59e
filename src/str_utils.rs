/// Safely returns a prefix of the string with at most `max_chars` characters.
/// This respects UTF-8 character boundaries.
pub fn prefix_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Single-line preview of a payload for log output.
pub fn log_snippet(s: &str, max_chars: usize) -> String {
    let prefix = prefix_chars(s, max_chars);
    if prefix.len() < s.len() {
        format!("{}...", prefix.replace('\n', " "))
    } else {
        prefix.replace('\n', " ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_respects_char_boundaries() {
        assert_eq!(prefix_chars("héllo", 2), "hé");
        assert_eq!(prefix_chars("abc", 10), "abc");
        assert_eq!(prefix_chars("🌟🚀🧠", 2), "🌟🚀");
    }

    #[test]
    fn test_log_snippet_marks_truncation() {
        assert_eq!(log_snippet("line one\nline two", 4), "line...");
        assert_eq!(log_snippet("short", 10), "short");
    }
}
