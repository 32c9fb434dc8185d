//! Text cleanup for values extracted from untrusted markup

/// Upper bound for a stored page title, in bytes
pub const MAX_TITLE_LEN: usize = 500;

/// Upper bound for stored anchor text, in bytes
pub const MAX_ANCHOR_TEXT_LEN: usize = 1024;

/// Cleans extracted text before it is persisted
///
/// Drops NUL bytes, control characters other than whitespace, and the
/// U+FFFD replacement characters produced by lossy decoding. The result is
/// trimmed and then truncated to at most `max_len` bytes without splitting
/// a character.
pub fn sanitize_text(text: &str, max_len: usize) -> String {
    let cleaned: String = text
        .chars()
        .filter(|c| *c != '\u{FFFD}' && (!c.is_control() || c.is_whitespace()))
        .collect();

    let trimmed = cleaned.trim();
    if trimmed.len() <= max_len {
        return trimmed.to_string();
    }

    let mut end = max_len;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trims_and_keeps_short_text() {
        assert_eq!(sanitize_text("  Hello world \n", 100), "Hello world");
        assert_eq!(sanitize_text("", 100), "");
    }

    #[test]
    fn test_strips_control_and_replacement_chars() {
        assert_eq!(sanitize_text("a\u{0}b\u{7}c\u{FFFD}d", 100), "abcd");
        assert_eq!(sanitize_text("line\tone", 100), "line\tone");
    }

    #[test]
    fn test_truncates_on_char_boundary() {
        assert_eq!(sanitize_text("abcdef", 3), "abc");
        // 'é' is two bytes; cutting at 3 bytes would split the second one
        assert_eq!(sanitize_text("éé", 3), "é");
        assert_eq!(sanitize_text("abc", 0), "");
    }
}
