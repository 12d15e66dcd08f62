//! Shared utility functions

/// Truncate a string to at most `max_len` bytes.
/// Backs off to the nearest char boundary so multi-byte characters are never split.
pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}
