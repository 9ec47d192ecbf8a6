//! String utilities for the domain layer.
//!
//! Lengths here are counted in Unicode scalar values rather than bytes, so a
//! limit never lands inside a multibyte character.

/// Return the first `max_chars` characters of `s`.
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((end, _)) => &s[..end],
        None => s,
    }
}

/// Shorten `s` to `keep` characters plus `"..."` when it is longer than `limit`.
///
/// Strings of at most `limit` characters are returned unchanged.
pub fn ellipsize(s: &str, limit: usize, keep: usize) -> String {
    if s.chars().count() <= limit {
        s.to_string()
    } else {
        format!("{}...", truncate_chars(s, keep))
    }
}
