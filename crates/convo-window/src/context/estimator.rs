//! Heuristic token estimation.
//!
//! This is deliberately **not** a tokenizer. One token is assumed per two
//! UTF-16 code units, regardless of language or model. The estimate is crude
//! but cheap, deterministic, and conservative enough for budgeting when paired
//! with the [`token_buffer`](crate::ContextConfig::token_buffer) headroom.
//! Counts will not match any real model's tokenizer; that is a known
//! approximation, not a bug.

use serde::Serialize;

/// UTF-16 code units counted as one token.
pub const UTF16_UNITS_PER_TOKEN: usize = 2;

/// Marker appended to truncated text.
pub const ELLIPSIS: &str = "...";

/// Estimated cost of [`ELLIPSIS`] when appended to truncated text.
pub const ELLIPSIS_TOKENS: usize = ELLIPSIS.len().div_ceil(UTF16_UNITS_PER_TOKEN);

/// Estimate the token cost of a string: `ceil(utf16_len / 2)`.
pub fn estimate(text: &str) -> usize {
    text.encode_utf16().count().div_ceil(UTF16_UNITS_PER_TOKEN)
}

/// Estimate the token cost of any serializable value via its compact JSON form.
///
/// Values that cannot be serialized (maps with non-string keys) cost nothing.
pub fn estimate_structured<T: Serialize + ?Sized>(value: &T) -> usize {
    serde_json::to_string(value).map_or(0, |json| estimate(&json))
}

/// Cut `text` down to roughly `max_tokens`.
///
/// Text that already fits is returned unchanged. Otherwise the first
/// `max_tokens * 2` UTF-16 units are kept (a surrogate pair is never split)
/// and [`ELLIPSIS`] is appended. No word or sentence boundary awareness.
pub fn truncate(text: &str, max_tokens: usize) -> String {
    if estimate(text) <= max_tokens {
        return text.to_string();
    }

    let limit = max_tokens.saturating_mul(UTF16_UNITS_PER_TOKEN);
    let mut units = 0;
    let mut head: String = text
        .chars()
        .take_while(|c| {
            units += c.len_utf16();
            units <= limit
        })
        .collect();
    head.push_str(ELLIPSIS);
    head
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Message;

    #[test]
    fn estimate_rounds_up_half_units() {
        assert_eq!(estimate(""), 0);
        assert_eq!(estimate("a"), 1);
        assert_eq!(estimate("ab"), 1);
        assert_eq!(estimate("abc"), 2);
        assert_eq!(estimate(&"x".repeat(1000)), 500);
    }

    #[test]
    fn estimate_counts_utf16_units_not_bytes() {
        // "é" is 2 bytes in UTF-8 but 1 UTF-16 unit.
        assert_eq!(estimate("éé"), 1);
        // An emoji outside the BMP is a surrogate pair: 2 units.
        assert_eq!(estimate("😀"), 1);
        assert_eq!(estimate("😀😀a"), 3);
    }

    #[test]
    fn estimate_structured_uses_json_form() {
        // "\"hi\"" is 4 units.
        assert_eq!(estimate_structured("hi"), 2);
        let topics = vec!["a".to_string(), "b".to_string()];
        // ["a","b"] is 9 units.
        assert_eq!(estimate_structured(&topics), 5);

        let msg = Message::user("hello");
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(estimate_structured(&msg), estimate(&json));
    }

    #[test]
    fn truncate_leaves_fitting_text_alone() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcd", 2), "abcd");
    }

    #[test]
    fn truncate_keeps_prefix_and_appends_marker() {
        let text = "x".repeat(100);
        let cut = truncate(&text, 10);
        assert_eq!(cut, format!("{}{ELLIPSIS}", "x".repeat(20)));
        assert_eq!(estimate(&cut), 10 + ELLIPSIS_TOKENS);
    }

    #[test]
    fn truncate_never_splits_surrogate_pairs() {
        // 3 emoji = 6 units; limit of 1 token = 2 units → exactly one emoji.
        let cut = truncate("😀😀😀", 1);
        assert_eq!(cut, format!("😀{ELLIPSIS}"));

        // "a😀" with a 1-token limit: "a" fits, the emoji would overflow.
        let cut = truncate("a😀bbbb", 1);
        assert_eq!(cut, format!("a{ELLIPSIS}"));
    }

    #[test]
    fn truncate_to_zero_is_just_the_marker() {
        assert_eq!(truncate("abc", 0), ELLIPSIS);
    }
}
