//! Task-prefix policy for E5-style models.
//!
//! The model is trained with `query: ` / `passage: ` role markers. Generic
//! embedding requests get `passage: ` unless the caller already chose a role;
//! similarity requests are symmetric text-to-text and always use `passage: `.

pub const QUERY_PREFIX: &str = "query:";
pub const PASSAGE_PREFIX: &str = "passage:";

/// Prefix for the embed path: keep an existing `query:`/`passage:` marker,
/// otherwise prepend `passage: `.
pub fn prepare(text: &str) -> String {
    if text.starts_with(QUERY_PREFIX) || text.starts_with(PASSAGE_PREFIX) {
        text.to_string()
    } else {
        format!("{PASSAGE_PREFIX} {text}")
    }
}

/// Prefix for the similarity path: always prepend `passage: `.
pub fn prepare_for_similarity(text: &str) -> String {
    format!("{PASSAGE_PREFIX} {text}")
}
