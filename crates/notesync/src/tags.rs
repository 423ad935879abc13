//! Tag normalization for note frontmatter and snapshot metadata.
//!
//! Tags arrive in whatever shape the author typed them: `tags: [Work, rust]`,
//! `tags: "work, rust"`, `tags: "#work"`. They are folded into a set so that
//! order and repetition do not matter, but the names themselves belong to the
//! author: case, spaces and non-ASCII characters are kept as written.
//!
//! ## Normalization
//!
//! - Surrounding whitespace is trimmed
//! - One leading `#` is stripped (`#work` → `work`)
//! - Empty names are dropped
//! - Exact duplicates collapse

use std::collections::BTreeSet;

/// Trimmed, with a leading `#` removed. Case is preserved.
pub fn canonical_tag(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix('#')
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

/// Folds raw tag strings into a deduplicated, ordered set.
pub fn normalize_tags<I, S>(raw: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter()
        .map(|item| canonical_tag(item.as_ref()))
        .filter(|tag| !tag.is_empty())
        .collect()
}
