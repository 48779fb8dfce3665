//! Central text normalization. Every text field that should be searchable
//! routes through here; the index and the analyzers compare normalized
//! forms only, which is what makes matching diacritic-insensitive.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Canonical decomposition, combining-mark removal, optional lowercasing,
/// whitespace collapse, trim. Idempotent; pathological input yields an
/// empty string rather than an error.
pub fn normalize(text: &str, lowercase: bool) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_space = false;
    for ch in text.nfd() {
        if is_combining_mark(ch) {
            continue;
        }
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        if lowercase {
            for lc in ch.to_lowercase() {
                out.push(lc);
            }
        } else {
            out.push(ch);
        }
    }
    out
}

pub fn normalize_query(query: &str) -> String {
    normalize(query, true)
}

/// Normalize each non-empty part and join with single spaces. The result is
/// recomputable from the original fields alone.
pub fn create_searchable_text<'a, I>(parts: I) -> String
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let mut out = String::new();
    for part in parts.into_iter().flatten() {
        let normalized = normalize(part, true);
        if normalized.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&normalized);
    }
    out
}

/// Split `normalize(text)` on non-alphanumeric runs, dropping tokens
/// shorter than 2 characters.
pub fn tokenize(text: &str) -> Vec<String> {
    normalize(text, true)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2)
        .map(|t| t.to_string())
        .collect()
}

/// Truncate to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
