//! FTS5 text normalization and query sanitization
//!
//! Identifiers are split on case and underscore boundaries on BOTH sides of
//! the index: stored text is normalized into word tokens before insertion,
//! and raw user queries are stripped of FTS5 operators (`"`, `*`, `:`,
//! parens) and reduced to the same token form, joined with OR so any
//! keyword can match.

/// Cap on the sanitized query to bound FTS work on pathological input.
const MAX_FTS_QUERY_TOKENS: usize = 32;

/// Cap on normalized document text to bound index size on huge fragments.
const MAX_FTS_OUTPUT_LEN: usize = 16 * 1024;

/// Normalize fragment text for the FTS index: lowercase word tokens with
/// identifiers split on case and underscore boundaries.
pub fn normalize_for_fts(text: &str) -> String {
    let mut out = String::new();
    for word in text.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
        if word.is_empty() {
            continue;
        }
        for token in tokenize_identifier(word) {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&token);
            if out.len() >= MAX_FTS_OUTPUT_LEN {
                // Truncate at the last whole token
                return out;
            }
        }
    }
    out
}

/// Sanitize free text into an FTS5 MATCH expression. Returns an empty
/// string when nothing searchable remains.
pub fn sanitize_fts_query(query: &str) -> String {
    let mut tokens: Vec<String> = Vec::new();
    for word in query.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
        if word.is_empty() {
            continue;
        }
        for token in tokenize_identifier(word) {
            if token.len() > 1 || token.chars().all(|c| c.is_ascii_digit()) {
                tokens.push(format!("\"{}\"", token));
            }
            if tokens.len() >= MAX_FTS_QUERY_TOKENS {
                return tokens.join(" OR ");
            }
        }
    }
    tokens.join(" OR ")
}

/// Split an identifier into lowercase word tokens:
/// `parseConfigFile` -> ["parse", "config", "file"],
/// `read_to_string` -> ["read", "to", "string"].
pub fn tokenize_identifier(ident: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    for c in ident.chars() {
        if c == '_' || c == '-' {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
        } else if c.is_uppercase() && !current.is_empty() && current.chars().last().is_some_and(|p| p.is_lowercase()) {
            tokens.push(std::mem::take(&mut current));
            current.push(c.to_ascii_lowercase());
        } else {
            current.push(c.to_ascii_lowercase());
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}
