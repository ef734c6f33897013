//! Term canonicalization.
//!
//! Maps any query fragment or stored term to the canonical lookup key used
//! by the keyword index: lowercased, punctuation stripped (internal hyphens
//! kept), underscores folded to spaces, a fixed plural→singular table, and
//! a fixed acronym table. The same normalization runs at index build time,
//! so query-side lookups need no variant expansion.
//!
//! Everything here is pure and idempotent:
//! `canonicalize(canonicalize(x)) == canonicalize(x)`.

/// Fixed plural→singular table. The corpus index is built with the same
/// table; no general-purpose stemming is applied on either side.
const PLURALS: &[(&str, &str)] = &[
    ("agents", "agent"),
    ("banks", "bank"),
    ("bankers", "banker"),
    ("bonds", "bond"),
    ("branches", "branch"),
    ("catholics", "catholic"),
    ("christians", "christian"),
    ("communities", "community"),
    ("crashes", "crash"),
    ("crises", "crisis"),
    ("currencies", "currency"),
    ("debts", "debt"),
    ("dynasties", "dynasty"),
    ("families", "family"),
    ("firms", "firm"),
    ("houses", "house"),
    ("huguenots", "huguenot"),
    ("identities", "identity"),
    ("jews", "jew"),
    ("loans", "loan"),
    ("markets", "market"),
    ("merchants", "merchant"),
    ("minorities", "minority"),
    ("muslims", "muslim"),
    ("networks", "network"),
    ("panics", "panic"),
    ("partners", "partner"),
    ("protestants", "protestant"),
    ("quakers", "quaker"),
    ("railways", "railway"),
    ("wars", "war"),
];

/// Fixed acronym expansions. Expansion targets must themselves be fixed
/// points of [`canonicalize`] or idempotence breaks.
const ACRONYMS: &[(&str, &str)] = &[
    ("ww1", "world war i"),
    ("ww2", "world war ii"),
    ("wwi", "world war i"),
    ("wwii", "world war ii"),
    ("gfc", "global financial crisis"),
];

/// Stop words filtered by [`tokenize`]. Kept small and corpus-tuned;
/// identity and place terms must never appear here.
const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "an", "and", "are", "at", "be", "been", "before", "between", "by",
    "can", "could", "did", "do", "does", "during", "for", "from", "how", "in", "into", "is", "it",
    "its", "me", "more", "most", "of", "on", "or", "over", "please", "some", "such", "tell",
    "than", "that", "the", "their", "then", "there", "these", "they", "this", "those", "to",
    "under", "was", "were", "what", "when", "where", "which", "who", "why", "with", "would",
    "you",
];

fn singularize(word: &str) -> &str {
    PLURALS
        .iter()
        .find(|(plural, _)| *plural == word)
        .map_or(word, |(_, singular)| singular)
}

fn expand_acronym(word: &str) -> &str {
    ACRONYMS
        .iter()
        .find(|(acronym, _)| *acronym == word)
        .map_or(word, |(_, expansion)| expansion)
}

/// Returns `true` if the token is on the fixed stop-word list.
#[must_use]
pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.binary_search(&token).is_ok()
}

/// Canonicalizes a raw term or query fragment.
///
/// Lowercases, strips punctuation except internal hyphens, folds
/// underscores to spaces, collapses whitespace, applies the plural table
/// per word, then expands acronyms. Pure and idempotent.
#[must_use]
pub fn canonicalize(raw: &str) -> String {
    let mut folded = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == '-' {
            folded.push('-');
        } else if c.is_alphanumeric() {
            // Lowercasing can emit combining marks (e.g. İ → i + U+0307);
            // keep only alphanumerics so the result is a fixed point.
            for lc in c.to_lowercase().filter(|lc: &char| lc.is_alphanumeric()) {
                folded.push(lc);
            }
        } else if c == '_' || c.is_whitespace() {
            folded.push(' ');
        }
        // other punctuation dropped
    }

    let mut words: Vec<&str> = Vec::new();
    for word in folded.split_whitespace() {
        let word = word.trim_matches('-');
        if word.is_empty() {
            continue;
        }
        words.push(expand_acronym(singularize(word)));
    }
    words.join(" ")
}

/// Tokenizes a question into ordered canonical tokens, dropping stop words.
#[must_use]
pub fn tokenize(question: &str) -> Vec<String> {
    canonicalize(question)
        .split_whitespace()
        .filter(|t| !is_stop_word(t))
        .map(ToString::to_string)
        .collect()
}
