//! Text normalization and string-similarity primitives shared by the
//! blocking, feature and guardrail layers.
//!
//! Everything here is pure: no caches, no state, byte-for-byte
//! deterministic for a given input.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

static EMAIL_RX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex"));

static BRACKETED_RX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*<\s*([^>]+?)\s*>\s*$").expect("bracket regex"));

/// Fold a string to ASCII: NFKD-decompose and drop everything that does
/// not survive as a plain ASCII character.
pub fn strip_accents(value: &str) -> String {
    value.nfkd().filter(char::is_ascii).collect()
}

/// Canonical comparison form: accent-folded, lowercased, inner whitespace
/// collapsed to single spaces, outer whitespace trimmed.
pub fn normalize(value: &str) -> String {
    strip_accents(value)
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Alphanumeric tokens of an already-normalized string.
pub fn tokenize(normalized: &str) -> Vec<String> {
    normalized
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whether the trimmed string looks like a single email address.
pub fn is_email(value: &str) -> bool {
    EMAIL_RX.is_match(value.trim())
}

/// Split an email-like string into `(local, domain)`, both lowercased.
///
/// A leading-`@` handle yields `(handle, "")`. Strings without an `@`
/// yield two empty strings.
pub fn split_email(value: &str) -> (String, String) {
    let value = value.trim().to_lowercase();
    if let Some(handle) = value.strip_prefix('@') {
        return (handle.to_string(), String::new());
    }
    match value.split_once('@') {
        Some((local, domain)) => (local.to_string(), domain.to_string()),
        None => (String::new(), String::new()),
    }
}

/// Unwrap a bare `<addr>` form; other inputs come back unchanged.
pub fn strip_bracket_wrapping(value: &str) -> String {
    match BRACKETED_RX.captures(value) {
        Some(caps) => caps[1].to_string(),
        None => value.to_string(),
    }
}

/// Sequence-similarity ratio `2 * M / (len a + len b)` where `M` counts
/// characters inside recursively extracted longest matching blocks.
/// Two empty strings compare as identical.
pub fn seq_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let matched = matching_chars(&a, &b);
    2.0 * matched as f64 / total as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let (ai, bi, len) = longest_match(a, b);
    if len == 0 {
        return 0;
    }
    len + matching_chars(&a[..ai], &b[..bi]) + matching_chars(&a[ai + len..], &b[bi + len..])
}

/// Earliest longest matching block between `a` and `b`.
fn longest_match(a: &[char], b: &[char]) -> (usize, usize, usize) {
    let mut positions: HashMap<char, Vec<usize>> = HashMap::new();
    for (j, &c) in b.iter().enumerate() {
        positions.entry(c).or_default().push(j);
    }
    let (mut best_a, mut best_b, mut best_len) = (0usize, 0usize, 0usize);
    let mut run_ending_at: HashMap<usize, usize> = HashMap::new();
    for (i, c) in a.iter().enumerate() {
        let mut next_runs: HashMap<usize, usize> = HashMap::new();
        if let Some(js) = positions.get(c) {
            for &j in js {
                let run = 1 + j
                    .checked_sub(1)
                    .and_then(|prev| run_ending_at.get(&prev))
                    .copied()
                    .unwrap_or(0);
                next_runs.insert(j, run);
                if run > best_len {
                    best_a = i + 1 - run;
                    best_b = j + 1 - run;
                    best_len = run;
                }
            }
        }
        run_ending_at = next_runs;
    }
    (best_a, best_b, best_len)
}

/// Jaccard overlap of two token multisets (treated as sets). Two empty
/// token lists compare as fully dissimilar.
pub fn jaccard(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let sa: HashSet<&str> = a.iter().map(String::as_str).collect();
    let sb: HashSet<&str> = b.iter().map(String::as_str).collect();
    let union = sa.union(&sb).count();
    if union == 0 {
        return 0.0;
    }
    sa.intersection(&sb).count() as f64 / union as f64
}

/// `1 - |len a - len b| / (len a + len b)`; 1.0 when both are empty.
pub fn length_similarity(a: &str, b: &str) -> f64 {
    let la = a.chars().count() as f64;
    let lb = b.chars().count() as f64;
    if la + lb == 0.0 {
        return 1.0;
    }
    1.0 - (la - lb).abs() / (la + lb)
}

/// Shared-prefix length over the longer input's length.
pub fn prefix_ratio(a: &str, b: &str) -> f64 {
    let ac: Vec<char> = a.chars().collect();
    let bc: Vec<char> = b.chars().collect();
    let common = ac.iter().zip(bc.iter()).take_while(|(x, y)| x == y).count();
    common as f64 / ac.len().max(bc.len()).max(1) as f64
}
