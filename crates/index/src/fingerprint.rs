//! Document fingerprints: exact and near-duplicate.
//!
//! The exact fingerprint (sha-256 of normalized text) gates ingestion:
//! a part whose hash was already seen in the same job is dropped. The
//! near-duplicate simhash is computed and stored per part but never
//! filters anything; it exists for offline duplicate analysis.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

use mailsift_extract::unescape_entities;

/// Shingle width in words for the near-duplicate fingerprint.
pub const SHINGLE_WORDS: usize = 5;

static PUNCT_GAP_RX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\s*([,.;:!?()\[\]{}<>/\\|@#$%^&*_+=~\-])\s*").expect("punct gap regex")
});

/// Canonical fingerprint text: HTML entities unescaped, Unicode
/// compatibility-normalized, non-breaking spaces flattened, punctuation
/// spaced out, whitespace collapsed.
pub fn normalize_text(text: &str) -> String {
    let unescaped = unescape_entities(text);
    let folded: String = unescaped.nfkc().collect();
    let spaced = folded.replace('\u{a0}', " ");
    let gapped = PUNCT_GAP_RX.replace_all(&spaced, " $1 ");
    gapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Exact fingerprint: hex sha-256 of the normalized text.
pub fn exact_hash(text: &str) -> String {
    let digest = Sha256::digest(normalize_text(text).as_bytes());
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// 64-bit simhash over overlapping word shingles of the normalized
/// text. Empty input yields the fixed zero fingerprint.
pub fn simhash64(text: &str) -> u64 {
    let normalized = normalize_text(text);
    let words: Vec<&str> = normalized.split_whitespace().collect();
    if words.is_empty() {
        return 0;
    }
    let mut votes = [0i32; 64];
    for shingle in shingles(&words) {
        let hash = shingle_hash(&shingle);
        for (bit, vote) in votes.iter_mut().enumerate() {
            if (hash >> bit) & 1 == 1 {
                *vote += 1;
            } else {
                *vote -= 1;
            }
        }
    }
    let mut fingerprint = 0u64;
    for (bit, vote) in votes.iter().enumerate() {
        if *vote >= 0 {
            fingerprint |= 1 << bit;
        }
    }
    fingerprint
}

fn shingles(words: &[&str]) -> Vec<String> {
    if words.len() < SHINGLE_WORDS {
        return vec![words.join(" ")];
    }
    words
        .windows(SHINGLE_WORDS)
        .map(|window| window.join(" "))
        .collect()
}

fn shingle_hash(shingle: &str) -> u64 {
    let digest = Sha256::digest(shingle.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Hamming distance between two fingerprints.
pub fn hamming(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// Job-scoped exact-fingerprint dedup state. One instance per indexing
/// job; never shared across jobs.
#[derive(Debug, Default)]
pub struct SeenParts(HashSet<String>);

impl SeenParts {
    pub fn new() -> Self {
        Self::default()
    }

    /// True the first time a hash is offered, false on every repeat.
    pub fn first_sighting(&mut self, hash: &str) -> bool {
        self.0.insert(hash.to_string())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Leader-based near-duplicate grouping: each fingerprint joins the
/// first group whose leader lies within `max_distance` bits; otherwise
/// it founds a new group.
pub fn group_by_simhash(entries: &[(String, u64)], max_distance: u32) -> Vec<Vec<String>> {
    let mut groups: Vec<(u64, Vec<String>)> = Vec::new();
    for (id, fingerprint) in entries {
        match groups
            .iter_mut()
            .find(|(leader, _)| hamming(*leader, *fingerprint) <= max_distance)
        {
            Some((_, members)) => members.push(id.clone()),
            None => groups.push((*fingerprint, vec![id.clone()])),
        }
    }
    groups.into_iter().map(|(_, members)| members).collect()
}
