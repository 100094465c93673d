//! Candidate-pair blocking.
//!
//! Scoring every pair of identifiers is quadratic; blocking cuts the
//! candidate set down to pairs that share at least one structural bucket
//! key. Oversized buckets are dropped wholesale, trading recall inside
//! them for a bounded pair count.

use std::collections::{BTreeMap, BTreeSet};

use crate::name::ParsedName;
use crate::nickname::nickname_group;
use crate::normalize::{is_email, normalize, split_email};

/// Buckets with more members than this produce no candidate pairs.
pub const DEFAULT_MAX_BUCKET: usize = 5000;

/// Bucket keys for one identifier.
///
/// Emails contribute their domain plus person-name readings of the local
/// part; names contribute last-name keys refined by first initial and
/// nickname group. Identifiers that produce nothing else fall back to a
/// short normalized-prefix key so they still meet near-identical twins.
pub fn blocking_keys(identifier: &str, parsed: &ParsedName) -> Vec<String> {
    let mut keys = Vec::new();
    if is_email(identifier) {
        let (local, domain) = split_email(identifier);
        if !domain.is_empty() {
            keys.push(format!("dom:{domain}"));
        }
        keys.extend(local_part_keys(&local));
    } else if !parsed.last.is_empty() {
        keys.push(format!("ln:{}", parsed.last));
        if let Some(initial) = parsed.first_initial() {
            keys.push(format!("lnfi:{}:{}", parsed.last, initial));
        }
        if let Some(group) = nickname_group(&parsed.first) {
            keys.push(format!("lnng:{}:{}", parsed.last, group));
        }
    }
    if keys.is_empty() {
        let prefix: String = normalize(identifier)
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .take(5)
            .collect();
        if !prefix.is_empty() {
            keys.push(format!("npx5:{prefix}"));
        }
    }
    keys
}

/// Read a separator-split local part as a person name, trying both
/// (first, last) and (last, first) orders. Single-character tokens only
/// ever act as initials; trailing digits are noise and are trimmed.
fn local_part_keys(local: &str) -> Vec<String> {
    let tokens: Vec<String> = local
        .split(|c: char| !c.is_ascii_alphanumeric())
        .map(|t| t.trim_end_matches(|c: char| c.is_ascii_digit()).to_string())
        .filter(|t| !t.is_empty())
        .collect();
    let mut keys = Vec::new();
    match tokens.as_slice() {
        [only] if only.chars().count() >= 2 => {
            keys.push(format!("ln:{only}"));
        }
        [a, b] => {
            for (first, last) in [(a, b), (b, a)] {
                if last.chars().count() < 2 {
                    continue;
                }
                if first.chars().count() == 1 {
                    keys.push(format!("lnfi:{last}:{first}"));
                } else {
                    keys.push(format!("ln:{last}"));
                    if let Some(initial) = first.chars().next() {
                        keys.push(format!("lnfi:{last}:{initial}"));
                    }
                }
            }
        }
        _ => {}
    }
    keys
}

/// All unordered candidate index pairs whose identifiers share a bucket.
/// `parsed` must be parallel to `universe`.
pub fn candidate_pairs(
    universe: &[String],
    parsed: &[ParsedName],
    max_bucket: usize,
) -> Vec<(usize, usize)> {
    debug_assert_eq!(universe.len(), parsed.len());
    let mut buckets: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (idx, identifier) in universe.iter().enumerate() {
        for key in blocking_keys(identifier, &parsed[idx]) {
            buckets.entry(key).or_default().push(idx);
        }
    }
    let mut pairs: BTreeSet<(usize, usize)> = BTreeSet::new();
    for (key, members) in &buckets {
        if members.len() <= 1 {
            continue;
        }
        if members.len() > max_bucket {
            log::debug!("skipping oversized bucket {key}: {} members", members.len());
            continue;
        }
        for (pos, &a) in members.iter().enumerate() {
            for &b in &members[pos + 1..] {
                pairs.insert((a.min(b), a.max(b)));
            }
        }
    }
    pairs.into_iter().collect()
}
