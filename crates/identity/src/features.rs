//! Pairwise feature extraction.
//!
//! Every candidate pair is reduced to a fixed-order numeric vector before
//! it reaches the classifier. Features are all in [0, 1]; booleans encode
//! as 0.0/1.0. A missing component (no parsed last name, not an email)
//! contributes 0 for the affected features, never an error.

use std::collections::HashMap;

use crate::name::{HeuristicNames, NameDecomposer, ParsedName};
use crate::nickname::same_nickname_group;
use crate::normalize::{
    is_email, jaccard, length_similarity, normalize, prefix_ratio, seq_ratio, split_email,
    tokenize,
};

/// Fixed width of the pairwise feature vector. Model artifacts carry
/// weights per feature and are rejected on mismatch.
pub const FEATURE_COUNT: usize = 19;

pub type FeatureVector = [f64; FEATURE_COUNT];

/// Turns identifier pairs into feature vectors, caching one parsed name
/// per distinct identifier string.
pub struct FeatureExtractor {
    names: Box<dyn NameDecomposer>,
    cache: HashMap<String, ParsedName>,
}

impl FeatureExtractor {
    pub fn new(names: Box<dyn NameDecomposer>) -> Self {
        Self {
            names,
            cache: HashMap::new(),
        }
    }

    /// Extractor backed by the built-in rule-based name decomposer.
    pub fn with_heuristics() -> Self {
        Self::new(Box::new(HeuristicNames))
    }

    /// Cached parsed name for an identifier.
    pub fn parsed(&mut self, identifier: &str) -> ParsedName {
        if let Some(hit) = self.cache.get(identifier) {
            return hit.clone();
        }
        let parsed = self.names.decompose(identifier);
        self.cache.insert(identifier.to_string(), parsed.clone());
        parsed
    }

    /// Feature vector for the unordered pair (a, b).
    pub fn features(&mut self, a: &str, b: &str) -> FeatureVector {
        let na = normalize(a);
        let nb = normalize(b);
        let ta = tokenize(&na);
        let tb = tokenize(&nb);

        let a_is_email = is_email(a);
        let b_is_email = is_email(b);
        let (la, da) = if a_is_email {
            split_email(a)
        } else {
            (String::new(), String::new())
        };
        let (lb, db) = if b_is_email {
            split_email(b)
        } else {
            (String::new(), String::new())
        };

        let same_email =
            a_is_email && b_is_email && a.trim().to_lowercase() == b.trim().to_lowercase();
        let same_domain = !da.is_empty() && !db.is_empty() && da == db;
        let local_sim = if !la.is_empty() && !lb.is_empty() {
            seq_ratio(&la, &lb)
        } else {
            0.0
        };

        let pa = self.parsed(a);
        let pb = self.parsed(b);
        let last_same = !pa.last.is_empty() && pa.last == pb.last;
        let last_sim = if !pa.last.is_empty() && !pb.last.is_empty() {
            seq_ratio(&pa.last, &pb.last)
        } else {
            0.0
        };
        let first_same = !pa.first.is_empty() && pa.first == pb.first;
        let first_initial_match = match (pa.first_initial(), pb.first_initial()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        };
        let initials_same = !pa.initials.is_empty() && pa.initials == pb.initials;
        let nickname_match = same_nickname_group(&pa.first, &pb.first);

        // Name-side components for the name-vs-local checks: whichever
        // side parses to something usable.
        let name_side = if pa.is_empty() { &pb } else { &pa };
        let last_in_local = !name_side.last.is_empty()
            && (la.contains(&name_side.last) || lb.contains(&name_side.last));
        let first_in_local = !name_side.first.is_empty()
            && (la.contains(&name_side.first) || lb.contains(&name_side.first));

        let local_structured = (a_is_email && !b_is_email && local_matches_name(&la, &pb))
            || (b_is_email && !a_is_email && local_matches_name(&lb, &pa));

        let len_a = na.chars().count();
        let len_b = nb.chars().count();
        let len_ratio = len_a.min(len_b) as f64 / len_a.max(len_b).max(1) as f64;

        [
            seq_ratio(&na, &nb),
            jaccard(&ta, &tb),
            prefix_ratio(&na, &nb),
            length_similarity(&na, &nb),
            len_ratio,
            flag(same_email),
            flag(same_domain),
            local_sim,
            flag(last_same),
            last_sim,
            flag(first_same),
            flag(first_initial_match),
            flag(initials_same),
            flag(nickname_match),
            flag(last_in_local),
            flag(first_in_local),
            flag(a_is_email),
            flag(b_is_email),
            flag(local_structured),
        ]
    }
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

/// Whether an email local part is structurally one of the usual renderings
/// of a parsed name: first.last, last.first, initial+last, first+last
/// initial, or bare initials. Separators and trailing digits are ignored.
pub fn local_matches_name(local: &str, name: &ParsedName) -> bool {
    if name.first.is_empty() && name.last.is_empty() {
        return false;
    }
    let flat: String = local
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .trim_end_matches(|c: char| c.is_ascii_digit())
        .to_string();
    if flat.is_empty() {
        return false;
    }
    let first = name.first.replace('.', "");
    let last = name.last.replace('.', "");
    let fi: String = first.chars().take(1).collect();
    let li: String = last.chars().take(1).collect();
    let mut candidates = Vec::new();
    if !first.is_empty() && !last.is_empty() {
        candidates.push(format!("{first}{last}"));
        candidates.push(format!("{last}{first}"));
        candidates.push(format!("{fi}{last}"));
        candidates.push(format!("{first}{li}"));
    } else if !last.is_empty() {
        candidates.push(last.clone());
    } else {
        candidates.push(first.clone());
    }
    if !name.initials.is_empty() && name.initials.chars().count() > 1 {
        candidates.push(name.initials.clone());
    }
    candidates.iter().any(|c| c == &flat)
}
