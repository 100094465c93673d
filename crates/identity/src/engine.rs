//! Clustering engine: blocking, scoring, guardrails, components.

use once_cell::sync::Lazy;
use petgraph::graph::NodeIndex;
use regex::Regex;

use crate::blocking::{candidate_pairs, DEFAULT_MAX_BUCKET};
use crate::error::Result;
use crate::features::FeatureExtractor;
use crate::graph::IdentityGraph;
use crate::guardrail;
use crate::model::{MatchModel, MatchScorer};
use crate::normalize::strip_bracket_wrapping;

/// Minimum classifier probability for an edge to be considered at all.
pub const DEFAULT_THRESHOLD: f64 = 0.95;

static HEADER_LABEL_RX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\s*(?:to|from|cc|bcc)\s*:\s*").expect("header label regex"));

/// Resolves a universe of identifier strings into identity clusters.
///
/// One engine instance drives one indexing job; the parsed-name cache
/// inside the extractor warms up over the job's universe and is dropped
/// with the engine.
pub struct IdentityEngine {
    extractor: FeatureExtractor,
    model: MatchModel,
    threshold: f64,
    max_bucket: usize,
}

impl IdentityEngine {
    pub fn new(model: MatchModel, threshold: f64) -> Self {
        Self {
            extractor: FeatureExtractor::with_heuristics(),
            model,
            threshold,
            max_bucket: DEFAULT_MAX_BUCKET,
        }
    }

    pub fn with_extractor(model: MatchModel, threshold: f64, extractor: FeatureExtractor) -> Self {
        Self {
            extractor,
            model,
            threshold,
            max_bucket: DEFAULT_MAX_BUCKET,
        }
    }

    pub fn max_bucket(mut self, max_bucket: usize) -> Self {
        self.max_bucket = max_bucket;
        self
    }

    /// Cluster the identifier universe into connected components.
    ///
    /// Inputs in the single-address `Display Name <email>` form split
    /// into two nodes joined by a forced edge that bypasses both the
    /// classifier and the guardrails. Everything else is linked only
    /// when the classifier clears the threshold and the structural
    /// guardrail for the pair type agrees.
    pub fn cluster(&mut self, identifiers: &[String]) -> Result<Vec<Vec<String>>> {
        if identifiers.is_empty() {
            return Ok(Vec::new());
        }

        let mut graph = IdentityGraph::new();
        let mut forced: Vec<(NodeIndex, NodeIndex)> = Vec::new();
        for raw in identifiers {
            let unwrapped = strip_bracket_wrapping(raw);
            match split_single_address(&unwrapped) {
                Some((display, email)) => {
                    let email_node = graph.intern(&email);
                    if let Some(display) = display {
                        let display_node = graph.intern(&display);
                        forced.push((display_node, email_node));
                    }
                }
                None => {
                    graph.intern(&unwrapped);
                }
            }
        }

        let universe = graph.identifiers().to_vec();
        let parsed: Vec<_> = universe.iter().map(|id| self.extractor.parsed(id)).collect();
        let pairs = candidate_pairs(&universe, &parsed, self.max_bucket);
        log::debug!(
            "clustering {} identifiers: {} candidate pairs",
            universe.len(),
            pairs.len()
        );

        let forced_count = forced.len();
        for (a, b) in forced {
            graph.connect(a, b);
        }
        let mut accepted = 0usize;
        let mut vetoed = 0usize;
        for (i, j) in pairs {
            let a = &universe[i];
            let b = &universe[j];
            let features = self.extractor.features(a, b);
            let probability = self.model.score(&features)?;
            if probability < self.threshold {
                continue;
            }
            if !guardrail::edge_allowed(a, b, &parsed[i], &parsed[j]) {
                vetoed += 1;
                log::debug!("guardrail vetoed {a:?} ~ {b:?} (p={probability:.3})");
                continue;
            }
            accepted += 1;
            graph.connect(NodeIndex::new(i), NodeIndex::new(j));
        }
        log::info!("clustering accepted {accepted} edges, vetoed {vetoed}, {forced_count} forced");

        Ok(graph.components())
    }
}

/// Split a single-address `Display Name <email>` string into its display
/// and address halves. List-valued strings (comma or semicolon) and
/// strings without an angle-bracket pair return `None`.
///
/// Header labels swallowed into the display half ("To: Grace Hopper")
/// are stripped; a label-only display yields an address-only result.
pub fn split_single_address(value: &str) -> Option<(Option<String>, String)> {
    if value.contains(',') || value.contains(';') {
        return None;
    }
    let open = value.find('<')?;
    let close = open + value[open..].find('>')?;
    let email = value[open + 1..close].trim();
    if email.is_empty() {
        return None;
    }
    let display = value[..open].trim().trim_matches('"').trim();
    let display = HEADER_LABEL_RX.replace(display, "").trim().to_string();
    let display = if display.is_empty() { None } else { Some(display) };
    Some((display, email.to_string()))
}

/// Default "gold" label for a cluster: prefer name-like members (those
/// containing a space or comma), longest first, ties lexicographic;
/// otherwise the smallest email; otherwise the longest member.
pub fn canonical_label(members: &[String]) -> String {
    let name_like: Vec<&String> = members
        .iter()
        .filter(|m| !m.contains('@'))
        .collect();
    if !name_like.is_empty() {
        let mut ranked = name_like;
        ranked.sort_by(|a, b| {
            let a_shaped = a.contains(' ') || a.contains(',');
            let b_shaped = b.contains(' ') || b.contains(',');
            b_shaped
                .cmp(&a_shaped)
                .then_with(|| b.chars().count().cmp(&a.chars().count()))
                .then_with(|| a.to_lowercase().cmp(&b.to_lowercase()))
        });
        return ranked[0].clone();
    }
    if let Some(email) = members.iter().filter(|m| m.contains('@')).min() {
        return email.clone();
    }
    let mut ranked: Vec<&String> = members.iter().collect();
    ranked.sort_by(|a, b| {
        b.chars()
            .count()
            .cmp(&a.chars().count())
            .then_with(|| a.to_lowercase().cmp(&b.to_lowercase()))
    });
    ranked.first().map(|s| s.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn single_address_form_splits() {
        assert_eq!(
            split_single_address("Ada Lovelace <ada@example.org>"),
            Some((Some("Ada Lovelace".to_string()), "ada@example.org".to_string()))
        );
        assert_eq!(
            split_single_address("<ops@example.org>"),
            Some((None, "ops@example.org".to_string()))
        );
    }

    #[test]
    fn header_labels_are_stripped_from_the_display_half() {
        assert_eq!(
            split_single_address("To: Grace Hopper <grace@navy.example>"),
            Some((Some("Grace Hopper".to_string()), "grace@navy.example".to_string()))
        );
        assert_eq!(
            split_single_address("from: <ops@example.org>"),
            Some((None, "ops@example.org".to_string()))
        );
    }

    #[test]
    fn lists_and_plain_strings_do_not_split() {
        assert_eq!(split_single_address("a <a@x.example>, b <b@x.example>"), None);
        assert_eq!(split_single_address("Ada Lovelace"), None);
        assert_eq!(split_single_address("empty <>"), None);
    }

    #[test]
    fn label_prefers_shaped_names_then_length() {
        let members = vec![
            "ada@example.org".to_string(),
            "Ada".to_string(),
            "Ada Lovelace".to_string(),
        ];
        assert_eq!(canonical_label(&members), "Ada Lovelace");
    }

    #[test]
    fn label_falls_back_to_smallest_email() {
        let members = vec![
            "zeta@example.org".to_string(),
            "ada@example.org".to_string(),
        ];
        assert_eq!(canonical_label(&members), "ada@example.org");
        assert_eq!(canonical_label(&[]), "");
    }
}
