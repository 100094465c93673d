//! Display-name decomposition.
//!
//! The clustering pipeline never looks at raw strings when it reasons
//! about people; it works on [`ParsedName`] components produced by a
//! [`NameDecomposer`]. The default [`HeuristicNames`] implementation
//! covers the header shapes that actually show up in mail corpora:
//! `First Last`, `Last, First`, titles, suffixes and particle surnames.

use serde::{Deserialize, Serialize};

use crate::normalize::{is_email, strip_accents};

/// Lowercased components of a person's display name. All fields are empty
/// for inputs recognized as email addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedName {
    pub first: String,
    pub middle: String,
    pub last: String,
    pub title: String,
    pub suffix: String,
    /// First letters of first, middle and last, concatenated.
    pub initials: String,
}

impl ParsedName {
    pub fn is_empty(&self) -> bool {
        self.first.is_empty()
            && self.middle.is_empty()
            && self.last.is_empty()
            && self.title.is_empty()
            && self.suffix.is_empty()
    }

    pub fn first_initial(&self) -> Option<char> {
        self.first.chars().next()
    }
}

/// Splits a display string into name components.
///
/// Implementations must return an all-empty [`ParsedName`] for strings
/// recognized as email addresses.
pub trait NameDecomposer: Send + Sync {
    fn decompose(&self, raw: &str) -> ParsedName;
}

const TITLES: &[&str] = &[
    "mr", "mrs", "ms", "miss", "mx", "dr", "prof", "sir", "madam", "rev", "hon", "capt", "lt",
    "sgt",
];

const SUFFIXES: &[&str] = &[
    "jr", "sr", "ii", "iii", "iv", "v", "phd", "md", "esq", "dds", "jd",
];

/// Particles that glue onto the surname ("van Rossum", "de la Cruz").
const LAST_PREFIXES: &[&str] = &[
    "van", "von", "de", "del", "della", "der", "den", "di", "da", "la", "le", "mac", "mc", "bin",
    "al", "st",
];

/// Rule-based [`NameDecomposer`] with no external data files.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicNames;

impl NameDecomposer for HeuristicNames {
    fn decompose(&self, raw: &str) -> ParsedName {
        if raw.trim().is_empty() || is_email(raw) {
            return ParsedName::default();
        }
        let folded = strip_accents(raw).to_lowercase();
        let mut parsed = match folded.split_once(',') {
            Some((last_part, rest)) => parse_comma_form(last_part, rest),
            None => parse_natural_order(&folded),
        };
        parsed.initials = [&parsed.first, &parsed.middle, &parsed.last]
            .iter()
            .filter_map(|part| part.chars().next())
            .collect();
        parsed
    }
}

/// `Last, First [Middle] [, Suffix]` ordering.
fn parse_comma_form(last_part: &str, rest: &str) -> ParsedName {
    let mut parsed = ParsedName {
        last: last_part.split_whitespace().collect::<Vec<_>>().join(" "),
        ..ParsedName::default()
    };
    let mut given: Vec<&str> = Vec::new();
    let mut suffixes: Vec<&str> = Vec::new();
    for chunk in rest.split(',') {
        for token in chunk.split_whitespace() {
            if SUFFIXES.contains(&token.trim_matches('.')) {
                suffixes.push(token);
            } else if TITLES.contains(&token.trim_matches('.')) {
                parsed.title = token.trim_matches('.').to_string();
            } else {
                given.push(token);
            }
        }
    }
    if let Some((first, middle)) = given.split_first() {
        parsed.first = first.to_string();
        parsed.middle = middle.join(" ");
    }
    parsed.suffix = suffixes.join(" ");
    parsed
}

/// `[Title] First [Middle...] Last [Suffix]` ordering.
fn parse_natural_order(folded: &str) -> ParsedName {
    let mut tokens: Vec<&str> = folded.split_whitespace().collect();
    let mut parsed = ParsedName::default();

    let mut titles: Vec<&str> = Vec::new();
    while let Some(first) = tokens.first() {
        if TITLES.contains(&first.trim_matches('.')) {
            titles.push(first.trim_matches('.'));
            tokens.remove(0);
        } else {
            break;
        }
    }
    parsed.title = titles.join(" ");

    let mut suffixes: Vec<&str> = Vec::new();
    while let Some(last) = tokens.last() {
        if SUFFIXES.contains(&last.trim_matches('.')) && tokens.len() > 1 {
            suffixes.insert(0, last.trim_matches('.'));
            tokens.pop();
        } else {
            break;
        }
    }
    parsed.suffix = suffixes.join(" ");

    match tokens.len() {
        0 => {}
        1 => {
            // A lone word after a title reads as a surname ("Mr Smith").
            if parsed.title.is_empty() {
                parsed.first = tokens[0].to_string();
            } else {
                parsed.last = tokens[0].to_string();
            }
        }
        _ => {
            let mut last_start = tokens.len() - 1;
            while last_start > 1 && LAST_PREFIXES.contains(&tokens[last_start - 1]) {
                last_start -= 1;
            }
            parsed.first = tokens[0].to_string();
            parsed.middle = tokens[1..last_start].join(" ");
            parsed.last = tokens[last_start..].join(" ");
        }
    }
    parsed
}
