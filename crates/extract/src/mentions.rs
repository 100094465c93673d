//! Person-mention and email-address recognition in body text.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;

/// Proposes candidate person-name spans found in free text.
pub trait MentionRecognizer: Send + Sync {
    fn mentions(&self, text: &str) -> Vec<String>;
}

static NAME_RUN_RX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Z][a-z]+(?:[ \t]+[A-Z][a-z]+){1,2}\b").expect("name run regex")
});

/// Words that start capitalized runs without naming anyone.
const STOP_WORDS: &[&str] = &[
    "The", "This", "That", "These", "Those", "Dear", "Hello", "Hi", "Best", "Kind", "Warm",
    "Regards", "Thanks", "Thank", "Sincerely", "Subject", "Re", "Fwd", "From", "Sent", "Monday",
    "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday", "January", "February",
    "March", "April", "May", "June", "July", "August", "September", "October", "November",
    "December", "New", "Please",
];

/// Heuristic recognizer: runs of two or three capitalized words within
/// one line, minus a stop-word list. A stand-in for a statistical NER
/// model with the same contract.
#[derive(Debug, Default, Clone, Copy)]
pub struct CapitalizedNames;

impl MentionRecognizer for CapitalizedNames {
    fn mentions(&self, text: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for found in NAME_RUN_RX.find_iter(text) {
            let candidate = found.as_str();
            if candidate
                .split_whitespace()
                .any(|word| STOP_WORDS.contains(&word))
            {
                continue;
            }
            if seen.insert(candidate.to_string()) {
                out.push(candidate.to_string());
            }
        }
        out
    }
}

static EMAIL_SCAN_RX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}").expect("email scan regex")
});

/// Email-looking substrings in body text: lowercased, trailing
/// punctuation trimmed, deduplicated in order of first appearance.
pub fn scan_emails(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for found in EMAIL_SCAN_RX.find_iter(text) {
        let cleaned = found
            .as_str()
            .trim_end_matches(['.', ',', ';', ':', ')'])
            .to_lowercase();
        if cleaned.is_empty() {
            continue;
        }
        if seen.insert(cleaned.clone()) {
            out.push(cleaned);
        }
    }
    out
}
