//! Per-identifier postings.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use mailsift_extract::{scan_emails, DocumentPart, MentionRecognizer};

/// Where an identifier occurred in a message part.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    From,
    Recipient,
    Body,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::From => "from",
            Role::Recipient => "recipient",
            Role::Body => "body",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One occurrence record. No duplicate (part_id, role) pair ever exists
/// for the same identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Posting {
    pub part_id: String,
    pub role: Role,
}

/// identifier → ordered postings, deduplicated by (part_id, role).
/// Serializes directly as the `identifier_postings.json` artifact.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PostingsIndex {
    #[serde(flatten)]
    map: BTreeMap<String, Vec<Posting>>,
}

impl PostingsIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one occurrence; blank identifiers and repeats are dropped.
    pub fn add(&mut self, identifier: &str, part_id: &str, role: Role) {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return;
        }
        let postings = self.map.entry(identifier.to_string()).or_default();
        if !postings
            .iter()
            .any(|p| p.part_id == part_id && p.role == role)
        {
            postings.push(Posting {
                part_id: part_id.to_string(),
                role,
            });
        }
    }

    /// Postings for one identifier; empty for unknown identifiers.
    pub fn get(&self, identifier: &str) -> &[Posting] {
        self.map.get(identifier).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.map.contains_key(identifier)
    }

    /// All indexed identifiers in sorted order.
    pub fn identifiers(&self) -> impl Iterator<Item = &String> {
        self.map.keys()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Build the postings index for a job by scanning every part: sender
/// name and email post as `from`, every recipient as `recipient`, and
/// body text contributes `body` postings for recognized person mentions
/// and email-looking substrings.
pub fn build_postings(parts: &[DocumentPart], recognizer: &dyn MentionRecognizer) -> PostingsIndex {
    let mut index = PostingsIndex::new();
    for part in parts {
        if !part.from.name.is_empty() {
            index.add(&part.from.name, &part.part_id, Role::From);
        }
        if !part.from.email.is_empty() {
            index.add(&part.from.email, &part.part_id, Role::From);
        }
        for recipient in &part.recipients {
            if !recipient.name.is_empty() {
                index.add(&recipient.name, &part.part_id, Role::Recipient);
            }
            if !recipient.email.is_empty() {
                index.add(&recipient.email, &part.part_id, Role::Recipient);
            }
        }
        for mention in recognizer.mentions(&part.body_text) {
            // Recognizers may return sloppy multi-line spans.
            let cleaned = mention.lines().next().unwrap_or("").trim();
            index.add(cleaned, &part.part_id, Role::Body);
        }
        for email in scan_emails(&part.body_text) {
            index.add(&email, &part.part_id, Role::Body);
        }
    }
    log::debug!("postings index covers {} identifiers", index.len());
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailsift_extract::{CapitalizedNames, Person};
    use pretty_assertions::assert_eq;

    fn part(id: &str, from: (&str, &str), to: &[(&str, &str)], body: &str) -> DocumentPart {
        DocumentPart {
            part_id: id.to_string(),
            from: Person {
                name: from.0.to_string(),
                email: from.1.to_string(),
                raw: String::new(),
            },
            recipients: to
                .iter()
                .map(|(name, email)| Person {
                    name: name.to_string(),
                    email: email.to_string(),
                    raw: String::new(),
                })
                .collect(),
            body_text: body.to_string(),
            ..DocumentPart::default()
        }
    }

    #[test]
    fn roles_are_assigned_per_occurrence() {
        let parts = vec![part(
            "p1",
            ("Ada Lovelace", "ada@example.org"),
            &[("Grace Hopper", "grace@navy.example")],
            "Please loop in Bob Tran (bob.tran@corp.example).",
        )];
        let index = build_postings(&parts, &CapitalizedNames);

        assert_eq!(index.get("Ada Lovelace"), &[Posting { part_id: "p1".into(), role: Role::From }]);
        assert_eq!(index.get("ada@example.org")[0].role, Role::From);
        assert_eq!(index.get("Grace Hopper")[0].role, Role::Recipient);
        assert_eq!(index.get("grace@navy.example")[0].role, Role::Recipient);
        assert_eq!(index.get("Bob Tran")[0].role, Role::Body);
        assert_eq!(index.get("bob.tran@corp.example")[0].role, Role::Body);
    }

    #[test]
    fn duplicate_occurrences_collapse() {
        let mut index = PostingsIndex::new();
        index.add("ada@example.org", "p1", Role::From);
        index.add("ada@example.org", "p1", Role::From);
        index.add("ada@example.org", "p1", Role::Body);
        assert_eq!(index.get("ada@example.org").len(), 2);
    }

    #[test]
    fn blank_identifiers_are_dropped() {
        let mut index = PostingsIndex::new();
        index.add("   ", "p1", Role::From);
        assert!(index.is_empty());
    }

    #[test]
    fn serializes_as_a_flat_map() {
        let mut index = PostingsIndex::new();
        index.add("ada@example.org", "p1", Role::From);
        let json = serde_json::to_value(&index).expect("serialize");
        assert_eq!(json["ada@example.org"][0]["part_id"], "p1");
        assert_eq!(json["ada@example.org"][0]["role"], "from");
    }
}
