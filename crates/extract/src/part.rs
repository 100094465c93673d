//! Extraction output types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A person reference as parsed from one address in a header value.
/// Either half may be empty, never both for a kept reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Person {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    /// The decoded header chunk this person came from.
    #[serde(default)]
    pub raw: String,
}

impl Person {
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.email.is_empty()
    }

    /// Mail-client rendering: `Name <email>` when both halves exist.
    pub fn display(&self) -> String {
        match (self.name.is_empty(), self.email.is_empty()) {
            (false, false) => format!("{} <{}>", self.name, self.email),
            (false, true) => self.name.clone(),
            (true, false) => self.email.clone(),
            (true, true) => String::new(),
        }
    }
}

/// One analyzable fragment of a message: the body or one attachment,
/// carrying a copy of the message envelope. Immutable once indexed.
///
/// Serialized field names match the on-disk `parts.json` artifact. The
/// `part_id`, `part_hash` and `part_simhash` fields are filled in by the
/// indexing job, not during extraction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentPart {
    #[serde(rename = "PartId", default)]
    pub part_id: String,
    #[serde(rename = "MessageId", default)]
    pub message_id: String,
    #[serde(rename = "Subject", default)]
    pub subject: String,
    /// Raw Date header value; parsed best-effort only at sort time.
    #[serde(rename = "Date", default)]
    pub date: String,
    #[serde(rename = "From", default)]
    pub from: Person,
    #[serde(rename = "To", default)]
    pub recipients: Vec<Person>,
    #[serde(rename = "Depth", default)]
    pub depth: u32,
    #[serde(rename = "ContentType", default)]
    pub content_type: String,
    #[serde(rename = "Filename", default)]
    pub filename: String,
    #[serde(rename = "Body", default)]
    pub body_text: String,
    #[serde(rename = "PartHash", default)]
    pub part_hash: String,
    #[serde(rename = "PartSimhash", default)]
    pub part_simhash: u64,
    #[serde(rename = "Metadata", default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn person_display_forms() {
        let both = Person {
            name: "Ada Lovelace".to_string(),
            email: "ada@example.org".to_string(),
            raw: String::new(),
        };
        assert_eq!(both.display(), "Ada Lovelace <ada@example.org>");
        let name_only = Person {
            name: "Ada".to_string(),
            ..Person::default()
        };
        assert_eq!(name_only.display(), "Ada");
        assert_eq!(Person::default().display(), "");
    }

    #[test]
    fn part_serializes_with_artifact_field_names() {
        let part = DocumentPart {
            part_id: "m00001.p0".to_string(),
            subject: "hello".to_string(),
            ..DocumentPart::default()
        };
        let json = serde_json::to_value(&part).expect("serialize");
        assert_eq!(json["PartId"], "m00001.p0");
        assert_eq!(json["Subject"], "hello");
        assert!(json.get("Metadata").is_none());
    }
}
