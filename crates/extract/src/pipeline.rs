//! One raw message to document parts.

use std::collections::HashSet;

use crate::content::Extractor;
use crate::message::{parse_address, split_address_list, Message};
use crate::mime::flatten;
use crate::part::{DocumentPart, Person};

/// Extract every analyzable part of one raw message.
///
/// The envelope (sender, recipients, subject, date, message id) comes
/// from the top-level headers and is copied onto each part; leaves come
/// from the MIME walk; text and metadata come from the content
/// extractor. Fingerprints and part ids are left for the indexing job.
pub async fn extract_parts(raw: &[u8], extractor: &Extractor) -> Vec<DocumentPart> {
    let message = Message::parse(raw);
    let from = sender(&message);
    let recipients = collect_recipients(&message);
    let subject = message.decoded_header("Subject");
    let date = message.header("Date").unwrap_or_default().trim().to_string();
    let message_id = message
        .header("Message-ID")
        .unwrap_or_default()
        .trim()
        .to_lowercase();

    let mut parts = Vec::new();
    for leaf in flatten(&message) {
        let (body_text, metadata) = extractor.extract(&leaf.data, &leaf.content_type).await;
        parts.push(DocumentPart {
            part_id: String::new(),
            message_id: message_id.clone(),
            subject: subject.clone(),
            date: date.clone(),
            from: from.clone(),
            recipients: recipients.clone(),
            depth: leaf.depth,
            content_type: leaf.content_type,
            filename: leaf.filename,
            body_text,
            part_hash: String::new(),
            part_simhash: 0,
            metadata,
        });
    }
    parts
}

/// First address of the From header.
fn sender(message: &Message) -> Person {
    message
        .header("From")
        .and_then(|value| split_address_list(value).into_iter().next())
        .map(|chunk| parse_address(&chunk))
        .unwrap_or_default()
}

/// To, Cc and Bcc merged into one ordered list, deduplicated by
/// (name, email).
fn collect_recipients(message: &Message) -> Vec<Person> {
    let mut seen = HashSet::new();
    let mut recipients = Vec::new();
    for header in ["To", "Cc", "Bcc"] {
        for value in message.header_all(header) {
            for chunk in split_address_list(value) {
                let person = parse_address(&chunk);
                if person.is_empty() {
                    continue;
                }
                if seen.insert((person.name.clone(), person.email.clone())) {
                    recipients.push(person);
                }
            }
        }
    }
    recipients
}
