//! Mail-client rendering of matched parts.

use chrono::{DateTime, FixedOffset};
use serde::Serialize;

use mailsift_extract::DocumentPart;

/// One search or browse hit in the shape a mail client would show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedEmail {
    pub part_id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub date: String,
    pub body: String,
}

pub fn render(part: &DocumentPart) -> RenderedEmail {
    let to = part
        .recipients
        .iter()
        .map(|person| person.display())
        .collect::<Vec<_>>()
        .join(", ");
    let subject = if part.subject.trim().is_empty() {
        "(no subject)".to_string()
    } else {
        part.subject.clone()
    };
    RenderedEmail {
        part_id: part.part_id.clone(),
        from: part.from.display(),
        to,
        subject,
        date: part.date.clone(),
        body: part.body_text.clone(),
    }
}

pub fn render_all(parts: &[&DocumentPart]) -> Vec<RenderedEmail> {
    parts.iter().map(|part| render(part)).collect()
}

/// Best-effort Date header parse, RFC 2822 first then RFC 3339.
pub fn parse_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
}

/// Oldest first. Parts with a missing or unparseable date sort before
/// everything else; ties keep the incoming order.
pub fn sort_chronologically(parts: &mut [&DocumentPart]) {
    parts.sort_by_cached_key(|part| parse_date(&part.date));
}
