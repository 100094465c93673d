//! MIME tree flattening.

use crate::message::{decode_transfer_encoding, ContentType, Message};

/// Recursion limit for nested multiparts and embedded messages. Real
/// mail nests a handful of levels; anything deeper is hostile input.
pub const MAX_NESTING_DEPTH: u32 = 16;

/// One leaf of the MIME tree: decoded content bytes plus what the
/// indexing job needs to know about where they came from.
#[derive(Debug, Clone)]
pub struct LeafPart {
    pub content_type: String,
    pub filename: String,
    pub depth: u32,
    pub data: Vec<u8>,
}

/// Flatten a message into its leaf parts, recursing through multiparts
/// and embedded `message/rfc822` attachments.
pub fn flatten(message: &Message) -> Vec<LeafPart> {
    let mut leaves = Vec::new();
    walk(message, 0, &mut leaves);
    leaves
}

fn walk(message: &Message, depth: u32, leaves: &mut Vec<LeafPart>) {
    if depth >= MAX_NESTING_DEPTH {
        log::warn!("message nesting exceeds {MAX_NESTING_DEPTH} levels, deeper parts skipped");
        return;
    }
    let ctype = ContentType::parse(message.header("Content-Type").unwrap_or("text/plain"));
    if ctype.is_multipart() {
        if let Some(boundary) = ctype.boundary() {
            for section in split_multipart(&message.body, boundary) {
                walk(&Message::parse(&section), depth + 1, leaves);
            }
            return;
        }
        // No boundary: fall through and treat the body as one leaf.
    }
    if ctype.mime == "message/rfc822" {
        let decoded =
            decode_transfer_encoding(&message.body, message.header("Content-Transfer-Encoding"));
        walk(&Message::parse(&decoded), depth + 1, leaves);
        return;
    }
    let data =
        decode_transfer_encoding(&message.body, message.header("Content-Transfer-Encoding"));
    leaves.push(LeafPart {
        filename: part_filename(message, &ctype),
        content_type: ctype.mime,
        depth,
        data,
    });
}

/// Sections between `--boundary` delimiter lines; the preamble before
/// the first delimiter and the epilogue after `--boundary--` are
/// dropped.
fn split_multipart(body: &[u8], boundary: &str) -> Vec<Vec<u8>> {
    let delimiter = format!("--{boundary}");
    let closing = format!("--{boundary}--");
    let mut sections: Vec<Vec<u8>> = Vec::new();
    let mut current: Option<Vec<u8>> = None;
    for line in body.split(|&b| b == b'\n') {
        let content = trim_line_end(line);
        if content == closing.as_bytes() {
            if let Some(done) = current.take() {
                sections.push(done);
            }
            break;
        }
        if content == delimiter.as_bytes() {
            if let Some(done) = current.take() {
                sections.push(done);
            }
            current = Some(Vec::new());
            continue;
        }
        if let Some(section) = current.as_mut() {
            section.extend_from_slice(line);
            section.push(b'\n');
        }
    }
    if let Some(done) = current.take() {
        sections.push(done);
    }
    sections
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\r' | b' ' | b'\t') {
        end -= 1;
    }
    &line[..end]
}

fn part_filename(message: &Message, ctype: &ContentType) -> String {
    if let Some(disposition) = message.header("Content-Disposition") {
        if let Some(name) = ContentType::parse(disposition).param("filename") {
            return name.to_string();
        }
    }
    ctype.param("name").unwrap_or_default().to_string()
}
