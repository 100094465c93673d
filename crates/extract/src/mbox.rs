//! Classic mbox archive splitting.

use std::path::Path;

use crate::error::Result;

/// Split an mbox archive into raw per-message byte blobs.
///
/// Message boundaries are `From ` separator lines at the start of a
/// line; the separator itself is not message content. `>From ` quoting
/// inside bodies is undone. An archive that does not open with a
/// separator is treated as a single bare RFC 822 message.
pub fn split_messages(data: &[u8]) -> Vec<Vec<u8>> {
    let mut messages: Vec<Vec<u8>> = Vec::new();
    let mut current: Option<Vec<u8>> = None;
    for line in data.split_inclusive(|&b| b == b'\n') {
        if line.starts_with(b"From ") {
            if let Some(done) = current.take() {
                messages.push(done);
            }
            current = Some(Vec::new());
            continue;
        }
        let entry = current.get_or_insert_with(Vec::new);
        if line.starts_with(b">From ") {
            entry.extend_from_slice(&line[1..]);
        } else {
            entry.extend_from_slice(line);
        }
    }
    if let Some(done) = current.take() {
        messages.push(done);
    }
    messages.retain(|m| !m.iter().all(|b| b.is_ascii_whitespace()));
    messages
}

/// Read and split one mbox file.
pub async fn read_mbox(path: &Path) -> Result<Vec<Vec<u8>>> {
    let data = tokio::fs::read(path).await?;
    let messages = split_messages(&data);
    log::debug!("{} messages in {}", messages.len(), path.display());
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn splits_on_from_separator_lines() {
        let mbox = b"From alice@example.com Mon Jan  1 00:00:00 2001\n\
                     Subject: one\n\nbody one\n\
                     From bob@example.com Tue Jan  2 00:00:00 2001\n\
                     Subject: two\n\nbody two\n";
        let messages = split_messages(mbox);
        assert_eq!(messages.len(), 2);
        assert!(messages[0].starts_with(b"Subject: one"));
        assert!(messages[1].starts_with(b"Subject: two"));
    }

    #[test]
    fn unescapes_quoted_from_lines() {
        let mbox = b"From alice@example.com Mon Jan  1 00:00:00 2001\n\
                     Subject: one\n\n>From the archives\n";
        let messages = split_messages(mbox);
        assert_eq!(messages.len(), 1);
        let body = String::from_utf8_lossy(&messages[0]);
        assert!(body.contains("\nFrom the archives"));
    }

    #[test]
    fn bare_message_without_separator_is_kept_whole() {
        let eml = b"Subject: standalone\n\nhello\n";
        let messages = split_messages(eml);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0], eml.to_vec());
    }

    #[test]
    fn empty_and_blank_input_yield_nothing() {
        assert!(split_messages(b"").is_empty());
        assert!(split_messages(b"\n\n  \n").is_empty());
    }
}
