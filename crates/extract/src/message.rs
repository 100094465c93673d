//! Minimal RFC 822 message handling: header unfolding, RFC 2047
//! encoded-word decoding, address-list parsing, transfer-encoding and
//! Content-Type plumbing.
//!
//! This is deliberately not a full MIME stack; it covers the header
//! shapes that occur in real archives and degrades to lossy text rather
//! than failing on anything malformed.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::part::Person;

static ENCODED_WORD_RX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"=\?([^?\s]+)\?([bBqQ])\?([^?\s]*)\?=").expect("encoded word regex"));

/// A parsed message: unfolded headers plus the undecoded body bytes.
#[derive(Debug, Clone, Default)]
pub struct Message {
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Message {
    /// Parse raw message bytes. Never fails: garbage headers are
    /// skipped, a missing blank line means an empty body.
    pub fn parse(raw: &[u8]) -> Self {
        let (head, body) = split_head_body(raw);
        let text = String::from_utf8_lossy(head);
        let mut headers: Vec<(String, String)> = Vec::new();
        for line in text.lines() {
            if line.starts_with(' ') || line.starts_with('\t') {
                if let Some(last) = headers.last_mut() {
                    last.1.push(' ');
                    last.1.push_str(line.trim());
                }
                continue;
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.push((name.trim().to_string(), value.trim().to_string()));
            }
        }
        Self {
            headers,
            body: body.to_vec(),
        }
    }

    /// First value of a header, case-insensitive on the name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every value of a repeated header, in order.
    pub fn header_all(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// Decoded first value of a header, empty when absent.
    pub fn decoded_header(&self, name: &str) -> String {
        self.header(name).map(decode_rfc2047).unwrap_or_default()
    }
}

fn split_head_body(raw: &[u8]) -> (&[u8], &[u8]) {
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'\n' {
            let rest = &raw[i + 1..];
            if rest.first() == Some(&b'\n') {
                return (&raw[..i], &rest[1..]);
            }
            if rest.len() >= 2 && &rest[..2] == b"\r\n" {
                return (&raw[..i], &rest[2..]);
            }
        }
        i += 1;
    }
    (raw, &[])
}

/// Decode RFC 2047 encoded words in a header value. Whitespace between
/// two adjacent encoded words is dropped; anything undecodable passes
/// through verbatim.
pub fn decode_rfc2047(value: &str) -> String {
    let mut out = String::new();
    let mut last_end = 0;
    let mut previous_was_word = false;
    for caps in ENCODED_WORD_RX.captures_iter(value) {
        let Some(whole) = caps.get(0) else { continue };
        let gap = &value[last_end..whole.start()];
        if !(previous_was_word && gap.trim().is_empty()) {
            out.push_str(gap);
        }
        let charset = caps[1].to_ascii_lowercase();
        let bytes = match &caps[2] {
            "b" | "B" => BASE64
                .decode(caps[3].as_bytes())
                .unwrap_or_else(|_| caps[3].as_bytes().to_vec()),
            _ => q_decode(&caps[3]),
        };
        out.push_str(&decode_charset(&bytes, &charset));
        last_end = whole.end();
        previous_was_word = true;
    }
    out.push_str(&value[last_end..]);
    out
}

/// Q-encoding: underscores are spaces, `=XX` is a hex byte.
fn q_decode(payload: &str) -> Vec<u8> {
    let bytes = payload.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                out.push(b' ');
                i += 1;
            }
            b'=' if i + 2 < bytes.len() => {
                match (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi * 16 + lo);
                        i += 3;
                    }
                    _ => {
                        out.push(bytes[i]);
                        i += 1;
                    }
                }
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    out
}

fn hex_val(b: u8) -> Option<u8> {
    (b as char).to_digit(16).map(|d| d as u8)
}

fn decode_charset(bytes: &[u8], charset: &str) -> String {
    // RFC 2231 language suffix ("utf-8*en") is irrelevant to decoding.
    let charset = charset.split('*').next().unwrap_or(charset);
    match charset {
        "iso-8859-1" | "latin-1" | "latin1" | "windows-1252" | "cp1252" => {
            bytes.iter().map(|&b| b as char).collect()
        }
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

/// Split an address-list header on top-level commas and semicolons;
/// quotes and angle brackets protect embedded separators.
pub fn split_address_list(value: &str) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut in_brackets = false;
    for c in value.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '<' if !in_quotes => {
                in_brackets = true;
                current.push(c);
            }
            '>' if !in_quotes => {
                in_brackets = false;
                current.push(c);
            }
            ',' | ';' if !in_quotes && !in_brackets => {
                if !current.trim().is_empty() {
                    chunks.push(current.trim().to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        chunks.push(current.trim().to_string());
    }
    chunks
}

/// Parse one address chunk into a [`Person`]. The email half is
/// lowercased; `raw` keeps the decoded chunk for substring search.
pub fn parse_address(chunk: &str) -> Person {
    let decoded = decode_rfc2047(chunk.trim());
    let decoded = decoded.trim().to_string();
    match decoded.find('<') {
        Some(open) => {
            let close = decoded[open..]
                .find('>')
                .map(|c| open + c)
                .unwrap_or(decoded.len());
            let email = decoded[open + 1..close].trim().to_lowercase();
            let name = decoded[..open].trim().trim_matches('"').trim().to_string();
            Person {
                name,
                email,
                raw: decoded,
            }
        }
        None => {
            let bare = decoded.trim_matches('"').trim().to_string();
            if bare.contains('@') {
                Person {
                    name: String::new(),
                    email: bare.to_lowercase(),
                    raw: decoded,
                }
            } else {
                Person {
                    name: bare,
                    email: String::new(),
                    raw: decoded,
                }
            }
        }
    }
}

/// Decode a Content-Transfer-Encoding'd body to raw bytes. Unknown or
/// absent encodings pass through unchanged; decode failures fall back
/// to the undecoded bytes.
pub fn decode_transfer_encoding(body: &[u8], encoding: Option<&str>) -> Vec<u8> {
    match encoding.map(|e| e.trim().to_ascii_lowercase()).as_deref() {
        Some("base64") => {
            let compact: Vec<u8> = body
                .iter()
                .copied()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            BASE64.decode(&compact).unwrap_or_else(|_| body.to_vec())
        }
        Some("quoted-printable") => qp_decode(body),
        _ => body.to_vec(),
    }
}

/// Quoted-printable body decoding: soft line breaks vanish, `=XX` is a
/// hex byte, underscores are literal.
fn qp_decode(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len());
    let mut i = 0;
    while i < body.len() {
        if body[i] == b'=' {
            if i + 1 < body.len() && body[i + 1] == b'\n' {
                i += 2;
                continue;
            }
            if i + 2 < body.len() && body[i + 1] == b'\r' && body[i + 2] == b'\n' {
                i += 3;
                continue;
            }
            if i + 2 < body.len() {
                if let (Some(hi), Some(lo)) = (hex_val(body[i + 1]), hex_val(body[i + 2])) {
                    out.push(hi * 16 + lo);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(body[i]);
        i += 1;
    }
    out
}

/// Parsed Content-Type (or Content-Disposition) header value.
#[derive(Debug, Clone, Default)]
pub struct ContentType {
    pub mime: String,
    params: Vec<(String, String)>,
}

impl ContentType {
    pub fn parse(value: &str) -> Self {
        let mut pieces = value.split(';');
        let mime = pieces.next().unwrap_or("").trim().to_ascii_lowercase();
        let mut params = Vec::new();
        for piece in pieces {
            if let Some((key, val)) = piece.split_once('=') {
                params.push((
                    key.trim().to_ascii_lowercase(),
                    val.trim().trim_matches('"').to_string(),
                ));
            }
        }
        Self { mime, params }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn boundary(&self) -> Option<&str> {
        self.param("boundary")
    }

    pub fn is_multipart(&self) -> bool {
        self.mime.starts_with("multipart/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn headers_unfold_and_lookup_case_insensitively() {
        let raw = b"Subject: a very\n long subject\nFrom: a@example.com\n\nbody";
        let msg = Message::parse(raw);
        assert_eq!(msg.header("subject"), Some("a very long subject"));
        assert_eq!(msg.header("FROM"), Some("a@example.com"));
        assert_eq!(msg.body, b"body");
    }

    #[test]
    fn crlf_messages_split_at_the_blank_line() {
        let raw = b"Subject: x\r\nTo: b@example.com\r\n\r\nhello\r\n";
        let msg = Message::parse(raw);
        assert_eq!(msg.header("To"), Some("b@example.com"));
        assert_eq!(msg.body, b"hello\r\n");
    }

    #[test]
    fn rfc2047_base64_and_q_forms_decode() {
        assert_eq!(decode_rfc2047("=?utf-8?B?wqFIb2xhIQ==?="), "\u{a1}Hola!");
        assert_eq!(decode_rfc2047("=?utf-8?Q?Zo=C3=AB_W=2E?="), "Zoë W.");
        assert_eq!(
            decode_rfc2047("=?iso-8859-1?Q?Jos=E9?= Garcia"),
            "José Garcia"
        );
        assert_eq!(decode_rfc2047("plain text"), "plain text");
    }

    #[test]
    fn whitespace_between_encoded_words_is_dropped() {
        assert_eq!(
            decode_rfc2047("=?utf-8?Q?Ada?= =?utf-8?Q?_Lovelace?="),
            "Ada Lovelace"
        );
    }

    #[test]
    fn address_lists_respect_quoted_commas() {
        let chunks = split_address_list(
            r#""Lovelace, Ada" <ada@example.org>, grace@navy.example; Bob <bob@corp.example>"#,
        );
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], r#""Lovelace, Ada" <ada@example.org>"#);
        assert_eq!(chunks[1], "grace@navy.example");
    }

    #[test]
    fn addresses_parse_into_name_and_email() {
        let p = parse_address("Ada Lovelace <ADA@Example.Org>");
        assert_eq!(p.name, "Ada Lovelace");
        assert_eq!(p.email, "ada@example.org");
        assert_eq!(p.raw, "Ada Lovelace <ADA@Example.Org>");

        let bare = parse_address("  grace@navy.example ");
        assert_eq!(bare.name, "");
        assert_eq!(bare.email, "grace@navy.example");

        let name_only = parse_address("Undisclosed Recipients");
        assert_eq!(name_only.name, "Undisclosed Recipients");
        assert_eq!(name_only.email, "");
    }

    #[test]
    fn transfer_encodings_decode() {
        assert_eq!(
            decode_transfer_encoding(b"aGVsbG8g\nd29ybGQ=", Some("base64")),
            b"hello world"
        );
        assert_eq!(
            decode_transfer_encoding(b"caf=C3=A9 soft=\nbreak", Some("quoted-printable")),
            "café softbreak".as_bytes()
        );
        assert_eq!(decode_transfer_encoding(b"as is", Some("7bit")), b"as is");
        assert_eq!(decode_transfer_encoding(b"not base64!", Some("base64")), b"not base64!");
    }

    #[test]
    fn content_type_params_parse() {
        let ct = ContentType::parse("multipart/MIXED; boundary=\"xyz\"; charset=utf-8");
        assert_eq!(ct.mime, "multipart/mixed");
        assert!(ct.is_multipart());
        assert_eq!(ct.boundary(), Some("xyz"));
        assert_eq!(ct.param("charset"), Some("utf-8"));
        assert_eq!(ct.param("missing"), None);
    }
}
