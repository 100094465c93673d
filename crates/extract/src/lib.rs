//! Mail archive extraction.
//!
//! Turns raw mbox bytes into [`DocumentPart`] records ready for
//! indexing:
//!
//! ```text
//! archive.mbox
//!     ↓ mbox        per-message byte blobs (From_ separators)
//!     ↓ message     headers, RFC 2047, addresses, transfer encodings
//!     ↓ mime        recursive multipart walk, depth-capped
//!     ↓ content     plaintext + metadata (Tika or builtin)
//!     → parts       envelope copied onto each leaf
//! ```
//!
//! Extraction is deliberately forgiving: malformed input degrades to
//! empty fields and lossy text, never an error for the whole archive.

pub mod content;
pub mod error;
pub mod mbox;
pub mod mentions;
pub mod message;
pub mod mime;
pub mod part;
pub mod pipeline;

pub use content::{unescape_entities, BuiltinExtractor, Extractor, TikaExtractor};
pub use error::{ExtractError, Result};
pub use mbox::{read_mbox, split_messages};
pub use mentions::{scan_emails, CapitalizedNames, MentionRecognizer};
pub use message::{decode_rfc2047, parse_address, split_address_list, ContentType, Message};
pub use mime::{flatten, LeafPart, MAX_NESTING_DEPTH};
pub use part::{DocumentPart, Person};
pub use pipeline::extract_parts;
