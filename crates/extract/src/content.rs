//! Body and attachment text extraction.
//!
//! Two implementations sit behind [`Extractor`]: a Tika HTTP client for
//! real deployments (handles PDF, Office formats, anything Tika can
//! read) and a builtin fallback that copes with text/plain and
//! text/html on its own. Extraction failures degrade to empty output;
//! they never abort a job on their own.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use lru::LruCache;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Identical attachment bytes show up across many messages; cache the
/// extraction result keyed by content hash.
const CACHE_CAPACITY: usize = 256;

const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// A configured content-extraction backend.
pub enum Extractor {
    Tika(TikaExtractor),
    Builtin(BuiltinExtractor),
}

impl Extractor {
    /// Tika-backed when a URL is configured, builtin otherwise.
    pub fn from_tika_url(url: Option<String>) -> Self {
        match url {
            Some(url) if !url.trim().is_empty() => Extractor::Tika(TikaExtractor::new(url)),
            _ => Extractor::Builtin(BuiltinExtractor),
        }
    }

    /// Plaintext and structured metadata for one leaf's decoded bytes.
    pub async fn extract(&self, data: &[u8], content_type: &str) -> (String, Map<String, Value>) {
        match self {
            Extractor::Tika(tika) => tika.extract(data, content_type).await,
            Extractor::Builtin(builtin) => builtin.extract(data, content_type),
        }
    }

    /// Liveness check; the builtin backend is always live.
    pub async fn probe(&self) -> bool {
        match self {
            Extractor::Tika(tika) => tika.probe().await,
            Extractor::Builtin(_) => true,
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Extractor::Tika(_) => "tika",
            Extractor::Builtin(_) => "builtin",
        }
    }
}

/// Client for an Apache Tika server.
pub struct TikaExtractor {
    client: reqwest::Client,
    base_url: String,
    cache: Mutex<LruCache<[u8; 32], (String, Map<String, Value>)>>,
}

impl TikaExtractor {
    pub fn new(base_url: impl Into<String>) -> Self {
        let capacity = NonZeroUsize::new(CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub async fn extract(&self, data: &[u8], content_type: &str) -> (String, Map<String, Value>) {
        let key: [u8; 32] = Sha256::digest(data).into();
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(hit) = cache.get(&key) {
                return hit.clone();
            }
        }
        let text = match self.put_text(data, content_type).await {
            Ok(text) => text,
            Err(err) => {
                log::warn!("tika text extraction failed: {err}");
                String::new()
            }
        };
        let metadata = match self.put_metadata(data, content_type).await {
            Ok(metadata) => metadata,
            Err(err) => {
                log::warn!("tika metadata extraction failed: {err}");
                Map::new()
            }
        };
        let result = (text, metadata);
        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key, result.clone());
        }
        result
    }

    async fn put_text(&self, data: &[u8], content_type: &str) -> reqwest::Result<String> {
        let mut request = self
            .client
            .put(format!("{}/tika", self.base_url))
            .header(reqwest::header::ACCEPT, "text/plain")
            .body(data.to_vec());
        if !content_type.is_empty() {
            request = request.header(reqwest::header::CONTENT_TYPE, content_type);
        }
        request.send().await?.error_for_status()?.text().await
    }

    async fn put_metadata(
        &self,
        data: &[u8],
        content_type: &str,
    ) -> reqwest::Result<Map<String, Value>> {
        let mut request = self
            .client
            .put(format!("{}/meta", self.base_url))
            .header(reqwest::header::ACCEPT, "application/json")
            .body(data.to_vec());
        if !content_type.is_empty() {
            request = request.header(reqwest::header::CONTENT_TYPE, content_type);
        }
        request
            .send()
            .await?
            .error_for_status()?
            .json::<Map<String, Value>>()
            .await
    }

    pub async fn probe(&self) -> bool {
        self.client
            .get(format!("{}/tika", self.base_url))
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map(|response| response.status().is_success())
            .unwrap_or(false)
    }
}

/// Offline extraction: text parts decode directly, HTML is stripped to
/// text, binary attachments yield no text.
pub struct BuiltinExtractor;

static SCRIPT_STYLE_RX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<script[^>]*>.*?</script>|<style[^>]*>.*?</style>")
        .expect("script/style regex")
});

static TAG_RX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("tag regex"));

static ENTITY_RX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(#x?[0-9a-fA-F]+|[a-zA-Z]+);").expect("entity regex"));

impl BuiltinExtractor {
    pub fn extract(&self, data: &[u8], content_type: &str) -> (String, Map<String, Value>) {
        let mut metadata = Map::new();
        if !content_type.is_empty() {
            metadata.insert(
                "Content-Type".to_string(),
                Value::String(content_type.to_string()),
            );
        }
        let text = if content_type.starts_with("text/html") {
            html_to_text(&String::from_utf8_lossy(data))
        } else if content_type.starts_with("text/") || content_type.is_empty() {
            String::from_utf8_lossy(data).into_owned()
        } else {
            String::new()
        };
        (text, metadata)
    }
}

fn html_to_text(html: &str) -> String {
    let no_blocks = SCRIPT_STYLE_RX.replace_all(html, " ");
    let no_tags = TAG_RX.replace_all(&no_blocks, " ");
    unescape_entities(&no_tags)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Best-effort HTML entity unescape: the named entities that matter in
/// mail bodies plus numeric character references. Unknown named
/// entities pass through verbatim.
pub fn unescape_entities(text: &str) -> String {
    ENTITY_RX
        .replace_all(text, |caps: &regex::Captures| {
            let body = &caps[1];
            if let Some(hex) = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X")) {
                return u32::from_str_radix(hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .map(String::from)
                    .unwrap_or_default();
            }
            if let Some(dec) = body.strip_prefix('#') {
                return dec
                    .parse::<u32>()
                    .ok()
                    .and_then(char::from_u32)
                    .map(String::from)
                    .unwrap_or_default();
            }
            match body {
                "amp" => "&".to_string(),
                "lt" => "<".to_string(),
                "gt" => ">".to_string(),
                "quot" => "\"".to_string(),
                "apos" => "'".to_string(),
                "nbsp" => "\u{a0}".to_string(),
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}
