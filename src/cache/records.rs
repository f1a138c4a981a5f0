//! Cache record types and their msgpack encoding.
//!
//! Every record stored in the durable cache lives here. Encoding is
//! msgpack with named fields; search records are additionally
//! zstd-compressed at rest because repeated token strings dominate
//! their size.

use crate::hash::Frontmatter;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::BTreeMap;

use super::CacheError;

/// Rendered HTML at or below this size is embedded in the post record;
/// anything larger goes to the content-addressed `content` bucket.
pub const INLINE_HTML_MAX: usize = 32 * 1024;

/// One table-of-contents entry extracted from a heading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    pub id: String,
    pub text: String,
    pub level: u8,
}

/// Durable per-post metadata, the primary cache record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostMeta {
    /// Stable identifier derived from the normalized relative path.
    pub post_id: String,
    /// Content-root-relative path, lowercased, forward slashes.
    pub path: String,
    /// Version tag from the leading path segment, or empty.
    pub version: String,
    /// Destination URL.
    pub link: String,
    /// Source mtime as epoch seconds.
    pub mod_time: i64,

    pub frontmatter_hash: String,
    pub body_hash: String,
    /// Hashes of every server-side-rendered fragment input, in order.
    pub ssr_input_hashes: Vec<String>,

    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub date: Option<NaiveDate>,
    pub weight: i64,
    pub pinned: bool,
    pub draft: bool,
    /// Estimated reading time in minutes.
    pub reading_time: u32,
    pub toc: Vec<TocEntry>,
    /// Opaque front-matter bag for template use.
    pub extra: Frontmatter,

    /// Rendered HTML when it fits [`INLINE_HTML_MAX`].
    pub inline_html: Option<Vec<u8>>,
    /// BLAKE3 key into the `content` bucket otherwise.
    pub html_ref: Option<String>,
}

/// Per-post search payload.
///
/// `token_freqs` is a sorted map so the encoded record (and anything
/// derived from it) is byte-stable across builds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchRecord {
    pub title: String,
    pub normalized_title: String,
    pub normalized_tags: Vec<String>,
    /// Raw plain text, kept for snippet extraction.
    pub content: String,
    pub version: String,
    /// Token count after the length filter (BM25 length normalization).
    pub doc_len: u32,
    pub token_freqs: BTreeMap<String, u32>,
}

/// Reverse-lookup aids for the change classifier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dependencies {
    pub tags: Vec<String>,
    pub template: String,
}

/// Encode a record as msgpack with named fields.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CacheError> {
    rmp_serde::to_vec_named(value).map_err(|e| CacheError::Encode(e.to_string()))
}

/// Decode a msgpack record.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CacheError> {
    rmp_serde::from_slice(bytes).map_err(|e| CacheError::Corrupt(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meta() -> PostMeta {
        PostMeta {
            post_id: "abc123".into(),
            path: "posts/hello.md".into(),
            version: String::new(),
            link: "/posts/hello.html".into(),
            mod_time: 1_700_000_000,
            frontmatter_hash: "fmhash".into(),
            body_hash: "bodyhash".into(),
            ssr_input_hashes: vec!["d1".into()],
            title: "Hello".into(),
            description: "First post".into(),
            tags: vec!["rust".into(), "ssg".into()],
            date: NaiveDate::from_ymd_opt(2026, 1, 15),
            weight: 0,
            pinned: false,
            draft: false,
            reading_time: 3,
            toc: vec![TocEntry {
                id: "intro".into(),
                text: "Intro".into(),
                level: 2,
            }],
            extra: Frontmatter::new(),
            inline_html: Some(b"<p>hi</p>".to_vec()),
            html_ref: None,
        }
    }

    #[test]
    fn test_post_meta_roundtrip() {
        let meta = sample_meta();
        let bytes = encode(&meta).unwrap();
        let back: PostMeta = decode(&bytes).unwrap();
        assert_eq!(back.post_id, meta.post_id);
        assert_eq!(back.tags, meta.tags);
        assert_eq!(back.date, meta.date);
        assert_eq!(back.toc, meta.toc);
        assert_eq!(back.inline_html, meta.inline_html);
    }

    #[test]
    fn test_search_record_roundtrip() {
        let mut record = SearchRecord {
            title: "Hello".into(),
            normalized_title: "hello".into(),
            normalized_tags: vec!["rust".into()],
            content: "hello world".into(),
            version: String::new(),
            doc_len: 2,
            token_freqs: BTreeMap::new(),
        };
        record.token_freqs.insert("hello".into(), 1);
        record.token_freqs.insert("world".into(), 1);

        let bytes = encode(&record).unwrap();
        let back: SearchRecord = decode(&bytes).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_encode_deterministic() {
        let meta = sample_meta();
        assert_eq!(encode(&meta).unwrap(), encode(&meta).unwrap());
    }

    #[test]
    fn test_decode_garbage_is_corrupt() {
        let err = decode::<PostMeta>(b"\xff\xff\xff").unwrap_err();
        assert!(matches!(err, CacheError::Corrupt(_)));
    }
}
