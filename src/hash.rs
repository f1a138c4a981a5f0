//! Content hashing for cache keys and invalidation tokens.
//!
//! All hashes are BLAKE3-256, hex encoded. Body and front-matter are
//! hashed separately: a front-matter change invalidates global
//! artifacts (tag pages, site tree, neighbors), while a body-only
//! change re-renders just the one post.

use serde_yaml::Value;
use std::collections::BTreeMap;

/// Front-matter mapping as extracted from a post header.
pub type Frontmatter = BTreeMap<String, Value>;

/// Split a source file into its front-matter block and body.
///
/// A file opens a front-matter block with `---\n` at byte 0; the block
/// ends at the next line starting `---\n` or `---\r\n`. Byte-level
/// scanning only, no copies. Without a front-matter block the whole
/// file is body.
pub fn split_frontmatter(source: &[u8]) -> (Option<&[u8]>, &[u8]) {
    let open = if source.starts_with(b"---\n") {
        4
    } else if source.starts_with(b"---\r\n") {
        5
    } else {
        return (None, source);
    };

    let mut pos = open;
    while pos < source.len() {
        let rest = &source[pos..];
        if rest.starts_with(b"---\n") {
            return (Some(&source[open..pos]), &source[pos + 4..]);
        }
        if rest.starts_with(b"---\r\n") {
            return (Some(&source[open..pos]), &source[pos + 5..]);
        }
        // Advance to the byte after the next newline
        match rest.iter().position(|&b| b == b'\n') {
            Some(nl) => pos += nl + 1,
            None => break,
        }
    }

    // Unterminated front-matter: treat the whole file as body
    (None, source)
}

/// Hash of the bytes after the front-matter delimiters.
///
/// Files without front-matter hash in full.
pub fn body_hash(source: &[u8]) -> String {
    let (_, body) = split_frontmatter(source);
    blake3::hash(body).to_hex().to_string()
}

/// Hash of the canonical front-matter encoding.
///
/// Keys are sorted lexicographically and values serialized in a
/// canonical form, so equivalent front-matters hash identically
/// regardless of key order or YAML formatting.
pub fn frontmatter_hash(meta: &Frontmatter) -> String {
    let mut buf = String::new();
    buf.push('{');
    for (i, (key, value)) in meta.iter().enumerate() {
        if i > 0 {
            buf.push(',');
        }
        buf.push_str(key);
        buf.push(':');
        canonicalize(value, &mut buf);
    }
    buf.push('}');
    blake3::hash(buf.as_bytes()).to_hex().to_string()
}

/// Hash of verbatim diagram source (no trimming).
pub fn diagram_hash(source: &str) -> String {
    blake3::hash(source.as_bytes()).to_hex().to_string()
}

/// Content-addressed key for an HTML blob in the `content` bucket.
pub fn content_key(html: &[u8]) -> String {
    blake3::hash(html).to_hex().to_string()
}

/// Serialize a YAML value into its canonical form.
///
/// Strings verbatim, numbers as shortest decimal, booleans as
/// `true`/`false`, sequences and mappings recursively (mapping keys
/// sorted).
fn canonicalize(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push('~'),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                out.push_str(&i.to_string());
            } else if let Some(u) = n.as_u64() {
                out.push_str(&u.to_string());
            } else if let Some(f) = n.as_f64() {
                // Rust's Display for f64 is the shortest roundtrip form
                out.push_str(&f.to_string());
            }
        }
        Value::String(s) => out.push_str(s),
        Value::Sequence(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                canonicalize(item, out);
            }
            out.push(']');
        }
        Value::Mapping(map) => {
            let mut entries: Vec<(String, &Value)> = map
                .iter()
                .map(|(k, v)| {
                    let mut key = String::new();
                    canonicalize(k, &mut key);
                    (key, v)
                })
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            out.push('{');
            for (i, (key, v)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(key);
                out.push(':');
                canonicalize(v, out);
            }
            out.push('}');
        }
        Value::Tagged(tagged) => {
            out.push_str(&tagged.tag.to_string());
            out.push(':');
            canonicalize(&tagged.value, out);
        }
    }
}
