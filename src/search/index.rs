//! On-disk search index (`search.bin`).

use anyhow::{Context, Result};
use flate2::{Compression, write::GzEncoder};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::Write,
    path::Path,
};

/// One post entry in `search.bin`, in the shape the external query
/// engine consumes. IDs are dense from 0 within one index file.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub id: i64,
    pub title: String,
    pub normalized_title: String,
    pub link: String,
    pub description: String,
    pub tags: Vec<String>,
    pub normalized_tags: Vec<String>,
    pub content: String,
    pub version: String,
    pub doc_len: u32,
    pub token_freqs: BTreeMap<String, u32>,
}

/// Serialize entries as a gzip-compressed msgpack array.
///
/// Draft filtering leaves holes in the build-time slot table; callers
/// pass the surviving entries and IDs are rewritten dense `0..M-1`
/// here, preserving assignment order.
pub fn write_search_index(path: &Path, mut entries: Vec<IndexEntry>) -> Result<()> {
    for (id, entry) in entries.iter_mut().enumerate() {
        entry.id = id as i64;
    }

    let packed = rmp_serde::to_vec_named(&entries).context("failed to encode search index")?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)
        .with_context(|| format!("failed to create search index: {}", path.display()))?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(&packed)?;
    encoder.finish()?;
    Ok(())
}
