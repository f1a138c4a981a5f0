//! Content tree walking.

use crate::{config::SiteConfig, util};
use std::path::PathBuf;
use walkdir::WalkDir;

/// One Markdown source file discovered in the content tree.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    /// Normalized content-relative path.
    pub rel: String,
    /// Version tag from the leading path segment, or empty.
    pub version: String,
}

/// Recursively collect `.md` files under the content directory.
///
/// `_index.md` files are section markers, not posts; `404.md` is only
/// flagged. The result is sorted by relative path so walk order (and
/// render-queue slot order) is deterministic.
pub fn walk_content(cfg: &SiteConfig) -> (Vec<SourceFile>, bool) {
    let content = cfg.content_dir();
    let mut files = Vec::new();
    let mut has_404 = false;

    for entry in WalkDir::new(&content).into_iter().filter_map(Result::ok) {
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !name.ends_with(".md") || name == "_index.md" {
            continue;
        }
        if name == "404.md" {
            has_404 = true;
            continue;
        }

        let rel = util::rel_path(&content, entry.path());
        let version = cfg.version_from_path(&rel);
        files.push(SourceFile {
            path: entry.into_path(),
            rel,
            version,
        });
    }

    files.sort_by(|a, b| a.rel.cmp(&b.rel));
    (files, has_404)
}
