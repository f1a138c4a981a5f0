//! Durable build cache backed by an embedded key-value store.
//!
//! One redb database file (`<cache-dir>/cache.db`) holds every bucket
//! from the build pipeline: post metadata, content-addressed HTML
//! blobs, search records, reverse-dependency indices and social-card
//! hashes. A schema version byte in the `meta` table guards against
//! incompatible upgrades; a mismatch wipes everything.
//!
//! # Concurrency
//!
//! Readers run in parallel against snapshot read transactions. Writes
//! accumulate in per-build staging (HTML blobs here, records in the
//! coordinator) and land in a single [`CacheStore::batch_commit`]
//! write transaction at build end - all-or-nothing. A small TTL'd LRU
//! sits in front of the `posts` bucket for the hot path probe.

pub mod records;

pub use records::{Dependencies, INLINE_HTML_MAX, PostMeta, SearchRecord, TocEntry};

use crate::{hash, log, util};
use lru::LruCache;
use parking_lot::Mutex;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::{
    collections::{BTreeSet, HashMap},
    num::NonZeroUsize,
    path::Path,
    time::{Duration, Instant},
};
use thiserror::Error;

// ============================================================================
// Buckets
// ============================================================================

/// PostID -> encoded PostMeta (may embed small HTML).
const POSTS: TableDefinition<&str, &[u8]> = TableDefinition::new("posts");
/// BLAKE3(html) -> HTML bytes, only for HTML above the inline limit.
const CONTENT: TableDefinition<&str, &[u8]> = TableDefinition::new("content");
/// PostID -> zstd(msgpack SearchRecord).
const SEARCH: TableDefinition<&str, &[u8]> = TableDefinition::new("search");
/// PostID -> encoded Dependencies.
const DEPS: TableDefinition<&str, &[u8]> = TableDefinition::new("deps");
/// Normalized path -> PostID (secondary index).
const PATH_IDX: TableDefinition<&str, &str> = TableDefinition::new("path_idx");
/// Lowercased tag -> encoded sorted set of PostIDs.
const TAG_IDX: TableDefinition<&str, &[u8]> = TableDefinition::new("tag_idx");
/// Template name -> encoded sorted set of PostIDs.
const TMPL_IDX: TableDefinition<&str, &[u8]> = TableDefinition::new("tmpl_idx");
/// Path -> front-matter hash at last card generation.
const SOCIAL: TableDefinition<&str, &str> = TableDefinition::new("social_hash");
/// Singleton bucket holding the schema version.
const META: TableDefinition<&str, u8> = TableDefinition::new("meta");

const SCHEMA_KEY: &str = "schema";
const SCHEMA_VERSION: u8 = 3;

const LRU_CAPACITY: usize = 512;
const LRU_TTL: Duration = Duration::from_secs(300);

// ============================================================================
// Errors
// ============================================================================

/// Cache failure kinds. `Corrupt` demotes a hit to a miss; the rest
/// surface to the caller.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache database error: {0}")]
    Db(String),

    #[error("corrupt cache record: {0}")]
    Corrupt(String),

    #[error("failed to encode cache record: {0}")]
    Encode(String),
}

macro_rules! impl_from_redb {
    ($($ty:ty),+ $(,)?) => {$(
        impl From<$ty> for CacheError {
            fn from(e: $ty) -> Self {
                Self::Db(e.to_string())
            }
        }
    )+};
}

impl_from_redb!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

// ============================================================================
// Store
// ============================================================================

struct LruEntry {
    meta: PostMeta,
    stored_at: Instant,
}

/// Garbage-collection report: keys that no live post references.
#[derive(Debug, Default)]
pub struct GcReport {
    pub orphaned_content: Vec<String>,
    pub orphaned_social_cards: Vec<String>,
}

/// Cache bucket sizes, for `kosh cache stats`.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub posts: u64,
    pub content_blobs: u64,
    pub search_records: u64,
    pub dependency_records: u64,
    pub social_hashes: u64,
}

/// Handle to the durable cache. Cheap to share by reference across
/// worker threads.
pub struct CacheStore {
    db: Database,
    lru: Mutex<LruCache<String, LruEntry>>,
    pending_content: Mutex<Vec<(String, Vec<u8>)>>,
}

impl CacheStore {
    /// Open (or create) the cache under `dir`, wiping all buckets on a
    /// schema version mismatch.
    pub fn open(dir: &Path) -> Result<Self, CacheError> {
        std::fs::create_dir_all(dir)
            .map_err(|e| CacheError::Db(format!("create {}: {e}", dir.display())))?;
        let db = Database::create(dir.join("cache.db"))?;

        let store = Self {
            db,
            lru: Mutex::new(LruCache::new(
                NonZeroUsize::new(LRU_CAPACITY).expect("nonzero capacity"),
            )),
            pending_content: Mutex::new(Vec::new()),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Create all tables and enforce the schema version byte.
    fn ensure_schema(&self) -> Result<(), CacheError> {
        let txn = self.db.begin_write()?;
        let stored = {
            let mut meta = txn.open_table(META)?;
            let stored = meta.get(SCHEMA_KEY)?.map(|v| v.value());
            if stored != Some(SCHEMA_VERSION) {
                meta.insert(SCHEMA_KEY, SCHEMA_VERSION)?;
            }
            stored
        };

        match stored {
            Some(v) if v == SCHEMA_VERSION => {
                // Make sure every bucket exists even on a fresh file
                Self::open_all_tables(&txn)?;
            }
            Some(v) => {
                log!("cache"; "schema v{v} != v{SCHEMA_VERSION}, purging cache");
                Self::wipe_tables(&txn)?;
            }
            None => {
                Self::open_all_tables(&txn)?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn open_all_tables(txn: &redb::WriteTransaction) -> Result<(), CacheError> {
        txn.open_table(POSTS)?;
        txn.open_table(CONTENT)?;
        txn.open_table(SEARCH)?;
        txn.open_table(DEPS)?;
        txn.open_table(PATH_IDX)?;
        txn.open_table(TAG_IDX)?;
        txn.open_table(TMPL_IDX)?;
        txn.open_table(SOCIAL)?;
        Ok(())
    }

    fn wipe_tables(txn: &redb::WriteTransaction) -> Result<(), CacheError> {
        txn.open_table(POSTS)?.retain(|_, _| false)?;
        txn.open_table(CONTENT)?.retain(|_, _| false)?;
        txn.open_table(SEARCH)?.retain(|_, _| false)?;
        txn.open_table(DEPS)?.retain(|_, _| false)?;
        txn.open_table(PATH_IDX)?.retain(|_, _| false)?;
        txn.open_table(TAG_IDX)?.retain(|_, _| false)?;
        txn.open_table(TMPL_IDX)?.retain(|_, _| false)?;
        txn.open_table(SOCIAL)?.retain(|_, _| false)?;
        Ok(())
    }

    /// Delete every record in every bucket (`kosh cache clear`).
    pub fn purge_all(&self) -> Result<(), CacheError> {
        let txn = self.db.begin_write()?;
        Self::wipe_tables(&txn)?;
        txn.commit()?;
        self.lru.lock().clear();
        self.pending_content.lock().clear();
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Post lookup
    // ------------------------------------------------------------------------

    /// Fetch a post by its normalized content-relative path.
    ///
    /// Consults the in-process LRU before touching durable storage.
    pub fn get_post_by_path(&self, path: &str) -> Result<Option<PostMeta>, CacheError> {
        let key = util::normalize_rel_path(path);

        {
            let mut lru = self.lru.lock();
            if let Some(entry) = lru.get(&key) {
                if entry.stored_at.elapsed() < LRU_TTL {
                    return Ok(Some(entry.meta.clone()));
                }
                lru.pop(&key);
            }
        }

        let txn = self.db.begin_read()?;
        let path_idx = txn.open_table(PATH_IDX)?;
        let Some(id_guard) = path_idx.get(key.as_str())? else {
            return Ok(None);
        };
        let post_id = id_guard.value().to_string();
        drop(id_guard);

        let posts = txn.open_table(POSTS)?;
        let Some(meta_guard) = posts.get(post_id.as_str())? else {
            return Ok(None);
        };
        let meta: PostMeta = records::decode(meta_guard.value())?;

        self.lru.lock().put(
            key,
            LruEntry {
                meta: meta.clone(),
                stored_at: Instant::now(),
            },
        );
        Ok(Some(meta))
    }

    /// Fetch a post by its ID.
    pub fn get_post(&self, post_id: &str) -> Result<Option<PostMeta>, CacheError> {
        let txn = self.db.begin_read()?;
        let posts = txn.open_table(POSTS)?;
        match posts.get(post_id)? {
            Some(guard) => Ok(Some(records::decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// All cached post IDs, for the stale-entry pre-sweep.
    pub fn list_all_posts(&self) -> Result<Vec<String>, CacheError> {
        let txn = self.db.begin_read()?;
        let posts = txn.open_table(POSTS)?;
        let mut ids = Vec::with_capacity(posts.len()? as usize);
        for item in posts.iter()? {
            let (key, _) = item?;
            ids.push(key.value().to_string());
        }
        Ok(ids)
    }

    /// Batch metadata fetch for the global-metadata warmup. Missing or
    /// corrupt entries are skipped.
    pub fn get_posts_by_ids(&self, ids: &[String]) -> Result<Vec<PostMeta>, CacheError> {
        let txn = self.db.begin_read()?;
        let posts = txn.open_table(POSTS)?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(guard) = posts.get(id.as_str())? {
                match records::decode::<PostMeta>(guard.value()) {
                    Ok(meta) => out.push(meta),
                    Err(e) => log!("cache"; "skipping corrupt post record {id}: {e}"),
                }
            }
        }
        Ok(out)
    }

    // ------------------------------------------------------------------------
    // HTML content
    // ------------------------------------------------------------------------

    /// Load the rendered HTML for a post: inline bytes when present,
    /// otherwise the referenced `content` entry.
    pub fn get_html(&self, meta: &PostMeta) -> Result<Vec<u8>, CacheError> {
        if let Some(html) = &meta.inline_html {
            return Ok(html.clone());
        }
        let Some(html_ref) = &meta.html_ref else {
            return Err(CacheError::Corrupt(format!(
                "post {} has neither inline HTML nor a content reference",
                meta.path
            )));
        };
        let txn = self.db.begin_read()?;
        let content = txn.open_table(CONTENT)?;
        match content.get(html_ref.as_str())? {
            Some(guard) => Ok(guard.value().to_vec()),
            None => Err(CacheError::Corrupt(format!(
                "content entry {html_ref} referenced by {} is missing",
                meta.path
            ))),
        }
    }

    /// Attach rendered HTML to a post record: inline at or below the
    /// 32 KiB threshold, content-addressed above it. Large blobs are
    /// buffered and land with the next [`Self::batch_commit`].
    pub fn store_html_for_post(&self, meta: &mut PostMeta, html: Vec<u8>) {
        if html.len() <= INLINE_HTML_MAX {
            meta.inline_html = Some(html);
            meta.html_ref = None;
        } else {
            let key = hash::content_key(&html);
            meta.inline_html = None;
            meta.html_ref = Some(key.clone());
            self.pending_content.lock().push((key, html));
        }
    }

    // ------------------------------------------------------------------------
    // Search records
    // ------------------------------------------------------------------------

    pub fn get_search_record(&self, post_id: &str) -> Result<Option<SearchRecord>, CacheError> {
        let txn = self.db.begin_read()?;
        let search = txn.open_table(SEARCH)?;
        let Some(guard) = search.get(post_id)? else {
            return Ok(None);
        };
        let raw = zstd::decode_all(guard.value())
            .map_err(|e| CacheError::Corrupt(format!("search record {post_id}: {e}")))?;
        Ok(Some(records::decode(&raw)?))
    }

    // ------------------------------------------------------------------------
    // Reverse-dependency queries
    // ------------------------------------------------------------------------

    pub fn get_posts_by_tag(&self, tag: &str) -> Result<Vec<String>, CacheError> {
        self.read_id_set(TAG_IDX, &tag.to_lowercase())
    }

    pub fn get_posts_by_template(&self, template: &str) -> Result<Vec<String>, CacheError> {
        self.read_id_set(TMPL_IDX, template)
    }

    fn read_id_set(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> Result<Vec<String>, CacheError> {
        let txn = self.db.begin_read()?;
        let idx = txn.open_table(table)?;
        match idx.get(key)? {
            Some(guard) => records::decode(guard.value()),
            None => Ok(Vec::new()),
        }
    }

    // ------------------------------------------------------------------------
    // Social-card hashes
    // ------------------------------------------------------------------------

    /// Front-matter hash recorded at the last card generation, if any.
    ///
    /// Independent namespace so card generation can trigger even on a
    /// post cache hit.
    pub fn get_social_card_hash(&self, path: &str) -> Result<Option<String>, CacheError> {
        let txn = self.db.begin_read()?;
        let social = txn.open_table(SOCIAL)?;
        Ok(social
            .get(util::normalize_rel_path(path).as_str())?
            .map(|g| g.value().to_string()))
    }

    pub fn set_social_card_hash(&self, path: &str, hash: &str) -> Result<(), CacheError> {
        let txn = self.db.begin_write()?;
        {
            let mut social = txn.open_table(SOCIAL)?;
            social.insert(util::normalize_rel_path(path).as_str(), hash)?;
        }
        txn.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------------

    /// Atomic multi-bucket write of one build's accumulated changes.
    ///
    /// An empty batch (no posts, no searches, no deps, no pending
    /// content) is a no-op. On failure the whole batch is rejected and
    /// pending HTML blobs are restored for a later retry.
    pub fn batch_commit(
        &self,
        posts: &[PostMeta],
        searches: &HashMap<String, SearchRecord>,
        deps: &HashMap<String, Dependencies>,
    ) -> Result<(), CacheError> {
        let pending = std::mem::take(&mut *self.pending_content.lock());
        if posts.is_empty() && searches.is_empty() && deps.is_empty() && pending.is_empty() {
            return Ok(());
        }

        let result = self.commit_inner(posts, searches, deps, &pending);
        if result.is_err() {
            let mut guard = self.pending_content.lock();
            let mut restored = pending;
            restored.append(&mut guard);
            *guard = restored;
        }
        result?;

        let mut lru = self.lru.lock();
        for meta in posts {
            lru.put(
                meta.path.clone(),
                LruEntry {
                    meta: meta.clone(),
                    stored_at: Instant::now(),
                },
            );
        }
        Ok(())
    }

    fn commit_inner(
        &self,
        posts: &[PostMeta],
        searches: &HashMap<String, SearchRecord>,
        deps: &HashMap<String, Dependencies>,
        pending: &[(String, Vec<u8>)],
    ) -> Result<(), CacheError> {
        let txn = self.db.begin_write()?;
        {
            let mut content = txn.open_table(CONTENT)?;
            for (key, html) in pending {
                content.insert(key.as_str(), html.as_slice())?;
            }

            let mut posts_table = txn.open_table(POSTS)?;
            let mut path_idx = txn.open_table(PATH_IDX)?;
            for meta in posts {
                let encoded = records::encode(meta)?;
                posts_table.insert(meta.post_id.as_str(), encoded.as_slice())?;
                path_idx.insert(meta.path.as_str(), meta.post_id.as_str())?;
            }

            let mut search_table = txn.open_table(SEARCH)?;
            for (post_id, record) in searches {
                let raw = records::encode(record)?;
                let compressed = zstd::encode_all(raw.as_slice(), 1)
                    .map_err(|e| CacheError::Encode(e.to_string()))?;
                search_table.insert(post_id.as_str(), compressed.as_slice())?;
            }

            let mut deps_table = txn.open_table(DEPS)?;
            let mut tag_idx = txn.open_table(TAG_IDX)?;
            let mut tmpl_idx = txn.open_table(TMPL_IDX)?;
            for (post_id, dep) in deps {
                let encoded = records::encode(dep)?;
                deps_table.insert(post_id.as_str(), encoded.as_slice())?;

                for tag in &dep.tags {
                    Self::index_add(&mut tag_idx, &tag.to_lowercase(), post_id)?;
                }
                if !dep.template.is_empty() {
                    Self::index_add(&mut tmpl_idx, &dep.template, post_id)?;
                }
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn index_add(
        table: &mut redb::Table<'_, &str, &[u8]>,
        key: &str,
        post_id: &str,
    ) -> Result<(), CacheError> {
        let mut set: BTreeSet<String> = match table.get(key)? {
            Some(guard) => records::decode::<Vec<String>>(guard.value())?
                .into_iter()
                .collect(),
            None => BTreeSet::new(),
        };
        if set.insert(post_id.to_string()) {
            let ids: Vec<&str> = set.iter().map(String::as_str).collect();
            let encoded = records::encode(&ids)?;
            table.insert(key, encoded.as_slice())?;
        }
        Ok(())
    }

    fn index_remove(
        table: &mut redb::Table<'_, &str, &[u8]>,
        key: &str,
        post_id: &str,
    ) -> Result<(), CacheError> {
        let Some(guard) = table.get(key)? else {
            return Ok(());
        };
        let mut set: BTreeSet<String> = records::decode::<Vec<String>>(guard.value())?
            .into_iter()
            .collect();
        drop(guard);

        if set.remove(post_id) {
            if set.is_empty() {
                table.remove(key)?;
            } else {
                let ids: Vec<&str> = set.iter().map(String::as_str).collect();
                let encoded = records::encode(&ids)?;
                table.insert(key, encoded.as_slice())?;
            }
        }
        Ok(())
    }

    /// Remove a post from every bucket and index. Orphaned `content`
    /// entries are left for [`Self::gc`].
    pub fn delete_post(&self, post_id: &str) -> Result<(), CacheError> {
        let txn = self.db.begin_write()?;
        {
            let mut posts = txn.open_table(POSTS)?;
            let meta: Option<PostMeta> = match posts.get(post_id)? {
                Some(guard) => Some(records::decode(guard.value())?),
                None => None,
            };

            if let Some(meta) = meta {
                posts.remove(post_id)?;
                txn.open_table(SEARCH)?.remove(post_id)?;
                txn.open_table(PATH_IDX)?.remove(meta.path.as_str())?;
                txn.open_table(SOCIAL)?.remove(meta.path.as_str())?;

                let mut deps_table = txn.open_table(DEPS)?;
                let dep: Option<Dependencies> = match deps_table.get(post_id)? {
                    Some(guard) => Some(records::decode(guard.value())?),
                    None => None,
                };
                deps_table.remove(post_id)?;

                // Prefer the deps record; fall back to meta tags if absent
                let tags = dep.as_ref().map(|d| &d.tags).unwrap_or(&meta.tags);
                let mut tag_idx = txn.open_table(TAG_IDX)?;
                for tag in tags {
                    Self::index_remove(&mut tag_idx, &tag.to_lowercase(), post_id)?;
                }

                if let Some(dep) = &dep
                    && !dep.template.is_empty()
                {
                    let mut tmpl_idx = txn.open_table(TMPL_IDX)?;
                    Self::index_remove(&mut tmpl_idx, &dep.template, post_id)?;
                }

                self.lru.lock().pop(&meta.path);
            }
        }
        txn.commit()?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // GC & stats
    // ------------------------------------------------------------------------

    /// Reclaim `content` entries no post references and social-card
    /// hashes for paths no longer cached. `dry_run` only reports.
    pub fn gc(&self, dry_run: bool) -> Result<GcReport, CacheError> {
        let mut report = GcReport::default();
        {
            let txn = self.db.begin_read()?;
            let posts = txn.open_table(POSTS)?;
            let mut referenced = BTreeSet::new();
            let mut live_paths = BTreeSet::new();
            for item in posts.iter()? {
                let (_, value) = item?;
                let meta: PostMeta = records::decode(value.value())?;
                if let Some(html_ref) = meta.html_ref {
                    referenced.insert(html_ref);
                }
                live_paths.insert(meta.path);
            }

            let content = txn.open_table(CONTENT)?;
            for item in content.iter()? {
                let (key, _) = item?;
                if !referenced.contains(key.value()) {
                    report.orphaned_content.push(key.value().to_string());
                }
            }

            let social = txn.open_table(SOCIAL)?;
            for item in social.iter()? {
                let (key, _) = item?;
                if !live_paths.contains(key.value()) {
                    report.orphaned_social_cards.push(key.value().to_string());
                }
            }
        }

        if !dry_run
            && !(report.orphaned_content.is_empty() && report.orphaned_social_cards.is_empty())
        {
            let txn = self.db.begin_write()?;
            {
                let mut content = txn.open_table(CONTENT)?;
                for key in &report.orphaned_content {
                    content.remove(key.as_str())?;
                }
                let mut social = txn.open_table(SOCIAL)?;
                for key in &report.orphaned_social_cards {
                    social.remove(key.as_str())?;
                }
            }
            txn.commit()?;
        }
        Ok(report)
    }

    /// Bucket sizes for `kosh cache stats`.
    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let txn = self.db.begin_read()?;
        Ok(CacheStats {
            posts: txn.open_table(POSTS)?.len()?,
            content_blobs: txn.open_table(CONTENT)?.len()?,
            search_records: txn.open_table(SEARCH)?.len()?,
            dependency_records: txn.open_table(DEPS)?.len()?,
            social_hashes: txn.open_table(SOCIAL)?.len()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> CacheStore {
        CacheStore::open(dir.path()).unwrap()
    }

    fn sample_meta(path: &str) -> PostMeta {
        PostMeta {
            post_id: util::post_id(path),
            path: util::normalize_rel_path(path),
            link: format!("/{path}"),
            mod_time: 1_700_000_000,
            frontmatter_hash: "fm".into(),
            body_hash: "body".into(),
            title: "Title".into(),
            tags: vec!["Rust".into()],
            ..PostMeta::default()
        }
    }

    fn commit_one(store: &CacheStore, meta: PostMeta) {
        let searches = HashMap::from([(meta.post_id.clone(), SearchRecord::default())]);
        let deps = HashMap::from([(
            meta.post_id.clone(),
            Dependencies {
                tags: meta.tags.clone(),
                template: "post.html".into(),
            },
        )]);
        store.batch_commit(&[meta], &searches, &deps).unwrap();
    }

    #[test]
    fn test_roundtrip_by_path() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        commit_one(&store, sample_meta("posts/hello.md"));

        let found = store.get_post_by_path("Posts/Hello.md").unwrap().unwrap();
        assert_eq!(found.path, "posts/hello.md");
        assert_eq!(found.title, "Title");
        assert!(store.get_post_by_path("posts/other.md").unwrap().is_none());
    }

    #[test]
    fn test_inline_threshold_exact() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        // Exactly 32 KiB stays inline
        let mut at_limit = sample_meta("posts/at.md");
        store.store_html_for_post(&mut at_limit, vec![b'x'; INLINE_HTML_MAX]);
        assert!(at_limit.inline_html.is_some());
        assert!(at_limit.html_ref.is_none());

        // One byte over goes to the content bucket
        let mut over = sample_meta("posts/over.md");
        store.store_html_for_post(&mut over, vec![b'x'; INLINE_HTML_MAX + 1]);
        assert!(over.inline_html.is_none());
        assert!(over.html_ref.is_some());

        commit_one(&store, at_limit.clone());
        commit_one(&store, over.clone());

        assert_eq!(store.get_html(&at_limit).unwrap().len(), INLINE_HTML_MAX);
        assert_eq!(store.get_html(&over).unwrap().len(), INLINE_HTML_MAX + 1);
    }

    #[test]
    fn test_get_html_missing_reference_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let mut meta = sample_meta("posts/x.md");
        meta.html_ref = Some("deadbeef".into());
        assert!(matches!(
            store.get_html(&meta),
            Err(CacheError::Corrupt(_))
        ));
    }

    #[test]
    fn test_search_record_compression_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let meta = sample_meta("posts/s.md");
        let id = meta.post_id.clone();
        let mut record = SearchRecord {
            title: "Searchable".into(),
            normalized_title: "searchable".into(),
            content: "the quick brown fox".into(),
            doc_len: 3,
            ..SearchRecord::default()
        };
        record.token_freqs.insert("quick".into(), 1);

        let searches = HashMap::from([(id.clone(), record.clone())]);
        store.batch_commit(&[meta], &searches, &HashMap::new()).unwrap();

        let back = store.get_search_record(&id).unwrap().unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_reverse_indices() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let a = sample_meta("posts/a.md");
        let b = sample_meta("posts/b.md");
        commit_one(&store, a.clone());
        commit_one(&store, b.clone());

        let by_tag = store.get_posts_by_tag("rust").unwrap();
        assert_eq!(by_tag.len(), 2);
        assert!(by_tag.contains(&a.post_id));

        let by_tmpl = store.get_posts_by_template("post.html").unwrap();
        assert_eq!(by_tmpl.len(), 2);

        assert!(store.get_posts_by_tag("missing").unwrap().is_empty());
    }

    #[test]
    fn test_delete_post_cleans_indices() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let a = sample_meta("posts/a.md");
        let b = sample_meta("posts/b.md");
        commit_one(&store, a.clone());
        commit_one(&store, b.clone());

        store.delete_post(&a.post_id).unwrap();

        assert!(store.get_post(&a.post_id).unwrap().is_none());
        assert!(store.get_post_by_path("posts/a.md").unwrap().is_none());
        assert_eq!(store.get_posts_by_tag("rust").unwrap(), vec![b.post_id.clone()]);
        assert_eq!(store.list_all_posts().unwrap().len(), 1);

        // Deleting a missing post is a no-op
        store.delete_post(&a.post_id).unwrap();
    }

    #[test]
    fn test_batch_commit_empty_is_noop() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store
            .batch_commit(&[], &HashMap::new(), &HashMap::new())
            .unwrap();
        assert!(store.list_all_posts().unwrap().is_empty());
    }

    #[test]
    fn test_batch_commit_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let meta = sample_meta("posts/i.md");
        commit_one(&store, meta.clone());
        commit_one(&store, meta.clone());

        assert_eq!(store.list_all_posts().unwrap().len(), 1);
        assert_eq!(store.get_posts_by_tag("rust").unwrap().len(), 1);
        let stats = store.stats().unwrap();
        assert_eq!(stats.posts, 1);
        assert_eq!(stats.search_records, 1);
    }

    #[test]
    fn test_gc_reports_orphans() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let mut meta = sample_meta("posts/big.md");
        store.store_html_for_post(&mut meta, vec![b'y'; INLINE_HTML_MAX + 10]);
        commit_one(&store, meta.clone());

        store.set_social_card_hash("posts/big.md", "h1").unwrap();
        store.set_social_card_hash("posts/gone.md", "h2").unwrap();

        // Nothing orphaned while the post is live
        let report = store.gc(true).unwrap();
        assert!(report.orphaned_content.is_empty());
        assert_eq!(report.orphaned_social_cards, vec!["posts/gone.md".to_string()]);

        // Deleting the post orphans its content blob
        store.delete_post(&meta.post_id).unwrap();
        let report = store.gc(false).unwrap();
        assert_eq!(report.orphaned_content.len(), 1);

        // After a real GC pass, nothing is left to collect
        let report = store.gc(true).unwrap();
        assert!(report.orphaned_content.is_empty());
        assert!(report.orphaned_social_cards.is_empty());
    }

    #[test]
    fn test_social_card_hash_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        assert!(store.get_social_card_hash("posts/a.md").unwrap().is_none());
        store.set_social_card_hash("Posts/A.md", "abc").unwrap();
        assert_eq!(
            store.get_social_card_hash("posts/a.md").unwrap().unwrap(),
            "abc"
        );
    }

    #[test]
    fn test_purge_all() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        commit_one(&store, sample_meta("posts/p.md"));
        assert_eq!(store.list_all_posts().unwrap().len(), 1);

        store.purge_all().unwrap();
        assert!(store.list_all_posts().unwrap().is_empty());
        assert!(store.get_post_by_path("posts/p.md").unwrap().is_none());
    }
}
