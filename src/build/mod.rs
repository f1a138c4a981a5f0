//! Build coordination.
//!
//! Runs the strictly ordered build phases: walk the content tree,
//! sweep stale cache entries, warm global metadata from cache, fan
//! posts across the parse pool, drain the social-card pool, compute
//! global artifacts (per-version ordering, tag map, site trees), fan
//! page rendering across the render pool, commit the cache batch and
//! emit the search index.
//!
//! Per-post failures never abort a build; phase-level failures do,
//! and cancellation returns a partial result without committing.

pub mod tree;
pub mod walk;

use crate::{
    cache::CacheStore,
    config::SiteConfig,
    log,
    pipeline::{BuildCounters, CardTask, Pipeline, PostTask, RenderTask, Staging},
    render::Services,
    search::{self, IndexEntry},
    util::{self, BufferPool, CancelToken},
};
use anyhow::{Context, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use rayon::prelude::*;
use std::{
    collections::{HashMap, HashSet},
    fs,
    path::Path,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant, SystemTime},
};
use tree::{PostSummary, TreeNode, build_site_tree, find_prev_next, sort_posts};
use walk::SourceFile;

// ============================================================================
// Options & result
// ============================================================================

/// Build-level flags, mostly mapped from the CLI surface.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Demote every cache hit to a miss.
    pub force: bool,
    /// Regenerate every social card.
    pub force_social: bool,
    /// Render every page even when destinations look fresh.
    pub output_missing: bool,
    /// Include draft posts.
    pub include_drafts: bool,
    /// Restrict the build to one version snapshot (canonical name,
    /// resolved through the config).
    pub version_tag: Option<String>,
}

/// What a build did, for summary logging, watch-mode decisions and
/// the outer listing/tag-page generators.
#[derive(Debug, Default)]
pub struct BuildResult {
    pub posts: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub skipped: usize,
    pub rendered: usize,
    pub has_404: bool,
    pub cancelled: bool,
    pub elapsed: Duration,
    /// Main-feed posts (unversioned or latest version), sorted.
    pub feed: Vec<PostSummary>,
    /// Pinned main-feed posts, sorted.
    pub pinned: Vec<PostSummary>,
    /// Lowercased tag -> sorted posts.
    pub tag_map: HashMap<String, Vec<PostSummary>>,
}

// ============================================================================
// Entry points
// ============================================================================

/// Full site build over the walked content tree.
pub fn build_site(
    cfg: &SiteConfig,
    cache: Option<&CacheStore>,
    services: &Services,
    opts: &BuildOptions,
    cancel: &CancelToken,
) -> Result<BuildResult> {
    let started = Instant::now();
    let (mut files, has_404) = walk::walk_content(cfg);
    if let Some(tag) = &opts.version_tag {
        files.retain(|f| f.version.eq_ignore_ascii_case(tag));
    }
    // A version-scoped build covers one snapshot; the search index
    // spans all of them, so only an unfiltered build rewrites it
    let emit_index = opts.version_tag.is_none();
    let result = run_build(
        cfg, cache, services, opts, cancel, files, has_404, true, emit_index, started,
    )?;
    log_summary(&result);
    Ok(result)
}

/// Rebuild exactly one post (watch mode, body-only change).
///
/// The pre-sweep is skipped; the cache warmup still seeds the full
/// global metadata so the page renders with complete sidebars and
/// neighbors.
pub fn build_single(
    cfg: &SiteConfig,
    cache: Option<&CacheStore>,
    services: &Services,
    opts: &BuildOptions,
    cancel: &CancelToken,
    path: &Path,
) -> Result<BuildResult> {
    let started = Instant::now();
    let content = cfg.content_dir();
    let rel = util::rel_path(&content, path);
    let version = cfg.version_from_path(&rel);
    let files = vec![SourceFile {
        path: path.to_path_buf(),
        rel,
        version,
    }];
    // The search index stays as the last full build wrote it; a
    // one-post index would clobber it
    run_build(
        cfg, cache, services, opts, cancel, files, false, false, false, started,
    )
}

// ============================================================================
// Phases
// ============================================================================

#[allow(clippy::too_many_arguments)]
fn run_build(
    cfg: &SiteConfig,
    cache: Option<&CacheStore>,
    services: &Services,
    opts: &BuildOptions,
    cancel: &CancelToken,
    files: Vec<SourceFile>,
    has_404: bool,
    presweep: bool,
    emit_index: bool,
    started: Instant,
) -> Result<BuildResult> {
    let counters = BuildCounters::default();
    let rendered = AtomicUsize::new(0);

    let finish = |cancelled: bool, counters: &BuildCounters, rendered: &AtomicUsize| BuildResult {
        posts: counters.cache_hits.load(Ordering::Relaxed)
            + counters.cache_misses.load(Ordering::Relaxed),
        cache_hits: counters.cache_hits.load(Ordering::Relaxed),
        cache_misses: counters.cache_misses.load(Ordering::Relaxed),
        skipped: counters.skipped.load(Ordering::Relaxed),
        rendered: rendered.load(Ordering::Relaxed),
        has_404,
        cancelled,
        elapsed: started.elapsed(),
        ..BuildResult::default()
    };

    // P1: purge cache entries whose source no longer exists. With a
    // version filter active, only that snapshot's entries are in
    // scope; other versions keep their cache untouched.
    if presweep && let Some(cache) = cache {
        let walked: HashSet<&str> = files.iter().map(|f| f.rel.as_str()).collect();
        for id in cache.list_all_posts().context("cache sweep failed")? {
            match cache.get_post(&id) {
                Ok(Some(meta)) if walked.contains(meta.path.as_str()) => {}
                Ok(Some(meta)) => {
                    let in_scope = opts
                        .version_tag
                        .as_deref()
                        .is_none_or(|tag| meta.version.eq_ignore_ascii_case(tag));
                    if in_scope {
                        log!("cache"; "purging stale entry {}", meta.path);
                        cache
                            .delete_post(&id)
                            .with_context(|| format!("failed to purge {}", meta.path))?;
                    }
                }
                Ok(None) => {}
                Err(e) => log!("cache"; "skipping unreadable entry {id}: {e}"),
            }
        }
    }

    // P2: seed global metadata from cache so sidebars and neighbors
    // are complete even when only a subset of posts rebuilds
    let all_meta: DashMap<String, PostSummary> = DashMap::new();
    if let Some(cache) = cache {
        let ids = cache.list_all_posts().context("cache warmup failed")?;
        for meta in cache.get_posts_by_ids(&ids).context("cache warmup failed")? {
            all_meta.insert(
                meta.link.clone(),
                PostSummary {
                    title: meta.title,
                    link: meta.link,
                    description: meta.description,
                    tags: meta.tags,
                    date: meta.date,
                    weight: meta.weight,
                    pinned: meta.pinned,
                    draft: meta.draft,
                    version: meta.version,
                    reading_time: meta.reading_time,
                },
            );
        }
    }

    if cancel.is_cancelled() {
        return Ok(finish(true, &counters, &rendered));
    }

    // P3: parse/render fan-out
    let total = files.len();
    let indexed: Vec<OnceLock<IndexEntry>> = (0..total).map(|_| OnceLock::new()).collect();
    let render_queue: Vec<OnceLock<RenderTask>> = (0..total).map(|_| OnceLock::new()).collect();
    let claimed_links: DashMap<String, String> = DashMap::new();
    let next_id = AtomicUsize::new(0);
    let staging = Mutex::new(Staging::default());
    let card_queue: Mutex<Vec<CardTask>> = Mutex::new(Vec::new());
    let buffers = BufferPool::new();

    let pipeline = Pipeline {
        cfg,
        cache,
        services,
        opts,
        cancel,
        all_meta: &all_meta,
        claimed_links: &claimed_links,
        indexed: &indexed,
        next_id: &next_id,
        render_queue: &render_queue,
        card_queue: &card_queue,
        staging: &staging,
        buffers: &buffers,
        counters: &counters,
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(cfg.worker_count())
        .build()
        .context("failed to build worker pool")?;

    let tasks: Vec<PostTask> = files
        .iter()
        .enumerate()
        .map(|(idx, f)| PostTask {
            idx,
            path: f.path.clone(),
            rel: f.rel.clone(),
            version: f.version.clone(),
        })
        .collect();
    pool.install(|| tasks.par_iter().for_each(|task| pipeline.process(task)));

    // Drain the card pool before build completion so cards are on
    // disk when the build reports success
    let cards = std::mem::take(&mut *card_queue.lock());
    if let Some(generator) = services.cards.as_deref() {
        pool.install(|| {
            cards.par_iter().for_each(|card| {
                if cancel.is_cancelled() {
                    return;
                }
                generate_card(card, generator, cache);
            });
        });
    }

    if cancel.is_cancelled() {
        return Ok(finish(true, &counters, &rendered));
    }

    // P4: global artifacts
    let mut posts_by_version: HashMap<String, Vec<PostSummary>> = HashMap::new();
    let mut tag_map: HashMap<String, Vec<PostSummary>> = HashMap::new();
    let mut pinned: Vec<PostSummary> = Vec::new();
    let mut regular: Vec<PostSummary> = Vec::new();

    for entry in all_meta.iter() {
        let post = entry.value().clone();
        if post.draft && !opts.include_drafts {
            continue;
        }
        for tag in &post.tags {
            tag_map
                .entry(tag.trim().to_lowercase())
                .or_default()
                .push(post.clone());
        }
        if cfg.is_main_feed(&post.version) {
            if post.pinned {
                pinned.push(post.clone());
            } else {
                regular.push(post.clone());
            }
        }
        posts_by_version.entry(post.version.clone()).or_default().push(post);
    }

    for posts in posts_by_version.values_mut() {
        sort_posts(posts);
    }
    for posts in tag_map.values_mut() {
        sort_posts(posts);
    }
    sort_posts(&mut pinned);
    sort_posts(&mut regular);

    let site_trees: HashMap<String, Arc<Vec<TreeNode>>> = posts_by_version
        .iter()
        .map(|(version, posts)| {
            (
                version.clone(),
                Arc::new(build_site_tree(posts, &cfg.base.url)),
            )
        })
        .collect();

    // P5: neighbor injection + render fan-out
    let empty_tree: Arc<Vec<TreeNode>> = Arc::new(Vec::new());
    let mut render_tasks: Vec<RenderTask> = render_queue
        .into_iter()
        .filter_map(OnceLock::into_inner)
        .collect();
    for task in &mut render_tasks {
        task.data.site_tree = site_trees
            .get(&task.version)
            .cloned()
            .unwrap_or_else(|| empty_tree.clone());
        if let Some(version_posts) = posts_by_version.get(&task.version) {
            let (prev, next) = find_prev_next(&task.data.permalink, version_posts);
            task.data.prev = prev;
            task.data.next = next;
        }
    }

    pool.install(|| {
        render_tasks.par_iter().for_each(|task| {
            if cancel.is_cancelled() {
                return;
            }
            match services.renderer.render_page(&task.dest_path, &task.data) {
                Ok(()) => {
                    rendered.fetch_add(1, Ordering::Relaxed);
                    if let Err(e) = ensure_fresh_mtime(&task.dest_path, task.source_mtime) {
                        log!("warn"; "mtime check failed for {}: {e}", task.dest_path.display());
                    }
                }
                Err(e) => log!("error"; "render failed for {}: {e:#}", task.dest_path.display()),
            }
        });
    });

    if cancel.is_cancelled() {
        return Ok(finish(true, &counters, &rendered));
    }

    // P6: atomic cache commit of this build's staged records
    if let Some(cache) = cache {
        let staged = std::mem::take(&mut *staging.lock());
        cache
            .batch_commit(&staged.posts, &staged.searches, &staged.deps)
            .context("cache batch commit failed")?;
    }

    // P7: search index, compacted over draft holes
    if emit_index {
        let entries: Vec<IndexEntry> = indexed
            .into_iter()
            .filter_map(OnceLock::into_inner)
            .collect();
        search::write_search_index(&cfg.output_dir().join("search.bin"), entries)
            .context("failed to write search index")?;
    }

    let mut result = finish(false, &counters, &rendered);
    result.feed = regular;
    result.pinned = pinned;
    result.tag_map = tag_map;
    Ok(result)
}

// ============================================================================
// Helpers
// ============================================================================

fn log_summary(result: &BuildResult) {
    log!(
        "build";
        "{} posts ({} hits, {} misses, {} skipped), {} rendered in {:.2?}",
        result.posts,
        result.cache_hits,
        result.cache_misses,
        result.skipped,
        result.rendered,
        result.elapsed
    );
}

/// Generate one social card and record its front-matter hash.
fn generate_card(card: &CardTask, generator: &dyn crate::render::CardGenerator, cache: Option<&CacheStore>) {
    match generator.generate(&card.frontmatter) {
        Ok(bytes) => {
            if let Some(parent) = card.card_dest.parent()
                && let Err(e) = fs::create_dir_all(parent)
            {
                log!("error"; "failed to create card directory: {e}");
                return;
            }
            if let Err(e) = fs::write(&card.card_dest, bytes) {
                log!("error"; "failed to write card {}: {e}", card.card_dest.display());
                return;
            }
            if let Some(cache) = cache
                && let Err(e) = cache.set_social_card_hash(&card.rel_path, &card.frontmatter_hash)
            {
                log!("cache"; "failed to record card hash for {}: {e}", card.rel_path);
            }
        }
        Err(e) => log!("warn"; "card generation failed for {}: {e:#}", card.rel_path),
    }
}

/// The destination must end up strictly newer than the source;
/// rewrite it until the filesystem agrees.
fn ensure_fresh_mtime(dest: &Path, source_mtime: SystemTime) -> Result<()> {
    for _ in 0..3 {
        let dest_mtime = fs::metadata(dest)?.modified()?;
        if dest_mtime > source_mtime {
            return Ok(());
        }
        let bytes = fs::read(dest)?;
        fs::write(dest, bytes)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;
    use tempfile::TempDir;

    fn site(dir: &TempDir) -> SiteConfig {
        let mut cfg = SiteConfig::default();
        cfg.set_root(dir.path());
        cfg.config_path = dir.path().join("kosh.toml");
        fs::create_dir_all(dir.path().join("content")).unwrap();
        cfg
    }

    fn write_post(cfg: &SiteConfig, rel: &str, content: &str) {
        let path = cfg.content_dir().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn build(cfg: &SiteConfig, cache: Option<&CacheStore>) -> BuildResult {
        build_with_opts(cfg, cache, &BuildOptions::default())
    }

    fn build_with_opts(
        cfg: &SiteConfig,
        cache: Option<&CacheStore>,
        opts: &BuildOptions,
    ) -> BuildResult {
        build_site(cfg, cache, &Services::default(), opts, &CancelToken::new()).unwrap()
    }

    fn read_index(cfg: &SiteConfig) -> Vec<serde_json::Value> {
        let file = fs::File::open(cfg.output_dir().join("search.bin")).unwrap();
        let mut decoder = GzDecoder::new(file);
        let mut packed = Vec::new();
        decoder.read_to_end(&mut packed).unwrap();
        rmp_serde::from_slice(&packed).unwrap()
    }

    const POST_A: &str = "---\ntitle: Alpha\ntags: [x]\ndate: 2026-01-01\n---\nhello\n";
    const POST_B: &str = "---\ntitle: Beta\ntags: [x]\ndate: 2026-01-02\n---\nother body\n";

    #[test]
    fn test_clean_build_renders_everything() {
        let dir = TempDir::new().unwrap();
        let cfg = site(&dir);
        write_post(&cfg, "a.md", POST_A);
        write_post(&cfg, "b.md", POST_B);

        let result = build(&cfg, None);
        assert_eq!(result.posts, 2);
        assert_eq!(result.cache_misses, 2);
        assert_eq!(result.rendered, 2);
        assert!(!result.cancelled);

        let a = fs::read_to_string(cfg.output_dir().join("a.html")).unwrap();
        assert!(a.contains("hello"));
        assert!(a.contains("<title>Alpha | A Kosh Site</title>"));
        assert!(cfg.output_dir().join("b.html").exists());
        assert!(cfg.output_dir().join("search.bin").exists());

        assert_eq!(result.feed.len(), 2);
        assert_eq!(result.tag_map.get("x").map(Vec::len), Some(2));
    }

    #[test]
    fn test_warm_rebuild_hits_cache_and_skips_rendering() {
        let dir = TempDir::new().unwrap();
        let cfg = site(&dir);
        let cache = CacheStore::open(&dir.path().join(".kosh-cache")).unwrap();
        write_post(&cfg, "a.md", POST_A);
        write_post(&cfg, "b.md", POST_B);

        let first = build(&cfg, Some(&cache));
        assert_eq!(first.cache_misses, 2);

        let second = build(&cfg, Some(&cache));
        assert_eq!(second.cache_hits, 2);
        assert_eq!(second.cache_misses, 0);
        assert_eq!(second.rendered, 0);
    }

    #[test]
    fn test_body_edit_rebuilds_exactly_that_post() {
        let dir = TempDir::new().unwrap();
        let cfg = site(&dir);
        let cache = CacheStore::open(&dir.path().join(".kosh-cache")).unwrap();
        write_post(&cfg, "a.md", POST_A);
        write_post(&cfg, "b.md", POST_B);
        build(&cfg, Some(&cache));

        let b_before = fs::metadata(cfg.output_dir().join("b.html"))
            .unwrap()
            .modified()
            .unwrap();

        write_post(&cfg, "a.md", "---\ntitle: Alpha\ntags: [x]\ndate: 2026-01-01\n---\nhello world\n");
        let result = build(&cfg, Some(&cache));
        assert_eq!(result.cache_hits, 1);
        assert_eq!(result.cache_misses, 1);

        let a = fs::read_to_string(cfg.output_dir().join("a.html")).unwrap();
        assert!(a.contains("hello world"));

        let b_after = fs::metadata(cfg.output_dir().join("b.html"))
            .unwrap()
            .modified()
            .unwrap();
        assert_eq!(b_before, b_after);
    }

    #[test]
    fn test_force_rebuild_produces_identical_output() {
        let dir = TempDir::new().unwrap();
        let cfg = site(&dir);
        let cache = CacheStore::open(&dir.path().join(".kosh-cache")).unwrap();
        write_post(&cfg, "a.md", POST_A);
        build(&cfg, Some(&cache));

        let before = fs::read(cfg.output_dir().join("a.html")).unwrap();

        let opts = BuildOptions {
            force: true,
            ..BuildOptions::default()
        };
        let result = build_with_opts(&cfg, Some(&cache), &opts);
        assert_eq!(result.cache_misses, 1);

        let after = fs::read(cfg.output_dir().join("a.html")).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_deleted_source_is_swept_from_cache() {
        let dir = TempDir::new().unwrap();
        let cfg = site(&dir);
        let cache = CacheStore::open(&dir.path().join(".kosh-cache")).unwrap();
        write_post(&cfg, "a.md", POST_A);
        write_post(&cfg, "b.md", POST_B);
        build(&cfg, Some(&cache));
        assert!(cache.get_post_by_path("a.md").unwrap().is_some());

        fs::remove_file(cfg.content_dir().join("a.md")).unwrap();
        let result = build(&cfg, Some(&cache));
        assert_eq!(result.posts, 1);
        assert!(cache.get_post_by_path("a.md").unwrap().is_none());
        assert!(cache.get_post_by_path("b.md").unwrap().is_some());

        // The swept post no longer appears in the search index
        let entries = read_index(&cfg);
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].get("link").unwrap().as_str().unwrap(),
            "b.html"
        );
    }

    #[test]
    fn test_oversized_file_skipped() {
        let dir = TempDir::new().unwrap();
        let cfg = site(&dir);
        write_post(&cfg, "ok.md", POST_A);

        let huge = "x".repeat((util::MAX_FILE_SIZE + 1) as usize);
        write_post(&cfg, "huge.md", &huge);

        let result = build(&cfg, None);
        assert!(cfg.output_dir().join("ok.html").exists());
        assert!(!cfg.output_dir().join("huge.html").exists());
        assert_eq!(result.posts, 1);
    }

    #[test]
    fn test_search_index_ids_dense() {
        let dir = TempDir::new().unwrap();
        let cfg = site(&dir);
        for i in 0..12 {
            write_post(
                &cfg,
                &format!("p{i:02}.md"),
                &format!("---\ntitle: P{i}\n---\nbody {i}\n"),
            );
        }
        build(&cfg, None);

        let entries = read_index(&cfg);
        assert_eq!(entries.len(), 12);
        let mut ids: Vec<i64> = entries
            .iter()
            .map(|e| e.get("id").unwrap().as_i64().unwrap())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..12).collect::<Vec<i64>>());
    }

    #[test]
    fn test_drafts_excluded_by_default() {
        let dir = TempDir::new().unwrap();
        let cfg = site(&dir);
        write_post(&cfg, "pub.md", POST_A);
        write_post(&cfg, "wip.md", "---\ntitle: WIP\ndraft: true\n---\nsecret\n");

        build(&cfg, None);
        assert!(cfg.output_dir().join("pub.html").exists());
        assert!(!cfg.output_dir().join("wip.html").exists());
        assert_eq!(read_index(&cfg).len(), 1);

        // With drafts on, the post appears everywhere
        let opts = BuildOptions {
            include_drafts: true,
            ..BuildOptions::default()
        };
        build_with_opts(&cfg, None, &opts);
        assert!(cfg.output_dir().join("wip.html").exists());
        assert_eq!(read_index(&cfg).len(), 2);
    }

    #[test]
    fn test_versioned_posts_land_in_version_dirs() {
        let dir = TempDir::new().unwrap();
        let mut cfg = site(&dir);
        cfg.versions.push(crate::config::VersionConfig {
            name: "v1.0".into(),
            is_latest: true,
        });
        write_post(&cfg, "v1.0/guide.md", "---\ntitle: Guide\n---\nversioned\n");
        write_post(&cfg, "about.md", "---\ntitle: About\n---\nplain\n");

        let result = build(&cfg, None);
        assert!(cfg.output_dir().join("v1.0/guide.html").exists());
        assert!(cfg.output_dir().join("about.html").exists());
        // Both the latest version and unversioned posts feed the main list
        assert_eq!(result.feed.len(), 2);
    }

    #[test]
    fn test_neighbor_links_rendered() {
        let dir = TempDir::new().unwrap();
        let cfg = site(&dir);
        write_post(&cfg, "one.md", "---\ntitle: One\nweight: 1\n---\nfirst\n");
        write_post(&cfg, "two.md", "---\ntitle: Two\nweight: 2\n---\nsecond\n");
        write_post(&cfg, "three.md", "---\ntitle: Three\nweight: 3\n---\nthird\n");
        build(&cfg, None);

        let two = fs::read_to_string(cfg.output_dir().join("two.html")).unwrap();
        assert!(two.contains(r#"rel="prev""#));
        assert!(two.contains("One"));
        assert!(two.contains(r#"rel="next""#));
        assert!(two.contains("Three"));

        let one = fs::read_to_string(cfg.output_dir().join("one.html")).unwrap();
        assert!(!one.contains(r#"rel="prev""#));
        assert!(one.contains(r#"rel="next""#));
    }

    #[test]
    fn test_raw_markdown_mirror() {
        let dir = TempDir::new().unwrap();
        let mut cfg = site(&dir);
        cfg.features.raw_markdown = true;
        write_post(&cfg, "a.md", POST_A);

        build(&cfg, None);
        let mirrored = fs::read_to_string(cfg.output_dir().join("a.md")).unwrap();
        assert_eq!(mirrored, POST_A);
    }

    #[test]
    fn test_version_tag_scopes_the_build() {
        let dir = TempDir::new().unwrap();
        let cfg = site(&dir);
        let cache = CacheStore::open(&dir.path().join(".kosh-cache")).unwrap();
        write_post(&cfg, "v1.0/guide.md", "---\ntitle: Old Guide\n---\nold\n");
        write_post(&cfg, "v2.0/guide.md", "---\ntitle: New Guide\n---\nnew\n");
        write_post(&cfg, "plain.md", POST_A);
        build(&cfg, Some(&cache));

        // Touch only the selected snapshot
        write_post(&cfg, "v1.0/guide.md", "---\ntitle: Old Guide\n---\nold revised\n");
        let opts = BuildOptions {
            version_tag: Some("v1.0".into()),
            ..BuildOptions::default()
        };
        let result = build_with_opts(&cfg, Some(&cache), &opts);
        assert_eq!(result.posts, 1);

        let guide = fs::read_to_string(cfg.output_dir().join("v1.0/guide.html")).unwrap();
        assert!(guide.contains("old revised"));

        // Out-of-scope cache entries survive the sweep
        assert!(cache.get_post_by_path("v2.0/guide.md").unwrap().is_some());
        assert!(cache.get_post_by_path("plain.md").unwrap().is_some());

        // The full search index stays as the last unfiltered build
        // wrote it
        assert_eq!(read_index(&cfg).len(), 3);
    }

    #[test]
    fn test_cancelled_build_commits_nothing() {
        let dir = TempDir::new().unwrap();
        let cfg = site(&dir);
        let cache = CacheStore::open(&dir.path().join(".kosh-cache")).unwrap();
        write_post(&cfg, "a.md", POST_A);

        let cancel = CancelToken::new();
        cancel.cancel();
        let result = build_site(
            &cfg,
            Some(&cache),
            &Services::default(),
            &BuildOptions::default(),
            &cancel,
        )
        .unwrap();
        assert!(result.cancelled);
        assert!(cache.list_all_posts().unwrap().is_empty());
    }

    #[test]
    fn test_build_single_uses_warm_global_metadata() {
        let dir = TempDir::new().unwrap();
        let cfg = site(&dir);
        let cache = CacheStore::open(&dir.path().join(".kosh-cache")).unwrap();
        write_post(&cfg, "one.md", "---\ntitle: One\nweight: 1\n---\nfirst\n");
        write_post(&cfg, "two.md", "---\ntitle: Two\nweight: 2\n---\nsecond\n");
        build(&cfg, Some(&cache));

        // Body-only edit of `two`, rebuilt alone: neighbors still
        // resolve against the cached metadata of `one`
        write_post(&cfg, "two.md", "---\ntitle: Two\nweight: 2\n---\nsecond revised\n");
        build_single(
            &cfg,
            Some(&cache),
            &Services::default(),
            &BuildOptions::default(),
            &CancelToken::new(),
            &cfg.content_dir().join("two.md"),
        )
        .unwrap();

        let two = fs::read_to_string(cfg.output_dir().join("two.html")).unwrap();
        assert!(two.contains("second revised"));
        assert!(two.contains(r#"rel="prev""#));
        assert!(two.contains("One"));
    }
}
