//! Per-post processing: cache probe, parse+render on miss, SSR
//! fragment stitching, search tokenization, social-card scheduling and
//! publication into the build's shared structures.
//!
//! One [`Pipeline::process`] call handles one post. Errors are
//! contained here: a failed post is logged and skipped, contributing
//! nothing downstream. Only cancellation stops the run.

use crate::{
    build::{BuildOptions, tree::PostSummary},
    cache::{CacheStore, Dependencies, PostMeta, SearchRecord},
    config::SiteConfig,
    hash,
    log,
    markdown::{self, FrontmatterFields},
    render::{PageData, Services},
    search::{ANALYZER, IndexEntry},
    util::{self, BufferPool, CancelToken, MAX_FILE_SIZE, WORDS_PER_MINUTE},
};
use anyhow::{Context, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use regex::Regex;
use rustc_hash::FxHashMap;
use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::PathBuf,
    sync::{
        LazyLock, OnceLock,
        atomic::{AtomicUsize, Ordering},
    },
    time::{SystemTime, UNIX_EPOCH},
};

/// Raster image sources rewritten to `.webp` when `compress_images`
/// is enabled.
static RASTER_SRC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)(src="[^"]*)\.(?:png|jpe?g)""#).expect("valid regex"));

// ============================================================================
// Work items
// ============================================================================

/// One post handed to the parse pool.
#[derive(Debug, Clone)]
pub struct PostTask {
    /// Slot index into the render queue (walk order).
    pub idx: usize,
    pub path: PathBuf,
    /// Normalized content-relative path.
    pub rel: String,
    pub version: String,
}

/// A page queued for template rendering in the render phase.
pub struct RenderTask {
    pub dest_path: PathBuf,
    pub version: String,
    pub source_mtime: SystemTime,
    pub data: PageData,
}

/// A social card queued for the card pool.
pub struct CardTask {
    pub rel_path: String,
    pub card_dest: PathBuf,
    pub frontmatter: hash::Frontmatter,
    pub frontmatter_hash: String,
}

/// Cache records accumulated on misses, committed in one batch.
#[derive(Default)]
pub struct Staging {
    pub posts: Vec<PostMeta>,
    pub searches: HashMap<String, SearchRecord>,
    pub deps: HashMap<String, Dependencies>,
}

/// Build-wide counters, updated lock-free by workers.
#[derive(Default)]
pub struct BuildCounters {
    pub cache_hits: AtomicUsize,
    pub cache_misses: AtomicUsize,
    pub skipped: AtomicUsize,
}

// ============================================================================
// Pipeline
// ============================================================================

/// Shared state for the parse fan-out. Everything here is safe for
/// concurrent workers; writes go to slot tables, concurrent maps or
/// short-lived mutexes.
pub struct Pipeline<'a> {
    pub cfg: &'a SiteConfig,
    pub cache: Option<&'a CacheStore>,
    pub services: &'a Services,
    pub opts: &'a BuildOptions,
    pub cancel: &'a CancelToken,

    /// Link -> summary for every known post (cache warmup + this walk).
    pub all_meta: &'a DashMap<String, PostSummary>,
    /// Link -> source path claimed this build, for collision warnings.
    pub claimed_links: &'a DashMap<String, String>,
    /// Dense-ID slot table, one slot per reserved search ID.
    pub indexed: &'a [OnceLock<IndexEntry>],
    /// Monotonic dense-ID counter.
    pub next_id: &'a AtomicUsize,
    /// Render queue slots, one per walked file (walk order).
    pub render_queue: &'a [OnceLock<RenderTask>],
    pub card_queue: &'a Mutex<Vec<CardTask>>,
    pub staging: &'a Mutex<Staging>,
    pub buffers: &'a BufferPool,
    pub counters: &'a BuildCounters,
}

impl Pipeline<'_> {
    /// Process one post. Failures are logged and the post is skipped.
    pub fn process(&self, task: &PostTask) {
        if self.cancel.is_cancelled() {
            return;
        }
        if let Err(e) = self.process_inner(task) {
            self.counters.skipped.fetch_add(1, Ordering::Relaxed);
            log!("error"; "skipping {}: {e:#}", task.rel);
        }
    }

    fn process_inner(&self, task: &PostTask) -> Result<()> {
        // 1. Path metadata
        let html_rel = html_rel_path(&task.rel);
        let clean_html_rel = match task.version.is_empty() {
            true => html_rel.clone(),
            false => html_rel
                .strip_prefix(&format!("{}/", task.version.to_lowercase()))
                .unwrap_or(&html_rel)
                .to_string(),
        };
        let output_dir = self.cfg.output_dir();
        let dest_path = if task.version.is_empty() {
            output_dir.join(&html_rel)
        } else {
            output_dir.join(&task.version).join(&clean_html_rel)
        };
        let link = build_url(&self.cfg.base.url, &task.version, &clean_html_rel);

        // 2. Read the source exactly once
        let info = fs::metadata(&task.path)
            .with_context(|| format!("failed to stat {}", task.path.display()))?;
        if info.len() > MAX_FILE_SIZE {
            log!("warn"; "{} exceeds {} bytes, skipping", task.rel, MAX_FILE_SIZE);
            return Ok(());
        }
        let source_mtime = info.modified().unwrap_or(UNIX_EPOCH);
        let mod_time = source_mtime
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let source = fs::read(&task.path)
            .with_context(|| format!("failed to read {}", task.path.display()))?;

        // 3. Body hash, always: a hit must revalidate against content,
        //    not mtime alone
        let body_hash = hash::body_hash(&source);

        // 4. Cache probe
        let cached_meta = match self.cache {
            Some(cache) => cache.get_post_by_path(&task.rel).unwrap_or_else(|e| {
                log!("cache"; "probe failed for {}: {e}", task.rel);
                None
            }),
            None => None,
        };
        let mut use_cache = false;
        if let Some(meta) = &cached_meta {
            // A mismatched body hash is always a miss, mtime aside
            use_cache = meta.body_hash == body_hash;

            // A possibly-newer source with an unchanged body may still
            // carry edited front-matter, which must cascade (new card,
            // new global artifacts) - revalidate its hash too
            if use_cache && mod_time > meta.mod_time {
                use_cache = match markdown::parse_frontmatter(&source) {
                    Ok(fm) => hash::frontmatter_hash(&fm) == meta.frontmatter_hash,
                    Err(_) => false,
                };
            }
        }
        if self.opts.force {
            use_cache = false;
        }

        // 5. On hit, load the cached artifacts; any failure demotes to
        //    a miss
        let mut cached_html = None;
        let mut cached_search = None;
        if use_cache {
            let cache = self.cache.expect("hit implies cache");
            let meta = cached_meta.as_ref().expect("hit implies candidate");
            match cache.get_html(meta) {
                Ok(html) => cached_html = Some(html),
                Err(e) => {
                    log!("cache"; "demoting {} to miss: {e}", task.rel);
                    use_cache = false;
                }
            }
            if use_cache {
                match cache.get_search_record(&meta.post_id) {
                    Ok(Some(record)) => cached_search = Some(record),
                    Ok(None) => use_cache = false,
                    Err(e) => {
                        log!("cache"; "demoting {} to miss: {e}", task.rel);
                        use_cache = false;
                    }
                }
            }
        }

        let outcome = if use_cache {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            self.from_cache(
                cached_meta.expect("hit"),
                cached_html.expect("hit"),
                cached_search.expect("hit"),
            )?
        } else {
            self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
            self.parse_and_render(task, &source)?
        };

        // 7. Draft gating: no render, no search entry, no card
        if outcome.fields.draft && !self.opts.include_drafts {
            return Ok(());
        }

        // Raw source mirror, for cached and fresh posts alike
        if self.cfg.features.raw_markdown {
            let md_dest = dest_path.with_extension("md");
            if !use_cache || !md_dest.exists() {
                if let Some(parent) = md_dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&md_dest, &source)?;
            }
        }

        // 8. Social card decision
        let card_rel = format!(
            "static/images/cards/{}.webp",
            html_rel.trim_end_matches(".html")
        );
        let card_dest = output_dir.join(&card_rel);
        self.schedule_card(task, &outcome, source_mtime, card_dest, use_cache);

        // 9. Rendering decision
        let will_render = if self.opts.output_missing {
            true
        } else if use_cache {
            !dest_path.exists()
        } else {
            match fs::metadata(&dest_path).and_then(|m| m.modified()) {
                Ok(dest_mtime) => dest_mtime <= source_mtime,
                Err(_) => true,
            }
        };

        // 10. Publish into the shared structures
        let image = self.image_url(&outcome, &html_rel);
        let summary = PostSummary {
            title: outcome.fields.title.clone(),
            link: link.clone(),
            description: outcome.fields.description.clone(),
            tags: outcome.fields.tags.clone(),
            date: outcome.fields.date,
            weight: outcome.fields.weight,
            pinned: outcome.fields.pinned,
            draft: outcome.fields.draft,
            version: task.version.clone(),
            reading_time: outcome.reading_time,
        };

        if let Some(previous) = self.claimed_links.insert(link.clone(), task.rel.clone())
            && previous != task.rel
        {
            log!("warn"; "link collision: {} and {} both resolve to {link} (keeping the latter)",
                previous, task.rel);
        }
        self.all_meta.insert(link.clone(), summary);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = IndexEntry {
            id: id as i64,
            title: outcome.fields.title.clone(),
            normalized_title: outcome.fields.title.to_lowercase(),
            link: html_rel.clone(),
            description: outcome.fields.description.clone(),
            tags: outcome.fields.tags.clone(),
            normalized_tags: outcome.fields.tags.iter().map(|t| t.to_lowercase()).collect(),
            content: outcome.plain_text.clone(),
            version: task.version.clone(),
            doc_len: outcome.doc_len,
            token_freqs: outcome.token_freqs.clone(),
        };
        self.indexed[id].set(entry).ok();

        if will_render {
            let tab_title = match outcome.fields.title.is_empty() {
                true => self.cfg.base.title.clone(),
                false => format!("{} | {}", outcome.fields.title, self.cfg.base.title),
            };
            let data = PageData {
                title: outcome.fields.title.clone(),
                description: outcome.fields.description.clone(),
                content: outcome.html.clone(),
                permalink: link.clone(),
                tab_title,
                image,
                base_url: self.cfg.base.url.clone(),
                version: task.version.clone(),
                toc: outcome.toc.clone(),
                meta: outcome.frontmatter.clone(),
                ..PageData::default()
            };
            self.render_queue[task.idx]
                .set(RenderTask {
                    dest_path,
                    version: task.version.clone(),
                    source_mtime,
                    data,
                })
                .ok();
        }

        if self.cancel.is_cancelled() {
            return Ok(());
        }

        if !use_cache && let Some(cache) = self.cache {
            let mut meta = PostMeta {
                post_id: util::post_id(&task.rel),
                path: task.rel.clone(),
                version: task.version.clone(),
                link,
                mod_time,
                frontmatter_hash: outcome.frontmatter_hash.clone(),
                body_hash,
                ssr_input_hashes: outcome.ssr_hashes.clone(),
                title: outcome.fields.title.clone(),
                description: outcome.fields.description.clone(),
                tags: outcome.fields.tags.clone(),
                date: outcome.fields.date,
                weight: outcome.fields.weight,
                pinned: outcome.fields.pinned,
                draft: outcome.fields.draft,
                reading_time: outcome.reading_time,
                toc: outcome.toc.clone(),
                extra: outcome.frontmatter.clone(),
                inline_html: None,
                html_ref: None,
            };
            cache.store_html_for_post(&mut meta, outcome.html.clone().into_bytes());

            let record = SearchRecord {
                title: outcome.fields.title.clone(),
                normalized_title: outcome.fields.title.to_lowercase(),
                normalized_tags: outcome.fields.tags.iter().map(|t| t.to_lowercase()).collect(),
                content: outcome.plain_text.clone(),
                version: task.version.clone(),
                doc_len: outcome.doc_len,
                token_freqs: outcome.token_freqs.clone(),
            };
            let dep = Dependencies {
                tags: outcome.fields.tags.clone(),
                template: outcome.template.clone(),
            };

            let post_id = meta.post_id.clone();
            let mut staging = self.staging.lock();
            staging.posts.push(meta);
            staging.searches.insert(post_id.clone(), record);
            staging.deps.insert(post_id, dep);
        }

        Ok(())
    }

    // ------------------------------------------------------------------------
    // Hit / miss bodies
    // ------------------------------------------------------------------------

    fn from_cache(
        &self,
        meta: PostMeta,
        html: Vec<u8>,
        search: SearchRecord,
    ) -> Result<PostOutcome> {
        let html = String::from_utf8(html)
            .map_err(|_| anyhow::anyhow!("cached HTML for {} is not UTF-8", meta.path))?;
        Ok(PostOutcome {
            html,
            toc: meta.toc.clone(),
            frontmatter_hash: meta.frontmatter_hash.clone(),
            ssr_hashes: meta.ssr_input_hashes.clone(),
            reading_time: meta.reading_time,
            template: String::new(),
            plain_text: search.content.clone(),
            doc_len: search.doc_len,
            token_freqs: search.token_freqs.clone(),
            fields: FrontmatterFields {
                title: meta.title.clone(),
                description: meta.description.clone(),
                tags: meta.tags.clone(),
                date: meta.date,
                weight: meta.weight,
                pinned: meta.pinned,
                draft: meta.draft,
                template: String::new(),
                image: match meta.extra.get("image") {
                    Some(serde_yaml::Value::String(s)) if !s.is_empty() => Some(s.clone()),
                    _ => None,
                },
            },
            frontmatter: meta.extra,
        })
    }

    fn parse_and_render(&self, task: &PostTask, source: &[u8]) -> Result<PostOutcome> {
        let doc = markdown::parse(source, &task.path)?;

        // Assemble the HTML in a pooled buffer; the final copy below
        // is what escapes the worker.
        let mut buf = self.buffers.acquire();
        buf.push_str(&doc.html);

        // SSR fragments: swap diagram placeholders for cached or
        // freshly rendered SVG, fall back to the raw block on failure
        let mut ssr_hashes = Vec::with_capacity(doc.diagrams.len());
        for block in &doc.diagrams {
            let placeholder = markdown::diagram_placeholder(&block.hash);
            let replacement = match self.services.diagram_svg(&block.kind, &block.source, &block.hash)
            {
                Some(svg) => svg,
                None => format!(
                    "<pre><code class=\"language-{}\">{}</code></pre>",
                    block.kind,
                    crate::render::html_escape(&block.source)
                ),
            };
            replace_once(&mut buf, &placeholder, &replacement);
            ssr_hashes.push(block.hash.clone());
        }

        if markdown::has_math(source) {
            let (rewritten, math_hashes) = self.services.render_math(std::mem::take(&mut buf));
            buf = rewritten;
            ssr_hashes.extend(math_hashes);
        }

        if self.cfg.features.compress_images {
            let rewritten = replace_to_webp(&buf);
            buf.clear();
            buf.push_str(&rewritten);
        }

        let frontmatter_hash = hash::frontmatter_hash(&doc.frontmatter);
        let fields = FrontmatterFields::from_frontmatter(&doc.frontmatter);

        // Search tokenization over title + description + tags + body
        let mut searchable = String::with_capacity(
            fields.title.len() + fields.description.len() + doc.plain_text.len() + 64,
        );
        searchable.push_str(&fields.title);
        searchable.push(' ');
        searchable.push_str(&fields.description);
        searchable.push(' ');
        for tag in &fields.tags {
            searchable.push_str(tag);
            searchable.push(' ');
        }
        searchable.push_str(&doc.plain_text);

        let tokens = ANALYZER.analyze(&searchable);
        let doc_len = tokens.len() as u32;
        let mut freqs: FxHashMap<String, u32> = FxHashMap::default();
        for token in tokens {
            *freqs.entry(token).or_insert(0) += 1;
        }
        let token_freqs: BTreeMap<String, u32> = freqs.into_iter().collect();

        let word_count = std::str::from_utf8(source)
            .map(|s| s.split_whitespace().count())
            .unwrap_or(0);
        let reading_time = (word_count as f64 / WORDS_PER_MINUTE).ceil() as u32;

        let html = buf.clone();
        self.buffers.release(buf);

        let template = match fields.template.is_empty() {
            true => "post.html".to_string(),
            false => fields.template.clone(),
        };

        Ok(PostOutcome {
            html,
            toc: doc.toc,
            frontmatter_hash,
            ssr_hashes,
            reading_time,
            template,
            plain_text: doc.plain_text,
            doc_len,
            token_freqs,
            fields,
            frontmatter: doc.frontmatter,
        })
    }

    // ------------------------------------------------------------------------
    // Cards & images
    // ------------------------------------------------------------------------

    fn schedule_card(
        &self,
        task: &PostTask,
        outcome: &PostOutcome,
        source_mtime: SystemTime,
        card_dest: PathBuf,
        use_cache: bool,
    ) {
        if self.services.cards.is_none() {
            return;
        }

        let card_exists = fs::metadata(&card_dest)
            .and_then(|m| m.modified())
            .map(|card_mtime| card_mtime > source_mtime)
            .unwrap_or(false);

        let recorded_hash = match self.cache {
            Some(_) if use_cache => Some(outcome.frontmatter_hash.clone()),
            Some(cache) => cache.get_social_card_hash(&task.rel).unwrap_or(None),
            None => None,
        };

        let hash_stale = recorded_hash.as_deref() != Some(outcome.frontmatter_hash.as_str());
        if self.opts.force_social || hash_stale || !card_exists {
            self.card_queue.lock().push(CardTask {
                rel_path: task.rel.clone(),
                card_dest,
                frontmatter: outcome.frontmatter.clone(),
                frontmatter_hash: outcome.frontmatter_hash.clone(),
            });
        } else if recorded_hash.is_none()
            && let Some(cache) = self.cache
            && let Err(e) = cache.set_social_card_hash(&task.rel, &outcome.frontmatter_hash)
        {
            log!("cache"; "failed to record card hash for {}: {e}", task.rel);
        }
    }

    fn image_url(&self, outcome: &PostOutcome, html_rel: &str) -> String {
        match &outcome.fields.image {
            Some(img) if img.starts_with("http") => img.clone(),
            Some(img) => {
                let mut img = img.clone();
                if self.cfg.features.compress_images
                    && let Some(stem) = img
                        .strip_suffix(".png")
                        .or_else(|| img.strip_suffix(".jpg"))
                        .or_else(|| img.strip_suffix(".jpeg"))
                {
                    img = format!("{stem}.webp");
                }
                format!("{}{img}", self.cfg.base.url)
            }
            None => format!(
                "{}/static/images/cards/{}.webp",
                self.cfg.base.url,
                html_rel.trim_end_matches(".html")
            ),
        }
    }
}

/// Everything the pipeline learned about one post, from cache or from
/// a fresh parse.
struct PostOutcome {
    html: String,
    toc: Vec<crate::cache::TocEntry>,
    frontmatter_hash: String,
    ssr_hashes: Vec<String>,
    reading_time: u32,
    template: String,
    plain_text: String,
    doc_len: u32,
    token_freqs: BTreeMap<String, u32>,
    fields: FrontmatterFields,
    frontmatter: hash::Frontmatter,
}

// ============================================================================
// Helpers
// ============================================================================

/// Map a normalized content-relative path to its `.html` counterpart.
pub fn html_rel_path(rel: &str) -> String {
    match rel.strip_suffix(".md") {
        Some(stem) => format!("{stem}.html"),
        None => format!("{rel}.html"),
    }
}

/// Join base URL, optional version and relative path with single
/// slashes.
pub fn build_url(base: &str, version: &str, rel: &str) -> String {
    let mut url = String::from(base.trim_end_matches('/'));
    url.push('/');
    if !version.is_empty() {
        url.push_str(version);
        url.push('/');
    }
    url.push_str(rel.trim_start_matches('/'));
    url
}

/// In-place single replacement, avoiding a full-buffer reallocation.
fn replace_once(buf: &mut String, needle: &str, replacement: &str) {
    if let Some(pos) = buf.find(needle) {
        buf.replace_range(pos..pos + needle.len(), replacement);
    }
}

/// Rewrite raster `src` attributes to `.webp`.
pub fn replace_to_webp(html: &str) -> String {
    RASTER_SRC.replace_all(html, "$1.webp\"").into_owned()
}
