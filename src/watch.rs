//! Watch mode: file-system events in, minimal rebuilds out.
//!
//! Events flow through a debouncer (300 ms, editor temp files
//! filtered) into the change classifier, which maps each changed path
//! to the cheapest safe action: nothing, a single-post rebuild, a
//! re-render of the posts using a changed template, or a full rebuild.

use crate::{
    build::{self, BuildOptions},
    cache::CacheStore,
    config::SiteConfig,
    hash, log, markdown,
    render::Services,
    util::{self, CancelToken},
};
use anyhow::{Context, Result};
use notify::{Event, EventKind, RecursiveMode, Watcher, event::ModifyKind};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

const DEBOUNCE_MS: u64 = 300;

// ============================================================================
// Change classification
// ============================================================================

/// Simplified file-system operation, as the classifier sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Create,
    Modify,
    Remove,
}

/// What a single changed path requires.
#[derive(Debug, PartialEq, Eq)]
pub enum ChangeAction {
    /// Nothing observable changed.
    Noop,
    /// Body-only edit: run the pipeline for exactly this file.
    SinglePost(PathBuf),
    /// A non-layout template changed: rebuild the posts that use it
    /// (content-relative paths).
    RebuildPosts(Vec<String>),
    /// A deleted/renamed post: purge this cache path, then rebuild.
    RemovedPost(String),
    /// Safe default: new post, front-matter change, layout, assets,
    /// config, anything unrecognized.
    Full,
}

/// Classify one file-system change.
///
/// Kept free of side effects so the decision table is testable; the
/// watch loop applies the cache deletion for [`ChangeAction::RemovedPost`].
pub fn classify_change(
    path: &Path,
    kind: ChangeKind,
    cfg: &SiteConfig,
    cache: Option<&CacheStore>,
) -> ChangeAction {
    let content_dir = cfg.content_dir();
    let is_markdown =
        path.extension().is_some_and(|e| e == "md") && path.starts_with(&content_dir);

    if is_markdown {
        let rel = util::rel_path(&content_dir, path);
        if kind == ChangeKind::Remove {
            return ChangeAction::RemovedPost(rel);
        }
        return classify_post_edit(path, &rel, cache);
    }

    // Template change: the base layout affects everything, any other
    // template affects only the posts recorded against it
    let templates_dir = cfg.templates_dir();
    if path.starts_with(&templates_dir) {
        let rel_tmpl = util::rel_path(&templates_dir, path);
        if rel_tmpl == "layout.html" {
            return ChangeAction::Full;
        }
        if let Some(cache) = cache
            && let Ok(ids) = cache.get_posts_by_template(&rel_tmpl)
            && let Ok(posts) = cache.get_posts_by_ids(&ids)
        {
            return ChangeAction::RebuildPosts(posts.into_iter().map(|p| p.path).collect());
        }
        return ChangeAction::RebuildPosts(Vec::new());
    }

    // Asset hashes are embedded in rendered HTML
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);
    if matches!(ext.as_deref(), Some("css") | Some("js")) && path.starts_with(cfg.static_dir()) {
        return ChangeAction::Full;
    }

    ChangeAction::Full
}

/// Decide between no-op, single-post and full rebuild for an edited
/// post, by comparing both hashes against the cached record.
fn classify_post_edit(path: &Path, rel: &str, cache: Option<&CacheStore>) -> ChangeAction {
    let Some(cache) = cache else {
        return ChangeAction::Full;
    };
    let Ok(source) = fs::read(path) else {
        return ChangeAction::Full;
    };
    let Ok(frontmatter) = markdown::parse_frontmatter(&source) else {
        return ChangeAction::Full;
    };

    let cached = match cache.get_post_by_path(rel) {
        Ok(Some(meta)) => meta,
        // A post the cache has never seen may affect the site tree,
        // tag pages and neighbors everywhere
        _ => return ChangeAction::Full,
    };

    if hash::frontmatter_hash(&frontmatter) != cached.frontmatter_hash {
        return ChangeAction::Full;
    }
    if cached.body_hash.is_empty() || hash::body_hash(&source) != cached.body_hash {
        return ChangeAction::SinglePost(path.to_path_buf());
    }
    ChangeAction::Noop
}

// ============================================================================
// Debounce state
// ============================================================================

/// Check if path is a temp/backup file (editor artifacts).
fn is_temp_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    matches!(ext, "bck" | "bak" | "backup" | "swp" | "swo" | "tmp")
        || name.ends_with('~')
        || name.starts_with('.')
}

/// Batches rapid file events with debouncing.
struct Debouncer {
    pending: HashMap<PathBuf, ChangeKind>,
    last_event: Option<Instant>,
}

impl Debouncer {
    fn new() -> Self {
        Self {
            pending: HashMap::new(),
            last_event: None,
        }
    }

    fn add(&mut self, event: Event) {
        let Some(kind) = map_event_kind(&event) else {
            return;
        };
        for path in event.paths {
            if !is_temp_file(&path) {
                // Remove wins over an earlier create/modify for the
                // same path within one debounce window
                match self.pending.get(&path) {
                    Some(ChangeKind::Remove) => {}
                    _ => {
                        self.pending.insert(path, kind);
                    }
                }
            }
        }
        self.last_event = Some(Instant::now());
    }

    fn ready(&self) -> bool {
        !self.pending.is_empty()
            && self
                .last_event
                .is_some_and(|t| t.elapsed() >= Duration::from_millis(DEBOUNCE_MS))
    }

    fn take(&mut self) -> Vec<(PathBuf, ChangeKind)> {
        self.last_event = None;
        self.pending.drain().collect()
    }

    fn timeout(&self) -> Duration {
        if self.pending.is_empty() {
            Duration::from_secs(60)
        } else {
            Duration::from_millis(DEBOUNCE_MS)
        }
    }
}

fn map_event_kind(event: &Event) -> Option<ChangeKind> {
    match event.kind {
        EventKind::Create(_) => Some(ChangeKind::Create),
        EventKind::Remove(_) => Some(ChangeKind::Remove),
        EventKind::Modify(ModifyKind::Name(_)) => {
            // A rename shows up as a modify; the old name is gone
            let gone = event.paths.iter().any(|p| !p.exists());
            Some(if gone {
                ChangeKind::Remove
            } else {
                ChangeKind::Modify
            })
        }
        EventKind::Modify(_) => Some(ChangeKind::Modify),
        _ => None,
    }
}

// ============================================================================
// Event loop
// ============================================================================

/// Apply classified changes. Collapses to one full rebuild when any
/// path demands it.
fn handle_changes(
    changes: Vec<(PathBuf, ChangeKind)>,
    cfg: &SiteConfig,
    cache: Option<&CacheStore>,
    services: &Services,
    opts: &BuildOptions,
    cancel: &CancelToken,
) {
    let mut singles: Vec<PathBuf> = Vec::new();
    let mut needs_full = false;

    for (path, kind) in changes {
        match classify_change(&path, kind, cfg, cache) {
            ChangeAction::Noop => {
                log!("watch"; "unchanged: {}", path.display());
            }
            ChangeAction::SinglePost(p) => singles.push(p),
            ChangeAction::RebuildPosts(rels) => {
                let content = cfg.content_dir();
                singles.extend(rels.into_iter().map(|rel| content.join(rel)));
            }
            ChangeAction::RemovedPost(rel) => {
                if let Some(cache) = cache {
                    let id = util::post_id(&rel);
                    if let Err(e) = cache.delete_post(&id) {
                        log!("cache"; "failed to delete {rel}: {e}");
                    } else {
                        log!("watch"; "removed {rel} from cache");
                    }
                }
                needs_full = true;
            }
            ChangeAction::Full => needs_full = true,
        }
    }

    if needs_full {
        log!("watch"; "rebuilding site...");
        if let Err(e) = build::build_site(cfg, cache, services, opts, cancel) {
            log!("error"; "full rebuild failed: {e:#}");
        }
        return;
    }

    for path in singles {
        log!("watch"; "rebuilding {}", path.display());
        if let Err(e) = build::build_single(cfg, cache, services, opts, cancel, &path) {
            log!("error"; "single-post rebuild failed: {e:#}");
        }
    }
}

/// Start the blocking file watcher with debouncing and live rebuild.
pub fn watch_for_changes_blocking(
    cfg: &SiteConfig,
    cache: Option<&CacheStore>,
    services: &Services,
    opts: &BuildOptions,
    cancel: &CancelToken,
) -> Result<()> {
    let (tx, rx) = std::sync::mpsc::channel();
    let mut watcher = notify::recommended_watcher(tx).context("failed to create file watcher")?;

    for (path, recursive) in [
        (cfg.content_dir(), true),
        (cfg.templates_dir(), true),
        (cfg.static_dir(), true),
        (cfg.config_path.clone(), false),
    ] {
        if !path.exists() {
            continue;
        }
        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher
            .watch(&path, mode)
            .with_context(|| format!("failed to watch {}", path.display()))?;
        log!("watch"; "watching {}", path.display());
    }

    let mut debouncer = Debouncer::new();

    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }
        match rx.recv_timeout(debouncer.timeout()) {
            Ok(Ok(event)) => debouncer.add(event),
            Ok(Err(e)) => log!("watch"; "error: {e}"),

            Err(std::sync::mpsc::RecvTimeoutError::Timeout) if debouncer.ready() => {
                handle_changes(debouncer.take(), cfg, cache, services, opts, cancel);
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return Ok(()),
            _ => {}
        }
    }
}
