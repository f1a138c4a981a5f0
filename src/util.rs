//! Shared helpers: post identity, path normalization, buffer pooling,
//! worker sizing and build cancellation.

use parking_lot::Mutex;
use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

/// Source files above this size are skipped with a warning.
pub const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Words-per-minute rate used for the reading-time estimate.
pub const WORDS_PER_MINUTE: f64 = 200.0;

/// Normalize a content-relative path for use as a cache key:
/// lowercased, forward slashes only.
pub fn normalize_rel_path(path: &str) -> String {
    path.replace('\\', "/").to_lowercase()
}

/// Stable post identifier derived from the content-relative path.
///
/// Hashing keeps keys fixed-width and makes the `pathIdx` secondary
/// index the only path-shaped key in the store.
pub fn post_id(rel_path: &str) -> String {
    blake3::hash(normalize_rel_path(rel_path).as_bytes())
        .to_hex()
        .to_string()
}

/// Compute a path relative to `base`, normalized for cache keys.
pub fn rel_path(base: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(base).unwrap_or(path);
    normalize_rel_path(&rel.to_string_lossy())
}

/// Number of workers for parse/card/render pools.
pub fn worker_count() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .max(2)
}

// ============================================================================
// Buffer Pool
// ============================================================================

/// Pool of reusable string buffers for rendered HTML.
///
/// Buffers are reset on acquire and must not escape the worker that
/// acquired them.
#[derive(Default)]
pub struct BufferPool {
    buffers: Mutex<Vec<String>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a cleared buffer from the pool, allocating if empty.
    pub fn acquire(&self) -> String {
        let mut buf = self.buffers.lock().pop().unwrap_or_default();
        buf.clear();
        buf
    }

    /// Return a buffer for reuse.
    pub fn release(&self, buf: String) {
        self.buffers.lock().push(buf);
    }
}

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative cancellation token threaded through every build phase.
///
/// Workers check it on each dequeued item; a cancelled build drains
/// without processing and returns without committing the cache batch.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_rel_path() {
        assert_eq!(normalize_rel_path("Posts\\Hello.md"), "posts/hello.md");
        assert_eq!(normalize_rel_path("a/B.md"), "a/b.md");
    }

    #[test]
    fn test_post_id_stable_across_case_and_separators() {
        assert_eq!(post_id("Posts/Hello.md"), post_id("posts\\hello.md"));
        assert_ne!(post_id("posts/a.md"), post_id("posts/b.md"));
    }

    #[test]
    fn test_rel_path_strips_base() {
        let base = Path::new("/site/content");
        let path = Path::new("/site/content/Docs/Intro.md");
        assert_eq!(rel_path(base, path), "docs/intro.md");
    }

    #[test]
    fn test_worker_count_minimum() {
        assert!(worker_count() >= 2);
    }

    #[test]
    fn test_buffer_pool_reuse() {
        let pool = BufferPool::new();
        let mut buf = pool.acquire();
        buf.push_str("hello");
        pool.release(buf);

        let buf = pool.acquire();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
