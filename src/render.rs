//! Rendering collaborators: page templates, diagram/math SSR and
//! social cards.
//!
//! The build pipeline talks to these through traits so themes and
//! external renderers can be swapped without touching the pipeline.
//! [`HtmlRenderer`] is the built-in page renderer; diagram, math and
//! card renderers are optional and absent by default. The external
//! SSR renderers hold process-global state and are not reentrant, so
//! every invocation is serialized behind one coarse mutex.

use crate::{
    build::tree::{PostSummary, TreeNode},
    cache::TocEntry,
    hash::Frontmatter,
    log,
};
use anyhow::{Context, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::{borrow::Cow, fs, path::Path, sync::Arc};

// ============================================================================
// Page data
// ============================================================================

/// Everything a template needs to render one page.
#[derive(Debug, Clone, Default)]
pub struct PageData {
    pub title: String,
    pub description: String,
    /// Rendered HTML body fragment.
    pub content: String,
    pub permalink: String,
    pub tab_title: String,
    /// Social-card image URL.
    pub image: String,
    pub base_url: String,
    pub version: String,
    pub toc: Vec<TocEntry>,
    /// Opaque front-matter bag.
    pub meta: Frontmatter,
    /// Navigation tree for this page's version (injected in the render
    /// phase, after all posts are known).
    pub site_tree: Arc<Vec<TreeNode>>,
    pub prev: Option<PostSummary>,
    pub next: Option<PostSummary>,
}

// ============================================================================
// Collaborator contracts
// ============================================================================

/// Template execution: renders `data` and writes the page at `dest`.
pub trait PageRenderer: Send + Sync {
    fn render_page(&self, dest: &Path, data: &PageData) -> Result<()>;
}

/// Server-side diagram rendering (`d2`, `mermaid`, ...) to SVG.
pub trait DiagramRenderer: Send + Sync {
    fn render(&self, kind: &str, source: &str) -> Result<String>;
}

/// Server-side math rendering over an HTML fragment. Returns the
/// rewritten HTML and the hash of every math input it rendered.
pub trait MathRenderer: Send + Sync {
    fn render(&self, html: &str) -> Result<(String, Vec<String>)>;
}

/// Social-card image generation from a post's front-matter.
pub trait CardGenerator: Send + Sync {
    fn generate(&self, frontmatter: &Frontmatter) -> Result<Vec<u8>>;
}

// ============================================================================
// Services
// ============================================================================

/// The bundle of rendering collaborators handed to a build.
pub struct Services {
    pub renderer: Box<dyn PageRenderer>,
    pub diagrams: Option<Box<dyn DiagramRenderer>>,
    pub math: Option<Box<dyn MathRenderer>>,
    pub cards: Option<Box<dyn CardGenerator>>,
    /// Single-writer guard for the non-reentrant SSR renderers.
    ssr_lock: Mutex<()>,
    /// DiagramHash -> SVG, shared across posts and builds in-process.
    diagram_cache: DashMap<String, String>,
}

impl Default for Services {
    fn default() -> Self {
        Self::new(Box::new(HtmlRenderer))
    }
}

impl Services {
    pub fn new(renderer: Box<dyn PageRenderer>) -> Self {
        Self {
            renderer,
            diagrams: None,
            math: None,
            cards: None,
            ssr_lock: Mutex::new(()),
            diagram_cache: DashMap::new(),
        }
    }

    /// Fetch a rendered diagram from the cache, invoking the renderer
    /// under the single-writer guard on a miss. `None` when no diagram
    /// renderer is wired or rendering failed (caller falls back to the
    /// raw block).
    pub fn diagram_svg(&self, kind: &str, source: &str, hash: &str) -> Option<String> {
        if let Some(svg) = self.diagram_cache.get(hash) {
            return Some(svg.value().clone());
        }
        let renderer = self.diagrams.as_ref()?;

        let _guard = self.ssr_lock.lock();
        match renderer.render(kind, source) {
            Ok(svg) => {
                self.diagram_cache.insert(hash.to_string(), svg.clone());
                Some(svg)
            }
            Err(e) => {
                log!("warn"; "diagram render failed ({kind}): {e}");
                None
            }
        }
    }

    /// Run the math renderer over an HTML fragment under the
    /// single-writer guard. On failure the fragment passes through
    /// untouched.
    pub fn render_math(&self, html: String) -> (String, Vec<String>) {
        let Some(renderer) = self.math.as_ref() else {
            return (html, Vec::new());
        };
        let _guard = self.ssr_lock.lock();
        match renderer.render(&html) {
            Ok((rewritten, hashes)) => (rewritten, hashes),
            Err(e) => {
                log!("warn"; "math render failed: {e}");
                (html, Vec::new())
            }
        }
    }
}

// ============================================================================
// Built-in page renderer
// ============================================================================

/// Minimal standalone page renderer: a head with metadata, a sidebar
/// from the site tree, the body fragment, and neighbor links.
pub struct HtmlRenderer;

impl PageRenderer for HtmlRenderer {
    fn render_page(&self, dest: &Path, data: &PageData) -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut page = String::with_capacity(data.content.len() + 2048);
        page.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
        page.push_str(&format!("<title>{}</title>\n", html_escape(&data.tab_title)));
        if !data.description.is_empty() {
            page.push_str(&format!(
                "<meta name=\"description\" content=\"{}\">\n",
                html_escape(&data.description)
            ));
        }
        if !data.image.is_empty() {
            page.push_str(&format!(
                "<meta property=\"og:image\" content=\"{}\">\n",
                html_escape(&data.image)
            ));
        }
        if !data.permalink.is_empty() {
            page.push_str(&format!(
                "<link rel=\"canonical\" href=\"{}\">\n",
                html_escape(&data.permalink)
            ));
        }
        page.push_str("</head>\n<body>\n");

        if !data.site_tree.is_empty() {
            page.push_str("<nav class=\"site-tree\">\n");
            render_tree(&mut page, &data.site_tree);
            page.push_str("</nav>\n");
        }

        if !data.toc.is_empty() {
            page.push_str("<aside class=\"toc\"><ul>\n");
            for entry in &data.toc {
                page.push_str(&format!(
                    "<li data-level=\"{}\"><a href=\"#{}\">{}</a></li>\n",
                    entry.level,
                    html_escape(&entry.id),
                    html_escape(&entry.text)
                ));
            }
            page.push_str("</ul></aside>\n");
        }

        page.push_str("<main>\n");
        page.push_str(&data.content);
        page.push_str("\n</main>\n");

        if data.prev.is_some() || data.next.is_some() {
            page.push_str("<nav class=\"neighbors\">\n");
            if let Some(prev) = &data.prev {
                page.push_str(&format!(
                    "<a rel=\"prev\" href=\"{}\">{}</a>\n",
                    html_escape(&prev.link),
                    html_escape(&prev.title)
                ));
            }
            if let Some(next) = &data.next {
                page.push_str(&format!(
                    "<a rel=\"next\" href=\"{}\">{}</a>\n",
                    html_escape(&next.link),
                    html_escape(&next.title)
                ));
            }
            page.push_str("</nav>\n");
        }

        page.push_str("</body>\n</html>\n");

        fs::write(dest, page).with_context(|| format!("failed to write {}", dest.display()))?;
        Ok(())
    }
}

fn render_tree(out: &mut String, nodes: &[TreeNode]) {
    out.push_str("<ul>\n");
    for node in nodes {
        match &node.post {
            Some(post) => out.push_str(&format!(
                "<li><a href=\"{}\">{}</a></li>\n",
                html_escape(&post.link),
                html_escape(&node.name)
            )),
            None => {
                out.push_str(&format!("<li>{}", html_escape(&node.name)));
                render_tree(out, &node.children);
                out.push_str("</li>\n");
            }
        }
    }
    out.push_str("</ul>\n");
}

/// Escape HTML special characters.
///
/// Uses `Cow` to avoid allocation when no escaping is needed.
#[inline]
pub fn html_escape(s: &str) -> Cow<'_, str> {
    if !s.contains(['<', '>', '&', '"']) {
        return Cow::Borrowed(s);
    }

    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            '&' => result.push_str("&amp;"),
            '"' => result.push_str("&quot;"),
            _ => result.push(c),
        }
    }
    Cow::Owned(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_html_escape_plain() {
        assert_eq!(html_escape("hello world"), "hello world");
    }

    #[test]
    fn test_html_escape_special_chars() {
        assert_eq!(html_escape("<script>"), "&lt;script&gt;");
        assert_eq!(html_escape("a & b"), "a &amp; b");
        assert_eq!(html_escape("say \"hi\""), "say &quot;hi&quot;");
    }

    #[test]
    fn test_render_page_writes_file() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("nested/post.html");

        let data = PageData {
            title: "Hello".into(),
            tab_title: "Hello | Site".into(),
            description: "A post".into(),
            content: "<p>body</p>".into(),
            permalink: "https://example.com/post.html".into(),
            ..PageData::default()
        };
        HtmlRenderer.render_page(&dest, &data).unwrap();

        let html = fs::read_to_string(&dest).unwrap();
        assert!(html.contains("<title>Hello | Site</title>"));
        assert!(html.contains("<p>body</p>"));
        assert!(html.contains("canonical"));
    }

    #[test]
    fn test_render_page_neighbors() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("p.html");

        let data = PageData {
            content: "<p>x</p>".into(),
            prev: Some(PostSummary {
                title: "Before".into(),
                link: "/before.html".into(),
                ..PostSummary::default()
            }),
            ..PageData::default()
        };
        HtmlRenderer.render_page(&dest, &data).unwrap();

        let html = fs::read_to_string(&dest).unwrap();
        assert!(html.contains(r#"rel="prev""#));
        assert!(html.contains("/before.html"));
        assert!(!html.contains(r#"rel="next""#));
    }

    #[test]
    fn test_diagram_cache_hit_without_renderer() {
        let services = Services::default();
        services
            .diagram_cache
            .insert("h1".into(), "<svg>cached</svg>".into());
        assert_eq!(
            services.diagram_svg("d2", "a -> b", "h1").unwrap(),
            "<svg>cached</svg>"
        );
        // No renderer wired and not cached
        assert!(services.diagram_svg("d2", "x -> y", "h2").is_none());
    }

    #[test]
    fn test_render_math_passthrough_without_renderer() {
        let services = Services::default();
        let (html, hashes) = services.render_math("<p>$x$</p>".into());
        assert_eq!(html, "<p>$x$</p>");
        assert!(hashes.is_empty());
    }

    struct FakeDiagrams;
    impl DiagramRenderer for FakeDiagrams {
        fn render(&self, kind: &str, source: &str) -> Result<String> {
            Ok(format!("<svg data-kind=\"{kind}\">{source}</svg>"))
        }
    }

    #[test]
    fn test_diagram_render_populates_cache() {
        let mut services = Services::default();
        services.diagrams = Some(Box::new(FakeDiagrams));

        let svg = services.diagram_svg("d2", "a -> b", "h3").unwrap();
        assert!(svg.contains("a -> b"));
        assert!(services.diagram_cache.contains_key("h3"));
    }
}
